use bitflags::bitflags;

use super::*;

bitflags! {
    /// Attribute access permissions ([Vol 3] Part F, Section 3.2.5).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[repr(transparent)]
    pub struct Access: u8 {
        /// Attribute value may be read.
        const READ = 1 << 0;
        /// Attribute value may be written.
        const WRITE = 1 << 1;
        /// Attribute value may be read and written.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Access {
    /// No access.
    pub const NONE: Self = Self::empty();

    /// Tests whether an access request should be allowed.
    #[inline]
    pub const fn test(self, req: Self) -> Result<(), ErrorCode> {
        if self.contains(req) {
            Ok(())
        } else if req.contains(Self::READ) {
            Err(ErrorCode::ReadNotPermitted)
        } else {
            Err(ErrorCode::WriteNotPermitted)
        }
    }
}
