use super::*;

/// Maximum attribute value length ([Vol 3] Part F, Section 3.2.9).
pub const MAX_VAL_LEN: usize = 512;

/// Attribute opcodes used by the engine ([Vol 3] Part F, Section 3.4.8).
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Opcode {
    ReadReq = 0x0A,
    ReadBlobReq = 0x0C,
    WriteReq = 0x12,
    WriteCmd = 0x52,
    HandleValueNtf = 0x1B,
}

impl Opcode {
    /// Returns the read opcode for a value offset.
    #[inline]
    #[must_use]
    pub const fn read(off: u16) -> Self {
        if off == 0 {
            Self::ReadReq
        } else {
            Self::ReadBlobReq
        }
    }

    /// Returns read/write access type being performed
    /// ([Vol 3] Part F, Section 3.4.9).
    #[must_use]
    pub const fn access_type(self) -> Option<Access> {
        use Opcode::*;
        match self {
            ReadReq | ReadBlobReq => Some(Access::READ),
            WriteReq | WriteCmd => Some(Access::WRITE),
            HandleValueNtf => None,
        }
    }
}

/// ATT, Common Profile and Service, and VCS/VOCS application error codes
/// ([Vol 3] Part F, Section 3.4.1.1, \[CSS\] Part B, Section 1.2,
/// [VCS] Section 1.6, and [VOCS] Section 1.6).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    thiserror::Error,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    /// The attribute handle given was not valid on this server.
    InvalidHandle = 0x01,
    /// The attribute cannot be read.
    ReadNotPermitted = 0x02,
    /// The attribute cannot be written.
    WriteNotPermitted = 0x03,
    /// The attribute PDU was invalid.
    InvalidPdu = 0x04,
    /// ATT Server does not support the request received from the client.
    RequestNotSupported = 0x06,
    /// Offset specified was past the end of the attribute.
    InvalidOffset = 0x07,
    /// No attribute found within the given attribute handle range.
    AttributeNotFound = 0x0A,
    /// The attribute value length is invalid for the operation.
    InvalidAttributeValueLength = 0x0D,
    /// The attribute request that was requested has encountered an error that
    /// was unlikely, and therefore could not be completed as requested.
    UnlikelyError = 0x0E,
    /// The Change_Counter operand value does not match the current value of
    /// the Change_Counter field.
    InvalidChangeCounter = 0x80,
    /// An invalid opcode was used or the parameters of a known opcode were
    /// too short.
    OpcodeNotSupported = 0x81,
    /// An operand value used in the procedure is outside of the permissible
    /// range.
    ValueOutOfRange = 0x82,
    /// Client Characteristic Configuration descriptor is not configured
    /// according to the requirements of the profile or service.
    CccdImproperlyConfigured = 0xFD,
    /// Request cannot be serviced because an operation that has been previously
    /// triggered is still in progress.
    ProcedureAlreadyInProgress = 0xFE,
    /// Attribute value is out of range.
    OutOfRange = 0xFF,
}

impl ErrorCode {
    /// Returns whether the code is in the application error range
    /// ([Vol 3] Part F, Section 3.4.1.1).
    #[inline]
    #[must_use]
    pub const fn is_application(self) -> bool {
        matches!(self as u8, 0x80..=0x9F)
    }
}

crate::impl_display_via_debug! { Opcode, ErrorCode }
