use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Minimum volume offset ([VOCS] Section 3.1.1).
pub const OFFSET_MIN: i16 = -255;

/// Maximum volume offset ([VOCS] Section 3.1.1).
pub const OFFSET_MAX: i16 = 255;

/// Volume Control Point opcodes ([VCS] Section 3.2).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    IntoPrimitive,
    Ord,
    PartialEq,
    PartialOrd,
    TryFromPrimitive,
    enum_iterator::Sequence,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum VcsOp {
    RelativeVolumeDown = 0x00,
    RelativeVolumeUp = 0x01,
    UnmuteRelativeVolumeDown = 0x02,
    UnmuteRelativeVolumeUp = 0x03,
    SetAbsoluteVolume = 0x04,
    Unmute = 0x05,
    Mute = 0x06,
}

impl VcsOp {
    /// Returns the operation name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        use VcsOp::*;
        match self {
            RelativeVolumeDown => "Relative Volume Down",
            RelativeVolumeUp => "Relative Volume Up",
            UnmuteRelativeVolumeDown => "Unmute and Relative Volume Down",
            UnmuteRelativeVolumeUp => "Unmute and Relative Volume Up",
            SetAbsoluteVolume => "Set Absolute Volume",
            Unmute => "Unmute",
            Mute => "Mute",
        }
    }

    /// Returns the minimum parameter length following the opcode.
    #[must_use]
    pub const fn param_len(self) -> usize {
        match self {
            Self::SetAbsoluteVolume => 2,
            _ => 1,
        }
    }
}

/// Volume Offset Control Point opcodes ([VOCS] Section 3.3).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    IntoPrimitive,
    Ord,
    PartialEq,
    PartialOrd,
    TryFromPrimitive,
    enum_iterator::Sequence,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum VocsOp {
    SetVolumeOffset = 0x01,
}

impl VocsOp {
    /// Returns the operation name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SetVolumeOffset => "Set Volume Offset",
        }
    }

    /// Returns the minimum parameter length following the opcode.
    #[must_use]
    pub const fn param_len(self) -> usize {
        match self {
            Self::SetVolumeOffset => 3,
        }
    }
}

/// Volume Flags characteristic value ([VCS] Section 3.3).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    IntoPrimitive,
    PartialEq,
    TryFromPrimitive,
    serde::Deserialize,
    serde::Serialize,
)]
#[repr(u8)]
pub enum VolumeFlag {
    /// Volume setting has not been changed since reset.
    Reset = 0x00,
    /// Volume setting was changed by the user.
    UserSet = 0x01,
}

bitflags::bitflags! {
    /// Audio Location characteristic value ([VOCS] Section 3.2).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[derive(serde::Deserialize, serde::Serialize)]
    #[serde(transparent)]
    #[repr(transparent)]
    pub struct AudioLocation: u32 {
        const NOT_ALLOWED = 1 << 0;
        const FRONT_LEFT = 1 << 1;
        const FRONT_RIGHT = 1 << 2;
        const FRONT_CENTER = 1 << 3;
        const LOW_FREQUENCY_EFFECTS_1 = 1 << 4;
        const BACK_LEFT = 1 << 5;
        const BACK_RIGHT = 1 << 6;
        const FRONT_LEFT_OF_CENTER = 1 << 7;
        const FRONT_RIGHT_OF_CENTER = 1 << 8;
        const BACK_CENTER = 1 << 9;
        const LOW_FREQUENCY_EFFECTS_2 = 1 << 10;
        const SIDE_LEFT = 1 << 11;
        const SIDE_RIGHT = 1 << 12;
        const TOP_FRONT_LEFT = 1 << 13;
        const TOP_FRONT_RIGHT = 1 << 14;
        const TOP_FRONT_CENTER = 1 << 15;
        const TOP_CENTER = 1 << 16;
        const TOP_BACK_LEFT = 1 << 17;
        const TOP_BACK_RIGHT = 1 << 18;
        const TOP_SIDE_LEFT = 1 << 19;
        const TOP_SIDE_RIGHT = 1 << 20;
        const TOP_BACK_CENTER = 1 << 21;
        const BOTTOM_FRONT_CENTER = 1 << 22;
        const BOTTOM_FRONT_LEFT = 1 << 23;
        const BOTTOM_FRONT_RIGHT = 1 << 24;
        const FRONT_LEFT_WIDE = 1 << 25;
        const FRONT_RIGHT_WIDE = 1 << 26;
        const LEFT_SURROUND = 1 << 27;
        const RIGHT_SURROUND = 1 << 28;
    }
}
