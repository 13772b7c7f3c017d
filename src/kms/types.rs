//! Small value types shared by the display model and the commit engine.

use std::fmt;

use bitflags::bitflags;

use crate::error::KmsError;

// =============================================================================
// Constants
// =============================================================================

/// Pipes beyond this count are ignored at init.
pub const MAX_PIPES: usize = 6;

/// Plane slots per pipe: primary, overlays, cursor.
pub const MAX_PLANES: usize = 4;

/// Bitset of pipe indices, bit `n` meaning pipe `n`.
pub type PipeMask = u32;

/// Every pipe.
pub const ANY_PIPE: PipeMask = !0;

// =============================================================================
// Pipes
// =============================================================================

/// Index of a hardware timing generator (CRTC), displayed as `A`, `B`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipeId(usize);

impl PipeId {
    pub const A: Self = Self(0);
    pub const B: Self = Self(1);
    pub const C: Self = Self(2);

    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_PIPES).then_some(Self(index))
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn mask(self) -> PipeMask {
        1 << self.0
    }

    pub fn name(self) -> char {
        char::from(b'A' + self.0 as u8)
    }

    /// Parses a pipe name such as `B` (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let c = chars.next()?.to_ascii_uppercase();
        if chars.next().is_some() || !c.is_ascii_uppercase() {
            return None;
        }
        Self::new(usize::from(c as u8 - b'A'))
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Planes
// =============================================================================

/// Logical plane slot on a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneKind {
    Primary,
    /// The n-th overlay (sprite) plane, counting from zero.
    Overlay(usize),
    Cursor,
}

impl fmt::Display for PlaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Overlay(n) => write!(f, "overlay-{n}"),
            Self::Cursor => f.write_str("cursor"),
        }
    }
}

/// Values of the kernel's plane `type` enum property.
pub(crate) const DRM_PLANE_TYPE_OVERLAY: u64 = 0;
pub(crate) const DRM_PLANE_TYPE_PRIMARY: u64 = 1;
pub(crate) const DRM_PLANE_TYPE_CURSOR: u64 = 2;

bitflags! {
    /// Plane fields changed since the last successful commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PlaneDirty: u8 {
        const FB = 1 << 0;
        const POSITION = 1 << 1;
        const PANNING = 1 << 2;
        const ROTATION = 1 << 3;
        const SIZE = 1 << 4;
    }
}

impl PlaneDirty {
    /// Fields carried by a plane programming call (legacy set-CRTC or set-plane).
    pub const GEOMETRY: Self = Self::FB
        .union(Self::POSITION)
        .union(Self::PANNING)
        .union(Self::SIZE);
}

/// Plane rotation, using the kernel's one-hot `rotation` property values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Rotation {
    #[default]
    Rotate0 = 1 << 0,
    Rotate90 = 1 << 1,
    Rotate180 = 1 << 2,
    Rotate270 = 1 << 3,
}

impl Rotation {
    pub fn bits(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Rotation {
    type Error = KmsError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Rotate0),
            2 => Ok(Self::Rotate90),
            4 => Ok(Self::Rotate180),
            8 => Ok(Self::Rotate270),
            _ => Err(KmsError::InvalidArgument(format!(
                "rotation {value:#x} is not a single rotation value"
            ))),
        }
    }
}

// =============================================================================
// Commit
// =============================================================================

/// Kernel API used to program the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitStyle {
    /// Mode and primary plane through set-CRTC, cursor through the cursor ioctls.
    Legacy,
    /// Mode through set-CRTC, every plane through set-plane.
    Universal,
}

impl From<kmsdisplay_config::CommitStyle> for CommitStyle {
    fn from(style: kmsdisplay_config::CommitStyle) -> Self {
        match style {
            kmsdisplay_config::CommitStyle::Legacy => Self::Legacy,
            kmsdisplay_config::CommitStyle::Universal => Self::Universal,
        }
    }
}

// =============================================================================
// Framebuffers
// =============================================================================

/// A framebuffer created and owned by the caller.
///
/// Planes keep a copy of these ids for the next commit; removing the framebuffer while a plane
/// still points at it is the caller's problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framebuffer {
    pub id: u32,
    /// GEM handle of the backing buffer, used by the legacy cursor API.
    pub gem_handle: u32,
    pub width: u32,
    pub height: u32,
    /// Fourcc pixel format.
    pub format: u32,
    pub modifier: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_names() {
        assert_eq!(PipeId::A.to_string(), "A");
        assert_eq!(PipeId::C.name(), 'C');
        assert_eq!(PipeId::from_name("b"), Some(PipeId::B));
        assert_eq!(PipeId::from_name("F"), PipeId::new(5));
        assert_eq!(PipeId::from_name("G"), None);
        assert_eq!(PipeId::from_name("AB"), None);
        assert_eq!(PipeId::from_name(""), None);
        assert_eq!(PipeId::from_name("1"), None);
    }

    #[test]
    fn pipe_masks() {
        assert_eq!(PipeId::A.mask(), 0b001);
        assert_eq!(PipeId::C.mask(), 0b100);
        assert_eq!(PipeId::new(MAX_PIPES), None);
    }

    #[test]
    fn rotation_from_raw() {
        assert_eq!(Rotation::try_from(2).unwrap(), Rotation::Rotate90);
        assert_eq!(Rotation::Rotate270.bits(), 8);
        assert!(Rotation::try_from(0).is_err());
        assert!(Rotation::try_from(3).is_err());
        assert!(Rotation::try_from(16).is_err());
    }

    #[test]
    fn plane_kind_names() {
        assert_eq!(PlaneKind::Overlay(1).to_string(), "overlay-1");
        assert_eq!(PlaneKind::Cursor.to_string(), "cursor");
    }
}
