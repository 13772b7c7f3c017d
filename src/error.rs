//! Errors returned by the display model and the commit engine.

use std::io;

use thiserror::Error;

use crate::kms::{PipeId, PlaneKind};

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("connector {0} not found")]
    ConnectorNotFound(u32),

    #[error("connector {0} is not connected")]
    ConnectorDisconnected(u32),

    #[error("no suitable pipe for connector {connector} (allowed pipes {allowed:#x})")]
    NoSuitablePipe { connector: u32, allowed: u32 },

    #[error("connector {0} has no modes")]
    NoModeAvailable(u32),

    #[error("output {0} has no pipe assigned")]
    NoPipeAssigned(String),

    #[error("pipe {pipe} has no {kind} plane")]
    PlaneNotFound { pipe: PipeId, kind: PlaneKind },

    #[error("{0} cannot be programmed with a legacy commit")]
    UnsupportedInLegacyMode(&'static str),

    #[error("plane {plane} on pipe {pipe} does not support rotation")]
    RotationUnsupported { pipe: PipeId, plane: usize },

    #[error("property {0:?} not found")]
    PropertyNotFound(String),

    #[error("{0} is not supported by this device")]
    UnsupportedFeature(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "plane {plane} on pipe {pipe} is {width}x{height}, \
         larger than the {mode_width}x{mode_height} mode"
    )]
    PlaneExceedsMode {
        pipe: PipeId,
        plane: usize,
        width: u32,
        height: u32,
        mode_width: u16,
        mode_height: u16,
    },

    #[error("{call} failed with error code {code}")]
    HardwareRejected { call: &'static str, code: i32 },
}

impl KmsError {
    /// Converts a failed kernel call into [`KmsError::HardwareRejected`].
    pub fn hardware(call: &'static str, err: io::Error) -> Self {
        let errno = err.raw_os_error().unwrap_or(libc::EIO);
        Self::HardwareRejected { call, code: -errno }
    }

    /// Negative errno-style code for this error.
    ///
    /// Hardware errors carry the kernel's own code.
    pub fn code(&self) -> i32 {
        let errno = match self {
            Self::HardwareRejected { code, .. } => return *code,
            Self::ConnectorNotFound(_) | Self::PlaneNotFound { .. } | Self::PropertyNotFound(_) => {
                libc::ENOENT
            }
            Self::ConnectorDisconnected(_) => libc::ENODEV,
            Self::NoSuitablePipe { .. } => libc::EBUSY,
            Self::NoModeAvailable(_) | Self::NoPipeAssigned(_) | Self::InvalidArgument(_) => {
                libc::EINVAL
            }
            Self::UnsupportedInLegacyMode(_)
            | Self::RotationUnsupported { .. }
            | Self::UnsupportedFeature(_) => libc::EOPNOTSUPP,
            Self::PlaneExceedsMode { .. } => libc::ERANGE,
        };
        -errno
    }

    /// Whether this error was raised before any hardware call was attempted.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectorNotFound(_)
                | Self::ConnectorDisconnected(_)
                | Self::NoSuitablePipe { .. }
                | Self::NoModeAvailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_error_keeps_kernel_code() {
        let err = KmsError::hardware("set_crtc", io::Error::from_raw_os_error(libc::EINVAL));
        assert_eq!(err.code(), -libc::EINVAL);
        assert_eq!(err.to_string(), format!("set_crtc failed with error code {}", -libc::EINVAL));
    }

    #[test]
    fn synthetic_io_error_maps_to_eio() {
        let err = KmsError::hardware("set_plane", io::Error::other("boom"));
        assert_eq!(err.code(), -libc::EIO);
    }

    #[test]
    fn codes_are_negative() {
        let errors = [
            KmsError::NoModeAvailable(1),
            KmsError::UnsupportedInLegacyMode("overlay plane"),
            KmsError::RotationUnsupported { pipe: PipeId::A, plane: 1 },
            KmsError::PropertyNotFound(String::from("rotation")),
        ];
        for err in errors {
            assert!(err.code() < 0, "{err}");
        }
    }
}
