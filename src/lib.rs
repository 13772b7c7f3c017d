//! Kernel modesetting display model.
//!
//! [`kms::Display`] discovers a DRM device's pipes, planes and connectors, buffers the state a
//! test wants on screen, and commits it through either the legacy CRTC/cursor API or the
//! universal plane API. [`edid`] forges EDID blocks that can be injected into connectors with
//! [`kms::force`].

pub mod edid;
pub mod error;
pub mod kms;

pub use error::KmsError;
