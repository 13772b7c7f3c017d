//! Outputs: the connectors a caller wants to drive.

use smithay::reexports::drm::control::Mode;

use super::resolver::ConnectorConfig;
use super::types::{PipeId, PipeMask};

/// One connector of the device.
///
/// An output starts invalid and becomes valid once a commit resolves it to a pipe.
#[derive(Debug)]
pub struct Output {
    pub(super) id: u32,
    pub(super) name: String,
    pub(super) valid: bool,
    /// Pipes the caller allows, 0 when no pipe is requested.
    pub(super) pending_mask: PipeMask,
    /// Set by set_pipe(), cleared when the next commit resolves the output.
    pub(super) needs_resolve: bool,
    pub(super) config: Option<ConnectorConfig>,
    pub(super) override_mode: Option<Mode>,
}

impl Output {
    pub(super) fn new(id: u32, name: String) -> Self {
        Self {
            id,
            name,
            valid: false,
            pending_mask: 0,
            needs_resolve: false,
            config: None,
            override_mode: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn pending_mask(&self) -> PipeMask {
        self.pending_mask
    }

    pub fn config(&self) -> Option<&ConnectorConfig> {
        self.config.as_ref()
    }

    /// Pipe the output was resolved to by the last commit.
    pub fn pipe(&self) -> Option<PipeId> {
        self.config.as_ref().map(|config| config.pipe)
    }

    /// Pipe that plane lookups refer to: the single requested pipe, else the resolved one.
    pub fn assigned_pipe(&self) -> Option<PipeId> {
        if self.pending_mask.count_ones() == 1 {
            return PipeId::new(self.pending_mask.trailing_zeros() as usize);
        }

        self.pipe()
            .filter(|pipe| self.pending_mask & pipe.mask() != 0)
    }

    pub fn override_mode(&self) -> Option<&Mode> {
        self.override_mode.as_ref()
    }

    /// Mode the output is driven with: the override if set, else the connector's default.
    pub fn mode(&self) -> Option<Mode> {
        self.override_mode
            .or_else(|| self.config.as_ref().map(|config| config.default_mode))
    }
}
