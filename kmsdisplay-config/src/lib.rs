//! KDL configuration for kmsdisplay.
//!
//! A config names the DRM card to open, the commit style to use, and the outputs to drive:
//!
//! ```kdl
//! card "/dev/dri/card0"
//! commit-style "universal"
//!
//! output "HDMI-A-1" {
//!     pipe "B"
//!     force "on"
//!     edid "uhd" "audio" base="alt"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use miette::{Context, IntoDiagnostic};
use tracing::debug;

pub mod output;

pub use output::{
    EdidBase, EdidConfig, EdidExtensionName, ForceState, Modeline, Output, SyncPolarity,
};

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[knuffel(child, unwrap(argument))]
    pub card: Option<PathBuf>,
    #[knuffel(child, unwrap(argument))]
    pub commit_style: Option<CommitStyle>,
    #[knuffel(child, default)]
    pub debug: DebugConfig,
    #[knuffel(children(name = "output"))]
    pub outputs: Vec<Output>,
}

#[derive(knuffel::DecodeScalar, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStyle {
    Legacy,
    Universal,
}

/// Locations of the kernel debug interfaces used to force connector state.
#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct DebugConfig {
    #[knuffel(child, unwrap(argument))]
    pub sysfs_root: Option<PathBuf>,
    #[knuffel(child, unwrap(argument))]
    pub debugfs_root: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let contents = fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("config.kdl");
        let config = Self::parse(filename, &contents).context("error parsing")?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        knuffel::parse(filename, text)
    }

    /// Finds the output section for a connector name such as `HDMI-A-1`.
    pub fn output(&self, connector: &str) -> Option<&Output> {
        self.outputs
            .iter()
            .find(|output| output.connector.eq_ignore_ascii_case(connector))
    }
}
