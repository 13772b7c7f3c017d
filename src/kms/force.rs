//! Forcing connector state through the kernel's debug interfaces.
//!
//! The connector status lives in sysfs (`class/drm/card<N>-<connector>/status`), the EDID override
//! in debugfs (`dri/<N>/<connector>/edid_override`). Both take effect on the next connector detection.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context};
use kmsdisplay_config::ForceState;
use tracing::{debug, warn};

use crate::edid::{is_block_valid, EDID_LENGTH};

/// Where sysfs and debugfs are mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceRoots {
    pub sysfs: PathBuf,
    pub debugfs: PathBuf,
}

impl Default for ForceRoots {
    fn default() -> Self {
        Self {
            sysfs: PathBuf::from("/sys"),
            debugfs: PathBuf::from("/sys/kernel/debug"),
        }
    }
}

impl ForceRoots {
    pub fn new(sysfs: Option<&Path>, debugfs: Option<&Path>) -> Self {
        let default = Self::default();
        Self {
            sysfs: sysfs.map_or(default.sysfs, Path::to_owned),
            debugfs: debugfs.map_or(default.debugfs, Path::to_owned),
        }
    }

    pub fn status_path(&self, card: u32, connector: &str) -> PathBuf {
        self.sysfs
            .join("class/drm")
            .join(format!("card{card}-{connector}"))
            .join("status")
    }

    pub fn edid_override_path(&self, card: u32, connector: &str) -> PathBuf {
        self.debugfs
            .join("dri")
            .join(card.to_string())
            .join(connector)
            .join("edid_override")
    }

    /// Forces `connector` on card `card` into `state`; `Unspecified` goes back to detection.
    pub fn force_connector(
        &self,
        card: u32,
        connector: &str,
        state: ForceState,
    ) -> anyhow::Result<()> {
        let path = self.status_path(card, connector);
        let value = force_state_str(state);
        debug!("forcing {connector} {value}");

        fs::write(&path, value).with_context(|| format!("error writing {value:?} to {path:?}"))
    }

    /// Overrides the EDID of `connector`, or removes the override with `None`.
    pub fn force_edid(
        &self,
        card: u32,
        connector: &str,
        edid: Option<&[u8]>,
    ) -> anyhow::Result<()> {
        let path = self.edid_override_path(card, connector);

        match edid {
            Some(edid) => {
                ensure!(
                    !edid.is_empty() && edid.len() % EDID_LENGTH == 0,
                    "EDID length {} is not a multiple of {EDID_LENGTH}",
                    edid.len()
                );
                ensure!(
                    edid.chunks(EDID_LENGTH).all(is_block_valid),
                    "EDID has a block with a bad checksum"
                );
                debug!("overriding EDID of {connector} ({} bytes)", edid.len());
                fs::write(&path, edid)
            }
            None => {
                debug!("resetting EDID override of {connector}");
                fs::write(&path, "reset")
            }
        }
        .with_context(|| format!("error writing {path:?}"))
    }
}

/// Forces connectors of one card and remembers which, so that everything can be put back.
#[derive(Debug)]
pub struct ConnectorForcer {
    roots: ForceRoots,
    card: u32,
    /// Connectors whose status is forced.
    status: BTreeSet<String>,
    /// Connectors with an EDID override.
    edid: BTreeSet<String>,
}

impl ConnectorForcer {
    pub fn new(roots: ForceRoots, card: u32) -> Self {
        Self {
            roots,
            card,
            status: BTreeSet::new(),
            edid: BTreeSet::new(),
        }
    }

    pub fn roots(&self) -> &ForceRoots {
        &self.roots
    }

    pub fn force_connector(&mut self, connector: &str, state: ForceState) -> anyhow::Result<()> {
        self.roots.force_connector(self.card, connector, state)?;
        if state == ForceState::Unspecified {
            self.status.remove(connector);
        } else {
            self.status.insert(connector.to_owned());
        }
        Ok(())
    }

    pub fn force_edid(&mut self, connector: &str, edid: Option<&[u8]>) -> anyhow::Result<()> {
        self.roots.force_edid(self.card, connector, edid)?;
        if edid.is_some() {
            self.edid.insert(connector.to_owned());
        } else {
            self.edid.remove(connector);
        }
        Ok(())
    }

    /// Forces every connector in `connectors` on. Connectors that can't be forced are skipped;
    /// returns how many were.
    pub fn enable_connectors<'a>(
        &mut self,
        connectors: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        let mut forced = 0;
        for connector in connectors {
            match self.force_connector(connector, ForceState::On) {
                Ok(()) => forced += 1,
                Err(err) => warn!("error forcing {connector} on: {err:?}"),
            }
        }
        forced
    }

    /// Returns every forced connector to detection and removes every EDID override.
    ///
    /// Connectors that fail to reset stay recorded, so a later call retries them.
    pub fn reset_connectors(&mut self) -> anyhow::Result<()> {
        let mut failed = 0;

        for connector in std::mem::take(&mut self.status) {
            let res = self
                .roots
                .force_connector(self.card, &connector, ForceState::Unspecified);
            if let Err(err) = res {
                warn!("error resetting status of {connector}: {err:?}");
                self.status.insert(connector);
                failed += 1;
            }
        }

        for connector in std::mem::take(&mut self.edid) {
            if let Err(err) = self.roots.force_edid(self.card, &connector, None) {
                warn!("error removing EDID override of {connector}: {err:?}");
                self.edid.insert(connector);
                failed += 1;
            }
        }

        ensure!(failed == 0, "{failed} connector settings could not be reset");
        Ok(())
    }

    /// Connectors with a forced status or EDID.
    pub fn forced(&self) -> impl Iterator<Item = &str> {
        self.status.union(&self.edid).map(String::as_str)
    }
}

/// Value of the sysfs `status` file for `state`.
pub fn force_state_str(state: ForceState) -> &'static str {
    match state {
        ForceState::Unspecified => "detect",
        ForceState::On => "on",
        ForceState::Digital => "on-digital",
        ForceState::Off => "off",
    }
}
