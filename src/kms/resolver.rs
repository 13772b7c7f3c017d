//! Matching a connector to a pipe, an encoder and a mode.

use smithay::reexports::drm::control::{connector, Mode};
use tracing::{debug, trace};

use super::device::{ConnectorInfo, CrtcInfo, EncoderInfo, KmsDevice};
use super::helpers::default_mode;
use super::types::{PipeId, PipeMask, MAX_PIPES};
use crate::error::KmsError;

/// A connector resolved to a pipe.
///
/// The three object snapshots are only meaningful together and are dropped together.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorConfig {
    pub crtc: CrtcInfo,
    pub connector: ConnectorInfo,
    pub encoder: EncoderInfo,
    pub default_mode: Mode,
    pub pipe: PipeId,
}

/// Resolve `connector_id` to the lowest pipe allowed by both its encoders and `allowed`.
///
/// Only queries the device.
pub fn resolve<D: KmsDevice + ?Sized>(
    device: &D,
    connector_id: u32,
    allowed: PipeMask,
) -> Result<ConnectorConfig, KmsError> {
    let resources = device
        .resources()
        .map_err(|err| KmsError::hardware("get_resources", err))?;

    let connector = match device.connector(connector_id, true) {
        Ok(connector) => connector,
        Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {
            return Err(KmsError::ConnectorNotFound(connector_id));
        }
        Err(err) => return Err(KmsError::hardware("get_connector", err)),
    };

    if connector.state != connector::State::Connected {
        return Err(KmsError::ConnectorDisconnected(connector_id));
    }

    let encoders = connector
        .encoders
        .iter()
        .map(|&id| device.encoder(id))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| KmsError::hardware("get_encoder", err))?;

    let n_pipes = resources.crtcs.len().min(MAX_PIPES);
    let (pipe, encoder) = (0..n_pipes)
        .filter_map(PipeId::new)
        .filter(|pipe| allowed & pipe.mask() != 0)
        .find_map(|pipe| {
            encoders
                .iter()
                .find(|encoder| encoder.possible_crtcs & pipe.mask() != 0)
                .map(|encoder| (pipe, *encoder))
        })
        .ok_or(KmsError::NoSuitablePipe {
            connector: connector_id,
            allowed,
        })?;
    trace!("connector {connector_id}: encoder {} can drive pipe {pipe}", encoder.id);

    let default_mode =
        default_mode(&connector.modes).ok_or(KmsError::NoModeAvailable(connector_id))?;

    let crtc = device
        .crtc(resources.crtcs[pipe.index()])
        .map_err(|err| KmsError::hardware("get_crtc", err))?;

    debug!(
        "resolved {} to pipe {pipe} (crtc {}, encoder {})",
        connector.name(),
        crtc.id,
        encoder.id
    );

    Ok(ConnectorConfig {
        crtc,
        connector,
        encoder,
        default_mode,
        pipe,
    })
}
