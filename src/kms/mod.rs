//! The display model of one DRM device.
//!
//! [`Display::init`] snapshots the device's pipes, planes and connectors. Callers then pick pipes
//! for outputs and stage plane state; nothing reaches the hardware until a commit (see
//! [`commit`]).

use arrayvec::ArrayVec;
use smithay::reexports::drm::control::Mode;
use smithay::reexports::drm::ClientCapability;
use tracing::{debug, info, warn};

use crate::error::KmsError;

pub mod commit;
pub mod device;
pub mod force;
pub mod helpers;
pub mod outputs;
pub mod pipe;
pub mod resolver;
mod types;

#[cfg(test)]
mod tests;

pub use device::{Card, DrmObject, KmsDevice};
pub use outputs::Output;
pub use pipe::{Pipe, Plane};
pub use resolver::ConnectorConfig;
pub use types::{
    CommitStyle, Framebuffer, PipeId, PipeMask, PlaneDirty, PlaneKind, Rotation, ANY_PIPE,
    MAX_PIPES, MAX_PLANES,
};

use self::device::PlaneInfo;
use self::helpers::find_property_opt;
use self::types::{DRM_PLANE_TYPE_CURSOR, DRM_PLANE_TYPE_OVERLAY, DRM_PLANE_TYPE_PRIMARY};

pub struct Display<D: KmsDevice> {
    device: D,
    has_universal_planes: bool,
    pipes: ArrayVec<Pipe, MAX_PIPES>,
    outputs: Vec<Output>,
    pipes_in_use: PipeMask,
}

impl<D: KmsDevice> Display<D> {
    pub fn init(mut device: D) -> Result<Self, KmsError> {
        let _span = tracy_client::span!("Display::init");

        let has_universal_planes =
            match device.set_client_capability(ClientCapability::UniversalPlanes, true) {
                Ok(()) => true,
                Err(err) => {
                    debug!("universal planes unavailable: {err:?}");
                    false
                }
            };

        let resources = device
            .resources()
            .map_err(|err| KmsError::hardware("get_resources", err))?;
        if resources.crtcs.len() > MAX_PIPES {
            warn!(
                "device has {} CRTCs, only the first {MAX_PIPES} are used",
                resources.crtcs.len()
            );
        }

        let plane_infos = device
            .planes()
            .map_err(|err| KmsError::hardware("get_plane_resources", err))?;
        let mut claimed_planes = Vec::new();

        let mut pipes = ArrayVec::new();
        for (index, &crtc_id) in resources.crtcs.iter().take(MAX_PIPES).enumerate() {
            let Some(id) = PipeId::new(index) else {
                break;
            };

            let crtc = device
                .crtc(crtc_id)
                .map_err(|err| KmsError::hardware("get_crtc", err))?;
            let (background_property, background) =
                find_property_opt(&device, DrmObject::Crtc(crtc_id), "background_color")
                    .unwrap_or((0, 0));

            let planes = if has_universal_planes {
                universal_planes(&device, id, &plane_infos, &mut claimed_planes)
            } else {
                legacy_planes(&device, id, &plane_infos)
            };

            debug!(
                "pipe {id}: crtc {crtc_id}, {} planes, background property {background_property}",
                planes.len()
            );

            pipes.push(Pipe {
                id,
                crtc_id,
                enabled: crtc.mode.is_some(),
                planes,
                background,
                background_changed: false,
                background_property,
                modeset_pending: false,
                disable_pending: false,
            });
        }

        let mut outputs = Vec::with_capacity(resources.connectors.len());
        for &connector_id in &resources.connectors {
            let connector = device
                .connector(connector_id, false)
                .map_err(|err| KmsError::hardware("get_connector", err))?;
            outputs.push(Output::new(connector_id, connector.name()));
        }

        info!(
            "display: {} pipes, {} outputs, universal planes: {has_universal_planes}",
            pipes.len(),
            outputs.len()
        );

        Ok(Self {
            device,
            has_universal_planes,
            pipes,
            outputs,
            pipes_in_use: 0,
        })
    }

    /// Tears the model down and hands the device back.
    pub fn fini(self) -> D {
        self.device
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn n_pipes(&self) -> usize {
        self.pipes.len()
    }

    pub fn has_universal_planes(&self) -> bool {
        self.has_universal_planes
    }

    pub fn pipes_in_use(&self) -> PipeMask {
        self.pipes_in_use
    }

    pub fn pipes(&self) -> &[Pipe] {
        &self.pipes
    }

    pub fn pipe(&self, id: PipeId) -> Option<&Pipe> {
        self.pipes.get(id.index())
    }

    pub fn pipe_mut(&mut self, id: PipeId) -> Option<&mut Pipe> {
        self.pipes.get_mut(id.index())
    }

    pub fn pipe_from_crtc_id(&self, crtc_id: u32) -> Option<PipeId> {
        self.pipes
            .iter()
            .find(|pipe| pipe.crtc_id == crtc_id)
            .map(|pipe| pipe.id)
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn output(&self, output: usize) -> Option<&Output> {
        self.outputs.get(output)
    }

    /// Index of the output driving the connector called `name`, e.g. `DP-2`.
    pub fn find_output(&self, name: &str) -> Option<usize> {
        self.outputs
            .iter()
            .position(|output| output.name.eq_ignore_ascii_case(name))
    }

    fn output_mut(&mut self, output: usize) -> Result<&mut Output, KmsError> {
        self.outputs
            .get_mut(output)
            .ok_or_else(|| KmsError::InvalidArgument(format!("no output {output}")))
    }

    /// Requests `pipe` for `output`, or any free pipe with `None`.
    ///
    /// The output is resolved by the next commit.
    pub fn set_pipe(&mut self, output: usize, pipe: Option<PipeId>) -> Result<(), KmsError> {
        if let Some(pipe) = pipe {
            if pipe.index() >= self.pipes.len() {
                return Err(KmsError::InvalidArgument(format!(
                    "pipe {pipe} does not exist"
                )));
            }
        }

        let output = self.output_mut(output)?;
        output.pending_mask = pipe.map_or(ANY_PIPE, PipeId::mask);
        output.needs_resolve = true;
        debug!("{}: requesting pipe {pipe:?}", output.name);
        Ok(())
    }

    /// Stops driving `output`; its pipe is turned off by the next commit.
    pub fn clear_pipe(&mut self, output: usize) -> Result<(), KmsError> {
        let output = self.output_mut(output)?;
        output.pending_mask = 0;
        output.needs_resolve = true;
        Ok(())
    }

    /// Drives `output` with `mode` instead of the connector's default mode.
    pub fn override_mode(&mut self, output: usize, mode: Option<Mode>) -> Result<(), KmsError> {
        let output = self.output_mut(output)?;
        if output.override_mode == mode {
            return Ok(());
        }

        output.override_mode = mode;
        let pipe = output.pipe();
        if let Some(pipe) = pipe.and_then(|pipe| self.pipes.get_mut(pipe.index())) {
            pipe.modeset_pending = true;
        }
        Ok(())
    }

    /// Plane in slot `kind` of the pipe assigned to `output`.
    pub fn get_plane(&mut self, output: usize, kind: PlaneKind) -> Result<&mut Plane, KmsError> {
        let output = self
            .outputs
            .get(output)
            .ok_or_else(|| KmsError::InvalidArgument(format!("no output {output}")))?;
        let pipe = output
            .assigned_pipe()
            .ok_or_else(|| KmsError::NoPipeAssigned(output.name.clone()))?;

        self.pipes
            .get_mut(pipe.index())
            .and_then(|p| p.plane_mut(kind))
            .ok_or(KmsError::PlaneNotFound { pipe, kind })
    }

    /// Turns every CRTC off right away.
    ///
    /// Pipes that still drive an output are lit again by the next commit.
    pub fn unset_all_crtcs(&mut self) -> Result<(), KmsError> {
        for pipe in &mut self.pipes {
            self.device
                .set_crtc(pipe.crtc_id, None, (0, 0), &[], None)
                .map_err(|err| KmsError::hardware("set_crtc", err))?;
            pipe.mark_off();
            if self.pipes_in_use & pipe.id.mask() != 0 {
                pipe.modeset_pending = true;
            }
        }
        Ok(())
    }

    /// Blocks until the next vertical blank on `pipe`. The pipe has to be lit.
    pub fn wait_for_vblank(&self, pipe: PipeId) -> Result<(), KmsError> {
        if pipe.index() >= self.pipes.len() {
            return Err(KmsError::InvalidArgument(format!("pipe {pipe} does not exist")));
        }
        self.device
            .wait_vblank(pipe.index() as u32)
            .map_err(|err| KmsError::hardware("wait_vblank", err))
    }
}

/// Slots for a pipe from the kernel's own plane types.
fn universal_planes<D: KmsDevice>(
    device: &D,
    pipe: PipeId,
    infos: &[PlaneInfo],
    claimed: &mut Vec<u32>,
) -> ArrayVec<Plane, MAX_PLANES> {
    let mut primary = None;
    let mut cursor = None;
    let mut overlays = Vec::new();

    for info in infos.iter().filter(|info| info.possible_crtcs & pipe.mask() != 0) {
        let ty = match find_property_opt(device, DrmObject::Plane(info.id), "type") {
            Some((_, ty)) => ty,
            None => {
                warn!("plane {} has no type property, treating it as an overlay", info.id);
                DRM_PLANE_TYPE_OVERLAY
            }
        };

        match ty {
            DRM_PLANE_TYPE_PRIMARY if primary.is_none() && !claimed.contains(&info.id) => {
                primary = Some(info.id);
            }
            DRM_PLANE_TYPE_CURSOR if cursor.is_none() && !claimed.contains(&info.id) => {
                cursor = Some(info.id);
            }
            DRM_PLANE_TYPE_OVERLAY => overlays.push(info.id),
            _ => (),
        }
    }
    claimed.extend(primary.iter().chain(cursor.iter()));

    let max_overlays = MAX_PLANES - 2;
    if overlays.len() > max_overlays {
        debug!(
            "pipe {pipe}: ignoring {} overlay planes",
            overlays.len() - max_overlays
        );
        overlays.truncate(max_overlays);
    }

    let mut planes = ArrayVec::new();
    let slots = primary
        .map(|id| (PlaneKind::Primary, id))
        .into_iter()
        .chain(
            overlays
                .into_iter()
                .enumerate()
                .map(|(n, id)| (PlaneKind::Overlay(n), id)),
        )
        .chain(cursor.map(|id| (PlaneKind::Cursor, id)));
    for (kind, id) in slots {
        let rotation_property = rotation_property(device, id);
        planes.push(Plane::new(planes.len(), kind, Some(id), rotation_property));
    }
    planes
}

/// Slots for a pipe on a device that only exposes overlay planes.
///
/// The primary and cursor are driven through set-CRTC and the cursor calls, so they get no
/// kernel plane.
fn legacy_planes<D: KmsDevice>(
    device: &D,
    pipe: PipeId,
    infos: &[PlaneInfo],
) -> ArrayVec<Plane, MAX_PLANES> {
    let mut planes = ArrayVec::new();
    planes.push(Plane::new(0, PlaneKind::Primary, None, 0));

    let overlays = infos
        .iter()
        .filter(|info| info.possible_crtcs & pipe.mask() != 0)
        .take(MAX_PLANES - 2);
    for (n, info) in overlays.enumerate() {
        let rotation_property = rotation_property(device, info.id);
        planes.push(Plane::new(
            planes.len(),
            PlaneKind::Overlay(n),
            Some(info.id),
            rotation_property,
        ));
    }

    planes.push(Plane::new(planes.len(), PlaneKind::Cursor, None, 0));
    planes
}

fn rotation_property<D: KmsDevice>(device: &D, plane: u32) -> u32 {
    find_property_opt(device, DrmObject::Plane(plane), "rotation").map_or(0, |(id, _)| id)
}
