//! Committing the display model to the hardware.
//!
//! A commit first resolves every output whose pipe request changed. Resolution only queries the
//! device, so a failure there leaves both the model and the hardware untouched. Then each pipe is
//! programmed in index order with either the legacy or the universal plane calls.
//!
//! The first kernel error stops the commit. Calls already made are not undone; every dirty bit is
//! cleared right after the call that committed it, so the model shows what was applied.

use smithay::reexports::drm::control::Mode;
use tracing::{debug, error, trace, warn};

use super::device::{CursorImage, DrmObject, KmsDevice};
use super::pipe::{Pipe, Plane};
use super::resolver::{resolve, ConnectorConfig};
use super::types::{CommitStyle, PipeId, PlaneDirty, PlaneKind};
use super::Display;
use crate::error::KmsError;

fn hardware(call: &'static str) -> impl FnOnce(std::io::Error) -> KmsError {
    move |err| KmsError::hardware(call, err)
}

impl<D: KmsDevice> Display<D> {
    /// Commits with the universal plane API when the device supports it, else the legacy API.
    pub fn try_commit(&mut self) -> Result<(), KmsError> {
        self.try_commit2(self.default_commit_style())
    }

    pub fn try_commit2(&mut self, style: CommitStyle) -> Result<(), KmsError> {
        let _span = tracy_client::span!("Display::try_commit2");

        if style == CommitStyle::Universal && !self.has_universal_planes {
            return Err(KmsError::UnsupportedFeature("universal plane commit"));
        }

        self.resolve_outputs()?;

        for index in 0..self.pipes.len() {
            self.commit_pipe(index, style)?;
        }

        Ok(())
    }

    /// Like [`Display::try_commit`], but a failure is fatal.
    pub fn commit(&mut self) {
        self.commit2(self.default_commit_style());
    }

    /// Like [`Display::try_commit2`], but a failure is fatal.
    pub fn commit2(&mut self, style: CommitStyle) {
        if let Err(err) = self.try_commit2(style) {
            error!("{style:?} commit failed: {err}");
            panic!("{style:?} commit failed ({}): {err}", err.code());
        }
    }

    pub fn default_commit_style(&self) -> CommitStyle {
        if self.has_universal_planes {
            CommitStyle::Universal
        } else {
            CommitStyle::Legacy
        }
    }

    fn resolve_outputs(&mut self) -> Result<(), KmsError> {
        let pending: Vec<usize> = (0..self.outputs.len())
            .filter(|&idx| self.outputs[idx].needs_resolve)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        // Pipes of the outputs being re-resolved are up for grabs again.
        let mut claimed = self.pipes_in_use;
        for &idx in &pending {
            if let Some(pipe) = self.outputs[idx].pipe() {
                claimed &= !pipe.mask();
            }
        }

        let mut staged: Vec<(usize, Option<ConnectorConfig>)> = Vec::with_capacity(pending.len());
        for &idx in &pending {
            let output = &self.outputs[idx];
            if output.pending_mask == 0 {
                staged.push((idx, None));
                continue;
            }

            let allowed = output.pending_mask & !claimed;
            let config = resolve(&self.device, output.id, allowed).inspect_err(|err| {
                warn!("{}: {err}", output.name);
            })?;
            claimed |= config.pipe.mask();
            staged.push((idx, Some(config)));
        }

        // Release before claiming so that a pipe can change hands in one commit.
        for (idx, config) in &staged {
            let new_pipe = config.as_ref().map(|config| config.pipe);
            let Some(old_pipe) = self.outputs[*idx].pipe() else {
                continue;
            };
            if Some(old_pipe) == new_pipe {
                continue;
            }

            self.pipes_in_use &= !old_pipe.mask();
            if let Some(pipe) = self.pipes.get_mut(old_pipe.index()) {
                debug!("pipe {old_pipe}: released by {}", self.outputs[*idx].name);
                pipe.modeset_pending = false;
                pipe.disable_pending = pipe.enabled;
            }
        }

        for (idx, config) in staged {
            let output = &mut self.outputs[idx];
            output.needs_resolve = false;

            let Some(config) = config else {
                output.config = None;
                continue;
            };

            let pipe_id = config.pipe;
            let pipe_changed = output.pipe() != Some(pipe_id);
            let mode_changed = output.override_mode.is_none()
                && output.config.as_ref().map(|old| old.default_mode) != Some(config.default_mode);

            self.pipes_in_use |= pipe_id.mask();
            output.valid = true;
            output.config = Some(config);

            if let Some(pipe) = self.pipes.get_mut(pipe_id.index()) {
                pipe.disable_pending = false;
                if pipe_changed || mode_changed {
                    pipe.modeset_pending = true;
                }
            }
        }

        Ok(())
    }

    fn commit_pipe(&mut self, index: usize, style: CommitStyle) -> Result<(), KmsError> {
        let Self {
            device,
            pipes,
            outputs,
            pipes_in_use,
            ..
        } = self;
        let pipe = &mut pipes[index];

        if *pipes_in_use & pipe.id.mask() == 0 {
            if pipe.disable_pending {
                debug!("pipe {}: disabling", pipe.id);
                device
                    .set_crtc(pipe.crtc_id, None, (0, 0), &[], None)
                    .map_err(hardware("set_crtc"))?;
                pipe.mark_off();
            }
            return Ok(());
        }

        let driving = outputs
            .iter()
            .find(|output| output.pipe() == Some(pipe.id))
            .and_then(|output| Some((output.id, output.mode()?)));
        let Some((connector, mode)) = driving else {
            warn!("pipe {} is in use but has no output", pipe.id);
            return Ok(());
        };

        match style {
            CommitStyle::Legacy => commit_legacy(device, pipe, connector, mode)?,
            CommitStyle::Universal => commit_universal(device, pipe, connector, mode)?,
        }

        if pipe.background_changed {
            trace!("pipe {}: background {:#x}", pipe.id, pipe.background);
            device
                .set_property(
                    DrmObject::Crtc(pipe.crtc_id),
                    pipe.background_property,
                    pipe.background,
                )
                .map_err(hardware("set_property"))?;
            pipe.background_changed = false;
        }

        Ok(())
    }
}

fn commit_legacy<D: KmsDevice>(
    device: &mut D,
    pipe: &mut Pipe,
    connector: u32,
    mode: Mode,
) -> Result<(), KmsError> {
    let crtc = pipe.crtc_id;
    let id = pipe.id;

    // Primary plane and mode in one set-CRTC call.
    let primary_dirty = pipe
        .plane(PlaneKind::Primary)
        .is_some_and(|plane| plane.dirty.intersects(PlaneDirty::GEOMETRY));
    if pipe.modeset_pending || primary_dirty {
        let fb = match pipe.plane(PlaneKind::Primary) {
            Some(plane) => {
                check_rotation(id, plane)?;
                if plane.position() != (0, 0) {
                    return Err(KmsError::UnsupportedInLegacyMode("windowed primary plane"));
                }
                if plane.fb.is_some() {
                    check_fits_mode(id, plane, &mode)?;
                }
                plane.fb.map(|fb| (fb.id, plane.panning()))
            }
            None => None,
        };

        match fb {
            Some((fb, pan)) => {
                trace!("pipe {id}: set_crtc fb {fb} at {pan:?}, connector {connector}");
                device
                    .set_crtc(crtc, Some(fb), pan, &[connector], Some(mode))
                    .map_err(hardware("set_crtc"))?;
            }
            None => {
                trace!("pipe {id}: set_crtc off, no primary framebuffer");
                device
                    .set_crtc(crtc, None, (0, 0), &[], None)
                    .map_err(hardware("set_crtc"))?;
            }
        }

        pipe.enabled = fb.is_some();
        pipe.modeset_pending = false;
        if let Some(primary) = pipe.plane_mut(PlaneKind::Primary) {
            primary.dirty -= PlaneDirty::GEOMETRY;
        }
    }
    if let Some(primary) = pipe.plane_mut(PlaneKind::Primary) {
        commit_rotation(device, id, primary)?;
    }

    // Cursor through the cursor calls.
    if let Some(cursor) = pipe.plane_mut(PlaneKind::Cursor) {
        check_rotation(id, cursor)?;

        let image_bits = PlaneDirty::FB | PlaneDirty::SIZE | PlaneDirty::PANNING;
        if cursor.dirty.intersects(image_bits) {
            let image = cursor.fb.map(|fb| CursorImage {
                gem_handle: fb.gem_handle,
                width: cursor.crtc_w,
                height: cursor.crtc_h,
            });
            device
                .set_cursor(crtc, image)
                .map_err(hardware("set_cursor"))?;
            cursor.dirty -= image_bits;
        }

        if cursor.dirty.contains(PlaneDirty::POSITION) {
            device
                .move_cursor(crtc, cursor.position())
                .map_err(hardware("move_cursor"))?;
            cursor.dirty -= PlaneDirty::POSITION;
        }

        commit_rotation(device, id, cursor)?;
    }

    // Overlays need set-plane.
    if pipe
        .planes
        .iter()
        .any(|plane| matches!(plane.kind, PlaneKind::Overlay(_)) && !plane.dirty.is_empty())
    {
        return Err(KmsError::UnsupportedInLegacyMode("overlay plane"));
    }

    Ok(())
}

fn commit_universal<D: KmsDevice>(
    device: &mut D,
    pipe: &mut Pipe,
    connector: u32,
    mode: Mode,
) -> Result<(), KmsError> {
    let crtc = pipe.crtc_id;

    // The mode still goes through set-CRTC; planes carry the content.
    if pipe.modeset_pending {
        trace!("pipe {}: modeset, connector {connector}", pipe.id);
        device
            .set_crtc(crtc, None, (0, 0), &[connector], Some(mode))
            .map_err(hardware("set_crtc"))?;
        pipe.modeset_pending = false;
        pipe.enabled = true;

        // A null framebuffer turns the primary off.
        if let Some(primary) = pipe.plane_mut(PlaneKind::Primary) {
            if primary.fb.is_some() {
                primary.dirty |= PlaneDirty::FB;
            }
        }
    }

    let id = pipe.id;
    for plane in &mut pipe.planes {
        if plane.dirty.is_empty() {
            continue;
        }
        check_rotation(id, plane)?;

        if plane.dirty.intersects(PlaneDirty::GEOMETRY) {
            let drm_id = plane.drm_id.ok_or(KmsError::PlaneNotFound {
                pipe: id,
                kind: plane.kind,
            })?;

            match plane.fb {
                Some(fb) => {
                    check_fits_mode(id, plane, &mode)?;
                    let dst = (plane.crtc_x, plane.crtc_y, plane.crtc_w, plane.crtc_h);
                    let src = (
                        plane.pan_x << 16,
                        plane.pan_y << 16,
                        plane.src_w << 16,
                        plane.src_h << 16,
                    );
                    trace!("pipe {id}: set_plane {} fb {} dst {dst:?}", plane.kind, fb.id);
                    device
                        .set_plane(drm_id, crtc, Some(fb.id), dst, src)
                        .map_err(hardware("set_plane"))?;
                }
                None => {
                    trace!("pipe {id}: set_plane {} off", plane.kind);
                    device
                        .set_plane(drm_id, crtc, None, (0, 0, 0, 0), (0, 0, 0, 0))
                        .map_err(hardware("set_plane"))?;
                }
            }
            plane.dirty -= PlaneDirty::GEOMETRY;
        }

        commit_rotation(device, id, plane)?;
    }

    Ok(())
}

fn check_rotation(pipe: PipeId, plane: &Plane) -> Result<(), KmsError> {
    if plane.dirty.contains(PlaneDirty::ROTATION) && !plane.supports_rotation() {
        return Err(KmsError::RotationUnsupported {
            pipe,
            plane: plane.index,
        });
    }
    Ok(())
}

fn check_fits_mode(pipe: PipeId, plane: &Plane, mode: &Mode) -> Result<(), KmsError> {
    let (mode_width, mode_height) = mode.size();
    if plane.crtc_w > u32::from(mode_width) || plane.crtc_h > u32::from(mode_height) {
        return Err(KmsError::PlaneExceedsMode {
            pipe,
            plane: plane.index,
            width: plane.crtc_w,
            height: plane.crtc_h,
            mode_width,
            mode_height,
        });
    }
    Ok(())
}

fn commit_rotation<D: KmsDevice>(
    device: &mut D,
    pipe: PipeId,
    plane: &mut Plane,
) -> Result<(), KmsError> {
    if !plane.dirty.contains(PlaneDirty::ROTATION) {
        return Ok(());
    }

    let Some(drm_id) = plane.drm_id.filter(|_| plane.supports_rotation()) else {
        return Err(KmsError::RotationUnsupported {
            pipe,
            plane: plane.index,
        });
    };

    device
        .set_property(
            DrmObject::Plane(drm_id),
            plane.rotation_property,
            u64::from(plane.rotation.bits()),
        )
        .map_err(hardware("set_property"))?;
    plane.dirty -= PlaneDirty::ROTATION;
    Ok(())
}
