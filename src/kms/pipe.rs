//! Pipes and their planes.
//!
//! Setters here only buffer values and mark them dirty. Nothing reaches the hardware until the
//! display is committed.

use arrayvec::ArrayVec;

use super::types::{Framebuffer, PipeId, PlaneDirty, PlaneKind, Rotation, MAX_PLANES};
use crate::error::KmsError;

/// Background colours are 16 bits per channel, BGR, in the low 48 bits.
const BACKGROUND_MASK: u64 = (1 << 48) - 1;

// =============================================================================
// Plane
// =============================================================================

#[derive(Debug, Clone)]
pub struct Plane {
    pub(super) index: usize,
    pub(super) kind: PlaneKind,
    /// Kernel plane id; `None` for the primary and cursor slots synthesized when the device has
    /// no universal planes.
    pub(super) drm_id: Option<u32>,
    /// 0 when the plane can't be rotated.
    pub(super) rotation_property: u32,
    pub(super) dirty: PlaneDirty,

    pub(super) fb: Option<Framebuffer>,
    pub(super) crtc_x: i32,
    pub(super) crtc_y: i32,
    pub(super) crtc_w: u32,
    pub(super) crtc_h: u32,
    pub(super) pan_x: u32,
    pub(super) pan_y: u32,
    pub(super) src_w: u32,
    pub(super) src_h: u32,
    pub(super) rotation: Rotation,
}

fn non_negative(what: &str, value: i32) -> Result<u32, KmsError> {
    u32::try_from(value)
        .map_err(|_| KmsError::InvalidArgument(format!("{what} {value} is negative")))
}

/// Source coordinates go to the kernel as 16.16 fixed point, so the integer part is 16 bits.
fn source_coordinate(what: &str, value: i32) -> Result<u32, KmsError> {
    let value = non_negative(what, value)?;
    if value > u32::from(u16::MAX) {
        return Err(KmsError::InvalidArgument(format!(
            "{what} {value} does not fit in 16 bits"
        )));
    }
    Ok(value)
}

impl Plane {
    pub(super) fn new(
        index: usize,
        kind: PlaneKind,
        drm_id: Option<u32>,
        rotation_property: u32,
    ) -> Self {
        Self {
            index,
            kind,
            drm_id,
            rotation_property,
            dirty: PlaneDirty::empty(),
            fb: None,
            crtc_x: 0,
            crtc_y: 0,
            crtc_w: 0,
            crtc_h: 0,
            pan_x: 0,
            pan_y: 0,
            src_w: 0,
            src_h: 0,
            rotation: Rotation::default(),
        }
    }

    /// Binds `fb` (or unbinds with `None`), resetting the plane and source size to its geometry.
    pub fn set_framebuffer(&mut self, fb: Option<&Framebuffer>) {
        let (w, h) = fb.map_or((0, 0), |fb| (fb.width, fb.height));
        self.fb = fb.copied();
        self.crtc_w = w;
        self.crtc_h = h;
        self.src_w = w;
        self.src_h = h;
        self.dirty |= PlaneDirty::FB;
    }

    pub fn set_position(&mut self, x: i32, y: i32) -> Result<(), KmsError> {
        non_negative("x", x)?;
        non_negative("y", y)?;
        self.crtc_x = x;
        self.crtc_y = y;
        self.dirty |= PlaneDirty::POSITION;
        Ok(())
    }

    pub fn set_size(&mut self, w: i32, h: i32) -> Result<(), KmsError> {
        let w = non_negative("width", w)?;
        let h = non_negative("height", h)?;
        self.crtc_w = w;
        self.crtc_h = h;
        self.dirty |= PlaneDirty::SIZE;
        Ok(())
    }

    /// Offset of the scanned-out region into the framebuffer.
    pub fn set_panning(&mut self, x: i32, y: i32) -> Result<(), KmsError> {
        let x = source_coordinate("panning x", x)?;
        let y = source_coordinate("panning y", y)?;
        self.pan_x = x;
        self.pan_y = y;
        self.dirty |= PlaneDirty::PANNING;
        Ok(())
    }

    /// Size of the region read from the framebuffer, for scaling planes.
    pub fn set_source_size(&mut self, w: i32, h: i32) -> Result<(), KmsError> {
        let w = source_coordinate("source width", w)?;
        let h = source_coordinate("source height", h)?;
        self.src_w = w;
        self.src_h = h;
        self.dirty |= PlaneDirty::SIZE;
        Ok(())
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
        self.dirty |= PlaneDirty::ROTATION;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> PlaneKind {
        self.kind
    }

    pub fn is_primary(&self) -> bool {
        self.kind == PlaneKind::Primary
    }

    pub fn is_cursor(&self) -> bool {
        self.kind == PlaneKind::Cursor
    }

    pub fn drm_id(&self) -> Option<u32> {
        self.drm_id
    }

    pub fn supports_rotation(&self) -> bool {
        self.rotation_property != 0
    }

    pub fn dirty(&self) -> PlaneDirty {
        self.dirty
    }

    pub fn framebuffer(&self) -> Option<&Framebuffer> {
        self.fb.as_ref()
    }

    pub fn position(&self) -> (i32, i32) {
        (self.crtc_x, self.crtc_y)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.crtc_w, self.crtc_h)
    }

    pub fn panning(&self) -> (u32, u32) {
        (self.pan_x, self.pan_y)
    }

    pub fn source_size(&self) -> (u32, u32) {
        (self.src_w, self.src_h)
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }
}

// =============================================================================
// Pipe
// =============================================================================

#[derive(Debug)]
pub struct Pipe {
    pub(super) id: PipeId,
    pub(super) crtc_id: u32,
    /// Whether the CRTC is lit.
    pub(super) enabled: bool,
    /// Primary first, overlays next, cursor last.
    pub(super) planes: ArrayVec<Plane, MAX_PLANES>,

    pub(super) background: u64,
    pub(super) background_changed: bool,
    /// 0 when the CRTC has no background property.
    pub(super) background_property: u32,

    /// The pipe gained an output, or its output changed mode.
    pub(super) modeset_pending: bool,
    /// The pipe lost its output while lit.
    pub(super) disable_pending: bool,
}

impl Pipe {
    pub fn id(&self) -> PipeId {
        self.id
    }

    pub fn crtc_id(&self) -> u32 {
        self.crtc_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, kind: PlaneKind) -> Option<&Plane> {
        self.planes.iter().find(|plane| plane.kind == kind)
    }

    pub fn plane_mut(&mut self, kind: PlaneKind) -> Option<&mut Plane> {
        self.planes.iter_mut().find(|plane| plane.kind == kind)
    }

    pub fn background(&self) -> u64 {
        self.background
    }

    pub fn has_background(&self) -> bool {
        self.background_property != 0
    }

    pub fn set_background(&mut self, color: u64) -> Result<(), KmsError> {
        if color & !BACKGROUND_MASK != 0 {
            return Err(KmsError::InvalidArgument(format!(
                "background colour {color:#x} is wider than 48 bits"
            )));
        }
        if !self.has_background() {
            return Err(KmsError::UnsupportedFeature("background colour"));
        }

        self.background = color;
        self.background_changed = true;
        Ok(())
    }

    /// Records that the CRTC went dark. Every plane that still holds a framebuffer has to be
    /// programmed again when the pipe is lit.
    pub(super) fn mark_off(&mut self) {
        self.enabled = false;
        self.disable_pending = false;
        for plane in &mut self.planes {
            if plane.fb.is_some() {
                plane.dirty |= PlaneDirty::FB;
            }
        }
    }

    /// Whether the next commit has anything to do for this pipe, given it keeps its output.
    pub fn is_dirty(&self) -> bool {
        self.modeset_pending
            || self.disable_pending
            || self.background_changed
            || self.planes.iter().any(|plane| !plane.dirty.is_empty())
    }
}
