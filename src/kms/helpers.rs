//! Stateless helpers: property lookup, mode selection and naming.

use std::iter::zip;

use anyhow::{ensure, Context};
use drm_ffi::drm_mode_modeinfo;
use kmsdisplay_config::output::{Modeline, SyncPolarity};
use smithay::reexports::drm::control::{connector, encoder, Mode, ModeFlags, ModeTypeFlags};
use tracing::{info, warn};

use super::device::{DrmObject, KmsDevice};
use crate::error::KmsError;

// =============================================================================
// DRM Property Helpers
// =============================================================================

/// Find a property of `object` by name, returning its id and current value.
pub fn find_property<D: KmsDevice + ?Sized>(
    device: &D,
    object: DrmObject,
    name: &str,
) -> Result<(u32, u64), KmsError> {
    let props = match device.object_properties(object) {
        Ok(props) => props,
        Err(err) => {
            warn!("error getting properties of {object:?}: {err:?}");
            return Err(KmsError::PropertyNotFound(name.to_owned()));
        }
    };

    props
        .into_iter()
        .find(|&(id, _)| device.property(id).is_ok_and(|info| info.name == name))
        .ok_or_else(|| KmsError::PropertyNotFound(name.to_owned()))
}

/// Like [`find_property`], but a missing property is `None`.
pub fn find_property_opt<D: KmsDevice + ?Sized>(
    device: &D,
    object: DrmObject,
    name: &str,
) -> Option<(u32, u64)> {
    find_property(device, object, name).ok()
}

/// DPMS levels of the connector `DPMS` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Dpms {
    On = 0,
    Standby = 1,
    Suspend = 2,
    Off = 3,
}

pub fn set_connector_dpms<D: KmsDevice + ?Sized>(
    device: &mut D,
    connector: u32,
    dpms: Dpms,
) -> Result<(), KmsError> {
    let object = DrmObject::Connector(connector);
    let (prop, _) = find_property(device, object, "DPMS")?;
    device
        .set_property(object, prop, dpms as u64)
        .map_err(|err| KmsError::hardware("set_property", err))
}

// =============================================================================
// Mode Helpers
// =============================================================================

/// First mode flagged preferred, else the first mode.
pub fn default_mode(modes: &[Mode]) -> Option<Mode> {
    modes
        .iter()
        .find(|mode| mode.mode_type().contains(ModeTypeFlags::PREFERRED))
        .or_else(|| modes.first())
        .copied()
}

/// Scanout order of one axis of a modeline; each stage must come strictly after the last.
const TIMING_STAGES: [&str; 4] = ["display", "sync start", "sync end", "total"];

fn check_timings(axis: &str, timings: [u16; 4]) -> anyhow::Result<()> {
    for i in 1..timings.len() {
        ensure!(
            timings[i - 1] < timings[i],
            "{axis} {} ({}) is not before {} ({})",
            TIMING_STAGES[i - 1],
            timings[i - 1],
            TIMING_STAGES[i],
            timings[i]
        );
    }
    Ok(())
}

fn sync_flag(polarity: SyncPolarity, positive: ModeFlags, negative: ModeFlags) -> ModeFlags {
    match polarity {
        SyncPolarity::Positive => positive,
        SyncPolarity::Negative => negative,
    }
}

/// Build a user-defined mode from a modeline. The mode is named `WxH` like kernel modes.
pub fn mode_from_modeline(modeline: &Modeline) -> anyhow::Result<Mode> {
    check_timings(
        "horizontal",
        [
            modeline.hdisplay,
            modeline.hsync_start,
            modeline.hsync_end,
            modeline.htotal,
        ],
    )?;
    check_timings(
        "vertical",
        [
            modeline.vdisplay,
            modeline.vsync_start,
            modeline.vsync_end,
            modeline.vtotal,
        ],
    )?;

    ensure!(
        modeline.clock.is_finite() && modeline.clock > 0.,
        "pixel clock {} MHz is not positive",
        modeline.clock
    );
    let clock_khz = (modeline.clock * 1000.).round();
    ensure!(
        clock_khz <= f64::from(u32::MAX),
        "pixel clock {} MHz is out of range",
        modeline.clock
    );
    let clock_khz = clock_khz as u32;

    // Totals are non-zero once the timings are ordered.
    let frame = u64::from(modeline.htotal) * u64::from(modeline.vtotal);
    let vrefresh = u32::try_from((u64::from(clock_khz) * 1000 + frame / 2) / frame)
        .with_context(|| format!("refresh rate of a {} MHz modeline", modeline.clock))?;

    let flags = sync_flag(modeline.hsync_polarity, ModeFlags::PHSYNC, ModeFlags::NHSYNC)
        | sync_flag(modeline.vsync_polarity, ModeFlags::PVSYNC, ModeFlags::NVSYNC);

    Ok(Mode::from(drm_mode_modeinfo {
        clock: clock_khz,
        hdisplay: modeline.hdisplay,
        hsync_start: modeline.hsync_start,
        hsync_end: modeline.hsync_end,
        htotal: modeline.htotal,
        hskew: 0,
        vdisplay: modeline.vdisplay,
        vsync_start: modeline.vsync_start,
        vsync_end: modeline.vsync_end,
        vtotal: modeline.vtotal,
        vscan: 0,
        vrefresh,
        flags: flags.bits(),
        type_: drm_ffi::DRM_MODE_TYPE_USERDEF,
        name: mode_name(&format!("{}x{}", modeline.hdisplay, modeline.vdisplay)),
    }))
}

/// NUL-terminated mode name, truncated to 31 bytes.
pub(super) fn mode_name(name: &str) -> [core::ffi::c_char; 32] {
    let mut buf: [core::ffi::c_char; 32] = [0; 32];
    // c_char is u8 on aarch64 and i8 on x86_64.
    for (a, b) in zip(&mut buf[..31], name.as_bytes()) {
        *a = *b as _;
    }
    buf
}

pub fn dump_mode(mode: &Mode) {
    let (hdisplay, vdisplay) = mode.size();
    let (hsync_start, hsync_end, htotal) = mode.hsync();
    let (vsync_start, vsync_end, vtotal) = mode.vsync();
    info!(
        "  {} {} {} {} {} {} {} {} {} {} {:#x} {:#x} {}",
        mode.name().to_string_lossy(),
        mode.vrefresh(),
        hdisplay,
        hsync_start,
        hsync_end,
        htotal,
        vdisplay,
        vsync_start,
        vsync_end,
        vtotal,
        mode.flags().bits(),
        mode.mode_type().bits(),
        mode.clock(),
    );
}

// =============================================================================
// Names
// =============================================================================

pub fn connector_status_str(state: connector::State) -> &'static str {
    match state {
        connector::State::Connected => "connected",
        connector::State::Disconnected => "disconnected",
        connector::State::Unknown => "unknown",
    }
}

/// Encoder type as the kernel names it in its logs.
pub fn encoder_kind_str(kind: encoder::Kind) -> &'static str {
    match kind {
        encoder::Kind::None => "none",
        encoder::Kind::DAC => "DAC",
        encoder::Kind::TMDS => "TMDS",
        encoder::Kind::LVDS => "LVDS",
        encoder::Kind::TVDAC => "TV",
        encoder::Kind::Virtual => "Virtual",
        encoder::Kind::DSI => "DSI",
        encoder::Kind::DPMST => "DP MST",
        encoder::Kind::DPI => "DPI",
    }
}

// =============================================================================
// Tests
// =============================================================================
