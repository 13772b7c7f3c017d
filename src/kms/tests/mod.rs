//! A recording fake of the KMS surface and the display tests built on it.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::io;

use smithay::reexports::drm::control::{connector, encoder, Mode};
use smithay::reexports::drm::ClientCapability;

use super::device::{
    ConnectorInfo, CrtcInfo, CursorImage, DrmObject, EncoderInfo, KmsDevice, PlaneInfo,
    PropertyInfo, Resources,
};
use super::helpers::mode_name;
use super::types::{DRM_PLANE_TYPE_CURSOR, DRM_PLANE_TYPE_OVERLAY, DRM_PLANE_TYPE_PRIMARY};
use super::{Display, Framebuffer};

mod resolver;

pub const CRTC_BASE: u32 = 40;
pub const CONNECTOR_BASE: u32 = 100;
pub const ENCODER_BASE: u32 = 200;
pub const PLANE_BASE: u32 = 300;

/// In-memory device: pipe `i` has CRTC `40 + i` and planes `300 + 10 * i` (primary), `+ 1`
/// (overlay) and `+ 2` (cursor); connector `j` is `100 + j` with encoder `200 + j`, connected
/// and able to drive every pipe.
///
/// Successful hardware calls are appended to `calls`; queries are not recorded.
#[derive(Debug)]
pub struct FakeDevice {
    pub supports_universal: bool,
    universal: bool,
    pub crtc_ids: Vec<u32>,
    pub connector_ids: Vec<u32>,
    pub crtcs: BTreeMap<u32, CrtcInfo>,
    pub connectors: BTreeMap<u32, ConnectorInfo>,
    pub encoders: BTreeMap<u32, EncoderInfo>,
    pub planes: Vec<PlaneInfo>,
    properties: HashMap<DrmObject, Vec<(u32, u64)>>,
    property_names: BTreeMap<u32, String>,
    next_encoder: u32,

    pub calls: Vec<String>,
    /// Last 16.16 source rectangle per plane.
    pub plane_src: BTreeMap<u32, (u32, u32, u32, u32)>,
    /// Calls with this name fail with this errno.
    pub fail_on: Option<(&'static str, i32)>,
    /// Vblanks waited for.
    pub vblanks: Cell<u32>,
}

impl FakeDevice {
    pub fn new(n_crtcs: usize, n_connectors: usize) -> Self {
        let mut device = Self {
            supports_universal: true,
            universal: false,
            crtc_ids: Vec::new(),
            connector_ids: Vec::new(),
            crtcs: BTreeMap::new(),
            connectors: BTreeMap::new(),
            encoders: BTreeMap::new(),
            planes: Vec::new(),
            properties: HashMap::new(),
            property_names: BTreeMap::new(),
            next_encoder: ENCODER_BASE + 100,
            calls: Vec::new(),
            plane_src: BTreeMap::new(),
            fail_on: None,
            vblanks: Cell::new(0),
        };

        let all_pipes = (1u32 << n_crtcs) - 1;

        for i in 0..n_crtcs as u32 {
            let crtc = CRTC_BASE + i;
            device.crtc_ids.push(crtc);
            device.crtcs.insert(
                crtc,
                CrtcInfo {
                    id: crtc,
                    mode: None,
                },
            );

            let types = [
                DRM_PLANE_TYPE_PRIMARY,
                DRM_PLANE_TYPE_OVERLAY,
                DRM_PLANE_TYPE_CURSOR,
            ];
            for (n, ty) in types.into_iter().enumerate() {
                let id = PLANE_BASE + 10 * i + n as u32;
                device.planes.push(PlaneInfo {
                    id,
                    possible_crtcs: 1 << i,
                });
                device.add_property(DrmObject::Plane(id), "type", ty);
            }
        }

        for j in 0..n_connectors as u32 {
            let id = CONNECTOR_BASE + j;
            let encoder = ENCODER_BASE + j;
            device.connector_ids.push(id);
            device.connectors.insert(
                id,
                ConnectorInfo {
                    id,
                    interface: connector::Interface::HDMIA,
                    interface_id: j + 1,
                    state: connector::State::Connected,
                    modes: vec![mode(1920, 1080, true), mode(1280, 720, false)],
                    encoders: vec![encoder],
                },
            );
            device.encoders.insert(
                encoder,
                EncoderInfo {
                    id: encoder,
                    kind: encoder::Kind::TMDS,
                    possible_crtcs: all_pipes,
                },
            );
        }

        device
    }

    pub fn without_universal_planes(mut self) -> Self {
        self.supports_universal = false;
        self
    }

    /// Gives primary and overlay planes a rotation property.
    pub fn with_rotation(mut self) -> Self {
        let planes: Vec<u32> = self
            .planes
            .iter()
            .filter(|plane| self.plane_type(plane.id) != DRM_PLANE_TYPE_CURSOR)
            .map(|plane| plane.id)
            .collect();
        for plane in planes {
            self.add_property(DrmObject::Plane(plane), "rotation", 1);
        }
        self
    }

    pub fn with_background(mut self) -> Self {
        for crtc in self.crtc_ids.clone() {
            self.add_property(DrmObject::Crtc(crtc), "background_color", 0);
        }
        self
    }

    /// Adds a property; ids are shared between objects by name, like the kernel does.
    pub fn add_property(&mut self, object: DrmObject, name: &str, value: u64) -> u32 {
        let id = match self.property_names.iter().find(|(_, n)| *n == name) {
            Some((&id, _)) => id,
            None => {
                let id = 1000 + self.property_names.len() as u32;
                self.property_names.insert(id, name.to_owned());
                id
            }
        };
        self.properties.entry(object).or_default().push((id, value));
        id
    }

    pub fn property_name(&self, id: u32) -> &str {
        self.property_names.get(&id).map_or("?", String::as_str)
    }

    pub fn property_value(&self, object: DrmObject, name: &str) -> Option<u64> {
        self.properties
            .get(&object)?
            .iter()
            .find(|(id, _)| self.property_name(*id) == name)
            .map(|(_, value)| *value)
    }

    fn plane_type(&self, plane: u32) -> u64 {
        self.property_value(DrmObject::Plane(plane), "type")
            .unwrap_or(DRM_PLANE_TYPE_OVERLAY)
    }

    /// Replaces the encoders of `connector` with new ones using `masks`.
    pub fn set_encoder_masks(&mut self, connector: u32, masks: &[u32]) {
        let mut ids = Vec::new();
        for &possible_crtcs in masks {
            let id = self.next_encoder;
            self.next_encoder += 1;
            self.encoders.insert(
                id,
                EncoderInfo {
                    id,
                    kind: encoder::Kind::TMDS,
                    possible_crtcs,
                },
            );
            ids.push(id);
        }
        if let Some(info) = self.connectors.get_mut(&connector) {
            info.encoders = ids;
        }
    }

    pub fn connector_mut(&mut self, connector: u32) -> &mut ConnectorInfo {
        self.connectors.get_mut(&connector).unwrap()
    }

    pub fn take_calls(&mut self) -> Vec<String> {
        std::mem::take(&mut self.calls)
    }

    fn call(&mut self, name: &'static str, log: String) -> io::Result<()> {
        if let Some((call, errno)) = self.fail_on {
            if call == name {
                return Err(io::Error::from_raw_os_error(errno));
            }
        }
        self.calls.push(log);
        Ok(())
    }
}

fn not_found() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOENT)
}

fn fmt_fb(fb: Option<u32>) -> String {
    fb.map_or_else(|| String::from("none"), |fb| fb.to_string())
}

fn fmt_mode(mode: Option<Mode>) -> String {
    mode.map_or_else(
        || String::from("none"),
        |mode| format!("{}x{}", mode.size().0, mode.size().1),
    )
}

impl KmsDevice for FakeDevice {
    fn set_client_capability(&mut self, cap: ClientCapability, enable: bool) -> io::Result<()> {
        if !matches!(cap, ClientCapability::UniversalPlanes) || !self.supports_universal {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.universal = enable;
        Ok(())
    }

    fn resources(&self) -> io::Result<Resources> {
        Ok(Resources {
            crtcs: self.crtc_ids.clone(),
            connectors: self.connector_ids.clone(),
            encoders: self.encoders.keys().copied().collect(),
        })
    }

    fn connector(&self, id: u32, _detect: bool) -> io::Result<ConnectorInfo> {
        self.connectors.get(&id).cloned().ok_or_else(not_found)
    }

    fn encoder(&self, id: u32) -> io::Result<EncoderInfo> {
        self.encoders.get(&id).copied().ok_or_else(not_found)
    }

    fn crtc(&self, id: u32) -> io::Result<CrtcInfo> {
        self.crtcs.get(&id).cloned().ok_or_else(not_found)
    }

    fn planes(&self) -> io::Result<Vec<PlaneInfo>> {
        Ok(self
            .planes
            .iter()
            .filter(|plane| self.universal || self.plane_type(plane.id) == DRM_PLANE_TYPE_OVERLAY)
            .copied()
            .collect())
    }

    fn object_properties(&self, object: DrmObject) -> io::Result<Vec<(u32, u64)>> {
        self.properties.get(&object).cloned().ok_or_else(not_found)
    }

    fn property(&self, id: u32) -> io::Result<PropertyInfo> {
        let name = self.property_names.get(&id).ok_or_else(not_found)?;
        Ok(PropertyInfo {
            id,
            name: name.clone(),
        })
    }

    fn set_crtc(
        &mut self,
        crtc: u32,
        framebuffer: Option<u32>,
        pos: (u32, u32),
        connectors: &[u32],
        mode: Option<Mode>,
    ) -> io::Result<()> {
        if !self.crtcs.contains_key(&crtc) {
            return Err(not_found());
        }
        self.call(
            "set_crtc",
            format!(
                "set_crtc(crtc {crtc}, fb {}, pos {pos:?}, connectors {connectors:?}, mode {})",
                fmt_fb(framebuffer),
                fmt_mode(mode)
            ),
        )?;
        if let Some(info) = self.crtcs.get_mut(&crtc) {
            info.mode = mode;
        }
        Ok(())
    }

    fn set_cursor(&mut self, crtc: u32, image: Option<CursorImage>) -> io::Result<()> {
        let image = image.map_or_else(
            || String::from("none"),
            |image| format!("handle {}, {}x{}", image.gem_handle, image.width, image.height),
        );
        self.call("set_cursor", format!("set_cursor(crtc {crtc}, {image})"))
    }

    fn move_cursor(&mut self, crtc: u32, pos: (i32, i32)) -> io::Result<()> {
        self.call("move_cursor", format!("move_cursor(crtc {crtc}, {pos:?})"))
    }

    fn set_plane(
        &mut self,
        plane: u32,
        crtc: u32,
        framebuffer: Option<u32>,
        dst: (i32, i32, u32, u32),
        src: (u32, u32, u32, u32),
    ) -> io::Result<()> {
        if !self.planes.iter().any(|info| info.id == plane) {
            return Err(not_found());
        }
        let pixels = (src.0 >> 16, src.1 >> 16, src.2 >> 16, src.3 >> 16);
        self.call(
            "set_plane",
            format!(
                "set_plane(plane {plane}, crtc {crtc}, fb {}, dst {dst:?}, src {pixels:?})",
                fmt_fb(framebuffer)
            ),
        )?;
        self.plane_src.insert(plane, src);
        Ok(())
    }

    fn set_property(&mut self, object: DrmObject, property: u32, value: u64) -> io::Result<()> {
        let kind = match object {
            DrmObject::Crtc(_) => "crtc",
            DrmObject::Connector(_) => "connector",
            DrmObject::Plane(_) => "plane",
        };
        let name = self.property_name(property).to_owned();
        self.call(
            "set_property",
            format!("set_property({kind} {}, {name}, {value})", object.id()),
        )?;

        let props = self.properties.get_mut(&object).ok_or_else(not_found)?;
        if let Some(prop) = props.iter_mut().find(|(id, _)| *id == property) {
            prop.1 = value;
        }
        Ok(())
    }

    /// Logged in `vblanks`; fails like the kernel on a CRTC without a mode.
    fn wait_vblank(&self, pipe: u32) -> io::Result<()> {
        let crtc = self
            .crtc_ids
            .get(pipe as usize)
            .and_then(|id| self.crtcs.get(id))
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        if crtc.mode.is_none() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.vblanks.set(self.vblanks.get() + 1);
        Ok(())
    }
}

/// A driver mode of the given size with plausible timings.
pub fn mode(width: u16, height: u16, preferred: bool) -> Mode {
    let mut type_ = drm_ffi::DRM_MODE_TYPE_DRIVER;
    if preferred {
        type_ |= drm_ffi::DRM_MODE_TYPE_PREFERRED;
    }

    Mode::from(drm_ffi::drm_mode_modeinfo {
        clock: 148_500,
        hdisplay: width,
        hsync_start: width + 88,
        hsync_end: width + 132,
        htotal: width + 280,
        hskew: 0,
        vdisplay: height,
        vsync_start: height + 4,
        vsync_end: height + 9,
        vtotal: height + 45,
        vscan: 0,
        vrefresh: 60,
        flags: 0,
        type_,
        name: mode_name(&format!("{width}x{height}")),
    })
}

pub fn fb(id: u32, width: u32, height: u32) -> Framebuffer {
    Framebuffer {
        id,
        gem_handle: id + 1000,
        width,
        height,
        format: 0x34325258,
        modifier: 0,
    }
}

pub fn display(device: FakeDevice) -> Display<FakeDevice> {
    Display::init(device).unwrap()
}

pub fn take_calls(display: &mut Display<FakeDevice>) -> String {
    display.device_mut().take_calls().join("\n")
}
