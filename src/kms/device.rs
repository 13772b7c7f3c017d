//! The kernel modesetting surface consumed by the display model.
//!
//! [`KmsDevice`] is a thin, id-based view of the KMS ioctls. [`Card`] implements it on top of an
//! open DRM character device; tests implement it with a recording fake.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use anyhow::Context;
use smithay::reexports::drm::buffer::{self, DrmFourcc};
use smithay::reexports::drm::control::{
    self, connector, crtc, encoder, framebuffer, plane, property, Device as ControlDevice, Mode,
    RawResourceHandle, ResourceHandles,
};
use smithay::reexports::drm::{
    ClientCapability, Device as BasicDevice, VblankWaitFlags, VblankWaitTarget,
};
use tracing::{debug, trace};

use super::types::PipeMask;

// =============================================================================
// Snapshots
// =============================================================================

/// Object ids reported by get-resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub crtcs: Vec<u32>,
    pub connectors: Vec<u32>,
    pub encoders: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorInfo {
    pub id: u32,
    pub interface: connector::Interface,
    pub interface_id: u32,
    pub state: connector::State,
    pub modes: Vec<Mode>,
    pub encoders: Vec<u32>,
}

impl ConnectorInfo {
    /// Connector name as the kernel spells it, e.g. `HDMI-A-1`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.interface.as_str(), self.interface_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderInfo {
    pub id: u32,
    pub kind: encoder::Kind,
    /// CRTC indices this encoder can be routed to.
    pub possible_crtcs: PipeMask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrtcInfo {
    pub id: u32,
    pub mode: Option<Mode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneInfo {
    pub id: u32,
    /// CRTC indices this plane can be attached to.
    pub possible_crtcs: PipeMask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub id: u32,
    pub name: String,
}

/// A kernel mode object that carries properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrmObject {
    Crtc(u32),
    Connector(u32),
    Plane(u32),
}

impl DrmObject {
    pub fn id(self) -> u32 {
        match self {
            Self::Crtc(id) | Self::Connector(id) | Self::Plane(id) => id,
        }
    }
}

/// Legacy cursor image: the GEM handle of the cursor buffer and its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorImage {
    pub gem_handle: u32,
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// KmsDevice
// =============================================================================

/// Blocking KMS calls on one device.
///
/// Query methods take `&self`; methods that program the hardware take `&mut self`. Every method
/// returns the kernel's error as an [`io::Error`] carrying the raw errno.
pub trait KmsDevice {
    fn set_client_capability(&mut self, cap: ClientCapability, enable: bool) -> io::Result<()>;

    fn resources(&self) -> io::Result<Resources>;

    /// `detect` makes the kernel re-detect the connector, which can be slow.
    fn connector(&self, id: u32, detect: bool) -> io::Result<ConnectorInfo>;

    fn encoder(&self, id: u32) -> io::Result<EncoderInfo>;

    fn crtc(&self, id: u32) -> io::Result<CrtcInfo>;

    /// Every plane exposed to this client.
    fn planes(&self) -> io::Result<Vec<PlaneInfo>>;

    /// Property ids and current values of an object.
    fn object_properties(&self, object: DrmObject) -> io::Result<Vec<(u32, u64)>>;

    fn property(&self, id: u32) -> io::Result<PropertyInfo>;

    fn set_crtc(
        &mut self,
        crtc: u32,
        framebuffer: Option<u32>,
        pos: (u32, u32),
        connectors: &[u32],
        mode: Option<Mode>,
    ) -> io::Result<()>;

    fn set_cursor(&mut self, crtc: u32, image: Option<CursorImage>) -> io::Result<()>;

    fn move_cursor(&mut self, crtc: u32, pos: (i32, i32)) -> io::Result<()>;

    /// `src` is in 16.16 fixed point.
    fn set_plane(
        &mut self,
        plane: u32,
        crtc: u32,
        framebuffer: Option<u32>,
        dst: (i32, i32, u32, u32),
        src: (u32, u32, u32, u32),
    ) -> io::Result<()>;

    fn set_property(&mut self, object: DrmObject, property: u32, value: u64) -> io::Result<()>;

    /// Blocks until the next vertical blank on the CRTC at index `pipe`.
    fn wait_vblank(&self, pipe: u32) -> io::Result<()>;
}

// =============================================================================
// Card
// =============================================================================

/// An open DRM primary node.
#[derive(Debug)]
pub struct Card {
    file: File,
    path: PathBuf,
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

impl Card {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("error opening {path:?}"))?;
        debug!("opened DRM device {path:?}");

        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Minor number of the card (`N` in `/dev/dri/cardN`), used by the debugfs layout.
    pub fn minor(&self) -> Option<u32> {
        self.path
            .file_name()?
            .to_str()?
            .strip_prefix("card")?
            .parse()
            .ok()
    }

    fn crtc_mask(&self, handles: &ResourceHandles, filter: control::CrtcListFilter) -> PipeMask {
        let possible = handles.filter_crtcs(filter);
        handles
            .crtcs()
            .iter()
            .enumerate()
            .filter(|(_, crtc)| possible.contains(crtc))
            .fold(0, |mask, (index, _)| mask | (1 << index))
    }
}

fn handle<T: From<RawResourceHandle>>(raw: u32) -> io::Result<T> {
    control::from_u32(raw).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
}

struct CursorBuffer(CursorImage);

impl buffer::Buffer for CursorBuffer {
    fn size(&self) -> (u32, u32) {
        (self.0.width, self.0.height)
    }

    fn format(&self) -> DrmFourcc {
        DrmFourcc::Argb8888
    }

    fn pitch(&self) -> u32 {
        self.0.width * 4
    }

    fn handle(&self) -> buffer::Handle {
        // Checked non-zero in set_cursor().
        buffer::Handle::from(
            RawResourceHandle::new(self.0.gem_handle).unwrap_or(RawResourceHandle::MIN),
        )
    }
}

impl KmsDevice for Card {
    fn set_client_capability(&mut self, cap: ClientCapability, enable: bool) -> io::Result<()> {
        BasicDevice::set_client_capability(self, cap, enable)
    }

    fn resources(&self) -> io::Result<Resources> {
        let handles = self.resource_handles()?;
        Ok(Resources {
            crtcs: handles.crtcs().iter().map(|&h| u32::from(h)).collect(),
            connectors: handles.connectors().iter().map(|&h| u32::from(h)).collect(),
            encoders: handles.encoders().iter().map(|&h| u32::from(h)).collect(),
        })
    }

    fn connector(&self, id: u32, detect: bool) -> io::Result<ConnectorInfo> {
        let info = self.get_connector(handle::<connector::Handle>(id)?, detect)?;
        Ok(ConnectorInfo {
            id,
            interface: info.interface(),
            interface_id: info.interface_id(),
            state: info.state(),
            modes: info.modes().to_vec(),
            encoders: info.encoders().iter().map(|&h| u32::from(h)).collect(),
        })
    }

    fn encoder(&self, id: u32) -> io::Result<EncoderInfo> {
        let info = self.get_encoder(handle::<encoder::Handle>(id)?)?;
        let handles = self.resource_handles()?;
        Ok(EncoderInfo {
            id,
            kind: info.kind(),
            possible_crtcs: self.crtc_mask(&handles, info.possible_crtcs()),
        })
    }

    fn crtc(&self, id: u32) -> io::Result<CrtcInfo> {
        let info = self.get_crtc(handle::<crtc::Handle>(id)?)?;
        Ok(CrtcInfo {
            id,
            mode: info.mode(),
        })
    }

    fn planes(&self) -> io::Result<Vec<PlaneInfo>> {
        let handles = self.resource_handles()?;
        let mut planes = Vec::new();
        for plane in self.plane_handles()? {
            let info = self.get_plane(plane)?;
            planes.push(PlaneInfo {
                id: u32::from(plane),
                possible_crtcs: self.crtc_mask(&handles, info.possible_crtcs()),
            });
        }
        Ok(planes)
    }

    fn object_properties(&self, object: DrmObject) -> io::Result<Vec<(u32, u64)>> {
        let props = match object {
            DrmObject::Crtc(id) => self.get_properties(handle::<crtc::Handle>(id)?)?,
            DrmObject::Connector(id) => self.get_properties(handle::<connector::Handle>(id)?)?,
            DrmObject::Plane(id) => self.get_properties(handle::<plane::Handle>(id)?)?,
        };
        Ok(props
            .into_iter()
            .map(|(handle, value)| (u32::from(handle), value))
            .collect())
    }

    fn property(&self, id: u32) -> io::Result<PropertyInfo> {
        let info = self.get_property(handle::<property::Handle>(id)?)?;
        Ok(PropertyInfo {
            id,
            name: info.name().to_string_lossy().into_owned(),
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
        let framebuffer = framebuffer
            .map(handle::<framebuffer::Handle>)
            .transpose()?;
        let connectors = connectors
            .iter()
            .map(|&id| handle::<connector::Handle>(id))
            .collect::<io::Result<Vec<_>>>()?;
        trace!("set_crtc({crtc}, {framebuffer:?}, {pos:?}, {connectors:?})");
        ControlDevice::set_crtc(
            self,
            handle::<crtc::Handle>(crtc)?,
            framebuffer,
            pos,
            &connectors,
            mode,
        )
    }

    fn set_cursor(&mut self, crtc: u32, image: Option<CursorImage>) -> io::Result<()> {
        let crtc = handle::<crtc::Handle>(crtc)?;
        let buffer = match image {
            Some(image) if image.gem_handle != 0 => Some(CursorBuffer(image)),
            Some(_) => return Err(io::Error::from_raw_os_error(libc::EINVAL)),
            None => None,
        };
        #[allow(deprecated)]
        ControlDevice::set_cursor(self, crtc, buffer.as_ref())
    }

    fn move_cursor(&mut self, crtc: u32, pos: (i32, i32)) -> io::Result<()> {
        #[allow(deprecated)]
        ControlDevice::move_cursor(self, handle::<crtc::Handle>(crtc)?, pos)
    }

    fn set_plane(
        &mut self,
        plane: u32,
        crtc: u32,
        framebuffer: Option<u32>,
        dst: (i32, i32, u32, u32),
        src: (u32, u32, u32, u32),
    ) -> io::Result<()> {
        let framebuffer = framebuffer
            .map(handle::<framebuffer::Handle>)
            .transpose()?;
        ControlDevice::set_plane(
            self,
            handle::<plane::Handle>(plane)?,
            handle::<crtc::Handle>(crtc)?,
            framebuffer,
            0,
            dst,
            src,
        )
    }

    fn set_property(&mut self, object: DrmObject, property: u32, value: u64) -> io::Result<()> {
        let property = handle::<property::Handle>(property)?;
        match object {
            DrmObject::Crtc(id) => {
                ControlDevice::set_property(self, handle::<crtc::Handle>(id)?, property, value)
            }
            DrmObject::Connector(id) => ControlDevice::set_property(
                self,
                handle::<connector::Handle>(id)?,
                property,
                value,
            ),
            DrmObject::Plane(id) => {
                ControlDevice::set_property(self, handle::<plane::Handle>(id)?, property, value)
            }
        }
    }

    fn wait_vblank(&self, pipe: u32) -> io::Result<()> {
        BasicDevice::wait_vblank(
            self,
            VblankWaitTarget::Relative(1),
            VblankWaitFlags::empty(),
            pipe,
            0,
        )?;
        Ok(())
    }
}
