//! Synthetic EDID blocks.
//!
//! The base and alternate blocks are plain constant data. Extensions are CEA-861 blocks appended
//! after a copy of the base block; the base block's extension count and checksum are rewritten so
//! the result stays valid. Nothing here touches the device: use [`crate::kms::force`] to inject
//! the bytes into a connector.

pub const EDID_LENGTH: usize = 128;

const EXTENSION_COUNT: usize = 126;
const CHECKSUM: usize = 127;

const HEADER: [u8; 8] = [0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00];

const CEA_EXTENSION_TAG: u8 = 0x02;
const CEA_REVISION: u8 = 0x03;
const CEA_BASIC_AUDIO: u8 = 0x40;

const AUDIO_DATA_BLOCK: u8 = 1;
const VIDEO_DATA_BLOCK: u8 = 2;
const VENDOR_DATA_BLOCK: u8 = 3;
const SPEAKER_DATA_BLOCK: u8 = 4;

/// Detailed timing descriptor parameters, pixel clock in kHz.
struct DetailedTiming {
    clock_khz: u32,
    hactive: u16,
    hblank: u16,
    hoffset: u16,
    hpulse: u16,
    vactive: u16,
    vblank: u16,
    voffset: u16,
    vpulse: u16,
    width_mm: u16,
    height_mm: u16,
}

struct Template {
    timing: DetailedTiming,
    product: u16,
    name: [u8; 13],
}

// 1920x1080@60, CEA timing.
const BASE_TEMPLATE: Template = Template {
    timing: DetailedTiming {
        clock_khz: 148_500,
        hactive: 1920,
        hblank: 280,
        hoffset: 88,
        hpulse: 44,
        vactive: 1080,
        vblank: 45,
        voffset: 4,
        vpulse: 5,
        width_mm: 520,
        height_mm: 300,
    },
    product: 0x0001,
    name: *b"kmsdisplay\n  ",
};

// 1400x1050@60, CVT reduced blanking.
const ALT_TEMPLATE: Template = Template {
    timing: DetailedTiming {
        clock_khz: 101_000,
        hactive: 1400,
        hblank: 160,
        hoffset: 48,
        hpulse: 32,
        vactive: 1050,
        vblank: 30,
        voffset: 3,
        vpulse: 4,
        width_mm: 400,
        height_mm: 300,
    },
    product: 0x0002,
    name: *b"kmsdisplay-b\n",
};

/// Base block: 1920x1080 preferred, plus 1280x720, 1024x768, 800x600 and 640x480, all at 60 Hz.
pub const BASE_EDID: [u8; EDID_LENGTH] = build_edid(&BASE_TEMPLATE);

/// Alternate block: 1400x1050 preferred, plus the modes of [`BASE_EDID`].
pub const ALT_EDID: [u8; EDID_LENGTH] = build_edid(&ALT_TEMPLATE);

pub fn base_edid() -> &'static [u8; EDID_LENGTH] {
    &BASE_EDID
}

pub fn alt_edid() -> &'static [u8; EDID_LENGTH] {
    &ALT_EDID
}

/// Capability advertised by an appended CEA-861 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdidExtension {
    /// HDMI vendor block with `3D_present` set.
    Stereo3d,
    /// HDMI vendor block listing HDMI VIC 1 (3840x2160@30).
    Hdmi4k,
    /// Basic audio: two-channel LPCM and a front left/right speaker allocation.
    Audio,
}

impl EdidExtension {
    pub fn block(self) -> [u8; EDID_LENGTH] {
        match self {
            Self::Stereo3d => cea_block(0, &[&VIDEO_BLOCK, &HDMI_3D_BLOCK]),
            Self::Hdmi4k => cea_block(0, &[&VIDEO_BLOCK, &HDMI_4K_BLOCK]),
            Self::Audio => cea_block(
                CEA_BASIC_AUDIO,
                &[&AUDIO_BLOCK, &SPEAKER_BLOCK, &HDMI_BLOCK],
            ),
        }
    }
}

/// Copies `base` and appends one extension block of the given kind.
pub fn add_extension(base: &[u8; EDID_LENGTH], kind: EdidExtension) -> Vec<u8> {
    add_extensions(base, &[kind])
}

/// Copies `base` and appends one extension block per entry of `kinds`, in order.
///
/// Only bytes 126 (extension count) and 127 (checksum) of the copied base block change.
pub fn add_extensions(base: &[u8; EDID_LENGTH], kinds: &[EdidExtension]) -> Vec<u8> {
    debug_assert!(kinds.len() <= usize::from(u8::MAX));

    let mut head = *base;
    head[EXTENSION_COUNT] = head[EXTENSION_COUNT].wrapping_add(kinds.len() as u8);
    head[CHECKSUM] = checksum(&head);

    let mut edid = Vec::with_capacity(EDID_LENGTH * (1 + kinds.len()));
    edid.extend_from_slice(&head);
    for kind in kinds {
        edid.extend_from_slice(&kind.block());
    }
    edid
}

/// Value for byte 127 that makes the block sum to zero modulo 256.
pub const fn checksum(block: &[u8; EDID_LENGTH]) -> u8 {
    let mut sum = 0u8;
    let mut i = 0;
    while i < CHECKSUM {
        sum = sum.wrapping_add(block[i]);
        i += 1;
    }
    0u8.wrapping_sub(sum)
}

pub fn is_block_valid(block: &[u8]) -> bool {
    block.len() == EDID_LENGTH && block.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)) == 0
}

/// Number of extension blocks announced by the base block.
pub fn extension_count(edid: &[u8]) -> Option<u8> {
    if edid.len() < EDID_LENGTH {
        return None;
    }
    Some(edid[EXTENSION_COUNT])
}

const fn data_block_header(tag: u8, len: usize) -> u8 {
    (tag << 5) | len as u8
}

// VIC 16 (1080p60, native) and VIC 4 (720p60).
const VIDEO_BLOCK: [u8; 3] = [data_block_header(VIDEO_DATA_BLOCK, 2), 0x80 | 16, 4];

// IEEE OUI 00-0C-03, source physical address 1.0.0.0.
const HDMI_BLOCK: [u8; 6] = [
    data_block_header(VENDOR_DATA_BLOCK, 5),
    0x03,
    0x0c,
    0x00,
    0x10,
    0x00,
];

const HDMI_3D_BLOCK: [u8; 11] = [
    data_block_header(VENDOR_DATA_BLOCK, 10),
    0x03,
    0x0c,
    0x00,
    0x10,
    0x00,
    0x00,
    0x00,
    // HDMI_Video_present.
    0x20,
    // 3D_present.
    0x80,
    0x00,
];

const HDMI_4K_BLOCK: [u8; 12] = [
    data_block_header(VENDOR_DATA_BLOCK, 11),
    0x03,
    0x0c,
    0x00,
    0x10,
    0x00,
    0x00,
    0x00,
    // HDMI_Video_present.
    0x20,
    0x00,
    // HDMI_VIC_LEN = 1.
    0x20,
    // HDMI_VIC 1: 3840x2160@30.
    0x01,
];

// LPCM, 2 channels, 32/44.1/48 kHz, 16/20/24 bit.
const AUDIO_BLOCK: [u8; 4] = [data_block_header(AUDIO_DATA_BLOCK, 3), 0x09, 0x07, 0x07];

// Front left/right.
const SPEAKER_BLOCK: [u8; 4] = [data_block_header(SPEAKER_DATA_BLOCK, 3), 0x01, 0x00, 0x00];

fn cea_block(flags: u8, data_blocks: &[&[u8]]) -> [u8; EDID_LENGTH] {
    let mut block = [0u8; EDID_LENGTH];
    block[0] = CEA_EXTENSION_TAG;
    block[1] = CEA_REVISION;
    block[3] = flags;

    let mut offset = 4;
    for data in data_blocks {
        block[offset..offset + data.len()].copy_from_slice(data);
        offset += data.len();
    }

    // No detailed timings follow, so they would start right after the data blocks.
    block[2] = offset as u8;
    block[CHECKSUM] = checksum(&block);
    block
}

const fn put(mut block: [u8; EDID_LENGTH], offset: usize, bytes: &[u8]) -> [u8; EDID_LENGTH] {
    let mut i = 0;
    while i < bytes.len() {
        block[offset + i] = bytes[i];
        i += 1;
    }
    block
}

const fn detailed_timing(t: &DetailedTiming) -> [u8; 18] {
    let clock = (t.clock_khz / 10) as u16;
    [
        (clock & 0xff) as u8,
        (clock >> 8) as u8,
        (t.hactive & 0xff) as u8,
        (t.hblank & 0xff) as u8,
        (((t.hactive >> 8) as u8) << 4) | (t.hblank >> 8) as u8,
        (t.vactive & 0xff) as u8,
        (t.vblank & 0xff) as u8,
        (((t.vactive >> 8) as u8) << 4) | (t.vblank >> 8) as u8,
        (t.hoffset & 0xff) as u8,
        (t.hpulse & 0xff) as u8,
        (((t.voffset & 0xf) as u8) << 4) | (t.vpulse & 0xf) as u8,
        (((t.hoffset >> 8) as u8) << 6)
            | (((t.hpulse >> 8) as u8) << 4)
            | (((t.voffset >> 4) as u8) << 2)
            | (t.vpulse >> 4) as u8,
        (t.width_mm & 0xff) as u8,
        (t.height_mm & 0xff) as u8,
        (((t.width_mm >> 8) as u8) << 4) | (t.height_mm >> 8) as u8,
        0x00,
        0x00,
        // Digital separate sync, positive polarities.
        0x1e,
    ]
}

const fn build_edid(template: &Template) -> [u8; EDID_LENGTH] {
    let t = &template.timing;
    let mut edid = [0u8; EDID_LENGTH];

    edid = put(edid, 0, &HEADER);
    // Manufacturer "KMS", little-endian product code, no serial.
    edid = put(edid, 8, &[0x2d, 0xb3]);
    edid = put(edid, 10, &template.product.to_le_bytes());
    // Week 1 of 2016, EDID 1.3.
    edid = put(edid, 16, &[0x01, 26, 0x01, 0x03]);
    // Digital input, screen size in cm, gamma 2.2, RGB with preferred timing first.
    edid = put(
        edid,
        20,
        &[
            0x80,
            (t.width_mm / 10) as u8,
            (t.height_mm / 10) as u8,
            0x78,
            0x0a,
        ],
    );
    edid = put(
        edid,
        25,
        &[0xee, 0x91, 0xa3, 0x54, 0x4c, 0x99, 0x26, 0x0f, 0x50, 0x54],
    );
    // Established timings: 640x480@60, 800x600@60, 1024x768@60.
    edid = put(edid, 35, &[0x21, 0x08, 0x00]);
    // Standard timings: 1920x1080@60 and 1280x720@60, rest unused.
    edid = put(
        edid,
        38,
        &[
            0xd1, 0xc0, 0x81, 0xc0, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01,
        ],
    );

    edid = put(edid, 54, &detailed_timing(t));

    // Monitor name.
    edid = put(edid, 72, &[0x00, 0x00, 0x00, 0xfc, 0x00]);
    edid = put(edid, 77, &template.name);

    // Range limits: 50-70 Hz vertical, 30-80 kHz horizontal, 150 MHz, no secondary timing.
    edid = put(
        edid,
        90,
        &[
            0x00, 0x00, 0x00, 0xfd, 0x00, 50, 70, 30, 80, 15, 0x00, 0x0a, 0x20, 0x20, 0x20, 0x20,
            0x20, 0x20,
        ],
    );

    // Dummy descriptor.
    edid = put(edid, 108, &[0x00, 0x00, 0x00, 0x10, 0x00]);

    edid[CHECKSUM] = checksum(&edid);
    edid
}
