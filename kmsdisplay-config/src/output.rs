#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct Output {
    #[knuffel(argument)]
    pub connector: String,
    /// Pipe name (`A`, `B`, ...). Any free pipe when unset.
    #[knuffel(child, unwrap(argument))]
    pub pipe: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub force: Option<ForceState>,
    #[knuffel(child)]
    pub edid: Option<EdidConfig>,
    /// Background colour, BGR 16 bits per component.
    #[knuffel(child, unwrap(argument))]
    pub background: Option<u64>,
    #[knuffel(child)]
    pub modeline: Option<Modeline>,
}

/// State to force on a connector through sysfs.
#[derive(knuffel::DecodeScalar, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceState {
    Unspecified,
    On,
    Digital,
    Off,
}

/// EDID to inject through the debugfs override.
#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct EdidConfig {
    #[knuffel(arguments)]
    pub extensions: Vec<EdidExtensionName>,
    #[knuffel(property, default)]
    pub base: EdidBase,
}

#[derive(knuffel::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EdidBase {
    #[default]
    Base,
    Alt,
}

#[derive(knuffel::DecodeScalar, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdidExtensionName {
    Stereo,
    Uhd,
    Audio,
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq)]
pub struct Modeline {
    /// Pixel clock in MHz.
    #[knuffel(property)]
    pub clock: f64,
    #[knuffel(property)]
    pub hdisplay: u16,
    #[knuffel(property)]
    pub hsync_start: u16,
    #[knuffel(property)]
    pub hsync_end: u16,
    #[knuffel(property)]
    pub htotal: u16,
    #[knuffel(property)]
    pub vdisplay: u16,
    #[knuffel(property)]
    pub vsync_start: u16,
    #[knuffel(property)]
    pub vsync_end: u16,
    #[knuffel(property)]
    pub vtotal: u16,
    #[knuffel(property, default)]
    pub hsync_polarity: SyncPolarity,
    #[knuffel(property, default)]
    pub vsync_polarity: SyncPolarity,
}

#[derive(knuffel::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolarity {
    #[default]
    Positive,
    Negative,
}
