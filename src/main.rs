//! `kmsctl`: inspect and drive the displays of a DRM device.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use kmsdisplay::edid::{self, EdidExtension};
use kmsdisplay::kms::force::{ConnectorForcer, ForceRoots};
use kmsdisplay::kms::helpers::{
    connector_status_str, dump_mode, encoder_kind_str, mode_from_modeline, set_connector_dpms,
    Dpms,
};
use kmsdisplay::kms::{Card, CommitStyle, Display, KmsDevice, PipeId};
use kmsdisplay_config::{Config, EdidBase, EdidExtensionName, ForceState};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CARD: &str = "/dev/dri/card0";

#[derive(Parser)]
#[command(name = "kmsctl")]
#[command(about = "Inspect and drive KMS displays", version)]
struct Cli {
    /// DRM device to open.
    #[arg(long, short, global = true)]
    card: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List pipes, planes and outputs
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Write a synthesized EDID to a file
    Edid {
        /// Use the 1400x1050 base block.
        #[arg(long)]
        alt: bool,
        /// Extension blocks to append, in order.
        #[arg(long = "ext", value_enum)]
        extensions: Vec<ExtensionArg>,
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Force a connector's status and EDID through sysfs and debugfs
    Force {
        /// Connector name, e.g. HDMI-A-1.
        connector: String,
        #[arg(value_enum)]
        state: ForceArg,
        /// EDID file to inject.
        #[arg(long, conflicts_with = "reset_edid")]
        edid: Option<PathBuf>,
        /// Remove an injected EDID.
        #[arg(long)]
        reset_edid: bool,
    },
    /// Force every connector of the card on
    EnableAll,
    /// Apply a config file and commit it
    Commit {
        #[arg(long, short)]
        config: PathBuf,
        /// Vblanks to wait for on every lit pipe after committing.
        #[arg(long, default_value_t = 0)]
        frames: u32,
        /// Undo forced connector state and EDID overrides before exiting.
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExtensionArg {
    Stereo,
    Uhd,
    Audio,
}

#[derive(Clone, Copy, ValueEnum)]
enum ForceArg {
    Detect,
    On,
    Digital,
    Off,
}

impl From<ExtensionArg> for EdidExtension {
    fn from(arg: ExtensionArg) -> Self {
        match arg {
            ExtensionArg::Stereo => Self::Stereo3d,
            ExtensionArg::Uhd => Self::Hdmi4k,
            ExtensionArg::Audio => Self::Audio,
        }
    }
}

impl From<ForceArg> for ForceState {
    fn from(arg: ForceArg) -> Self {
        match arg {
            ForceArg::Detect => Self::Unspecified,
            ForceArg::On => Self::On,
            ForceArg::Digital => Self::Digital,
            ForceArg::Off => Self::Off,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let directives =
        env::var("RUST_LOG").unwrap_or_else(|_| "kmsdisplay=debug,kmsctl=debug".to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();
    let card = cli.card;

    match cli.command {
        Command::List { json } => list(card.as_deref(), json),
        Command::Edid {
            alt,
            extensions,
            output,
        } => {
            let base = if alt { edid::alt_edid() } else { edid::base_edid() };
            let kinds: Vec<EdidExtension> = extensions.into_iter().map(Into::into).collect();
            let bytes = edid::add_extensions(base, &kinds);
            fs::write(&output, &bytes).with_context(|| format!("error writing {output:?}"))?;
            info!("wrote {} EDID blocks to {output:?}", bytes.len() / edid::EDID_LENGTH);
            Ok(())
        }
        Command::Force {
            connector,
            state,
            edid,
            reset_edid,
        } => {
            let card = Card::open(card.as_deref().unwrap_or(Path::new(DEFAULT_CARD)))?;
            let minor = card_minor(&card)?;
            let roots = ForceRoots::default();

            if let Some(edid) = edid {
                let bytes = fs::read(&edid).with_context(|| format!("error reading {edid:?}"))?;
                roots.force_edid(minor, &connector, Some(&bytes))?;
            } else if reset_edid {
                roots.force_edid(minor, &connector, None)?;
            }
            roots.force_connector(minor, &connector, state.into())
        }
        Command::EnableAll => {
            let card = Card::open(card.as_deref().unwrap_or(Path::new(DEFAULT_CARD)))?;
            let mut forcer = ConnectorForcer::new(ForceRoots::default(), card_minor(&card)?);
            let display = Display::init(card)?;

            let names: Vec<&str> = display.outputs().iter().map(|output| output.name()).collect();
            let forced = forcer.enable_connectors(names.iter().copied());
            info!("forced {forced} of {} connectors on", names.len());
            Ok(())
        }
        Command::Commit {
            config,
            frames,
            reset,
        } => commit(card.as_deref(), &config, frames, reset),
    }
}

fn card_minor(card: &Card) -> anyhow::Result<u32> {
    card.minor()
        .with_context(|| format!("{:?} is not a cardN device", card.path()))
}

// =============================================================================
// list
// =============================================================================

#[derive(Serialize)]
struct PipeReport {
    pipe: String,
    crtc: u32,
    enabled: bool,
    background: bool,
    planes: Vec<PlaneReport>,
}

#[derive(Serialize)]
struct PlaneReport {
    kind: String,
    id: Option<u32>,
    rotation: bool,
}

#[derive(Serialize)]
struct OutputReport {
    connector: u32,
    name: String,
    status: &'static str,
    encoders: Vec<&'static str>,
    modes: Vec<String>,
}

#[derive(Serialize)]
struct Report {
    universal_planes: bool,
    pipes: Vec<PipeReport>,
    outputs: Vec<OutputReport>,
}

fn list(card: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let card = Card::open(card.unwrap_or(Path::new(DEFAULT_CARD)))?;
    let display = Display::init(card)?;

    let pipes = display
        .pipes()
        .iter()
        .map(|pipe| PipeReport {
            pipe: pipe.id().to_string(),
            crtc: pipe.crtc_id(),
            enabled: pipe.is_enabled(),
            background: pipe.has_background(),
            planes: pipe
                .planes()
                .iter()
                .map(|plane| PlaneReport {
                    kind: plane.kind().to_string(),
                    id: plane.drm_id(),
                    rotation: plane.supports_rotation(),
                })
                .collect(),
        })
        .collect();

    let mut outputs = Vec::new();
    for output in display.outputs() {
        let info = display
            .device()
            .connector(output.id(), true)
            .with_context(|| format!("error reading {}", output.name()))?;
        let encoders = info
            .encoders
            .iter()
            .map(|&id| display.device().encoder(id).map(|enc| encoder_kind_str(enc.kind)))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("error reading encoders of {}", output.name()))?;

        if !json {
            info!(
                "{} ({}): {}, encoders [{}], {} modes",
                output.name(),
                output.id(),
                connector_status_str(info.state),
                encoders.join(", "),
                info.modes.len()
            );
            for mode in &info.modes {
                dump_mode(mode);
            }
        }

        outputs.push(OutputReport {
            connector: output.id(),
            name: output.name().to_owned(),
            status: connector_status_str(info.state),
            encoders,
            modes: info
                .modes
                .iter()
                .map(|mode| {
                    let (w, h) = mode.size();
                    format!("{w}x{h}@{}", mode.vrefresh())
                })
                .collect(),
        });
    }

    let report = Report {
        universal_planes: display.has_universal_planes(),
        pipes,
        outputs,
    };

    if json {
        let stdout = std::io::stdout().lock();
        serde_json::to_writer_pretty(stdout, &report).context("error writing JSON")?;
        println!();
    } else {
        for pipe in &report.pipes {
            let planes: Vec<_> = pipe.planes.iter().map(|plane| plane.kind.as_str()).collect();
            info!("pipe {}: crtc {}, planes {}", pipe.pipe, pipe.crtc, planes.join(", "));
        }
    }

    Ok(())
}

// =============================================================================
// commit
// =============================================================================

fn config_edid(base: EdidBase, extensions: &[EdidExtensionName]) -> Vec<u8> {
    let base = match base {
        EdidBase::Base => edid::base_edid(),
        EdidBase::Alt => edid::alt_edid(),
    };
    let kinds: Vec<EdidExtension> = extensions
        .iter()
        .map(|ext| match ext {
            EdidExtensionName::Stereo => EdidExtension::Stereo3d,
            EdidExtensionName::Uhd => EdidExtension::Hdmi4k,
            EdidExtensionName::Audio => EdidExtension::Audio,
        })
        .collect();
    edid::add_extensions(base, &kinds)
}

fn commit(card: Option<&Path>, config_path: &Path, frames: u32, reset: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path).map_err(|err| anyhow!("{err:?}"))?;

    let path = card
        .or(config.card.as_deref())
        .unwrap_or(Path::new(DEFAULT_CARD));
    let card = Card::open(path)?;
    let roots = ForceRoots::new(
        config.debug.sysfs_root.as_deref(),
        config.debug.debugfs_root.as_deref(),
    );
    let mut forcer = ConnectorForcer::new(roots, card_minor(&card)?);

    // Forced state has to be in place before the connectors are read.
    let mut res = force_outputs(&mut forcer, &config);
    if res.is_ok() {
        res = Display::init(card)
            .map_err(anyhow::Error::from)
            .and_then(|mut display| drive(&mut display, &config, frames));
    }

    if reset {
        forcer.reset_connectors()?;
    }
    res
}

fn force_outputs(forcer: &mut ConnectorForcer, config: &Config) -> anyhow::Result<()> {
    for output in &config.outputs {
        if let Some(edid) = &output.edid {
            let bytes = config_edid(edid.base, &edid.extensions);
            forcer.force_edid(&output.connector, Some(&bytes))?;
        }
        if let Some(force) = output.force {
            forcer.force_connector(&output.connector, force)?;
        }
    }
    Ok(())
}

fn drive(display: &mut Display<Card>, config: &Config, frames: u32) -> anyhow::Result<()> {
    for output in &config.outputs {
        let idx = display
            .find_output(&output.connector)
            .with_context(|| format!("no connector named {}", output.connector))?;

        let pipe = match &output.pipe {
            Some(name) => Some(
                PipeId::from_name(name).with_context(|| format!("invalid pipe name {name:?}"))?,
            ),
            None => None,
        };
        display.set_pipe(idx, pipe)?;

        if let Some(modeline) = &output.modeline {
            let mode = mode_from_modeline(modeline)
                .with_context(|| format!("invalid modeline for {}", output.connector))?;
            display.override_mode(idx, Some(mode))?;
        }

        if let Some(color) = output.background {
            let Some(pipe) = pipe else {
                bail!("{}: background needs an explicit pipe", output.connector);
            };
            display
                .pipe_mut(pipe)
                .with_context(|| format!("no pipe {pipe}"))?
                .set_background(color)?;
        }
    }

    let style = config
        .commit_style
        .map_or_else(|| display.default_commit_style(), CommitStyle::from);
    display
        .try_commit2(style)
        .with_context(|| format!("{style:?} commit failed"))?;

    let mut lit = Vec::new();
    for idx in 0..display.outputs().len() {
        let output = &display.outputs()[idx];
        let (Some(config), Some(mode)) = (output.config(), output.mode()) else {
            continue;
        };
        let (id, name, pipe) = (output.id(), output.name().to_owned(), config.pipe);
        let (w, h) = mode.size();
        info!(
            "{name}: pipe {pipe}, encoder {}, {w}x{h}@{}",
            encoder_kind_str(config.encoder.kind),
            mode.vrefresh()
        );

        if let Err(err) = set_connector_dpms(display.device_mut(), id, Dpms::On) {
            warn!("error setting DPMS on {name}: {err}");
        }
        lit.push(pipe);
    }

    for _ in 0..frames {
        for &pipe in &lit {
            display
                .wait_for_vblank(pipe)
                .with_context(|| format!("error waiting for vblank on pipe {pipe}"))?;
        }
    }

    Ok(())
}
