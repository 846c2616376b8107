//! `draw-demo`: a minimal draw client.
//!
//! Connects to the draw server, opens a window, and echoes input:
//!
//! ```text
//! main()
//!  └─ connect()                  -- transport + session setup
//!  └─ init_keyboard()            -- pump thread -> Keyboardctl
//!  └─ mouse thread               -- Mousectl::read loop, re-attaches on resize
//!  └─ select loop
//!       ├─ key 'q'               -> quit
//!       ├─ key 'p'               -> print the clipboard
//!       ├─ mouse event           -> log it
//!       ├─ keyboard end of stream -> quit
//!       └─ Ctrl-C                -> quit
//! ```
//!
//! Settings come from the config file (see `infrastructure::config`), and
//! command-line flags override them.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use draw_client::infrastructure::config::{load_config, load_config_from, ConfigError, DrawConfig};
use draw_client::{connect, Display};
use draw_core::{MouseEvent, Refresh};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "draw-demo", version, about = "Open a draw window and echo its input")]
struct Cli {
    /// Config file to read instead of the platform default.
    #[arg(long, env = "DRAW_CONFIG")]
    config: Option<PathBuf>,

    /// Window label.
    #[arg(long)]
    label: Option<String>,

    /// Window width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Window height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Screen resolution used to scale pixel sizes.
    #[arg(long)]
    dpi: Option<i32>,
}

fn load(cli: &Cli) -> anyhow::Result<DrawConfig> {
    let mut cfg = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => match load_config() {
            Err(ConfigError::NoPlatformConfigDir) => DrawConfig::default(),
            other => other?,
        },
    };
    if let Some(label) = &cli.label {
        cfg.session.label = label.clone();
    }
    if let Some(width) = cli.width {
        cfg.session.width = width;
    }
    if let Some(height) = cli.height {
        cfg.session.height = height;
    }
    if let Some(dpi) = cli.dpi {
        cfg.session.dpi = dpi;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Reads the mouse on a blocking thread, re-attaching the display whenever
/// the window is resized.
fn spawn_mouse(display: Display, tx: mpsc::Sender<MouseEvent>) -> anyhow::Result<()> {
    let mut mousectl = display.init_mouse()?;
    tokio::task::spawn_blocking(move || loop {
        let event = match mousectl.read() {
            Ok(event) => event,
            Err(e) => {
                debug!("mouse stopped: {e}");
                return;
            }
        };
        if event.resized {
            if let Err(e) = display.attach(Refresh::Backup) {
                error!("re-attach after resize failed: {e}");
                return;
            }
        }
        if tx.blocking_send(event).is_err() {
            return;
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load(&cli)?;

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.session.log_level)),
        )
        .init();

    info!(label = %cfg.session.label, "draw-demo starting");

    let display = {
        let cfg = cfg.clone();
        tokio::task::spawn_blocking(move || connect(&cfg))
            .await?
            .context("cannot open display")?
    };

    let mut keyboard = display.init_keyboard()?;
    let mut exit_rx = display
        .take_exit_receiver()
        .context("exit notification already taken")?;

    let (mouse_tx, mut mouse_rx) = mpsc::channel(32);
    spawn_mouse(display.clone(), mouse_tx)?;

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            key = keyboard.recv() => match key {
                Some('q') | None => break,
                Some('p') => {
                    let d = display.clone();
                    match tokio::task::spawn_blocking(move || d.read_snarf()).await? {
                        Ok(snarf) => println!("{}", String::from_utf8_lossy(&snarf)),
                        Err(e) => warn!("cannot read clipboard: {e}"),
                    }
                }
                Some(c) => info!("key {c:?}"),
            },
            Some(event) = mouse_rx.recv() => {
                debug!(
                    x = event.mouse.point.x,
                    y = event.mouse.point.y,
                    buttons = event.mouse.buttons,
                    resized = event.resized,
                    "mouse"
                );
            }
            _ = exit_rx.recv() => {
                info!("keyboard closed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    display.close()?;
    info!("draw-demo stopped");
    Ok(())
}
