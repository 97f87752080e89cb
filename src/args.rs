use clap::Parser;
use std::path::PathBuf;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "selkies-viewer-core")]
#[command(author = "Selkies Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Selkies browser-side streaming core", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "./selkies-viewer.toml")]
    pub config: PathBuf,

    /// Signaling websocket base URL (overrides config)
    #[arg(long)]
    pub signaling_url: Option<String>,

    /// TURN/ICE configuration endpoint URL (overrides config)
    #[arg(long)]
    pub turn_config_url: Option<String>,

    /// Force relay-only ICE candidates
    #[arg(long, action)]
    pub force_relay: bool,

    /// Directory or file paths to offer for upload
    #[arg(long)]
    pub upload: Vec<PathBuf>,

    /// Directory backing the persisted settings store
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    /// Run in foreground (don't daemonize)
    #[arg(long, action)]
    pub foreground: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::ClientConfig, Box<dyn std::error::Error>> {
        let mut cfg = config::ClientConfig::load(&self.config)?;

        if let Some(ref url) = self.signaling_url {
            cfg.signaling.base_url = url.clone();
        }
        if let Some(ref url) = self.turn_config_url {
            cfg.signaling.turn_config_url = Some(url.clone());
        }
        if self.force_relay {
            cfg.transport.force_relay = true;
        }
        if let Some(ref dir) = self.store_dir {
            cfg.persist.store_dir = dir.clone();
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
