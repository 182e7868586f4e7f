use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use machlink::{init_logging, session_config, Gateway, ShellHooks, BUILD_DATE};
use machlink_communication::spawn_session;
use machlink_core::EventDispatcher;
use machlink_settings::Config;

#[derive(Debug, Parser)]
#[command(
    name = "machlink",
    about = "Protocol gateway between a web control panel and CNC / 3D printer firmware",
    version
)]
struct Cli {
    /// Configuration file, created with defaults when missing
    #[arg(long, env = "MACHLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Viewer gateway address, overrides the configured one
    #[arg(long, env = "MACHLINK_BIND")]
    bind: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "MACHLINK_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => Config::default_path().context("cannot locate config directory")?,
        };
        let mut config = Config::load_or_create(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;

        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    init_logging(&config.logging.level, config.logging.json)?;
    info!(
        "machlink {} (built {})",
        env!("CARGO_PKG_VERSION"),
        BUILD_DATE
    );

    let events = EventDispatcher::new(config.server.event_buffer);
    let hooks = ShellHooks::new(&config.job);
    let (session, session_task) =
        spawn_session(session_config(&config), events, Box::new(hooks));

    let gateway = Gateway::new(session.clone(), &config);
    let result = gateway
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await;

    session.shutdown();
    session_task.await.context("session task panicked")?;
    info!("machlink stopped");
    result
}
