use clap::Parser;
use log::{LevelFilter, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use tubedrop::api::{self, AppState};
use tubedrop::build_service;
use tubedrop::config::Config;

#[derive(Parser, Clone)]
#[command(version, about)]
pub struct Cli {
    /// Path of the config file, `<config dir>/tubedrop/config.toml` by default.
    #[arg(long = "config", short)]
    pub config: Option<PathBuf>,

    #[arg(long = "host")]
    pub host: Option<String>,

    #[arg(long = "port", short)]
    pub port: Option<u16>,

    #[arg(long = "downloads-dir", short)]
    pub downloads_dir: Option<PathBuf>,

    #[arg(long = "yt-dlp")]
    pub yt_dlp: Option<PathBuf>,

    #[arg(
        long = "verbosity",
        short,
        default_value = "info",
        value_parser = clap::builder::PossibleValuesParser::new([
            "info", "debug", "error", "none", "full"
        ])
    )]
    pub verbosity: String,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = &self.downloads_dir {
            config.downloads.dir = dir.clone();
        }
        if let Some(executable) = &self.yt_dlp {
            config.tool.executable = executable.clone();
        }
    }
}

fn init_logging(verbosity: &str) {
    let level = match verbosity {
        "debug" => LevelFilter::Debug,
        "error" => LevelFilter::Error,
        "none" => LevelFilter::Off,
        "full" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Cli::parse();
    init_logging(&args.verbosity);

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| format!("Invalid address {}:{}: {}", config.server.host, config.server.port, e))?;

    let service = build_service(&config)?;
    info!("{}", service);

    let maintenance = service.spawn_maintenance(config.sweep_interval());
    let router = api::router(AppState::new(service), config.server.static_dir.as_deref());

    api::serve(router, addr).await?;
    maintenance.abort();
    Ok(())
}
