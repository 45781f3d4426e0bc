use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod engine;
mod error;
mod omr;
mod preprocessing;
mod server;
mod template;

#[cfg(test)]
mod test_support;

#[derive(Parser, Debug)]
#[command(name = "omr-scan-server")]
#[command(about = "Optical mark recognition server for photographed answer sheets")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "OMR_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "OMR_PORT", default_value = "9393")]
    pub port: u16,

    /// Maximum image size in bytes (default: 20MB)
    #[arg(long, env = "OMR_MAX_FILE_SIZE", default_value = "20971520")]
    pub max_file_size: usize,

    /// Directory of additional template configs (*.json, file stem = template id)
    #[arg(long, env = "OMR_TEMPLATES_DIR")]
    pub templates_dir: Option<String>,

    /// Default preprocessing preset (minimal, default, aggressive)
    #[arg(long, env = "OMR_PRESET", default_value = "default")]
    pub preset: String,

    /// Longest side, in pixels, a photo is downscaled to before marker search
    #[arg(long, env = "OMR_MAX_DIMENSION", default_value = "3000")]
    pub max_dimension: u32,

    /// Wall-clock budget for a single scan, in seconds
    #[arg(long, env = "OMR_SCAN_TIMEOUT_SECS", default_value = "30")]
    pub scan_timeout_secs: u64,

    /// Margin a cell's fill ratio must clear above the sheet's empty baseline
    #[arg(long, env = "OMR_FILL_MARGIN", default_value = "0.30")]
    pub fill_margin: f32,

    /// Lowest fill ratio that can ever count as a mark
    #[arg(long, env = "OMR_MIN_FILL_RATIO", default_value = "0.35")]
    pub min_fill_ratio: f32,

    /// Skip rendering the annotated overlay
    #[arg(long, env = "OMR_NO_ANNOTATE", default_value_t = false)]
    pub no_annotate: bool,

    /// Allowed CORS origins (comma separated)
    #[arg(
        long,
        env = "OMR_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:5173,http://localhost:3000"
    )]
    pub cors_origins: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::try_from(args)?;

    tracing::info!("Starting omr-scan-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Binding to {}:{}", config.host, config.port);

    server::run(config).await
}
