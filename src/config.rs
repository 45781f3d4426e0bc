use crate::omr::classify::ClassifierParams;
use crate::omr::markers::MarkerParams;
use crate::preprocessing::Preset;
use crate::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    pub templates_dir: Option<PathBuf>,
    pub cors_origins: Vec<String>,
    pub scan_timeout: Duration,
    pub engine: EngineSettings,
}

/// Tuning knobs for the scan pipeline itself
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_preset: Preset,
    pub max_dimension: u32,
    pub markers: MarkerParams,
    pub classifier: ClassifierParams,
    pub annotate: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_preset: Preset::Default,
            max_dimension: 3000,
            markers: MarkerParams::default(),
            classifier: ClassifierParams::default(),
            annotate: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9393,
            max_file_size: 20 * 1024 * 1024,
            templates_dir: None,
            cors_origins: Vec::new(),
            scan_timeout: Duration::from_secs(30),
            engine: EngineSettings::default(),
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let default_preset = Preset::from_str(&args.preset)
            .ok_or_else(|| anyhow::anyhow!("unknown preprocessing preset: {}", args.preset))?;

        if !(0.0..1.0).contains(&args.min_fill_ratio) {
            anyhow::bail!("--min-fill-ratio must be in [0, 1), got {}", args.min_fill_ratio);
        }
        let max_fill_ratio = ClassifierParams::default().max_fill_ratio;
        if args.min_fill_ratio >= max_fill_ratio {
            anyhow::bail!(
                "--min-fill-ratio must stay below the {} ceiling, got {}",
                max_fill_ratio,
                args.min_fill_ratio
            );
        }
        if !(args.fill_margin.is_finite() && args.fill_margin >= 0.0) {
            anyhow::bail!("--fill-margin must be non-negative, got {}", args.fill_margin);
        }
        if args.max_dimension < 200 {
            anyhow::bail!("--max-dimension must be at least 200, got {}", args.max_dimension);
        }

        let classifier = ClassifierParams {
            relative_margin: args.fill_margin,
            min_fill_ratio: args.min_fill_ratio,
            ..ClassifierParams::default()
        };

        Ok(Self {
            host: args.host,
            port: args.port,
            max_file_size: args.max_file_size,
            templates_dir: args.templates_dir.map(PathBuf::from),
            cors_origins: args.cors_origins,
            scan_timeout: Duration::from_secs(args.scan_timeout_secs.max(1)),
            engine: EngineSettings {
                default_preset,
                max_dimension: args.max_dimension,
                markers: MarkerParams::default(),
                classifier,
                annotate: !args.no_annotate,
            },
        })
    }
}
