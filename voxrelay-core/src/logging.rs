//! Tracing subscriber setup
//!
//! Coordinator level policy: joins, leaves and producer transitions log at
//! `info`; consumer creation and skipped operations at `debug`; a failed
//! engine call at `warn`; routing and internal failures at `error`. An
//! `info` deployment therefore sees one line per membership or producer
//! change, never one per consumer.

use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Dependencies that flood the log below `warn`. A `logging.targets` entry
/// for the same target replaces these.
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("sqlx", "warn"),
    ("hyper", "warn"),
    ("tungstenite", "warn"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, for terminals
    Pretty,
    /// One flattened JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(anyhow::anyhow!("Invalid log format: {other}")),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` replaces the configured
/// filter entirely.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let format: LogFormat = config.format.parse()?;
    let directives = filter_directives(config)?;
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directives))?;

    let to_file = config.file_path.is_some();
    let writer = match &config.file_path {
        Some(path) => BoxMakeWriter::new(Arc::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_line_number(true)
            .with_file(false)
            .with_ansi(!to_file)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).with(filter).try_init()?;
    Ok(())
}

/// The configured level, the quiet dependency targets, then
/// `logging.targets`, as one `EnvFilter` directive string
fn filter_directives(config: &LoggingConfig) -> anyhow::Result<String> {
    let level = parse_log_level(&config.level)?;

    for target in &config.targets {
        if let Some((_, level)) = target.split_once('=') {
            parse_log_level(level)?;
        }
        target
            .parse::<Directive>()
            .map_err(|e| anyhow::anyhow!("Invalid log target {target:?}: {e}"))?;
    }

    let overridden = |name: &str| {
        config
            .targets
            .iter()
            .any(|target| target.split('=').next() == Some(name))
    };

    let mut directives = vec![level.to_string().to_lowercase()];
    directives.extend(
        QUIET_TARGETS
            .iter()
            .filter(|(name, _)| !overridden(*name))
            .map(|(name, level)| format!("{name}={level}")),
    );
    directives.extend(config.targets.iter().cloned());
    Ok(directives.join(","))
}

fn open_log_file(path: &str) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_log_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_directives_quiet_dependencies() {
        let directives = filter_directives(&LoggingConfig::default()).unwrap();
        assert_eq!(directives, "info,sqlx=warn,hyper=warn,tungstenite=warn");
    }

    #[test]
    fn test_targets_replace_quiet_defaults() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            targets: vec![
                "sqlx=debug".to_string(),
                "voxrelay_sfu::reconciler=debug".to_string(),
            ],
            ..Default::default()
        };
        let directives = filter_directives(&config).unwrap();
        assert_eq!(
            directives,
            "warn,hyper=warn,tungstenite=warn,sqlx=debug,voxrelay_sfu::reconciler=debug"
        );
    }

    #[test]
    fn test_invalid_settings_rejected_before_install() {
        let loud = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&loud).is_err());

        let bad_target = LoggingConfig {
            targets: vec!["voxrelay_sfu=loud".to_string()],
            ..Default::default()
        };
        assert!(filter_directives(&bad_target).is_err());

        let xml = LoggingConfig {
            format: "xml".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&xml).is_err());
    }
}
