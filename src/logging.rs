use crate::config::{LogFormat, LogLevel, LogOutputType, LogTarget, LoggingConfig};
use crate::error::ProxyError;
use chrono::{DateTime, Utc};
use log::{LevelFilter, Record};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

/// Logger driven by the `logging` section of the config file. Each target has
/// its own writer and optional level.
pub struct CustomLogger {
    default_level: LevelFilter,
    targets: Vec<LogTarget>,
    format: LogFormat,
    writers: Vec<Mutex<BufWriter<Box<dyn Write + Send>>>>,
}

impl CustomLogger {
    pub fn new(config: LoggingConfig) -> Result<Self, ProxyError> {
        let format = config.format.unwrap_or_default();
        let default_level = config.level.unwrap_or_default().into();
        let targets = config.targets.unwrap_or_else(|| {
            vec![LogTarget {
                output_type: LogOutputType::Stdout,
                path: None,
                level: None,
            }]
        });

        let mut writers = Vec::new();

        for target in &targets {
            let writer: Box<dyn Write + Send> = match target.output_type {
                LogOutputType::Stdout => Box::new(std::io::stdout()),
                LogOutputType::File => {
                    let path = target.path.as_ref().ok_or_else(|| {
                        ProxyError::Config("File log target requires path".to_string())
                    })?;
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .map_err(|e| {
                            ProxyError::Config(format!(
                                "Failed to open log file {}: {}",
                                path.display(),
                                e
                            ))
                        })?;
                    Box::new(file)
                }
            };
            writers.push(Mutex::new(BufWriter::new(writer)));
        }

        Ok(Self {
            default_level,
            targets,
            format,
            writers,
        })
    }

    pub fn init(config: LoggingConfig) -> Result<(), ProxyError> {
        let logger = Self::new(config)?;
        let max_level = logger.max_level();
        log::set_boxed_logger(Box::new(logger))
            .map_err(|e| ProxyError::Config(format!("Logger already initialized: {}", e)))?;
        log::set_max_level(max_level);
        Ok(())
    }

    fn target_level(&self, target: &LogTarget) -> LevelFilter {
        target.level.map(LevelFilter::from).unwrap_or(self.default_level)
    }

    /// Most verbose level any target accepts.
    pub fn max_level(&self) -> LevelFilter {
        self.targets
            .iter()
            .map(|t| self.target_level(t))
            .max()
            .unwrap_or(self.default_level)
    }

    fn format_record(&self, record: &Record) -> String {
        match self.format {
            LogFormat::Text => format_text(record),
            LogFormat::Json => format_json(record),
        }
    }
}

impl log::Log for CustomLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = self.format_record(record);

        for (target, writer) in self.targets.iter().zip(&self.writers) {
            if record.level() <= self.target_level(target) {
                if let Ok(mut writer) = writer.lock() {
                    let _ = writeln!(writer, "{}", message);
                    let _ = writer.flush();
                }
            }
        }
    }

    fn flush(&self) {
        for writer in &self.writers {
            if let Ok(mut w) = writer.lock() {
                let _ = w.flush();
            }
        }
    }
}

fn format_text(record: &Record) -> String {
    let timestamp: DateTime<Utc> = Utc::now();
    format!(
        "{} [{}] [{}] {}",
        timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.target(),
        record.args()
    )
}

fn format_json(record: &Record) -> String {
    let timestamp: DateTime<Utc> = Utc::now();
    let log_entry = json!({
        "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": record.level().to_string().to_lowercase(),
        "target": record.target(),
        "module": record.module_path().unwrap_or("unknown"),
        "message": record.args().to_string(),
    });
    log_entry.to_string()
}

/// env_logger setup used when the config file has no `logging` section.
/// `RUST_LOG` still overrides `level`.
pub fn init_fallback(level: LogLevel, format: LogFormat) {
    let env = env_logger::Env::default().default_filter_or(level.to_string());
    let mut builder = env_logger::Builder::from_env(env);
    if format == LogFormat::Json {
        builder.format(|buf, record| writeln!(buf, "{}", format_json(record)));
    }
    builder.init();
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(format!(
            "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            s
        )),
    }
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(format!("Invalid log format: {}. Must be one of: text, json", s)),
    }
}
