use anyhow::Context;
use clap::Parser;
use gatekeeper::config::{Config, DEFAULT_CONFIG_PATH, LogFormat, LogLevel};
use gatekeeper::logging::{self, CustomLogger};
use gatekeeper::proxy::ProxyServer;
use log::info;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Configuration-driven HTTP reverse proxy with host and path routing"
)]
struct Args {
    #[clap(
        short,
        long,
        value_name = "FILE",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Configuration file path"
    )]
    config: String,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,

    #[clap(
        long,
        value_name = "LEVEL",
        default_value = "info",
        value_parser = logging::parse_log_level,
        help = "Log level when the config has no logging section (trace, debug, info, warn, error)"
    )]
    log_level: LogLevel,

    #[clap(
        long,
        value_name = "FORMAT",
        default_value = "text",
        value_parser = logging::parse_log_format,
        help = "Log format when the config has no logging section (text, json)"
    )]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = args.generate_config {
        generate_sample_config(&config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    match config.logging.clone() {
        Some(logging_config) => CustomLogger::init(logging_config)?,
        None => logging::init_fallback(args.log_level, args.log_format),
    }

    // All configuration checks happen here, before anything binds
    let server = ProxyServer::from_config(&config).context("Invalid configuration")?;

    info!("Starting reverse proxy on {}", server.addr());
    let server_handle = tokio::spawn(server.run());

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = server_handle => {
            result.context("Server task panicked")??;
        }
    }

    info!("Proxy server stopped");
    Ok(())
}

fn generate_sample_config(file_path: &str) -> anyhow::Result<()> {
    let sample = r#"{
  "port": ":8080",
  "http_port": ":80",
  "entries": [
    { "address": "http://127.0.0.1:9000", "path": "/api", "domain": "example.com" },
    { "address": "http://127.0.0.1:9001", "path": "/", "domain": "" }
  ],
  "noroute_route": "",
  "https": false,
  "cert_path": "",
  "private_key_path": "",
  "always_https": false,
  "default_https_domain": ""
}
"#;

    // Make sure the sample stays loadable
    Config::from_json(sample)?;
    std::fs::write(file_path, sample)
        .with_context(|| format!("Failed to write {}", file_path))?;
    Ok(())
}
