use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    periweb_config::ServerConfig,
    periweb_gateway::{DriverState, GatewayBuilder},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "periweb", about = "periweb: web UI for the local peripheral host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory holding periweb.{toml,yaml,yml,json}.
    #[arg(long, global = true, env = "PERIWEB_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the web UI and API until interrupted.
    Serve(ServeArgs),
}

#[derive(clap::Args, Default)]
struct ServeArgs {
    /// Address to listen on, `host:port`. Empty host means localhost.
    #[arg(long)]
    http: Option<String>,

    /// Log every request.
    #[arg(short, long)]
    verbose: bool,

    /// Serve the UI from this directory instead of the embedded copy.
    #[arg(long)]
    assets_dir: Option<PathBuf>,

    /// JSON driver snapshot exposed by the state API.
    #[arg(long)]
    state_file: Option<PathBuf>,
}

impl ServeArgs {
    /// Flags win over the config file.
    fn apply(self, config: &mut ServerConfig) {
        if let Some(http) = self.http {
            config.http = http;
        }
        config.verbose |= self.verbose;
        if self.assets_dir.is_some() {
            config.assets_dir = self.assets_dir;
        }
        if self.state_file.is_some() {
            config.state_file = self.state_file;
        }
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_drivers(config: &ServerConfig) -> anyhow::Result<DriverState> {
    let Some(path) = &config.state_file else {
        warn!("no driver state file given, serving an empty snapshot");
        return Ok(DriverState::default());
    };
    DriverState::load(path)
        .with_context(|| format!("failed to load driver state from {}", path.display()))
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = periweb_config::discover_and_load().server;
    args.apply(&mut config);

    let drivers = load_drivers(&config)?;
    let mut server = GatewayBuilder::from_config(&config)?
        .drivers(drivers)
        .start()
        .await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;
    info!("shutting down");
    server.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "periweb starting");

    if let Some(dir) = cli.config_dir {
        periweb_config::set_config_dir(dir);
    }

    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let mut config = ServerConfig {
            http: "localhost:9000".into(),
            assets_dir: Some("/srv/ui".into()),
            ..ServerConfig::default()
        };
        ServeArgs {
            http: Some(":0".into()),
            verbose: true,
            ..ServeArgs::default()
        }
        .apply(&mut config);
        assert_eq!(config.http, ":0");
        assert!(config.verbose);
        assert_eq!(config.assets_dir, Some(PathBuf::from("/srv/ui")));
        assert_eq!(config.state_file, None);
    }

    #[test]
    fn verbose_flag_cannot_turn_off_config() {
        let mut config = ServerConfig {
            verbose: true,
            ..ServerConfig::default()
        };
        ServeArgs::default().apply(&mut config);
        assert!(config.verbose);
    }

    #[test]
    fn parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "periweb",
            "--log-level",
            "debug",
            "serve",
            "--http",
            "0.0.0.0:8080",
            "-v",
            "--state-file",
            "drivers.json",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        let Commands::Serve(args) = cli.command;
        assert_eq!(args.http.as_deref(), Some("0.0.0.0:8080"));
        assert!(args.verbose);
        assert_eq!(args.state_file, Some(PathBuf::from("drivers.json")));
    }

    #[test]
    fn driver_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drivers.json");
        std::fs::write(
            &path,
            r#"{"loaded":["gpio"],"skipped":[{"driver":"ftdi","error":"no device"}]}"#,
        )
        .unwrap();

        let config = ServerConfig {
            state_file: Some(path),
            ..ServerConfig::default()
        };
        let drivers = load_drivers(&config).unwrap();
        assert_eq!(drivers.loaded, vec!["gpio".to_string()]);
        assert_eq!(drivers.skipped.len(), 1);
        assert!(drivers.failed.is_empty());

        let missing = ServerConfig {
            state_file: Some(dir.path().join("nope.json")),
            ..ServerConfig::default()
        };
        assert!(load_drivers(&missing).is_err());
        assert_eq!(
            load_drivers(&ServerConfig::default()).unwrap(),
            DriverState::default()
        );
    }
}
