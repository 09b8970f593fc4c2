use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use fs2::FileExt;
use cardio_model::ModelArtifacts;
use cardio_rpc::{start_server, AppState};
use cardio_storage::{PredictionStore, SledPredictionStore};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod version;

use version::CARDIO_VERSION;

const DEFAULT_CONFIG_PATH: &str = "config/cardio.toml";

/// Application configuration
#[derive(Debug, Clone)]
struct AppConfig {
    node_id: String,
    rpc_host: String,
    rpc_port: u16,
    db_path: String,
    artifacts_dir: String,
    log_level: String,
    log_format: String,
    pid_file: Option<PathBuf>,
}

impl AppConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            path.exists().then_some(path)
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("CARDIO"));
        let config = builder.build()?;

        let get_string = |keys: &[&str], default: &str| -> String {
            keys.iter()
                .find_map(|key| config.get_string(key).ok())
                .unwrap_or_else(|| default.to_string())
        };

        let rpc_port = keys_get_int(&config, &["RPC_PORT", "rpc.port"])
            .unwrap_or(5000)
            .try_into()
            .context("rpc port out of range")?;

        let pid_file = config
            .get_string("PID_FILE")
            .ok()
            .or_else(|| config.get_string("pid_file").ok())
            .map(PathBuf::from);

        Ok(Self {
            node_id: get_string(&["NODE_ID", "node_id"], "cardio-node"),
            rpc_host: get_string(&["RPC_HOST", "rpc.host"], "127.0.0.1"),
            rpc_port,
            db_path: get_string(&["DB_PATH", "storage.db_path"], "./data/db"),
            artifacts_dir: get_string(
                &["ARTIFACTS_DIR", "model.artifacts_dir"],
                "./config/artifacts",
            ),
            log_level: get_string(&["LOG_LEVEL", "log.level"], "info"),
            log_format: get_string(&["LOG_FORMAT", "log.format"], "pretty"),
            pid_file,
        })
    }

    fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_host, self.rpc_port)
    }
}

fn keys_get_int(config: &Config, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| config.get_int(key).ok())
}

fn build_cli() -> Command {
    Command::new("cardio-node")
        .version(CARDIO_VERSION)
        .about("Heart-disease prediction service")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Path to a TOML configuration file"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("RPC listen host (overrides config)"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .help("RPC listen port (overrides config)"),
        )
        .arg(
            Arg::new("db-path")
                .long("db-path")
                .value_name("PATH")
                .help("Sled database directory (overrides config)"),
        )
        .arg(
            Arg::new("artifacts-dir")
                .long("artifacts-dir")
                .value_name("PATH")
                .help("Directory holding columns.json, dtypes.json, model.json"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log filter, e.g. info or cardio_rpc=debug"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .action(ArgAction::SetTrue)
                .help("Emit JSON-formatted logs"),
        )
}

fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Holds the pid-file lock for the process lifetime.
struct PidLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl PidLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open pid file {}", path.display()))?;
        file.try_lock_exclusive()
            .with_context(|| format!("another instance holds {}", path.display()))?;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let mut config = AppConfig::load(matches.get_one::<String>("config").map(String::as_str))?;
    if let Some(host) = matches.get_one::<String>("host") {
        config.rpc_host = host.clone();
    }
    if let Some(port) = matches.get_one::<String>("port") {
        config.rpc_port = port.parse().context("invalid --port value")?;
    }
    if let Some(db_path) = matches.get_one::<String>("db-path") {
        config.db_path = db_path.clone();
    }
    if let Some(artifacts_dir) = matches.get_one::<String>("artifacts-dir") {
        config.artifacts_dir = artifacts_dir.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log_level = level.clone();
    }
    if matches.get_flag("json-logs") {
        config.log_format = "json".to_string();
    }

    init_logging(&config.log_level, &config.log_format);

    info!(
        version = CARDIO_VERSION,
        node_id = %config.node_id,
        "starting cardio-node"
    );

    let _pid_lock = config
        .pid_file
        .as_deref()
        .map(PidLock::acquire)
        .transpose()?;

    let artifacts = ModelArtifacts::load(Path::new(&config.artifacts_dir))
        .with_context(|| format!("failed to load model artifacts from {}", config.artifacts_dir))?;

    if let Some(parent) = Path::new(&config.db_path).parent() {
        fs::create_dir_all(parent)?;
    }
    let store = SledPredictionStore::new(&config.db_path)
        .with_context(|| format!("failed to open prediction store at {}", config.db_path))?;
    let store: Arc<dyn PredictionStore> = Arc::new(store);

    let state = AppState {
        store: store.clone(),
        artifacts: Arc::new(artifacts),
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
        req_count: Arc::new(AtomicUsize::new(0)),
    };

    let addr = config.rpc_addr();
    info!("RPC listening on {addr}");

    tokio::select! {
        result = start_server(state, &addr) => {
            if let Err(err) = &result {
                error!("RPC server failed: {err:#}");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    store.flush().context("failed to flush prediction store")?;
    info!("cardio-node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.rpc_host, "127.0.0.1");
        assert_eq!(config.rpc_port, 5000);
        assert_eq!(config.log_format, "pretty");
    }

    #[test]
    fn missing_override_path_is_an_error() {
        assert!(AppConfig::load(Some("/nonexistent/cardio.toml")).is_err());
    }

    #[test]
    fn config_file_values_are_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cardio.toml");
        fs::write(
            &path,
            "node_id = \"test-id\"\n\n[rpc]\nhost = \"0.0.0.0\"\nport = 8080\n",
        )
        .unwrap();
        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.node_id, "test-id");
        assert_eq!(config.rpc_host, "0.0.0.0");
        assert_eq!(config.rpc_port, 8080);
        assert_eq!(config.rpc_addr(), "0.0.0.0:8080");
    }
}
