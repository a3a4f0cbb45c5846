//! `kvsession` command line: serve the session gateway, generate key
//! material and inspect session cookies.

use clap::{Parser, Subcommand};
use kvsession_core::config::KEY_PAIRS_ENV;
use kvsession_core::{BackendConfig, BackendKind, KvSessionError, StoreConfig};
use kvsession_gateway::{GatewayServer, DEFAULT_COOKIE_NAME};
use kvsession_security::random_key;
use kvsession_session::{FileBackend, KeyValueBackend, MemoryBackend, SessionStore, StoreOptions};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Length in bytes of generated keys.
const GENERATED_KEY_LEN: usize = 32;

#[derive(Parser)]
#[command(name = "kvsession", about = "kvsession: server-side sessions over a key-value store")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "kvsession.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the session gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print freshly generated key pairs
    Keygen {
        /// Number of pairs to generate
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Unseal a session cookie value and show the session it points to
    Inspect {
        /// Cookie value to unseal
        token: String,
        /// Cookie name the token was issued under
        #[arg(long, default_value = DEFAULT_COOKIE_NAME)]
        name: String,
    },
}

#[derive(Deserialize)]
struct CliConfig {
    #[serde(flatten)]
    store: StoreConfig,
    #[serde(default = "default_cookie_name")]
    cookie_name: String,
    #[serde(default)]
    server: ServerConfig,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}

fn parse_config(raw: &str) -> anyhow::Result<CliConfig> {
    parse_config_with(raw, std::env::var(KEY_PAIRS_ENV).ok().as_deref())
}

/// Parse `raw`, replacing its key pairs with `key_pairs_override` when given.
fn parse_config_with(raw: &str, key_pairs_override: Option<&str>) -> anyhow::Result<CliConfig> {
    let mut config: CliConfig = toml::from_str(raw)?;
    config.store.override_key_pairs(key_pairs_override)?;
    config.store.validate()?;
    Ok(config)
}

async fn load_config(path: &PathBuf) -> anyhow::Result<CliConfig> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
    })?;
    parse_config(&raw)
}

async fn open_backend(config: &BackendConfig) -> anyhow::Result<Arc<dyn KeyValueBackend>> {
    let backend: Arc<dyn KeyValueBackend> = match config.kind {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::File => Arc::new(FileBackend::new(config.path.clone()).await?),
        #[cfg(feature = "sqlite")]
        BackendKind::Sqlite => Arc::new(kvsession_session::SqliteBackend::open(&config.path)?),
        #[cfg(not(feature = "sqlite"))]
        BackendKind::Sqlite => {
            return Err(KvSessionError::Config(
                "sqlite backend requires building with the `sqlite` feature".into(),
            )
            .into())
        }
    };
    info!(kind = ?config.kind, path = %config.path.display(), "Backend opened");
    Ok(backend)
}

async fn build_store(config: &StoreConfig) -> anyhow::Result<Arc<SessionStore>> {
    let backend = open_backend(&config.backend).await?;
    let store = SessionStore::new(backend, StoreOptions::from_config(config)?).await?;
    Ok(Arc::new(store))
}

/// Render `count` key pairs as TOML blocks plus the environment form.
fn generate_key_pairs(count: usize) -> Result<String, KvSessionError> {
    let mut toml_out = String::new();
    let mut env_pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let auth = hex::encode(random_key(GENERATED_KEY_LEN)?);
        let enc = hex::encode(random_key(GENERATED_KEY_LEN)?);
        toml_out.push_str(&format!(
            "[[key_pairs]]\nauth_key = \"{auth}\"\nenc_key = \"{enc}\"\n\n"
        ));
        env_pairs.push(format!("{auth}:{enc}"));
    }
    toml_out.push_str(&format!(
        "# or: {}={}\n",
        KEY_PAIRS_ENV,
        env_pairs.join(",")
    ));
    Ok(toml_out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { count } => {
            print!("{}", generate_key_pairs(count.max(1))?);
        }
        Commands::Serve { host, port } => {
            let config = load_config(&cli.config).await?;
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);

            let store = build_store(&config.store).await?;
            let app = GatewayServer::build_with_cookie(store, config.cookie_name);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("kvsession gateway listening on {addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown signal received");
                })
                .await?;
        }
        Commands::Inspect { token, name } => {
            let config = load_config(&cli.config).await?;
            let store = build_store(&config.store).await?;
            let id = store.codec().unseal(&name, &token)?;
            println!("id: {id}");

            match store.load(&name, &id).await {
                Ok(record) => {
                    let mut keys: Vec<_> = record.values.iter().collect();
                    keys.sort_by(|a, b| a.0.cmp(b.0));
                    println!("values:");
                    for (key, value) in keys {
                        println!("  {key} = {value}");
                    }
                }
                Err(KvSessionError::NotFound(_)) => {
                    println!("no stored session for this id in bucket '{}'", store.bucket());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}
