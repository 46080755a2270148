use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub gmail: GmailConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub content_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub mailbox: String,
    pub max_concurrent_accounts: usize,
    /// `None` means a run may take as long as it needs.
    pub run_timeout: Option<Duration>,
    pub io_timeout: Duration,
    /// `None` disables the background poller; runs are then only triggered over HTTP.
    pub poll_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub api_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let run_timeout_secs: u64 = var("INGEST_RUN_TIMEOUT_SECS", "600")
            .parse()
            .context("INGEST_RUN_TIMEOUT_SECS must be a number of seconds")?;

        let poll_interval = match lookup("INGEST_POLL_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .context("INGEST_POLL_INTERVAL_SECS must be a number of seconds")?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            server: ServerConfig {
                host: var("SERVER_HOST", "0.0.0.0"),
                port: var("SERVER_PORT", "3000")
                    .parse()
                    .context("SERVER_PORT must be a port number")?,
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").context("DATABASE_URL is not set")?,
            },
            storage: StorageConfig {
                content_dir: PathBuf::from(var("STORAGE_CONTENT_DIR", "./pdfs")),
            },
            ingest: IngestConfig {
                mailbox: var("INGEST_MAILBOX", "INBOX"),
                max_concurrent_accounts: var("INGEST_MAX_CONCURRENT_ACCOUNTS", "4")
                    .parse::<usize>()
                    .context("INGEST_MAX_CONCURRENT_ACCOUNTS must be a positive number")?
                    .max(1),
                run_timeout: (run_timeout_secs > 0).then(|| Duration::from_secs(run_timeout_secs)),
                io_timeout: Duration::from_secs(
                    var("INGEST_IO_TIMEOUT_SECS", "60")
                        .parse()
                        .context("INGEST_IO_TIMEOUT_SECS must be a number of seconds")?,
                ),
                poll_interval,
            },
            gmail: GmailConfig {
                api_base_url: var("GMAIL_API_BASE_URL", DEFAULT_GMAIL_API_BASE)
                    .trim_end_matches('/')
                    .to_string(),
            },
        })
    }
}
