use crate::models::asset::EncodingStatus;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Root directory for local storage mode.
    pub storage_dir: String,
    /// External address of this service; local-mode URLs are built on it.
    pub public_base_url: String,
    pub container: String,
    /// Remote storage with a shared key.
    pub connection_string: Option<String>,
    /// Remote storage with the managed identity (ignored when a connection
    /// string is set).
    pub account_name: Option<String>,
    pub blob_endpoint: Option<String>,
    pub identity_endpoint: Option<String>,
    pub transcription_url: String,
    pub transcription_language: String,
    pub max_upload_bytes: usize,
    pub initial_encoding_status: EncodingStatus,
    pub grant_ttl_minutes: u32,
    pub transcription_grant_ttl_minutes: u32,
    pub result_grant_ttl_minutes: u32,
}

// Secrets stay out of logs.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("storage_dir", &self.storage_dir)
            .field("public_base_url", &self.public_base_url)
            .field("container", &self.container)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("account_name", &self.account_name)
            .field("blob_endpoint", &self.blob_endpoint)
            .field("identity_endpoint", &self.identity_endpoint)
            .field("transcription_url", &self.transcription_url)
            .field("transcription_language", &self.transcription_language)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("initial_encoding_status", &self.initial_encoding_status)
            .field("grant_ttl_minutes", &self.grant_ttl_minutes)
            .field(
                "transcription_grant_ttl_minutes",
                &self.transcription_grant_ttl_minutes,
            )
            .field("result_grant_ttl_minutes", &self.result_grant_ttl_minutes)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Video asset storage and access-grant service")]
pub struct Args {
    /// Host to bind to (overrides VIDEO_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VIDEO_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides VIDEO_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for local-mode objects (overrides VIDEO_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Externally reachable base URL (overrides VIDEO_STORE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Container for uploaded videos (overrides VIDEO_STORE_CONTAINER)
    #[arg(long)]
    pub container: Option<String>,

    /// Blob endpoint override (overrides AZURE_STORAGE_BLOB_ENDPOINT)
    #[arg(long)]
    pub blob_endpoint: Option<String>,

    /// Transcription service base URL (overrides TRANSCRIPTION_SERVICE_URL)
    #[arg(long)]
    pub transcription_url: Option<String>,

    /// Initial encoding status of new uploads (overrides VIDEO_STORE_INITIAL_STATUS)
    #[arg(long)]
    pub initial_encoding_status: Option<EncodingStatus>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge parsed arguments over the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let port = match args.port {
            Some(port) => port,
            None => env_parse("VIDEO_STORE_PORT", 3000)?,
        };
        let public_base_url = args
            .public_base_url
            .or_else(|| env_opt("VIDEO_STORE_PUBLIC_BASE_URL"))
            .unwrap_or_else(|| format!("http://localhost:{}", port));
        let initial_encoding_status = match args.initial_encoding_status {
            Some(status) => status,
            None => env_parse("VIDEO_STORE_INITIAL_STATUS", EncodingStatus::Completed)?,
        };

        // --- Merge ---
        Ok(Self {
            host: args
                .host
                .or_else(|| env_opt("VIDEO_STORE_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            database_url: args
                .database_url
                .or_else(|| env_opt("VIDEO_STORE_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/video_store.db".into()),
            storage_dir: args
                .storage_dir
                .or_else(|| env_opt("VIDEO_STORE_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/videos".into()),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            container: args
                .container
                .or_else(|| env_opt("VIDEO_STORE_CONTAINER"))
                .unwrap_or_else(|| "videos".into()),
            connection_string: env_opt("AZURE_STORAGE_CONNECTION_STRING"),
            account_name: env_opt("AZURE_STORAGE_ACCOUNT_NAME"),
            blob_endpoint: args
                .blob_endpoint
                .or_else(|| env_opt("AZURE_STORAGE_BLOB_ENDPOINT")),
            identity_endpoint: env_opt("VIDEO_STORE_IDENTITY_ENDPOINT"),
            transcription_url: args
                .transcription_url
                .or_else(|| env_opt("TRANSCRIPTION_SERVICE_URL"))
                .unwrap_or_else(|| "http://localhost:8001".into()),
            transcription_language: env_opt("VIDEO_STORE_TRANSCRIPTION_LANGUAGE")
                .unwrap_or_else(|| "en".into()),
            max_upload_bytes: env_parse("VIDEO_STORE_MAX_UPLOAD_BYTES", 1024 * 1024 * 1024)?,
            initial_encoding_status,
            grant_ttl_minutes: env_parse("VIDEO_STORE_GRANT_TTL_MINUTES", 60)?,
            transcription_grant_ttl_minutes: env_parse(
                "VIDEO_STORE_TRANSCRIPTION_GRANT_TTL_MINUTES",
                120,
            )?,
            result_grant_ttl_minutes: env_parse("VIDEO_STORE_RESULT_GRANT_TTL_MINUTES", 60)?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Unset and empty variables both count as absent.
fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
