use crate::models::bucket::Bucket;
use anyhow::{Context, Result};
use axum::http::HeaderName;
use clap::Parser;
use std::env;

const DEFAULT_BUCKETS: &str = "default/1/unbounded";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub buckets: Vec<Bucket>,
    pub transcode_url: String,
    pub tenant_header: HeaderName,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Media storage gateway")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory of the object store (overrides GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Tag index database URL (overrides GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket as NAME/GROUP[:GROUP...]/CAPACITY, repeatable (overrides GATEWAY_BUCKETS)
    #[arg(long = "bucket", value_name = "NAME/GROUPS/CAPACITY")]
    pub buckets: Vec<String>,

    /// Base URL of the transcoding service (overrides GATEWAY_TRANSCODE_URL)
    #[arg(long)]
    pub transcode_url: Option<String>,

    /// Header carrying the authenticated tenant (overrides GATEWAY_TENANT_HEADER)
    #[arg(long)]
    pub tenant_header: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse(), |name| env::var(name))
    }

    /// Merge `args` over variables looked up with `var`. CLI wins.
    pub fn from_args<F>(args: Args, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let env_or = |name: &str, default: &str| var(name).unwrap_or_else(|_| default.into());

        let env_port = match var("GATEWAY_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing GATEWAY_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading GATEWAY_PORT"),
        };

        let bucket_specs = if args.buckets.is_empty() {
            env_or("GATEWAY_BUCKETS", DEFAULT_BUCKETS)
                .split(',')
                .map(str::trim)
                .filter(|spec| !spec.is_empty())
                .map(str::to_owned)
                .collect()
        } else {
            args.buckets
        };
        let buckets = bucket_specs
            .iter()
            .map(|spec| spec.parse::<Bucket>())
            .collect::<Result<Vec<_>, _>>()
            .context("parsing bucket pool")?;

        let tenant_header = args
            .tenant_header
            .unwrap_or_else(|| env_or("GATEWAY_TENANT_HEADER", "x-auth-user"));
        let tenant_header = tenant_header
            .parse::<HeaderName>()
            .with_context(|| format!("invalid tenant header `{}`", tenant_header))?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or_else(|| env_or("GATEWAY_HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("GATEWAY_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_or("GATEWAY_DATABASE_URL", "sqlite://./data/meta/index.db")
            }),
            buckets,
            transcode_url: args
                .transcode_url
                .unwrap_or_else(|| env_or("GATEWAY_TRANSCODE_URL", "http://127.0.0.1:8090")),
            tenant_header,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
