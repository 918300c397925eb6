use anyhow::Result;
use media_gateway::{
    AppState, app,
    config::AppConfig,
    db,
    services::{
        bucket_selector::BucketSelector, object_store::DiskObjectStore,
        transcoder::HttpTranscoder,
    },
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting media gateway with config: {:?}", cfg);

    let selector = Arc::new(BucketSelector::new(cfg.buckets.clone())?);
    if !selector.accepts_unbounded() {
        tracing::warn!("No unbounded bucket configured; uploads without a length will fail");
    }

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_path = Path::new(db::sqlite_path(&cfg.database_url));
    tracing::debug!("Interpreted SQLite path => {}", db_path.display());
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Initialize backends ---
    let store = Arc::new(DiskObjectStore::new(&cfg.storage_dir));
    let transcoder = Arc::new(HttpTranscoder::new(cfg.transcode_url.clone()));
    let state = AppState::new(db, selector, store, transcoder, cfg.tenant_header.clone());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;

    Ok(())
}
