//! Command-line access to a depot storage policy.

mod session;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_archive::{ArchiveService, CreateOptions, ObjectFileSystem};
use depot_core::config::AppConfig;
use depot_core::{Entity, UploadSession, UploadState};
use depot_storage::{
    RemoteDriver, S3ObjectApi, SourceArgs, StorageDriver, StorageError, StorageResult,
    UploadProps, UploadRequest,
};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use session::{load_session, save_session};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Command-line access to a depot storage policy")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "DEPOT_CONFIG", default_value = "depot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and show driver capabilities
    Check,
    /// List objects under a prefix
    Ls {
        /// Key prefix (empty for the bucket root)
        #[arg(default_value = "")]
        prefix: String,
        /// Descend into sub-directories
        #[arg(short, long, default_value_t = false)]
        recursive: bool,
    },
    /// Delete objects
    Rm {
        /// Keys to delete
        #[arg(required = true, num_args = 1..)]
        keys: Vec<String>,
    },
    /// Upload a local file through the server-side path
    Put {
        /// Local file to upload
        file: PathBuf,
        /// Destination key
        key: String,
        /// MIME type (detected from the key when omitted)
        #[arg(long)]
        mime: Option<String>,
        /// Replace an existing object
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Print a time-limited download URL
    Source {
        key: String,
        /// URL lifetime in seconds (driver default when omitted)
        #[arg(long)]
        expire_secs: Option<i64>,
        /// Ask browsers to download instead of display
        #[arg(long, default_value_t = false)]
        download: bool,
        /// File name offered in the download prompt
        #[arg(long)]
        name: Option<String>,
    },
    /// Start a chunked upload and print presigned credentials
    Token {
        /// Destination key
        key: String,
        /// Size of the file to upload in bytes
        size: u64,
        /// Where to store the upload session
        #[arg(long, default_value = "upload-session.json")]
        session: PathBuf,
    },
    /// Abort a chunked upload
    Cancel {
        #[arg(long, default_value = "upload-session.json")]
        session: PathBuf,
    },
    /// Verify a chunked upload the client finished
    Complete {
        #[arg(long, default_value = "upload-session.json")]
        session: PathBuf,
    },
    /// List the entries of a stored zip or 7z archive
    ArchiveLs {
        /// Archive key
        key: String,
        /// Legacy encoding of entry names (e.g. gbk, shiftjis)
        #[arg(long)]
        encoding: Option<String>,
    },
    /// Pack stored files and folders into a local zip
    ArchiveCreate {
        /// Keys or prefixes to pack
        #[arg(required = true, num_args = 1..)]
        roots: Vec<String>,
        /// Output zip file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,depot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { config, command } = Cli::parse();
    let config = load_config(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let driver = build_driver(&config, cancel.clone())?;

    match command {
        Commands::Check => handle_check(&config, driver.as_ref()),
        Commands::Ls { prefix, recursive } => handle_ls(driver.as_ref(), &prefix, recursive).await,
        Commands::Rm { keys } => handle_rm(driver.as_ref(), &keys).await,
        Commands::Put {
            file,
            key,
            mime,
            overwrite,
        } => handle_put(driver.as_ref(), &file, key, mime, overwrite).await,
        Commands::Source {
            key,
            expire_secs,
            download,
            name,
        } => {
            let args = SourceArgs {
                expire: expire_secs
                    .map(|secs| OffsetDateTime::now_utc() + time::Duration::seconds(secs)),
                is_download: download,
                display_name: name,
            };
            handle_source(&config, driver.as_ref(), &key, &args).await
        }
        Commands::Token { key, size, session } => {
            handle_token(&config, driver.as_ref(), key, size, &session).await
        }
        Commands::Cancel { session } => handle_cancel(driver.as_ref(), &session).await,
        Commands::Complete { session } => handle_complete(driver.as_ref(), &session).await,
        Commands::ArchiveLs { key, encoding } => {
            let service = archive_service(&config, driver, cancel);
            handle_archive_ls(&service, &key, encoding.as_deref()).await
        }
        Commands::ArchiveCreate { roots, output } => {
            let service = archive_service(&config, driver, cancel);
            handle_archive_create(&service, roots, &output).await
        }
    }
}

/// Load configuration from the TOML file (when present) and `DEPOT_`
/// environment variables, with nested keys separated by `__`.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = path.exists();

    if has_config_file {
        debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }

    // DEPOT_CONFIG only names the file
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("DEPOT_") && key != "DEPOT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: depot --config /path/to/depot.toml\n  \
             2. Environment variables: DEPOT_POLICY__BUCKET_NAME=media \
             DEPOT_POLICY__SERVER=https://s3.example.com depot"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DEPOT_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_driver(config: &AppConfig, cancel: CancellationToken) -> Result<Arc<dyn StorageDriver>> {
    let api = S3ObjectApi::from_policy(&config.policy).context("failed to initialize storage")?;
    let driver = RemoteDriver::new(
        config.policy.clone(),
        Arc::new(api),
        config.upload.clone(),
        config.thumb.clone(),
    )
    .with_cancellation(cancel);
    Ok(Arc::new(driver))
}

fn archive_service(
    config: &AppConfig,
    driver: Arc<dyn StorageDriver>,
    cancel: CancellationToken,
) -> ArchiveService {
    let fs = Arc::new(ObjectFileSystem::new(driver, config.policy.id));
    ArchiveService::new(fs, config.archive.clone()).with_cancellation(cancel)
}

/// Filesystem path of a bucket key as seen by the archive service.
fn key_to_path(key: &str) -> String {
    format!("/{}", key.trim_start_matches('/'))
}

fn handle_check(config: &AppConfig, driver: &dyn StorageDriver) -> Result<()> {
    let caps = driver.capabilities();
    let features: Vec<String> = caps
        .static_features
        .iter()
        .map(|cap| format!("{cap:?}"))
        .collect();

    println!("policy: {} ({})", config.policy.name, config.policy.kind);
    println!("bucket: {}", config.policy.bucket_name);
    println!("chunk_size: {}", config.policy.chunk_size());
    println!("features: {}", features.join(", "));
    println!("thumb_proxy: {}", caps.thumb_proxy);
    println!("media_meta_proxy: {}", caps.media_meta_proxy);
    println!("max_source_expire: {}s", caps.max_source_expire.as_secs());
    Ok(())
}

async fn handle_ls(driver: &dyn StorageDriver, prefix: &str, recursive: bool) -> Result<()> {
    let progress = |added: usize| debug!(added, "Listed batch");
    let objects = driver
        .list(prefix, recursive, &progress)
        .await
        .with_context(|| format!("failed to list {prefix:?}"))?;

    for object in &objects {
        let modified = object
            .last_modified
            .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
            .unwrap_or_else(|| "-".to_string());
        let name = if object.is_dir {
            format!("{}/", object.relative_path)
        } else {
            object.relative_path.clone()
        };
        println!("{:>12}  {:<25}  {}", object.size, modified, name);
    }
    info!(count = objects.len(), "Listed objects");
    Ok(())
}

async fn handle_rm(driver: &dyn StorageDriver, keys: &[String]) -> Result<()> {
    let outcome = driver.delete(keys).await.context("delete failed")?;
    if outcome.is_complete() {
        println!("Deleted {} object(s)", keys.len());
        return Ok(());
    }

    for key in &outcome.failed {
        eprintln!("failed: {key}");
    }
    match outcome.last_error {
        Some(err) => Err(anyhow::Error::new(err).context(format!(
            "{} of {} object(s) could not be deleted",
            outcome.failed.len(),
            keys.len()
        ))),
        None => anyhow::bail!("{} object(s) could not be deleted", outcome.failed.len()),
    }
}

async fn handle_put(
    driver: &dyn StorageDriver,
    file: &Path,
    key: String,
    mime: Option<String>,
    overwrite: bool,
) -> Result<()> {
    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let size = handle.metadata().await?.len();

    let props = UploadProps {
        save_path: key.clone(),
        size,
        mime_type: mime,
        overwrite,
    };
    driver
        .put(UploadRequest::new(props, handle))
        .await
        .with_context(|| format!("failed to upload {}", file.display()))?;

    println!("Uploaded {size} bytes to {key}");
    Ok(())
}

async fn handle_source(
    config: &AppConfig,
    driver: &dyn StorageDriver,
    key: &str,
    args: &SourceArgs,
) -> Result<()> {
    let meta = driver
        .meta(key)
        .await
        .with_context(|| format!("failed to stat {key}"))?;
    let entity = Entity::new(0, key, meta.size, config.policy.id);
    let url = driver.source(&entity, args).await?;
    println!("{url}");
    Ok(())
}

async fn handle_token(
    config: &AppConfig,
    driver: &dyn StorageDriver,
    key: String,
    size: u64,
    session_path: &Path,
) -> Result<()> {
    let mut session = UploadSession::new(key.clone(), size, config.upload.session_ttl());
    let props = UploadProps::new(key, size);
    let credential = driver
        .token(&mut session, &props)
        .await
        .context("failed to issue upload credentials")?;

    save_session(session_path, &session).await?;
    info!(session_id = %session.id, chunks = credential.upload_urls.len(), "Upload session started");
    println!("{}", serde_json::to_string_pretty(&credential)?);
    Ok(())
}

async fn handle_cancel(driver: &dyn StorageDriver, session_path: &Path) -> Result<()> {
    let mut session = load_session(session_path).await?;
    driver
        .cancel_token(&session)
        .await
        .context("failed to cancel upload")?;

    session.finish(UploadState::Cancelled)?;
    save_session(session_path, &session).await?;
    println!("Cancelled upload {}", session.id);
    Ok(())
}

async fn handle_complete(driver: &dyn StorageDriver, session_path: &Path) -> Result<()> {
    let mut session = load_session(session_path).await?;
    session.ensure_open()?;
    verify_upload(driver, &session)
        .await
        .context("upload verification failed")?;

    session.finish(UploadState::Completed)?;
    save_session(session_path, &session).await?;
    println!("Completed upload {} ({} bytes)", session.id, session.expected_size);
    Ok(())
}

/// Confirm the stored object before a session is closed.
///
/// Drivers only check sessions bound to a sentinel task, so the size is
/// compared here for the rest.
async fn verify_upload(driver: &dyn StorageDriver, session: &UploadSession) -> StorageResult<()> {
    driver.complete_upload(session).await?;
    if session.sentinel_task_id.is_some() {
        return Ok(());
    }

    let meta = driver.meta(&session.save_path).await?;
    if meta.size != session.expected_size {
        return Err(StorageError::SizeMismatch {
            expected: session.expected_size,
            actual: meta.size,
        });
    }
    Ok(())
}

async fn handle_archive_ls(
    service: &ArchiveService,
    key: &str,
    encoding: Option<&str>,
) -> Result<()> {
    let files = service
        .list_archive_files(&key_to_path(key), None, encoding)
        .await
        .with_context(|| format!("failed to list archive {key}"))?;
    println!("{}", serde_json::to_string_pretty(&files)?);
    Ok(())
}

async fn handle_archive_create(
    service: &ArchiveService,
    roots: Vec<String>,
    output: &Path,
) -> Result<()> {
    let roots: Vec<String> = roots.iter().map(|root| key_to_path(root)).collect();
    let writer = std::fs::File::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let progress = |total: u64, size: u64, _: u64| debug!(total, size, "Added entry");
    let options = CreateOptions {
        progress: Some(&progress),
        ..CreateOptions::from_config(service.config())
    };

    let result = service.create_archive(&roots, writer, &options).await;
    let failed = match result {
        Ok(failed) => failed,
        Err(err) => {
            // The partial file has no central directory
            let _ = std::fs::remove_file(output);
            return Err(anyhow::Error::new(err).context("failed to create archive"));
        }
    };

    if failed > 0 {
        eprintln!("{failed} item(s) could not be added");
    }
    println!("Wrote {}", output.display());
    Ok(())
}
