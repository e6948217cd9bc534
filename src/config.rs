use anyhow::{Context, Result, bail};
use clap::Args;
use std::{env, path::PathBuf, sync::Arc, time::Duration};

use crate::services::{
    file_system::{BlobFileSystem, DEFAULT_COPY_POLL_INTERVAL, FsOptions},
    registry::UploadSizeReporting,
};
use crate::store::{InMemoryObjectStore, LocalDiskStore, ObjectStore};

/// Centralized adapter configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Where the objects live: `memory:`, `file://<dir>` or a bare directory.
    pub connection_string: String,
    pub container: String,
    /// Optional root path every key is placed under.
    pub root_path: Option<String>,
    pub copy_poll_interval: Duration,
    pub copy_max_polls: Option<u32>,
    pub upload_size_reporting: UploadSizeReporting,
}

/// Connection arguments, flattened into the binary's command line.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Object store connection string (overrides BLOBFS_CONNECTION)
    #[arg(long, global = true)]
    pub connection: Option<String>,

    /// Container / bucket name (overrides BLOBFS_CONTAINER)
    #[arg(long, global = true)]
    pub container: Option<String>,

    /// Root path inside the container (overrides BLOBFS_ROOT_PATH)
    #[arg(long, global = true)]
    pub root_path: Option<String>,

    /// Milliseconds between copy status polls (overrides BLOBFS_COPY_POLL_MS)
    #[arg(long, global = true)]
    pub copy_poll_ms: Option<u64>,

    /// Give up on a pending copy after this many polls (overrides BLOBFS_COPY_MAX_POLLS)
    #[arg(long, global = true)]
    pub copy_max_polls: Option<u32>,

    /// Report the real blob size when completing uploads
    #[arg(long, global = true)]
    pub actual_upload_size: bool,
}

impl AdapterConfig {
    pub fn new(connection_string: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            container: container.into(),
            root_path: None,
            copy_poll_interval: DEFAULT_COPY_POLL_INTERVAL,
            copy_max_polls: None,
            upload_size_reporting: UploadSizeReporting::default(),
        }
    }

    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = Some(root_path.into());
        self
    }

    pub fn with_copy_polling(mut self, interval: Duration, max_polls: Option<u32>) -> Self {
        self.copy_poll_interval = interval;
        self.copy_max_polls = max_polls;
        self
    }

    pub fn with_upload_size_reporting(mut self, reporting: UploadSizeReporting) -> Self {
        self.upload_size_reporting = reporting;
        self
    }

    /// Merge parsed CLI arguments over environment variables.
    pub fn from_env_and_args(args: ConnectionArgs) -> Result<Self> {
        // --- Environment fallback ---
        let env_connection =
            env::var("BLOBFS_CONNECTION").unwrap_or_else(|_| "./data/objects".into());
        let env_container = env::var("BLOBFS_CONTAINER").unwrap_or_else(|_| "blobfs".into());
        let env_root = env::var("BLOBFS_ROOT_PATH").ok();
        let env_poll_ms = parse_env::<u64>("BLOBFS_COPY_POLL_MS")?;
        let env_max_polls = parse_env::<u32>("BLOBFS_COPY_MAX_POLLS")?;

        // --- Merge ---
        let poll_ms = args.copy_poll_ms.or(env_poll_ms);
        let cfg = Self {
            connection_string: args.connection.unwrap_or(env_connection),
            container: args.container.unwrap_or(env_container),
            root_path: args.root_path.or(env_root),
            copy_poll_interval: poll_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_COPY_POLL_INTERVAL),
            copy_max_polls: args.copy_max_polls.or(env_max_polls),
            upload_size_reporting: if args.actual_upload_size {
                UploadSizeReporting::Actual
            } else {
                UploadSizeReporting::Placeholder
            },
        };

        Ok(cfg)
    }

    /// Non-empty checks on the required settings.
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            bail!("connection string must not be empty");
        }
        if self.container.trim().is_empty() {
            bail!("container name must not be empty");
        }
        Ok(())
    }

    /// Resolve the connection string to an object store backend.
    pub fn open_store(&self) -> Result<Arc<dyn ObjectStore>> {
        let conn = self.connection_string.trim();
        if conn == "memory:" || conn == "memory://" {
            return Ok(Arc::new(InMemoryObjectStore::new()));
        }
        if let Some(dir) = conn.strip_prefix("file://") {
            return Ok(Arc::new(LocalDiskStore::new(PathBuf::from(dir))));
        }
        if let Some((scheme, _)) = conn.split_once("://") {
            bail!("unsupported object store scheme `{}`", scheme);
        }
        Ok(Arc::new(LocalDiskStore::new(PathBuf::from(conn))))
    }

    pub fn fs_options(&self) -> FsOptions {
        FsOptions::new(self.container.clone())
            .with_root_path(self.root_path.clone().unwrap_or_default())
            .with_copy_polling(self.copy_poll_interval, self.copy_max_polls)
            .with_upload_size_reporting(self.upload_size_reporting)
    }

    /// Build the file system once configuration is final.
    ///
    /// Each call produces a fresh, independent handle; nothing is cached.
    pub fn connect(&self) -> Result<BlobFileSystem> {
        self.validate()?;
        let store = self
            .open_store()
            .with_context(|| format!("opening object store `{}`", self.connection_string))?;
        Ok(BlobFileSystem::new(store, self.fs_options()))
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_blank_fields() {
        assert!(AdapterConfig::new("memory:", "c").validate().is_ok());
        assert!(AdapterConfig::new("", "c").validate().is_err());
        assert!(AdapterConfig::new("memory:", "  ").validate().is_err());
    }

    #[test]
    fn connection_string_schemes() {
        assert!(AdapterConfig::new("memory:", "c").open_store().is_ok());
        assert!(AdapterConfig::new("file:///tmp/x", "c").open_store().is_ok());
        assert!(AdapterConfig::new("./data", "c").open_store().is_ok());
        let err = AdapterConfig::new("s3://bucket", "c").open_store().unwrap_err();
        assert!(err.to_string().contains("s3"));
    }

    #[test]
    fn cli_args_win_over_defaults() {
        let args = ConnectionArgs {
            connection: Some("memory:".into()),
            container: Some("pkgs".into()),
            root_path: Some("feed".into()),
            copy_poll_ms: Some(5),
            copy_max_polls: Some(7),
            actual_upload_size: true,
        };
        let cfg = AdapterConfig::from_env_and_args(args).unwrap();
        assert_eq!(cfg.container, "pkgs");
        assert_eq!(cfg.root_path.as_deref(), Some("feed"));
        assert_eq!(cfg.copy_poll_interval, Duration::from_millis(5));
        assert_eq!(cfg.copy_max_polls, Some(7));
        assert_eq!(cfg.upload_size_reporting, UploadSizeReporting::Actual);

        let fs = cfg.connect().unwrap();
        assert_eq!(fs.container(), "pkgs");
        assert_eq!(fs.keys().root_prefix(), "feed/");
    }
}
