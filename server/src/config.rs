//! Worker and host configuration
//!
//! `WorkerConfig` is the frozen set of constants the worker is built with
//! (cache version, precache manifest, base path). `ServerConfig` only
//! concerns the proxy that hosts the worker and is read from the environment.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// Cache version used when none is configured
pub const DEFAULT_CACHE_VERSION: &str = "rc-settings-v1";

/// Shell document served when the network cannot answer a navigation
pub const DEFAULT_SHELL_DOCUMENT: &str = "index.html";

/// Assets precached at install time, relative to the base path.
/// The empty locator is the base path itself.
pub const DEFAULT_ASSETS: &[&str] = &[
    "",
    "index.html",
    "manifest.json",
    "favicon.png",
    "icons/Icon-192.png",
    "icons/Icon-512.png",
    "icons/Icon-maskable-192.png",
    "icons/Icon-maskable-512.png",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL {value}: {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("Invalid listen address {0}")]
    InvalidListenAddr(String),

    #[error("Cache version must not be empty")]
    EmptyCacheVersion,
}

/// Name of the current generation of the precache store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheVersion(String);

impl CacheVersion {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyCacheVersion);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered list of locators fetched and stored at install time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    locators: Vec<String>,
}

impl AssetManifest {
    pub fn new<I, S>(locators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            locators: locators.into_iter().map(Into::into).collect(),
        }
    }

    pub fn locators(&self) -> &[String] {
        &self.locators
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::new(DEFAULT_ASSETS.iter().copied())
    }
}

/// Where the application is mounted under its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BasePath {
    /// A mount point known at build time, e.g. `/app/`
    Fixed(String),
    /// Derived from the worker script's own location, e.g. `/app/sw.js` mounts at `/app/`
    FromScriptLocation(String),
}

impl BasePath {
    /// Resolve to an absolute path that starts and ends with `/`
    pub fn resolve(&self) -> String {
        match self {
            BasePath::Fixed(path) => {
                let trimmed = path.trim_matches('/');
                if trimmed.is_empty() {
                    "/".to_string()
                } else {
                    format!("/{}/", trimmed)
                }
            }
            BasePath::FromScriptLocation(script) => match script.rfind('/') {
                Some(idx) if script.starts_with('/') => script[..=idx].to_string(),
                Some(idx) => format!("/{}", &script[..=idx]),
                None => "/".to_string(),
            },
        }
    }
}

impl Default for BasePath {
    fn default() -> Self {
        BasePath::Fixed("/".to_string())
    }
}

/// Immutable configuration the worker is constructed with
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    origin: Url,
    cache_version: CacheVersion,
    manifest: AssetManifest,
    base_path: BasePath,
    shell_document: String,
}

impl WorkerConfig {
    /// Configuration with the built-in version and manifest for an app served from `origin`
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            cache_version: CacheVersion(DEFAULT_CACHE_VERSION.to_string()),
            manifest: AssetManifest::default(),
            base_path: BasePath::default(),
            shell_document: DEFAULT_SHELL_DOCUMENT.to_string(),
        }
    }

    pub fn with_cache_version(mut self, version: CacheVersion) -> Self {
        self.cache_version = version;
        self
    }

    pub fn with_manifest(mut self, manifest: AssetManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_base_path(mut self, base_path: BasePath) -> Self {
        self.base_path = base_path;
        self
    }

    pub fn with_shell_document(mut self, shell_document: impl Into<String>) -> Self {
        self.shell_document = shell_document.into();
        self
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn cache_version(&self) -> &CacheVersion {
        &self.cache_version
    }

    pub fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    pub fn base_path(&self) -> &BasePath {
        &self.base_path
    }

    /// Make a manifest locator absolute against the origin and base path
    pub fn resolve_locator(&self, locator: &str) -> Result<Url, ConfigError> {
        let path = format!("{}{}", self.base_path.resolve(), locator.trim_start_matches('/'));
        self.origin.join(&path).map_err(|e| ConfigError::InvalidUrl {
            value: path,
            reason: e.to_string(),
        })
    }

    /// Every manifest locator made absolute, in manifest order
    pub fn precache_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.manifest
            .locators()
            .iter()
            .map(|locator| self.resolve_locator(locator))
            .collect()
    }

    /// Absolute URL of the app shell document
    pub fn shell_url(&self) -> Result<Url, ConfigError> {
        self.resolve_locator(&self.shell_document)
    }
}

/// Host proxy settings, read from `SHELLCACHE_*` environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub upstream: Url,
    pub listen_addr: SocketAddr,
    pub storage_dir: PathBuf,
    pub base_path: BasePath,
    pub cache_version: CacheVersion,
    /// Keep responses in memory instead of on disk
    pub ephemeral: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup so parsing can be exercised without
    /// touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let upstream_raw =
            lookup("SHELLCACHE_UPSTREAM").unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
        let upstream = Url::parse(&upstream_raw).map_err(|e| ConfigError::InvalidUrl {
            value: upstream_raw.clone(),
            reason: e.to_string(),
        })?;

        let listen_raw =
            lookup("SHELLCACHE_LISTEN").unwrap_or_else(|| "127.0.0.1:8724".to_string());
        let listen_addr = listen_raw
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(listen_raw.clone()))?;

        let storage_dir = lookup("SHELLCACHE_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./shellcache-storage"));

        // Script location takes precedence over a fixed base
        let base_path = match (lookup("SHELLCACHE_SCRIPT_PATH"), lookup("SHELLCACHE_BASE_PATH")) {
            (Some(script), _) => BasePath::FromScriptLocation(script),
            (None, Some(base)) => BasePath::Fixed(base),
            (None, None) => BasePath::default(),
        };

        let cache_version = match lookup("SHELLCACHE_CACHE_VERSION") {
            Some(version) => CacheVersion::new(version)?,
            None => CacheVersion(DEFAULT_CACHE_VERSION.to_string()),
        };

        let ephemeral = lookup("SHELLCACHE_EPHEMERAL")
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

        Ok(Self {
            upstream,
            listen_addr,
            storage_dir,
            base_path,
            cache_version,
            ephemeral,
        })
    }

    /// Database file backing the response store
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("responses.db")
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new(self.upstream.clone())
            .with_cache_version(self.cache_version.clone())
            .with_base_path(self.base_path.clone())
    }
}
