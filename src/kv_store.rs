// Key-value persistence layer behind the balance caches.
// Every backend stores opaque strings; expiry is handled by the caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "redis")]
use log::info;
#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;
#[cfg(feature = "redis")]
use redis::{AsyncCommands, Client};

use crate::settings::{CacheBackend, CacheSettings};

/// Minimal get/set store, the durable analogue of browser local storage.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// False when there is no storage subsystem at all.
    fn is_available(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;
}

/// Process-local store, used by tests and short-lived embeddings.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keeps `[A-Za-z0-9.-]` and escapes every other byte as `_xx`, so
    /// distinct keys never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut file = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
                file.push(byte as char);
            } else {
                file.push_str(&format!("_{byte:02x}"));
            }
        }
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait]
impl KvStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let path = self.path_for(key);
        // Write-then-rename so a concurrent reader never sees a torn document
        let tmp = path.with_extension(format!("json.{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, value)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move cache file into {}", path.display()))?;
        Ok(())
    }
}

/// No storage subsystem: every read misses and every write is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

#[async_trait]
impl KvStore for UnavailableStore {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String) -> Result<()> {
        Ok(())
    }
}

/// Redis-backed store, shared between processes.
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
}

#[cfg(feature = "redis")]
impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        info!("✅ Redis cache store connected to {}", url);
        Ok(Self {
            conn,
            key_prefix: "terra:".to_string(),
        })
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl KvStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(format!("{}{}", self.key_prefix, key))
            .await
            .context("Failed to read from Redis")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(format!("{}{}", self.key_prefix, key), value)
            .await
            .context("Failed to write to Redis")?;
        Ok(())
    }
}

/// Builds the configured store. A backend that cannot be opened degrades to
/// `UnavailableStore` so the caches simply miss.
pub async fn build_store(settings: &CacheSettings) -> Arc<dyn KvStore> {
    match settings.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::None => Arc::new(UnavailableStore),
        CacheBackend::File => match FileStore::new(&settings.dir) {
            Ok(store) => {
                debug!("Cache store: file at {}", store.dir().display());
                Arc::new(store)
            }
            Err(e) => {
                warn!("⚠️ File cache unavailable, caching disabled: {:#}", e);
                Arc::new(UnavailableStore)
            }
        },
        #[cfg(feature = "redis")]
        CacheBackend::Redis => match RedisStore::connect(&settings.redis_url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("⚠️ Redis cache unavailable, caching disabled: {:#}", e);
                Arc::new(UnavailableStore)
            }
        },
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => {
            warn!("⚠️ Redis backend requested but the 'redis' feature is not enabled, caching disabled");
            Arc::new(UnavailableStore)
        }
    }
}
