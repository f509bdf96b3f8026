use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::{path::Path as ObjPath, ObjectStore};
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Metadata for one entry returned by `list_dir_detail` (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// Storage manager spanning the managed thumbnail cache (a single local
/// root) and arbitrary dataset image sources addressed by scheme —
/// `gs://bucket/key` or a bare filesystem path (§4.2). One backend
/// instance is cached per scheme/bucket; never reallocated per request.
#[derive(Clone)]
pub struct StorageManager {
    cache_store: DynStore,
    cache_root: Option<PathBuf>,
    cache_backend_kind: StorageKind,
    gcs_credentials_path: Option<String>,
    gcs_backends: Arc<RwLock<HashMap<String, DynStore>>>,
    local_backend: DynStore,
}

impl StorageManager {
    /// Build a manager whose thumbnail cache lives at `cfg.thumbnail_cache_dir`
    /// (local) or under `cfg.storage`'s configured backend.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let (cache_store, cache_root) = create_storage_backend(cfg).await?;
        Ok(Self {
            cache_store,
            cache_root,
            cache_backend_kind: cfg.storage.clone(),
            gcs_credentials_path: cfg.gcs_credentials_path.clone(),
            gcs_backends: Arc::new(RwLock::new(HashMap::new())),
            local_backend: Arc::new(LocalFileSystem::new()),
        })
    }

    /// Inject a custom backend for the managed cache (tests).
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            cache_store: store,
            cache_root: None,
            cache_backend_kind: backend_kind,
            gcs_credentials_path: None,
            gcs_backends: Arc::new(RwLock::new(HashMap::new())),
            local_backend: Arc::new(LocalFileSystem::new()),
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.cache_backend_kind
    }

    pub fn local_base_path(&self) -> Option<&Path> {
        self.cache_root.as_deref()
    }

    /// Resolve a thumbnail-cache-relative location to a filesystem path,
    /// when the cache backend is local.
    pub fn resolve_local_path(&self, location: &str) -> Option<PathBuf> {
        let base = self.local_base_path()?;
        let relative = Path::new(location);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return None;
        }
        Some(base.join(relative))
    }

    // ---- thumbnail cache operations (unchanged shape from the reference) --

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.cache_store.put(&path, payload).await.map(|_| ())
    }

    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.cache_store.get(&path).await?;
        result.bytes().await
    }

    pub async fn get_stream(
        &self,
        location: &str,
    ) -> object_store::Result<BoxStream<'static, object_store::Result<Bytes>>> {
        let path = ObjPath::from(location);
        let result = self.cache_store.get(&path).await?;
        Ok(result.into_stream())
    }

    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .cache_store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.cache_store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        if matches!(self.cache_backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }
        Ok(())
    }

    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.cache_store.list(prefix_path.as_ref()).try_collect().await
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.cache_store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        if !matches!(self.cache_backend_kind, StorageKind::Local) {
            return Ok(());
        }
        let Some(base) = &self.cache_root else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(prefix = %prefix, "skipping directory cleanup for unsupported prefix");
            return Ok(());
        }

        let mut current = base.join(relative);
        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(_) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(error = %err, path = %current.display(), "cleanup failed"),
                },
            }
            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }
        Ok(())
    }

    // ---- arbitrary dataset-source access, scheme-sniffed (§4.2) ----------

    /// Returns the backend and object path for an arbitrary location:
    /// `gs://bucket/key` selects (and caches) a GCS client scoped to
    /// `bucket`; anything else is treated as a local filesystem path.
    async fn resolve_backend(&self, location: &str) -> Result<(DynStore, ObjPath), AppError> {
        if let Some(rest) = location.strip_prefix("gs://") {
            let (bucket, key) = rest
                .split_once('/')
                .ok_or_else(|| AppError::BadInput(format!("missing object key in {location}")))?;
            let store = self.gcs_store_for_bucket(bucket).await?;
            return Ok((store, ObjPath::from(key)));
        }
        let path = ObjPath::from_filesystem_path(location)
            .map_err(|e| AppError::BadInput(format!("invalid path {location}: {e}")))?;
        Ok((self.local_backend.clone(), path))
    }

    async fn gcs_store_for_bucket(&self, bucket: &str) -> Result<DynStore, AppError> {
        if let Some(store) = self.gcs_backends.read().await.get(bucket) {
            return Ok(store.clone());
        }
        let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket);
        if let Some(creds) = &self.gcs_credentials_path {
            builder = builder.with_service_account_path(creds);
        }
        let store: DynStore = Arc::new(
            builder
                .build()
                .map_err(|e| AppError::CapabilityUnavailable(format!("gcs backend: {e}")))?,
        );
        self.gcs_backends
            .write()
            .await
            .insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    #[tracing::instrument(skip(self))]
    pub async fn source_exists(&self, location: &str) -> Result<bool, AppError> {
        let (store, path) = self.resolve_backend(location).await?;
        match store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_bytes(&self, location: &str) -> Result<Bytes, AppError> {
        let (store, path) = self.resolve_backend(location).await?;
        let result = store.get(&path).await.map_err(AppError::from)?;
        Ok(result.bytes().await.map_err(AppError::from)?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_dir_detail(&self, location: &str) -> Result<Vec<DirEntry>, AppError> {
        let (store, path) = self.resolve_backend(location).await?;
        let listing = store
            .list_with_delimiter(Some(&path))
            .await
            .map_err(AppError::from)?;
        let mut entries = Vec::new();
        for prefix in listing.common_prefixes {
            let name = prefix
                .filename()
                .unwrap_or(prefix.as_ref())
                .to_string();
            entries.push(DirEntry {
                name,
                kind: EntryKind::Dir,
                size: 0,
            });
        }
        for object in listing.objects {
            let name = object
                .location
                .filename()
                .unwrap_or(object.location.as_ref())
                .to_string();
            entries.push(DirEntry {
                name,
                kind: EntryKind::File,
                size: object.size as u64,
            });
        }
        Ok(entries)
    }

    #[tracing::instrument(skip(self))]
    pub async fn isdir(&self, location: &str) -> Result<bool, AppError> {
        Ok(!self.list_dir_detail(location).await?.is_empty())
    }

    /// Joins `base` and `name`, rejecting escapes outside `base` — the
    /// same confinement check the local backend applies to cache writes.
    pub fn resolve_image_path(&self, base: &str, name: &str) -> Result<String, AppError> {
        let name_path = Path::new(name);
        if name_path.is_absolute()
            || name_path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(AppError::BadInput(format!(
                "image name escapes base directory: {name}"
            )));
        }
        if let Some(rest) = base.strip_prefix("gs://") {
            return Ok(format!("gs://{rest}/{name}"));
        }
        Ok(Path::new(base).join(name_path).to_string_lossy().into_owned())
    }
}

async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_cache_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base)
                    .await
                    .map_err(|e| object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Gcs => {
            let bucket = cfg
                .thumbnail_cache_dir
                .strip_prefix("gs://")
                .unwrap_or(&cfg.thumbnail_cache_dir);
            let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket);
            if let Some(creds) = &cfg.gcs_credentials_path {
                builder = builder.with_service_account_path(creds);
            }
            let store = builder
                .build()
                .map_err(|e| object_store::Error::Generic {
                    store: "GoogleCloudStorage",
                    source: Box::new(e),
                })?;
            Ok((Arc::new(store), None))
        }
    }
}

/// Resolve the absolute cache directory from config, relative paths
/// joined against the working directory.
pub fn resolve_cache_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.thumbnail_cache_dir.starts_with('/') {
        PathBuf::from(&cfg.thumbnail_cache_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.thumbnail_cache_dir)
    }
}

/// Split an absolute filesystem path into `(parent_dir, file_name)`.
pub fn split_abs_path(path: &str) -> AnyResult<(PathBuf, String)> {
    let pb = PathBuf::from(path);
    let parent = pb
        .parent()
        .ok_or_else(|| anyhow!("Path has no parent: {path}"))?
        .to_path_buf();
    let file = pb
        .file_name()
        .ok_or_else(|| anyhow!("Path has no file name: {path}"))?
        .to_string_lossy()
        .to_string();
    Ok((parent, file))
}

/// Split a logical object location `"a/b/c"` into `("a/b", "c")`.
pub fn split_object_path(path: &str) -> AnyResult<(String, String)> {
    if let Some((p, f)) = path.rsplit_once('/') {
        return Ok((p.to_string(), f.to_string()));
    }
    Err(anyhow!("Object path has no separator: {path}"))
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use object_store::memory::InMemory;

    pub fn test_config_memory() -> AppConfig {
        AppConfig {
            storage: StorageKind::Local,
            ..Default::default()
        }
    }

    pub fn test_config_local(root: &str) -> AppConfig {
        AppConfig {
            thumbnail_cache_dir: root.to_string(),
            storage: StorageKind::Local,
            ..Default::default()
        }
    }

    /// Specialized manager for tests: memory-backed cache, no filesystem
    /// footprint, with automatic cleanup for the local variant.
    #[derive(Clone)]
    pub struct TestStorageManager {
        storage: StorageManager,
        temp_dir: Option<PathBuf>,
    }

    impl TestStorageManager {
        pub async fn new_memory() -> object_store::Result<Self> {
            let storage = StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Local);
            Ok(Self {
                storage,
                temp_dir: None,
            })
        }

        pub async fn new_local() -> object_store::Result<Self> {
            let root = format!("/tmp/datavisor_test_storage_{}", uuid::Uuid::new_v4());
            let cfg = test_config_local(&root);
            let storage = StorageManager::new(&cfg).await?;
            let temp_dir = storage.local_base_path().map(|p| p.to_path_buf());
            Ok(Self { storage, temp_dir })
        }

        pub fn storage(&self) -> &StorageManager {
            &self.storage
        }

        pub fn clone_storage(&self) -> StorageManager {
            self.storage.clone()
        }

        pub async fn put(&self, location: &str, data: &[u8]) -> object_store::Result<()> {
            self.storage.put(location, Bytes::from(data.to_vec())).await
        }

        pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
            self.storage.get(location).await
        }

        pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
            self.storage.delete_prefix(prefix).await
        }

        pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
            self.storage.exists(location).await
        }

        pub async fn list(
            &self,
            prefix: Option<&str>,
        ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
            self.storage.list(prefix).await
        }
    }

    impl Drop for TestStorageManager {
        fn drop(&mut self) {
            if let Some(path) = &self.temp_dir {
                if path.exists() {
                    let _ = std::fs::remove_dir_all(path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;
    use uuid::Uuid;

    fn test_config(root: &str) -> AppConfig {
        AppConfig {
            thumbnail_cache_dir: root.to_string(),
            storage: StorageKind::Local,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn memory_backend_basic_put_get_delete() {
        let storage = StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Local);
        assert!(storage.local_base_path().is_none());

        let location = "test/data/file.txt";
        let data = b"test data for storage manager";
        storage.put(location, Bytes::from(data.to_vec())).await.unwrap();
        let retrieved = storage.get(location).await.unwrap();
        assert_eq!(retrieved.as_ref(), data);

        assert!(storage.exists(location).await.unwrap());
        storage.delete_prefix("test/data/").await.unwrap();
        assert!(!storage.exists(location).await.unwrap());
    }

    #[tokio::test]
    async fn local_backend_basic_operations() {
        let base = format!("/tmp/datavisor_storage_test_{}", Uuid::new_v4());
        let cfg = test_config(&base);
        let storage = StorageManager::new(&cfg).await.expect("create storage manager");
        let resolved_base = storage.local_base_path().expect("resolved base dir").to_path_buf();
        assert_eq!(resolved_base, PathBuf::from(&base));

        let location = "test/data/file.txt";
        let data = b"test data for local storage";
        storage.put(location, Bytes::from(data.to_vec())).await.unwrap();
        let retrieved = storage.get(location).await.unwrap();
        assert_eq!(retrieved.as_ref(), data);

        storage.delete_prefix("test/data/").await.unwrap();
        assert!(!storage.exists(location).await.unwrap());

        let _ = tokio::fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn resolve_image_path_rejects_traversal() {
        let storage = StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Local);
        assert!(storage.resolve_image_path("/data/images", "../../etc/passwd").is_err());
        assert!(storage.resolve_image_path("/data/images", "sub/ok.jpg").is_ok());
    }

    #[tokio::test]
    async fn resolve_image_path_joins_gcs_uri() {
        let storage = StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Local);
        let joined = storage
            .resolve_image_path("gs://my-bucket/images", "a.jpg")
            .unwrap();
        assert_eq!(joined, "gs://my-bucket/images/a.jpg");
    }

    #[tokio::test]
    async fn read_bytes_reads_a_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("sample.txt");
        tokio::fs::write(&file_path, b"hello").await.unwrap();

        let storage = StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Local);
        let bytes = storage
            .read_bytes(file_path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"hello");
    }
}
