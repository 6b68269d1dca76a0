//! Generation-tagged response storage.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::CacheError;
use crate::request::{CachedAsset, RequestKey};

/// Named caches of stored responses, one per generation.
///
/// Writing an entry under an existing key replaces it.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of every generation present.
    async fn generations(&self) -> Result<Vec<String>, CacheError>;
    /// Create the generation if it does not exist yet.
    async fn open(&self, generation: &str) -> Result<(), CacheError>;
    /// Remove a generation with all of its entries. Returns whether it existed.
    async fn delete(&self, generation: &str) -> Result<bool, CacheError>;
    async fn get(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedAsset>, CacheError>;
    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        asset: CachedAsset,
    ) -> Result<(), CacheError>;
    async fn len(&self, generation: &str) -> Result<usize, CacheError>;
}

fn check_generation(generation: &str) -> Result<(), CacheError> {
    let valid = !generation.is_empty()
        && generation != "."
        && generation != ".."
        && !generation.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidGeneration(generation.to_string()))
    }
}

/// Volatile storage, lost when the process exits.
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<BTreeMap<String, HashMap<RequestKey, CachedAsset>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn generations(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn open(&self, generation: &str) -> Result<(), CacheError> {
        check_generation(generation)?;
        self.caches
            .write()
            .await
            .entry(generation.to_string())
            .or_default();
        Ok(())
    }

    async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(generation).is_some())
    }

    async fn get(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedAsset>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .get(generation)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        asset: CachedAsset,
    ) -> Result<(), CacheError> {
        check_generation(generation)?;
        self.caches
            .write()
            .await
            .entry(generation.to_string())
            .or_default()
            .insert(key.clone(), asset);
        Ok(())
    }

    async fn len(&self, generation: &str) -> Result<usize, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .get(generation)
            .map_or(0, HashMap::len))
    }
}

#[derive(Serialize, Deserialize)]
struct EntryMeta {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
}

/// Marks a directory under the cache root as a generation this store owns.
pub const GENERATION_MARKER: &str = ".shelld-generation";

/// Storage that survives restarts.
///
/// Layout: `<root>/<generation>/<sha256 of key>.json` holds the key,
/// status and headers; the sibling `.body` file holds the payload.
/// Directories without a [`GENERATION_MARKER`] are never listed or deleted.
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, generation: &str) -> Result<PathBuf, CacheError> {
        check_generation(generation)?;
        Ok(self.root.join(generation))
    }

    fn entry_paths(&self, generation: &str, key: &RequestKey) -> Result<(PathBuf, PathBuf), CacheError> {
        let dir = self.generation_dir(generation)?;
        let stem = format!("{:x}", Sha256::digest(key.as_str().as_bytes()));
        Ok((
            dir.join(format!("{stem}.json")),
            dir.join(format!("{stem}.body")),
        ))
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn generations(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if !tokio::fs::try_exists(entry.path().join(GENERATION_MARKER)).await? {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn open(&self, generation: &str) -> Result<(), CacheError> {
        let dir = self.generation_dir(generation)?;
        tokio::fs::create_dir_all(&dir).await?;
        let marker = dir.join(GENERATION_MARKER);
        if !tokio::fs::try_exists(&marker).await? {
            tokio::fs::write(&marker, generation).await?;
        }
        Ok(())
    }

    async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        let dir = self.generation_dir(generation)?;
        if !tokio::fs::try_exists(dir.join(GENERATION_MARKER)).await? {
            return Ok(false);
        }
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedAsset>, CacheError> {
        let (meta_path, body_path) = self.entry_paths(generation, key)?;
        let raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EntryMeta = serde_json::from_slice(&raw)?;
        if &meta.key != key {
            return Ok(None);
        }
        let body = tokio::fs::read(&body_path).await?;
        Ok(Some(CachedAsset {
            status: meta.status,
            headers: meta.headers,
            body: body.into(),
        }))
    }

    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        asset: CachedAsset,
    ) -> Result<(), CacheError> {
        self.open(generation).await?;
        let (meta_path, body_path) = self.entry_paths(generation, key)?;
        let meta = EntryMeta {
            key: key.clone(),
            status: asset.status,
            headers: asset.headers,
        };
        write_atomic(&body_path, &asset.body).await?;
        write_atomic(&meta_path, &serde_json::to_vec(&meta)?).await?;
        Ok(())
    }

    async fn len(&self, generation: &str) -> Result<usize, CacheError> {
        let mut dir = match tokio::fs::read_dir(self.generation_dir(generation)?).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> RequestKey {
        RequestKey::new(
            &reqwest::Method::GET,
            &url::Url::parse(&format!("http://app.local{path}")).unwrap(),
        )
    }

    fn asset(body: &'static str) -> CachedAsset {
        CachedAsset {
            status: 200,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: body.into(),
        }
    }

    async fn exercise(storage: &dyn CacheStorage) {
        storage.open("v1").await.unwrap();
        assert!(storage.get("v1", &key("/a")).await.unwrap().is_none());

        storage.put("v1", &key("/a"), asset("first")).await.unwrap();
        storage.put("v1", &key("/a"), asset("second")).await.unwrap();
        assert_eq!(storage.len("v1").await.unwrap(), 1);
        let hit = storage.get("v1", &key("/a")).await.unwrap().unwrap();
        assert_eq!(hit.body, "second");
        assert_eq!(hit.headers[0].1, "text/plain");

        storage.put("v2", &key("/b"), asset("b")).await.unwrap();
        assert_eq!(storage.generations().await.unwrap(), ["v1", "v2"]);
        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert_eq!(storage.generations().await.unwrap(), ["v2"]);
        assert_eq!(storage.len("v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_storage_semantics() {
        exercise(&MemoryCacheStorage::new()).await;
    }

    #[tokio::test]
    async fn disk_storage_semantics() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&DiskCacheStorage::new(dir.path().join("caches"))).await;
    }

    #[tokio::test]
    async fn disk_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        DiskCacheStorage::new(dir.path())
            .put("v1", &key("/manifest.json"), asset("{}"))
            .await
            .unwrap();
        let reopened = DiskCacheStorage::new(dir.path());
        let hit = reopened.get("v1", &key("/manifest.json")).await.unwrap();
        assert_eq!(hit.unwrap().body, "{}");
    }

    #[tokio::test]
    async fn unmarked_directories_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let unrelated = dir.path().join("photos");
        std::fs::create_dir(&unrelated).unwrap();
        std::fs::write(unrelated.join("holiday.jpg"), b"jpeg").unwrap();

        let storage = DiskCacheStorage::new(dir.path());
        storage.put("v1", &key("/"), asset("root")).await.unwrap();
        assert_eq!(storage.generations().await.unwrap(), ["v1"]);
        assert!(!storage.delete("photos").await.unwrap());
        assert!(unrelated.join("holiday.jpg").exists());
    }

    #[tokio::test]
    async fn generation_names_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        assert!(matches!(
            storage.open("../evil").await,
            Err(CacheError::InvalidGeneration(_))
        ));
    }
}
