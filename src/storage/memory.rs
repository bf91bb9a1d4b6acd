//! In-memory object store used by tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use super::{ObjectStore, Result, StorageError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
    metadata: HashMap<String, String>,
}

/// A bucket-and-key map standing in for the real object store. Buckets are
/// created implicitly on first write.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The body of an object, if present. Test helper.
    pub fn body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.body.clone())
    }

    /// The user metadata of an object, if present. Test helper.
    pub fn metadata(&self, bucket: &str, key: &str) -> Option<HashMap<String, String>> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.metadata.clone())
    }

    /// The content type of an object, if present. Test helper.
    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.content_type.clone())
    }

    /// All keys in a bucket. Test helper.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str, suffix: Option<&str>) -> Result<Vec<String>> {
        let buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| suffix.map_or(true, |s| k.ends_with(s)))
            .cloned()
            .collect())
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<bool> {
        let buckets = self.buckets.lock().unwrap();
        Ok(buckets.get(bucket).is_some_and(|b| b.contains_key(key)))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<(Vec<u8>, HashMap<String, String>)> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| (o.body.clone(), o.metadata.clone()))
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                metadata,
            },
        );
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let object = buckets
            .get(src_bucket)
            .and_then(|b| b.get(src_key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", src_bucket, src_key)))?;
        buckets
            .entry(dst_bucket.to_string())
            .or_default()
            .insert(dst_key.to_string(), object);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        if let Some(objects) = buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn list_folder(&self, bucket: &str, folder: &str) -> Result<Vec<String>> {
        let folder = if folder.ends_with('/') {
            folder.to_string()
        } else {
            format!("{}/", folder)
        };
        let buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        let mut contents = BTreeSet::new();
        for key in objects.keys().filter(|k| k.starts_with(&folder)) {
            let rest = &key[folder.len()..];
            match rest.find('/') {
                Some(i) => {
                    contents.insert(format!("{}{}/", folder, &rest[..i]));
                }
                None => {
                    contents.insert(key.clone());
                }
            }
        }
        Ok(contents.into_iter().collect())
    }
}
