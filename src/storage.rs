use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Bound;
use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{EdfError, Result};
use crate::FETCH_CHUNK_SIZE;

/// A remote object as reported by a listing.
///
/// Identity is the key; `last_modified` (milliseconds since the Unix epoch)
/// orders objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub last_modified: i64,
}

/// Access credentials handed to a storage client factory
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One page of a folder listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    pub next_token: Option<String>,
}

/// Remote object store client.
///
/// Implementors provide paged listing and ranged reads; the flat listing and
/// whole-object fetch used by [`SegmentSource`](crate::SegmentSource) are
/// built on top of them.
pub trait ObjectStorage {
    /// Lists one page of objects under `folder`
    fn list_page(&self, folder: &str, continuation: Option<&str>) -> Result<ListPage>;

    /// Reads `len` bytes of `key` starting at `offset`
    fn fetch_range(&self, key: &str, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Lists every object under `folder` modified strictly after `since`
    fn list_objects_modified_after(&self, folder: &str, since: Option<i64>) -> Result<Vec<ObjectDescriptor>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self.list_page(folder, token.as_deref())?;
            objects.extend(
                page.objects
                    .into_iter()
                    .filter(|o| since.map_or(true, |since| o.last_modified > since)),
            );

            match page.next_token {
                Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }

    /// Fetches a whole object in chunks of at most [`FETCH_CHUNK_SIZE`] bytes
    fn fetch_bytes(&self, key: &str, size: u64) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(size as usize);
        let mut offset = 0u64;

        while offset < size {
            let len = (size - offset).min(FETCH_CHUNK_SIZE as u64);
            let chunk = self.fetch_range(key, offset, len)?;
            if chunk.len() as u64 != len {
                return Err(EdfError::StorageFetch {
                    key: key.to_string(),
                    reason: format!("short read at {}: got {} of {} bytes", offset, chunk.len(), len),
                });
            }
            debug!("fetched {} bytes of {} at offset {}", len, key, offset);
            buffer.extend_from_slice(&chunk);
            offset += len;
        }

        Ok(buffer)
    }
}

impl<T: ObjectStorage + ?Sized> ObjectStorage for Rc<T> {
    fn list_page(&self, folder: &str, continuation: Option<&str>) -> Result<ListPage> {
        (**self).list_page(folder, continuation)
    }

    fn fetch_range(&self, key: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        (**self).fetch_range(key, offset, len)
    }
}

impl<T: ObjectStorage + ?Sized> ObjectStorage for Box<T> {
    fn list_page(&self, folder: &str, continuation: Option<&str>) -> Result<ListPage> {
        (**self).list_page(folder, continuation)
    }

    fn fetch_range(&self, key: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        (**self).fetch_range(key, offset, len)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: i64,
}

/// Object store kept in memory.
///
/// Serves local playback and tests: pages are limited to `page_size`
/// entries, and listing or fetch failures can be injected.
#[derive(Debug)]
pub struct InMemoryStorage {
    objects: RefCell<BTreeMap<String, StoredObject>>,
    page_size: usize,
    failing_lists: Cell<usize>,
    failing_keys: RefCell<HashSet<String>>,
    list_calls: Cell<usize>,
    fetched: RefCell<Vec<String>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        InMemoryStorage {
            objects: RefCell::new(BTreeMap::new()),
            page_size: page_size.max(1),
            failing_lists: Cell::new(0),
            failing_keys: RefCell::new(HashSet::new()),
            list_calls: Cell::new(0),
            fetched: RefCell::new(Vec::new()),
        }
    }

    /// Stores or replaces an object
    pub fn put(&self, key: &str, data: Vec<u8>, last_modified: i64) {
        self.objects
            .borrow_mut()
            .insert(key.to_string(), StoredObject { data, last_modified });
    }

    pub fn remove(&self, key: &str) -> bool {
        self.objects.borrow_mut().remove(key).is_some()
    }

    /// Makes the next `count` page listings fail
    pub fn fail_next_lists(&self, count: usize) {
        self.failing_lists.set(count);
    }

    /// Makes every fetch of `key` fail until [`clear_fetch_failures`](Self::clear_fetch_failures)
    pub fn fail_fetches_for(&self, key: &str) {
        self.failing_keys.borrow_mut().insert(key.to_string());
    }

    pub fn clear_fetch_failures(&self) {
        self.failing_keys.borrow_mut().clear();
    }

    /// Number of `list_page` calls served or failed so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.get()
    }

    /// Keys of every successful ranged read, in order
    pub fn fetched_keys(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }
}

impl ObjectStorage for InMemoryStorage {
    fn list_page(&self, folder: &str, continuation: Option<&str>) -> Result<ListPage> {
        self.list_calls.set(self.list_calls.get() + 1);

        let failing = self.failing_lists.get();
        if failing > 0 {
            self.failing_lists.set(failing - 1);
            return Err(EdfError::StorageList {
                folder: folder.to_string(),
                reason: "injected listing failure".to_string(),
            });
        }

        let prefix = folder_prefix(folder);
        let lower = match continuation {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Included(prefix.clone()),
        };

        let objects = self.objects.borrow();
        let mut page = ListPage::default();
        for (key, object) in objects
            .range((lower, Bound::Unbounded))
            .filter(|(key, _)| key.starts_with(&prefix))
        {
            if page.objects.len() == self.page_size {
                page.next_token = page.objects.last().map(|o| o.key.clone());
                break;
            }
            page.objects.push(ObjectDescriptor {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            });
        }

        Ok(page)
    }

    fn fetch_range(&self, key: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        if self.failing_keys.borrow().contains(key) {
            return Err(EdfError::StorageFetch {
                key: key.to_string(),
                reason: "injected fetch failure".to_string(),
            });
        }

        let objects = self.objects.borrow();
        let object = objects.get(key).ok_or_else(|| EdfError::StorageFetch {
            key: key.to_string(),
            reason: "no such key".to_string(),
        })?;

        let start = (offset as usize).min(object.data.len());
        let end = (offset.saturating_add(len) as usize).min(object.data.len());
        self.fetched.borrow_mut().push(key.to_string());
        Ok(object.data[start..end].to_vec())
    }
}

fn folder_prefix(folder: &str) -> String {
    let trimmed = folder.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
