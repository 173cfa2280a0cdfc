//! Short-TTL cache of per-key properties and per-prefix listings.
//!
//! The store is authoritative; this cache only keeps the adapter responsive
//! between OS callbacks. Entries older than the TTL are dead: they are never
//! returned and are removed lazily when a lookup misses on them. Stale reads
//! within the TTL are acceptable, torn reads are not — every entry is cloned
//! out under its map's read lock.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use parking_lot::RwLock;

use crate::store::BlobItemInfo;

/// TTL applied when none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Per-mount cache of item properties and directory listings.
#[derive(Debug)]
pub struct MetadataCache {
    ttl: Duration,
    items: RwLock<HashMap<String, (BlobItemInfo, Instant)>>,
    listings: RwLock<HashMap<String, (Vec<BlobItemInfo>, Instant)>>,
}

impl MetadataCache {
    /// Creates a cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        MetadataCache {
            ttl,
            items: RwLock::new(HashMap::new()),
            listings: RwLock::new(HashMap::new()),
        }
    }

    /// The properties cached for `key`, unless the entry has died.
    pub fn get_item(&self, key: &str) -> Option<BlobItemInfo> {
        Self::get(&self.items, self.ttl, key)
    }

    /// Caches the properties of one key.
    pub fn set_item(&self, key: impl Into<String>, info: BlobItemInfo) {
        self.items.write().insert(key.into(), (info, Instant::now()));
    }

    /// Drops the properties cached for `key`.
    pub fn invalidate_item(&self, key: &str) {
        self.items.write().remove(key);
    }

    /// Caches the properties of every entry in a listing, keyed by its
    /// `full_path`. Used when enumerating a directory so that the get-info
    /// calls that follow hit the cache.
    pub fn upsert_items<'a>(&self, entries: impl IntoIterator<Item = &'a BlobItemInfo>) {
        let now = Instant::now();
        let mut items = self.items.write();
        for entry in entries {
            items.insert(entry.full_path.clone(), (entry.clone(), now));
        }
    }

    /// The listing cached for `prefix`, unless the entry has died.
    pub fn get_listing(&self, prefix: &str) -> Option<Vec<BlobItemInfo>> {
        Self::get(&self.listings, self.ttl, prefix)
    }

    /// Caches the listing of one prefix (ends in `/`, or empty for the root).
    pub fn set_listing(&self, prefix: impl Into<String>, entries: Vec<BlobItemInfo>) {
        self.listings
            .write()
            .insert(prefix.into(), (entries, Instant::now()));
    }

    /// Drops everything the cache knows about the subtree at `prefix`.
    ///
    /// Listings are removed in both prefix directions: a listing *under* the
    /// invalidated prefix is stale, and so is any *ancestor* listing that
    /// contained one of its entries. Items are removed under the prefix only.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.listings
            .write()
            .retain(|key, _| !key.starts_with(prefix) && !prefix.starts_with(key.as_str()));
        self.items.write().retain(|key, _| !key.starts_with(prefix));
    }

    /// Drops everything; called on unmount.
    pub fn clear(&self) {
        self.items.write().clear();
        self.listings.write().clear();
    }

    fn get<V: Clone>(
        map: &RwLock<HashMap<String, (V, Instant)>>,
        ttl: Duration,
        key: &str,
    ) -> Option<V> {
        {
            let read = map.read();
            match read.get(key) {
                Some((value, inserted)) if inserted.elapsed() <= ttl => {
                    return Some(value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // The entry is dead; remove it unless a writer got there first.
        let mut write = map.write();
        if let Some((_, inserted)) = write.get(key) {
            if inserted.elapsed() > ttl {
                write.remove(key);
            }
        }
        None
    }
}
