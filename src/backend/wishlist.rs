use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::catalog::CatalogItem;
use super::storage::KeyValueStore;
use crate::error::{StorageError, WishlistError};

pub const WISHLIST_KEY: &str = "wishlist";

/// What is written for each favorited pack, enough to list it offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub price: f64,
}

impl From<&CatalogItem> for WishlistEntry {
    fn from(item: &CatalogItem) -> Self {
        WishlistEntry {
            id: item.id.clone(),
            title: item.title.clone(),
            city: item.city.clone(),
            country: item.country.clone(),
            price: item.price,
        }
    }
}

/// Older clients stored bare ids, newer ones full entries.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Id(String),
    Entry(WishlistEntry),
}

impl From<StoredEntry> for WishlistEntry {
    fn from(stored: StoredEntry) -> Self {
        match stored {
            StoredEntry::Id(id) => WishlistEntry {
                id,
                title: String::new(),
                city: String::new(),
                country: String::new(),
                price: 0.0,
            },
            StoredEntry::Entry(entry) => entry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WishlistEvent {
    Added(String),
    Removed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WishlistState {
    Uninitialized,
    Loaded,
    Mutating,
}

/// Favorited pack ids, written through to storage on every change.
pub struct Wishlist {
    store: Arc<dyn KeyValueStore>,
    state: WishlistState,
    entries: BTreeMap<String, WishlistEntry>,
    subscribers: BTreeMap<SubscriptionId, mpsc::UnboundedSender<WishlistEvent>>,
    next_subscription: u64,
}

fn parse_entries(content: &str) -> Result<Vec<WishlistEntry>, serde_json::Error> {
    let stored: Vec<StoredEntry> = serde_json::from_str(content)?;
    Ok(stored.into_iter().map(WishlistEntry::from).collect())
}

impl Wishlist {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            state: WishlistState::Uninitialized,
            entries: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            next_subscription: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> WishlistState {
        self.state
    }

    /// Reads the persisted set. Missing or unreadable data means an empty wishlist.
    pub fn load(&mut self) -> HashSet<String> {
        self.entries.clear();

        match self.store.get(WISHLIST_KEY) {
            Ok(Some(content)) => match parse_entries(&content) {
                Ok(entries) => {
                    for entry in entries {
                        self.entries.insert(entry.id.clone(), entry);
                    }
                }
                Err(e) => warn!("discarding corrupt wishlist: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!("wishlist unavailable, starting empty: {}", e),
        }

        self.state = WishlistState::Loaded;
        debug!("wishlist loaded with {} entries", self.entries.len());
        self.ids()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entry(&self, id: &str) -> Option<&WishlistEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &WishlistEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self, entries: &BTreeMap<String, WishlistEntry>) -> Result<(), StorageError> {
        let list: Vec<&WishlistEntry> = entries.values().collect();
        let content = serde_json::to_string(&list).map_err(|source| StorageError::Serialize {
            key: WISHLIST_KEY.to_string(),
            source,
        })?;
        self.store.set(WISHLIST_KEY, &content)
    }

    /// Adds the pack if absent, removes it if present. Returns whether it is
    /// now on the wishlist.
    ///
    /// The new set is written before memory is updated. A failed write is
    /// returned, but the in-memory change stands; toggling again is safe.
    pub fn toggle(&mut self, item: &CatalogItem) -> Result<bool, WishlistError> {
        self.toggle_entry(WishlistEntry::from(item))
    }

    /// Same as `toggle` for a pack that is only known by its stored entry.
    pub fn toggle_entry(&mut self, entry: WishlistEntry) -> Result<bool, WishlistError> {
        if self.state == WishlistState::Uninitialized {
            return Err(WishlistError::NotLoaded);
        }
        self.state = WishlistState::Mutating;

        let mut next = self.entries.clone();
        let id = entry.id.clone();
        let added = if next.remove(&id).is_some() {
            false
        } else {
            next.insert(id.clone(), entry);
            true
        };

        let written = self.persist(&next);
        if let Err(e) = &written {
            warn!("wishlist change for {} not saved: {}", id, e);
        }

        self.entries = next;
        self.state = WishlistState::Loaded;
        self.publish(if added {
            WishlistEvent::Added(id)
        } else {
            WishlistEvent::Removed(id)
        });

        written?;
        Ok(added)
    }

    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<WishlistEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    fn publish(&mut self, event: WishlistEvent) {
        // Drop subscribers whose receiver is gone.
        self.subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::catalog::tests::item;
    use crate::backend::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store that counts writes and can be told to fail them.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: AtomicUsize,
        fail_writes: bool,
        fail_reads: bool,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            if self.fail_reads {
                return Err(StorageError::Read {
                    key: key.to_string(),
                    reason: "unavailable".to_string(),
                });
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(StorageError::Write {
                    key: key.to_string(),
                    reason: "disk full".to_string(),
                });
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    fn loaded(store: Arc<CountingStore>) -> Wishlist {
        let mut wishlist = Wishlist::new(store);
        wishlist.load();
        wishlist
    }

    #[test]
    fn double_toggle_restores_membership_with_two_writes() {
        let store = Arc::new(CountingStore::default());
        let mut wishlist = loaded(store.clone());
        let pack = item("x");

        assert!(wishlist.toggle(&pack).unwrap());
        assert!(wishlist.contains("x"));
        assert!(!wishlist.toggle(&pack).unwrap());
        assert!(!wishlist.contains("x"));
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.get(WISHLIST_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn toggle_before_load_is_rejected() {
        let mut wishlist = Wishlist::new(Arc::new(MemoryStore::new()));
        assert_eq!(wishlist.state(), WishlistState::Uninitialized);
        assert!(matches!(
            wishlist.toggle(&item("x")),
            Err(WishlistError::NotLoaded)
        ));
    }

    #[test]
    fn loads_ids_and_snapshots_alike() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                WISHLIST_KEY,
                r#"["a", {"id":"b","title":"Tapas","city":"Madrid","country":"Spain","price":4.5}]"#,
            )
            .unwrap();

        let mut wishlist = Wishlist::new(store);
        let ids = wishlist.load();
        assert_eq!(ids, HashSet::from(["a".to_string(), "b".to_string()]));
        let titles: Vec<&str> = wishlist.entries().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["", "Tapas"]);

        // A stored entry can be removed without the pack being in the catalog.
        let stored = wishlist.entry("b").cloned().unwrap();
        assert_eq!(stored.city, "Madrid");
        assert!(!wishlist.toggle_entry(stored).unwrap());
        assert!(wishlist.entry("b").is_none());
    }

    #[test]
    fn corrupt_or_unreadable_storage_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(WISHLIST_KEY, "{ definitely not a list").unwrap();
        let mut wishlist = Wishlist::new(store);
        assert!(wishlist.load().is_empty());
        assert_eq!(wishlist.state(), WishlistState::Loaded);

        let failing = Arc::new(CountingStore {
            fail_reads: true,
            ..CountingStore::default()
        });
        let mut wishlist = Wishlist::new(failing);
        assert!(wishlist.load().is_empty());
    }

    #[test]
    fn failed_write_is_reported_but_memory_keeps_the_change() {
        let store = Arc::new(CountingStore {
            fail_writes: true,
            ..CountingStore::default()
        });
        let mut wishlist = loaded(store);

        let result = wishlist.toggle(&item("x"));
        assert!(matches!(result, Err(WishlistError::Storage(StorageError::Write { .. }))));
        assert!(wishlist.contains("x"));
        assert_eq!(wishlist.state(), WishlistState::Loaded);
    }

    #[test]
    fn persisted_entries_survive_a_reload() {
        let store = Arc::new(CountingStore::default());
        let mut wishlist = loaded(store.clone());
        wishlist.toggle(&item("a")).unwrap();
        wishlist.toggle(&item("b")).unwrap();

        let mut reloaded = Wishlist::new(store);
        let ids = reloaded.load();
        assert_eq!(ids.len(), 2);
        assert_eq!(
            reloaded.entries().next().map(|e| e.city.as_str()),
            Some("Berlin")
        );
    }

    #[test]
    fn subscribers_receive_changes_until_unsubscribed() {
        let mut wishlist = loaded(Arc::new(CountingStore::default()));
        let (id, mut rx) = wishlist.subscribe();

        wishlist.toggle(&item("a")).unwrap();
        wishlist.toggle(&item("a")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WishlistEvent::Added("a".to_string()));
        assert_eq!(rx.try_recv().unwrap(), WishlistEvent::Removed("a".to_string()));

        assert!(wishlist.unsubscribe(id));
        wishlist.toggle(&item("b")).unwrap();
        assert!(rx.try_recv().is_err());
        assert!(!wishlist.unsubscribe(id));
    }
}
