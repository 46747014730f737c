use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};

use super::catalog::CatalogItem;
use super::provider::CatalogProvider;
use crate::engine::filter::{self, FilterCriteria};
use crate::error::ProviderError;

/// A committed catalog. Readers hold an `Arc` to it; a newer load builds a
/// fresh `Snapshot` and swaps the reference, it never edits one in place.
#[derive(Debug)]
pub struct Snapshot {
    pub version: u64,
    pub items: Arc<[CatalogItem]>,
    pub fetched_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub version: u64,
    pub criteria: String,
}

impl CacheKey {
    pub fn new(version: u64, criteria: &FilterCriteria) -> Self {
        Self {
            version,
            criteria: criteria.cache_key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    CoverResolved { pack_id: String, url: Option<String> },
}

/// Where a pack's cover stands for the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cover {
    /// The lookup has not finished yet.
    Pending,
    Found(String),
    /// The pack has no photos, or the lookup failed.
    Missing,
}

#[derive(Clone)]
pub struct CatalogStore {
    provider: Arc<dyn CatalogProvider>,
    inner: Arc<RwLock<CatalogStoreInner>>,
}

struct CatalogStoreInner {
    snapshot: Option<Arc<Snapshot>>,
    derived: HashMap<CacheKey, Arc<[CatalogItem]>>,
    /// Finished lookups; `None` when the pack has no photo.
    covers: HashMap<String, Option<String>>,
    /// Last fetch ticket handed out; tickets double as snapshot versions.
    issued: u64,
    ttl: Option<Duration>,
    events: Option<mpsc::UnboundedSender<CatalogEvent>>,
}

fn ingest(records: Vec<super::catalog::RawPackRecord>) -> Result<Vec<CatalogItem>, ProviderError> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            CatalogItem::try_from(record).map_err(|reason| ProviderError::Malformed { index, reason })
        })
        .collect()
}

impl CatalogStore {
    pub fn new(provider: Arc<dyn CatalogProvider>, ttl: Option<Duration>) -> Self {
        Self {
            provider,
            inner: Arc::new(RwLock::new(CatalogStoreInner {
                snapshot: None,
                derived: HashMap::new(),
                covers: HashMap::new(),
                issued: 0,
                ttl,
                events: None,
            })),
        }
    }

    /// Receive a `CatalogEvent` for every cover resolution that finishes.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<CatalogEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.events = Some(tx);
        rx
    }

    /// The current snapshot, fetching only when there is none or it expired.
    pub async fn load(&self) -> Result<Arc<Snapshot>, ProviderError> {
        {
            let inner = self.inner.read().await;
            if let Some(snapshot) = &inner.snapshot {
                let fresh = inner
                    .ttl
                    .is_none_or(|ttl| snapshot.fetched_at.elapsed() < ttl);
                if fresh {
                    return Ok(snapshot.clone());
                }
                debug!("catalog snapshot v{} expired", snapshot.version);
            }
        }
        self.refresh().await
    }

    /// Always asks the provider. A response that arrives after a newer one
    /// has been committed is dropped and the newer snapshot returned.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, ProviderError> {
        let ticket = {
            let mut inner = self.inner.write().await;
            inner.issued += 1;
            inner.issued
        };

        let records = self.provider.fetch_packs().await?;
        let items = ingest(records)?;

        let snapshot = {
            let mut inner = self.inner.write().await;
            if let Some(current) = &inner.snapshot {
                if current.version > ticket {
                    info!(
                        "discarding stale catalog fetch v{} (have v{})",
                        ticket, current.version
                    );
                    return Ok(current.clone());
                }
            }

            let snapshot = Arc::new(Snapshot {
                version: ticket,
                items: items.into(),
                fetched_at: Instant::now(),
            });
            inner.snapshot = Some(snapshot.clone());
            inner.derived.clear();
            info!(
                "committed catalog v{} with {} packs",
                snapshot.version,
                snapshot.items.len()
            );
            snapshot
        };

        self.spawn_cover_resolution(snapshot.clone());
        Ok(snapshot)
    }

    fn spawn_cover_resolution(&self, snapshot: Arc<Snapshot>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.clone();
        handle.spawn(async move {
            store.resolve_covers(&snapshot).await;
        });
    }

    /// Looks up covers for packs that arrived without one. Failures leave the
    /// pack without a cover; they never affect the snapshot. Returns how many
    /// covers were found.
    pub async fn resolve_covers(&self, snapshot: &Snapshot) -> usize {
        let pending: Vec<String> = {
            let inner = self.inner.read().await;
            snapshot
                .items
                .iter()
                .filter(|item| item.cover_photo_url.is_none() && !inner.covers.contains_key(&item.id))
                .map(|item| item.id.clone())
                .collect()
        };

        let lookups = pending.into_iter().map(|pack_id| async move {
            let url = match self.provider.photos_for(&pack_id).await {
                Ok(url) => url,
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            };
            self.record_cover(pack_id, url).await
        });

        join_all(lookups).await.into_iter().filter(|found| *found).count()
    }

    async fn record_cover(&self, pack_id: String, url: Option<String>) -> bool {
        let mut inner = self.inner.write().await;
        inner.covers.insert(pack_id.clone(), url.clone());
        let found = url.is_some();
        if let Some(events) = &inner.events {
            let _ = events.send(CatalogEvent::CoverResolved { pack_id, url });
        }
        found
    }

    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.read().await.snapshot.clone()
    }

    pub async fn get_cached(&self, key: &CacheKey) -> Option<Arc<[CatalogItem]>> {
        self.inner.read().await.derived.get(key).cloned()
    }

    /// Filtered and sorted view of the current snapshot, memoized per criteria.
    pub async fn query(&self, criteria: &FilterCriteria) -> Result<Arc<[CatalogItem]>, ProviderError> {
        let snapshot = self.load().await?;
        let key = CacheKey::new(snapshot.version, criteria);
        if let Some(hit) = self.get_cached(&key).await {
            return Ok(hit);
        }

        let result: Arc<[CatalogItem]> = filter::apply(&snapshot.items, criteria).into();

        let mut inner = self.inner.write().await;
        // Only memoize against the snapshot that is still current.
        if inner.snapshot.as_ref().map(|s| s.version) == Some(snapshot.version) {
            inner.derived.insert(key, result.clone());
        }
        Ok(result)
    }

    /// Drops derived results, keeps the raw snapshot.
    pub async fn invalidate(&self) {
        let mut inner = self.inner.write().await;
        debug!("invalidating {} cached results", inner.derived.len());
        inner.derived.clear();
    }

    /// Drops everything, the next `load` fetches again.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.snapshot = None;
        inner.derived.clear();
        inner.covers.clear();
    }

    pub async fn covers(&self, items: &[CatalogItem]) -> Vec<Cover> {
        let inner = self.inner.read().await;
        items
            .iter()
            .map(|item| match (&item.cover_photo_url, inner.covers.get(&item.id)) {
                (Some(url), _) | (None, Some(Some(url))) => Cover::Found(url.clone()),
                (None, Some(None)) => Cover::Missing,
                (None, None) => Cover::Pending,
            })
            .collect()
    }

    #[cfg(test)]
    pub async fn cached_results(&self) -> usize {
        self.inner.read().await.derived.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::catalog::RawPackRecord;
    use crate::backend::catalog::tests::record;
    use crate::engine::filter::SortKey;
    use crate::error::PhotoResolutionError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    pub struct FakeProvider {
        pub records: Mutex<Vec<RawPackRecord>>,
        pub fetches: AtomicUsize,
        pub photo_lookups: AtomicUsize,
        pub photos: Mutex<HashMap<String, String>>,
        pub fail: Mutex<bool>,
    }

    impl FakeProvider {
        pub fn with_packs(ids: &[&str]) -> Self {
            let provider = FakeProvider::default();
            *provider.records.lock().unwrap() = ids.iter().map(|id| record(id)).collect();
            provider
        }
    }

    #[async_trait]
    impl CatalogProvider for FakeProvider {
        async fn fetch_packs(&self) -> Result<Vec<RawPackRecord>, ProviderError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(ProviderError::Unreachable("offline".to_string()));
            }
            Ok(self.records.lock().unwrap().clone())
        }

        async fn photos_for(&self, pack_id: &str) -> Result<Option<String>, PhotoResolutionError> {
            self.photo_lookups.fetch_add(1, Ordering::SeqCst);
            if pack_id == "broken" {
                return Err(PhotoResolutionError {
                    pack_id: pack_id.to_string(),
                    reason: "timeout".to_string(),
                });
            }
            Ok(self.photos.lock().unwrap().get(pack_id).cloned())
        }
    }

    fn store(provider: Arc<FakeProvider>) -> CatalogStore {
        CatalogStore::new(provider, None)
    }

    #[tokio::test]
    async fn second_load_is_served_from_cache() {
        let provider = Arc::new(FakeProvider::with_packs(&["a", "b"]));
        let store = store(provider.clone());

        let first = store.load().await.unwrap();
        let second = store.load().await.unwrap();

        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(first.version, second.version);
        assert_eq!(second.items.len(), 2);
    }

    #[tokio::test]
    async fn refresh_bumps_version_and_drops_derived_results() {
        let provider = Arc::new(FakeProvider::with_packs(&["a"]));
        let store = store(provider.clone());

        store.query(&FilterCriteria::default()).await.unwrap();
        assert_eq!(store.cached_results().await, 1);

        let snapshot = store.refresh().await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(store.cached_results().await, 0);
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_results_are_memoized_per_criteria() {
        let provider = Arc::new(FakeProvider::with_packs(&["a", "b", "c"]));
        let store = store(provider.clone());
        let newest = FilterCriteria::default();
        let oldest = FilterCriteria {
            sort_key: SortKey::Oldest,
            ..FilterCriteria::default()
        };

        let first = store.query(&newest).await.unwrap();
        let again = store.query(&newest).await.unwrap();
        store.query(&oldest).await.unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(store.cached_results().await, 2);
        let key = CacheKey::new(1, &oldest);
        assert!(store.get_cached(&key).await.is_some());
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_keeps_snapshot_clear_drops_it() {
        let provider = Arc::new(FakeProvider::with_packs(&["a"]));
        let store = store(provider.clone());
        store.query(&FilterCriteria::default()).await.unwrap();

        store.invalidate().await;
        assert_eq!(store.cached_results().await, 0);
        assert!(store.snapshot().await.is_some());
        store.load().await.unwrap();
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);

        store.clear().await;
        assert!(store.snapshot().await.is_none());
        store.load().await.unwrap();
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_snapshot_is_refetched() {
        let provider = Arc::new(FakeProvider::with_packs(&["a"]));
        let store = CatalogStore::new(provider.clone(), Some(Duration::ZERO));

        store.load().await.unwrap();
        store.load().await.unwrap();
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn provider_failure_is_surfaced_and_retryable() {
        let provider = Arc::new(FakeProvider::with_packs(&["a"]));
        *provider.fail.lock().unwrap() = true;
        let store = store(provider.clone());

        assert!(matches!(store.load().await, Err(ProviderError::Unreachable(_))));
        assert!(store.snapshot().await.is_none());

        *provider.fail.lock().unwrap() = false;
        assert_eq!(store.refresh().await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn malformed_record_fails_the_load() {
        let provider = FakeProvider::with_packs(&["a", "b"]);
        provider.records.lock().unwrap()[1].title = None;
        let store = store(Arc::new(provider));

        match store.load().await {
            Err(ProviderError::Malformed { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("title"));
            }
            other => panic!("expected malformed error, got {:?}", other.map(|s| s.version)),
        }
    }

    /// Provider whose first fetch blocks until released, so a later fetch can
    /// overtake it.
    struct SlowFirstProvider {
        fetches: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl CatalogProvider for SlowFirstProvider {
        async fn fetch_packs(&self) -> Result<Vec<RawPackRecord>, ProviderError> {
            let call = self.fetches.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                self.release.notified().await;
                Ok(vec![record("stale")])
            } else {
                Ok(vec![record("fresh")])
            }
        }

        async fn photos_for(&self, _: &str) -> Result<Option<String>, PhotoResolutionError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn stale_fetch_never_overwrites_newer_snapshot() {
        let provider = Arc::new(SlowFirstProvider {
            fetches: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let store = CatalogStore::new(provider.clone(), None);

        let slow = tokio::spawn({
            let store = store.clone();
            async move { store.refresh().await }
        });
        while provider.fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let fresh = store.refresh().await.unwrap();
        assert_eq!(fresh.version, 2);

        provider.release.notify_one();
        let stale = slow.await.unwrap().unwrap();
        assert_eq!(stale.version, 2);
        assert_eq!(stale.items[0].id, "fresh");
        assert_eq!(store.snapshot().await.unwrap().items[0].id, "fresh");
    }

    #[tokio::test]
    async fn cover_resolution_is_best_effort() {
        let provider = FakeProvider::with_packs(&["a", "broken", "c", "d"]);
        provider.records.lock().unwrap()[3].cover_photo_url = Some("https://img.test/d.jpg".to_string());
        provider
            .photos
            .lock()
            .unwrap()
            .insert("a".to_string(), "https://img.test/a.jpg".to_string());
        let provider = Arc::new(provider);
        let store = store(provider.clone());
        let mut events = store.subscribe().await;

        let snapshot = store.load().await.unwrap();
        assert_eq!(snapshot.items.len(), 4);

        let mut resolved = HashMap::new();
        for _ in 0..3 {
            let CatalogEvent::CoverResolved { pack_id, url } = events.recv().await.unwrap();
            resolved.insert(pack_id, url);
        }
        assert_eq!(resolved["a"].as_deref(), Some("https://img.test/a.jpg"));
        assert_eq!(resolved["broken"], None);
        assert_eq!(resolved["c"], None);
        assert_eq!(provider.photo_lookups.load(Ordering::SeqCst), 3);

        let covers = store.covers(&snapshot.items).await;
        assert_eq!(
            covers,
            vec![
                Cover::Found("https://img.test/a.jpg".to_string()),
                Cover::Missing,
                Cover::Missing,
                Cover::Found("https://img.test/d.jpg".to_string()),
            ]
        );
        assert_eq!(store.resolve_covers(&snapshot).await, 0);
    }
}
