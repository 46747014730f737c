use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, error, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::debounce::Debouncer;
use super::filter::{self, CategoryFilter, FilterCriteria, PinBucket, RatingFloor, SortKey};
use super::preload::{PreloadPlanner, PreloadRequest};
use super::suggest::{self, Suggestion};
use super::window::{Geometry, WindowRange, Windower};
use crate::backend::cache::{CatalogEvent, CatalogStore, Cover};
use crate::backend::catalog::CatalogItem;
use crate::backend::wishlist::Wishlist;
use crate::config::Config;
use crate::error::{ProviderError, WishlistError};

#[derive(Debug, Clone, PartialEq)]
pub enum CriteriaChange {
    Category(CategoryFilter),
    RatingFloor(RatingFloor),
    PinBucket(PinBucket),
    Sort(SortKey),
    /// Immediate search, skipping the debounce (e.g. a picked suggestion).
    Search(String),
    Reset,
}

/// Everything the renderer needs for one frame.
#[derive(Debug)]
pub struct ViewModel<'a> {
    pub visible_items: &'a [CatalogItem],
    pub window: WindowRange,
    pub is_loading: bool,
    pub error: Option<&'a ProviderError>,
    pub wishlist_ids: HashSet<String>,
}

/// Wires the catalog store, filter engine, debouncer, windower, preload
/// planner and wishlist into the one surface the UI talks to.
pub struct CatalogSession {
    store: CatalogStore,
    wishlist: Wishlist,
    criteria: FilterCriteria,
    search_input: String,
    debouncer: Debouncer<String>,
    search_delay: Duration,
    windower: Windower,
    planner: PreloadPlanner,
    intersection_margin: f64,
    suggestion_limit: usize,
    placeholder_url: String,
    results: Arc<[CatalogItem]>,
    suggestions: Vec<Suggestion>,
    pending_preloads: Vec<PreloadRequest>,
    is_loading: bool,
    error: Option<ProviderError>,
}

impl CatalogSession {
    pub fn new(store: CatalogStore, wishlist: Wishlist, config: &Config) -> Self {
        let geometry = Geometry {
            item_height: config.item_height,
            gap: config.gap,
            column_count: 1,
            buffer_rows: config.buffer_rows,
        };
        Self {
            store,
            wishlist,
            criteria: FilterCriteria::default(),
            search_input: String::new(),
            debouncer: Debouncer::new(),
            search_delay: config.search_debounce(),
            windower: Windower::new(geometry),
            planner: PreloadPlanner::new(config.priority_count),
            intersection_margin: config.intersection_margin,
            suggestion_limit: config.suggestion_limit,
            placeholder_url: config.placeholder_url.clone(),
            results: Arc::from(Vec::new()),
            suggestions: Vec::new(),
            pending_preloads: Vec::new(),
            is_loading: false,
            error: None,
        }
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn search_input(&self) -> &str {
        &self.search_input
    }

    pub fn results(&self) -> &[CatalogItem] {
        &self.results
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn windower(&self) -> &Windower {
        &self.windower
    }

    pub fn wishlist(&self) -> &Wishlist {
        &self.wishlist
    }

    pub fn error(&self) -> Option<&ProviderError> {
        self.error.as_ref()
    }

    /// Reads the wishlist and marks the session loading. The returned fetch
    /// runs off the UI loop; hand its outcome to `finish_load`.
    pub fn start(&mut self) -> BoxFuture<'static, Result<(), ProviderError>> {
        self.wishlist.load();
        self.windower.attach();
        self.begin_load(false)
    }

    /// User-triggered refetch, e.g. after a failed load.
    pub fn retry(&mut self) -> BoxFuture<'static, Result<(), ProviderError>> {
        self.begin_load(true)
    }

    fn begin_load(&mut self, refresh: bool) -> BoxFuture<'static, Result<(), ProviderError>> {
        self.is_loading = true;
        let store = self.store.clone();
        async move {
            let snapshot = if refresh {
                store.refresh().await?
            } else {
                store.load().await?
            };
            debug!("catalog v{} ready", snapshot.version);
            Ok::<(), ProviderError>(())
        }
        .boxed()
    }

    /// A catalog failure is kept as the session error for the user to retry.
    pub async fn finish_load(&mut self, outcome: Result<(), ProviderError>) {
        match outcome {
            Ok(()) => {
                self.error = None;
                self.recompute().await;
            }
            Err(e) => {
                error!("catalog load failed: {}", e);
                self.error = Some(e);
            }
        }
        self.is_loading = false;
    }

    async fn recompute(&mut self) {
        let results = match self.store.query(&self.criteria).await {
            Ok(results) => results,
            Err(e) => {
                error!("catalog query failed: {}", e);
                self.error = Some(e);
                return;
            }
        };
        debug!("{} packs match {:?}", results.len(), self.criteria);

        let covers = self.store.covers(&results).await;
        self.results = results;
        self.windower.set_item_count(self.results.len());

        let placeholder = &self.placeholder_url;
        let entries: Vec<(String, Option<String>)> = self
            .results
            .iter()
            .zip(covers)
            .map(|(item, cover)| {
                let url = match cover {
                    Cover::Found(url) => Some(url),
                    Cover::Missing => Some(placeholder.clone()),
                    Cover::Pending => None,
                };
                (item.id.clone(), url)
            })
            .collect();
        let eager = self.planner.reset(entries);
        self.pending_preloads.extend(eager);
        self.observe_viewport();
        self.refresh_suggestions().await;
    }

    async fn refresh_suggestions(&mut self) {
        self.suggestions = match self.store.snapshot().await {
            Some(snapshot) => {
                suggest::suggest(&snapshot.items, &self.criteria.search_term, self.suggestion_limit)
            }
            None => Vec::new(),
        };
    }

    fn observe_viewport(&mut self) {
        let windower = &self.windower;
        let margin = self.intersection_margin;
        let requests = self
            .planner
            .observe(|position| windower.is_near_viewport(position, margin));
        self.pending_preloads.extend(requests);
    }

    /// Scroll events recompute the window synchronously.
    pub fn on_scroll(&mut self, offset: f64) {
        self.windower.set_scroll_offset(offset);
        self.observe_viewport();
    }

    pub fn on_resize(&mut self, container_height: f64, column_count: usize) {
        self.windower.set_container_height(container_height);
        self.windower.set_column_count(column_count);
        self.observe_viewport();
    }

    /// Keeps item `index` on screen, for keyboard navigation.
    pub fn reveal(&mut self, index: usize) {
        self.windower.scroll_to_index(index);
        self.observe_viewport();
    }

    /// Records typed text; it reaches the filter once typing pauses.
    pub fn on_search_input(&mut self, text: &str, now: Instant) {
        self.search_input = text.to_string();
        self.debouncer.submit(text.to_string(), self.search_delay, now);
    }

    pub fn search_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Typed text is still waiting for the debounce.
    pub fn is_search_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Applies the typed text now instead of waiting for the pause.
    pub async fn submit_search(&mut self) -> bool {
        let term = self
            .debouncer
            .flush()
            .unwrap_or_else(|| self.search_input.clone());
        self.apply_search(term).await
    }

    /// Applies the debounced search term if it is due. Returns whether the
    /// results changed.
    pub async fn poll_search(&mut self, now: Instant) -> bool {
        match self.debouncer.poll(now) {
            Some(term) => self.apply_search(term).await,
            None => false,
        }
    }

    async fn apply_search(&mut self, term: String) -> bool {
        if term == self.criteria.search_term {
            return false;
        }
        self.criteria.search_term = term;
        self.recompute().await;
        true
    }

    pub async fn on_criteria_change(&mut self, change: CriteriaChange) {
        match change {
            CriteriaChange::Category(category) => self.criteria.category = category,
            CriteriaChange::RatingFloor(floor) => self.criteria.star_rating_floor = floor,
            CriteriaChange::PinBucket(bucket) => self.criteria.pin_count_bucket = bucket,
            CriteriaChange::Sort(key) => self.criteria.sort_key = key,
            CriteriaChange::Search(term) => {
                self.debouncer.cancel();
                self.search_input = term.clone();
                self.criteria.search_term = term;
            }
            CriteriaChange::Reset => {
                self.debouncer.cancel();
                self.search_input.clear();
                self.criteria = FilterCriteria::default();
            }
        }
        self.recompute().await;
    }

    /// Returns `None` when the pack is neither in the results nor saved.
    pub fn on_wishlist_toggle(&mut self, pack_id: &str) -> Result<Option<bool>, WishlistError> {
        if let Some(item) = self.results.iter().find(|item| item.id == pack_id) {
            return self.wishlist.toggle(item).map(Some);
        }
        // Saved but filtered out, or only known from storage.
        match self.wishlist.entry(pack_id).cloned() {
            Some(entry) => self.wishlist.toggle_entry(entry).map(Some),
            None => Ok(None),
        }
    }

    pub fn on_catalog_event(&mut self, event: CatalogEvent) {
        match event {
            CatalogEvent::CoverResolved { pack_id, url } => {
                self.on_cover_resolved(&pack_id, url.as_deref())
            }
        }
    }

    /// A cover lookup finished after the results were built. Packs without a
    /// photo get the placeholder.
    pub fn on_cover_resolved(&mut self, pack_id: &str, url: Option<&str>) {
        let url = url.unwrap_or(self.placeholder_url.as_str());
        if let Some(request) = self.planner.url_resolved(pack_id, url) {
            self.pending_preloads.push(request);
        }
        self.observe_viewport();
    }

    pub fn take_preload_requests(&mut self) -> Vec<PreloadRequest> {
        std::mem::take(&mut self.pending_preloads)
    }

    /// Categories present in the current snapshot.
    pub async fn categories(&self) -> Vec<String> {
        match self.store.snapshot().await {
            Some(snapshot) => filter::categories(&snapshot.items),
            None => Vec::new(),
        }
    }

    pub fn view(&self) -> ViewModel<'_> {
        let window = self.windower.window();
        let visible_items = self
            .results
            .get(window.start_index..window.end_index)
            .unwrap_or(&[]);
        ViewModel {
            visible_items,
            window,
            is_loading: self.is_loading,
            error: self.error.as_ref(),
            wishlist_ids: self.wishlist.ids(),
        }
    }

    /// Teardown: stop observing the viewport and drop queued loads.
    pub fn disconnect(&mut self) {
        self.windower.detach();
        let released = self.planner.disconnect();
        self.pending_preloads.clear();
        info!("session disconnected, released {} observers", released);
    }
}
