use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, Rgba, RgbaImage};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, oneshot};

use crate::error::ImageLoadError;

pub type LoadedImage = Arc<DynamicImage>;
type LoadResult = Result<LoadedImage, ImageLoadError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// First paint: loads immediately and skips the concurrency limit.
    High,
    Normal,
}

/// Load progress of one URL. Only moves forward; `Errored` is final until an
/// explicit `retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLoadState {
    Unrequested,
    Loading,
    Loaded,
    Errored,
}

/// Fetches raw image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageLoadError>;
}

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, ImageLoadError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pinpack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ImageLoadError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageLoadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImageLoadError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ImageLoadError::Status(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageLoadError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

enum Entry {
    Loading(Vec<oneshot::Sender<LoadResult>>),
    Loaded(LoadedImage),
    Errored(ImageLoadError),
}

/// Loads cover images once per URL and shares them.
///
/// Normal-priority loads share a limited number of fetch slots; high-priority
/// loads never wait for one. Callers asking for a URL that is already loading
/// wait on that load rather than starting another.
#[derive(Clone)]
pub struct ImageScheduler {
    fetcher: Arc<dyn ImageFetcher>,
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    slots: Arc<Semaphore>,
    placeholder_url: String,
    placeholder: LoadedImage,
}

fn decode(bytes: &[u8]) -> LoadResult {
    image::load_from_memory(bytes)
        .map(Arc::new)
        .map_err(|e| ImageLoadError::Decode(e.to_string()))
}

fn decode_data_uri(url: &str) -> LoadResult {
    let invalid = |reason: &str| ImageLoadError::InvalidDataUri(reason.to_string());
    let rest = url.strip_prefix("data:").ok_or_else(|| invalid("missing data: prefix"))?;
    let (meta, payload) = rest.split_once(',').ok_or_else(|| invalid("missing payload"))?;
    if !meta.ends_with(";base64") {
        return Err(invalid("only base64 payloads are supported"));
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ImageLoadError::InvalidDataUri(e.to_string()))?;
    decode(&bytes)
}

fn placeholder_image() -> LoadedImage {
    Arc::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        4,
        6,
        Rgba([64, 64, 72, 255]),
    )))
}

impl ImageScheduler {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, max_concurrent: usize, placeholder_url: &str) -> Self {
        Self {
            fetcher,
            inner: Arc::new(Mutex::new(HashMap::new())),
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
            placeholder_url: placeholder_url.to_string(),
            placeholder: placeholder_image(),
        }
    }

    pub fn placeholder(&self) -> LoadedImage {
        self.placeholder.clone()
    }

    pub fn state(&self, url: &str) -> ImageLoadState {
        let Ok(entries) = self.inner.lock() else {
            return ImageLoadState::Unrequested;
        };
        match entries.get(url) {
            None => ImageLoadState::Unrequested,
            Some(Entry::Loading(_)) => ImageLoadState::Loading,
            Some(Entry::Loaded(_)) => ImageLoadState::Loaded,
            Some(Entry::Errored(_)) => ImageLoadState::Errored,
        }
    }

    /// The loaded image, if there is one already.
    pub fn get(&self, url: &str) -> Option<LoadedImage> {
        let entries = self.inner.lock().ok()?;
        match entries.get(url) {
            Some(Entry::Loaded(image)) => Some(image.clone()),
            _ => None,
        }
    }

    /// What to show for `url`: the image, or the placeholder when it failed.
    pub fn display(&self, url: &str) -> Option<LoadedImage> {
        match self.state(url) {
            ImageLoadState::Loaded => self.get(url),
            ImageLoadState::Errored => Some(self.placeholder()),
            _ if url == self.placeholder_url => Some(self.placeholder()),
            _ => None,
        }
    }

    pub async fn request(&self, url: &str, priority: Priority) -> LoadResult {
        self.load(url, priority, false).await
    }

    /// Explicit new attempt for a URL whose previous load failed.
    pub async fn retry(&self, url: &str, priority: Priority) -> LoadResult {
        self.load(url, priority, true).await
    }

    async fn load(&self, url: &str, priority: Priority, retry: bool) -> LoadResult {
        if url == self.placeholder_url {
            return Ok(self.placeholder());
        }

        let waiter = {
            let mut entries = self.lock_entries()?;
            match entries.get_mut(url) {
                Some(Entry::Loaded(image)) => return Ok(image.clone()),
                Some(Entry::Errored(e)) if !retry => {
                    return Err(ImageLoadError::Errored(e.to_string()));
                }
                Some(Entry::Loading(waiters)) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                _ => {
                    if url.starts_with("data:") {
                        let result = decode_data_uri(url);
                        entries.insert(url.to_string(), Self::settled(&result));
                        return result;
                    }
                    entries.insert(url.to_string(), Entry::Loading(Vec::new()));
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return rx
                .await
                .unwrap_or_else(|_| Err(ImageLoadError::Network("load abandoned".to_string())));
        }

        let result = self.fetch(url, priority).await;
        self.finish(url, &result);
        result
    }

    async fn fetch(&self, url: &str, priority: Priority) -> LoadResult {
        let _permit = match priority {
            Priority::High => None,
            Priority::Normal => Some(
                self.slots
                    .acquire()
                    .await
                    .map_err(|e| ImageLoadError::Network(e.to_string()))?,
            ),
        };
        debug!("fetching image {} ({:?})", url, priority);
        let bytes = self.fetcher.fetch(url).await?;
        decode(&bytes)
    }

    fn settled(result: &LoadResult) -> Entry {
        match result {
            Ok(image) => Entry::Loaded(image.clone()),
            Err(e) => Entry::Errored(e.clone()),
        }
    }

    fn finish(&self, url: &str, result: &LoadResult) {
        if let Err(e) = result {
            warn!("image {} failed, using placeholder: {}", url, e);
        }
        let Ok(mut entries) = self.inner.lock() else {
            return;
        };
        if let Some(Entry::Loading(waiters)) = entries.insert(url.to_string(), Self::settled(result)) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    fn lock_entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, ImageLoadError> {
        self.inner
            .lock()
            .map_err(|e| ImageLoadError::Network(e.to_string()))
    }
}
