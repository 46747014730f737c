use async_trait::async_trait;
use serde::Deserialize;

use super::catalog::RawPackRecord;
use crate::error::{PhotoResolutionError, ProviderError};

/// Remote source of pack records and their photos.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// All packs, newest first.
    async fn fetch_packs(&self) -> Result<Vec<RawPackRecord>, ProviderError>;

    /// URL of the first photo attached to a pack, if it has any.
    async fn photos_for(&self, pack_id: &str) -> Result<Option<String>, PhotoResolutionError>;
}

#[derive(Debug, Deserialize)]
struct PhotoRow {
    url: Option<String>,
}

pub struct HttpCatalogProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

fn build_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(concat!("pinpack/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ProviderError::from)
}

impl HttpCatalogProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url).header("Accept", "application/json");
        match &self.api_key {
            Some(key) => request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    fn photos_url(&self, pack_id: &str) -> String {
        format!(
            "{}/pack_photos?select=url&pack_id=eq.{}&limit=1",
            self.base_url,
            urlencoding::encode(pack_id)
        )
    }
}

#[async_trait]
impl CatalogProvider for HttpCatalogProvider {
    async fn fetch_packs(&self) -> Result<Vec<RawPackRecord>, ProviderError> {
        let url = format!("{}/packs?select=*&order=created_at.desc", self.base_url);

        let response = self.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let records: Vec<RawPackRecord> = response.json().await?;
        Ok(records)
    }

    async fn photos_for(&self, pack_id: &str) -> Result<Option<String>, PhotoResolutionError> {
        let fail = |reason: String| PhotoResolutionError {
            pack_id: pack_id.to_string(),
            reason,
        };

        let response = self
            .get(&self.photos_url(pack_id))
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fail(format!("status {}", response.status().as_u16())));
        }

        let rows: Vec<PhotoRow> = response.json().await.map_err(|e| fail(e.to_string()))?;
        Ok(rows
            .into_iter()
            .find_map(|row| row.url)
            .filter(|url| !url.is_empty()))
    }
}
