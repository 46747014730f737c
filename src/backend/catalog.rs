use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_CATEGORIES: usize = 10;

/// A pack as it looked when the catalog was fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub city: String,
    pub country: String,
    pub pin_count: u32,
    pub download_count: u64,
    pub average_rating: Option<f64>,
    pub rating_count: u32,
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Filled from the record when the provider inlines it, otherwise resolved later.
    pub cover_photo_url: Option<String>,
}

impl CatalogItem {
    pub fn location(&self) -> String {
        format!("{}, {}", self.city, self.country)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

/// Pack record as the provider sends it. Nothing is trusted until
/// it passes through `CatalogItem::try_from`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPackRecord {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub city: Option<String>,
    pub country: Option<String>,
    #[serde(alias = "pin_count")]
    pub pin_count: Option<i64>,
    #[serde(alias = "download_count")]
    pub download_count: Option<i64>,
    #[serde(alias = "average_rating")]
    pub average_rating: Option<f64>,
    #[serde(alias = "rating_count")]
    pub rating_count: Option<i64>,
    pub categories: Option<Vec<String>>,
    #[serde(alias = "created_at")]
    pub created_at: Option<String>,
    #[serde(alias = "cover_photo_url")]
    pub cover_photo_url: Option<String>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("missing field `{}`", field))
}

fn normalize_categories(raw: Vec<String>) -> Vec<String> {
    let mut categories: Vec<String> = Vec::new();
    for category in raw {
        let category = category.trim();
        if category.is_empty() || categories.iter().any(|c| c == category) {
            continue;
        }
        categories.push(category.to_string());
        if categories.len() == MAX_CATEGORIES {
            break;
        }
    }
    categories
}

impl TryFrom<RawPackRecord> for CatalogItem {
    type Error = String;

    fn try_from(raw: RawPackRecord) -> Result<Self, Self::Error> {
        let id = required(raw.id, "id")?;
        if id.trim().is_empty() {
            return Err("empty `id`".to_string());
        }

        let price = required(raw.price, "price")?;
        if !price.is_finite() || price < 0.0 {
            return Err(format!("invalid `price` {}", price));
        }

        let pin_count = required(raw.pin_count, "pinCount")?;
        let pin_count =
            u32::try_from(pin_count).map_err(|_| format!("invalid `pinCount` {}", pin_count))?;

        let created_at = required(raw.created_at, "createdAt")?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| format!("invalid `createdAt` {:?}: {}", created_at, e))?
            .with_timezone(&Utc);

        Ok(CatalogItem {
            id,
            title: required(raw.title, "title")?,
            description: raw.description.unwrap_or_default(),
            price,
            city: required(raw.city, "city")?,
            country: required(raw.country, "country")?,
            pin_count,
            download_count: raw.download_count.unwrap_or(0).max(0) as u64,
            average_rating: raw.average_rating.filter(|r| r.is_finite()),
            rating_count: raw.rating_count.unwrap_or(0).clamp(0, u32::MAX as i64) as u32,
            categories: normalize_categories(raw.categories.unwrap_or_default()),
            created_at,
            cover_photo_url: raw.cover_photo_url.filter(|url| !url.is_empty()),
        })
    }
}
