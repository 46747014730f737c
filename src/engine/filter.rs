//! Search, filtering and ordering of a catalog snapshot.
//!
//! `apply` is a pure function of the items and the criteria. Filters run in a
//! fixed order (search, category, rating floor, pin bucket) and are
//! conjunctive; the final sort is stable so equal keys keep catalog order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::catalog::CatalogItem;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryFilter {
    #[default]
    All,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingFloor {
    #[default]
    All,
    AtLeast(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinBucket {
    #[default]
    All,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Newest,
    Oldest,
    Rating,
    Downloaded,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub search_term: String,
    pub category: CategoryFilter,
    pub star_rating_floor: RatingFloor,
    pub pin_count_bucket: PinBucket,
    pub sort_key: SortKey,
}

impl FilterCriteria {
    /// Stable textual form used as part of the result cache key.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl PinBucket {
    pub const CYCLE: [PinBucket; 4] = [
        PinBucket::All,
        PinBucket::Small,
        PinBucket::Medium,
        PinBucket::Large,
    ];

    pub fn contains(self, pin_count: u32) -> bool {
        match self {
            PinBucket::All => true,
            PinBucket::Small => pin_count <= 5,
            PinBucket::Medium => (6..=15).contains(&pin_count),
            PinBucket::Large => pin_count >= 16,
        }
    }

    pub fn next(self) -> Self {
        let pos = Self::CYCLE.iter().position(|b| *b == self).unwrap_or(0);
        Self::CYCLE[(pos + 1) % Self::CYCLE.len()]
    }
}

impl SortKey {
    pub fn next(self) -> Self {
        match self {
            SortKey::Newest => SortKey::Oldest,
            SortKey::Oldest => SortKey::Rating,
            SortKey::Rating => SortKey::Downloaded,
            SortKey::Downloaded => SortKey::Newest,
        }
    }
}

impl RatingFloor {
    /// Steps through All, 3+, 3.5+, 4+, 4.5+ and back to All.
    pub fn next(self) -> Self {
        match self {
            RatingFloor::All => RatingFloor::AtLeast(3.0),
            RatingFloor::AtLeast(floor) if floor < 4.5 => RatingFloor::AtLeast(floor + 0.5),
            RatingFloor::AtLeast(_) => RatingFloor::All,
        }
    }
}

impl From<&str> for CategoryFilter {
    fn from(s: &str) -> Self {
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            CategoryFilter::All
        } else {
            CategoryFilter::Named(s.to_string())
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryFilter::All => write!(f, "all"),
            CategoryFilter::Named(name) => write!(f, "{}", name),
        }
    }
}

impl fmt::Display for RatingFloor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatingFloor::All => write!(f, "all"),
            RatingFloor::AtLeast(floor) => write!(f, "{:.1}+", floor),
        }
    }
}

impl fmt::Display for PinBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PinBucket::All => "all",
            PinBucket::Small => "small (0-5)",
            PinBucket::Medium => "medium (6-15)",
            PinBucket::Large => "large (16+)",
        };
        f.write_str(label)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SortKey::Newest => "newest",
            SortKey::Oldest => "oldest",
            SortKey::Rating => "rating",
            SortKey::Downloaded => "downloaded",
        };
        f.write_str(label)
    }
}

/// Stand-in rating for packs nobody has rated yet, so rating filters and
/// sorting still place them. Always lands in 3.50..=3.99.
pub fn fallback_rating(download_count: u64) -> f64 {
    ((download_count % 50) + 350) as f64 / 100.0
}

pub fn effective_rating(item: &CatalogItem) -> f64 {
    match item.average_rating {
        Some(rating) if rating > 0.0 => rating,
        _ => fallback_rating(item.download_count),
    }
}

/// Case-insensitive containment in either direction, so "DE" and "Deutschland"
/// style abbreviations still line up.
fn loosely_matches(field: &str, part: &str) -> bool {
    let field = field.to_lowercase();
    field.contains(part) || part.contains(field.as_str())
}

fn matches_search(item: &CatalogItem, term: &str) -> bool {
    let term = term.trim();
    if term.is_empty() {
        return true;
    }
    let term = term.to_lowercase();

    if let Some((city_part, country_part)) = term.split_once(',') {
        return loosely_matches(&item.city, city_part.trim())
            && loosely_matches(&item.country, country_part.trim());
    }

    [&item.title, &item.description, &item.city, &item.country]
        .iter()
        .any(|field| field.to_lowercase().contains(&term))
}

fn matches_category(item: &CatalogItem, category: &CategoryFilter) -> bool {
    match category {
        CategoryFilter::All => true,
        CategoryFilter::Named(name) => item.has_category(name),
    }
}

fn matches_rating(item: &CatalogItem, floor: RatingFloor) -> bool {
    match floor {
        RatingFloor::All => true,
        RatingFloor::AtLeast(floor) => effective_rating(item) >= floor,
    }
}

pub fn matches(item: &CatalogItem, criteria: &FilterCriteria) -> bool {
    matches_search(item, &criteria.search_term)
        && matches_category(item, &criteria.category)
        && matches_rating(item, criteria.star_rating_floor)
        && criteria.pin_count_bucket.contains(item.pin_count)
}

pub fn sort_items(items: &mut [CatalogItem], key: SortKey) {
    // `sort_by` is stable, ties keep their incoming order.
    match key {
        SortKey::Newest => items.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::Oldest => items.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortKey::Rating => {
            items.sort_by(|a, b| effective_rating(b).total_cmp(&effective_rating(a)))
        }
        SortKey::Downloaded => items.sort_by(|a, b| b.download_count.cmp(&a.download_count)),
    }
}

pub fn apply(items: &[CatalogItem], criteria: &FilterCriteria) -> Vec<CatalogItem> {
    let mut result: Vec<CatalogItem> = items
        .iter()
        .filter(|item| matches(item, criteria))
        .cloned()
        .collect();
    sort_items(&mut result, criteria.sort_key);
    result
}

/// Every distinct category in the snapshot, alphabetically.
pub fn categories(items: &[CatalogItem]) -> Vec<String> {
    let mut all: Vec<String> = items
        .iter()
        .flat_map(|item| item.categories.iter().cloned())
        .collect();
    all.sort();
    all.dedup();
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::catalog::tests::item;
    use chrono::{Duration, TimeZone, Utc};

    fn pack(id: &str, city: &str, country: &str) -> CatalogItem {
        let mut pack = item(id);
        pack.city = city.to_string();
        pack.country = country.to_string();
        pack
    }

    fn ids(items: &[CatalogItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    fn search(term: &str) -> FilterCriteria {
        FilterCriteria {
            search_term: term.to_string(),
            ..FilterCriteria::default()
        }
    }

    #[test]
    fn comma_search_matches_city_and_country() {
        let items = vec![
            pack("a", "Berlin", "Germany"),
            pack("b", "berlin", "Germany"),
            pack("c", "Berlin", "France"),
        ];
        let result = apply(&items, &search("Berlin, Germany"));
        assert_eq!(ids(&result), ["a", "b"]);
    }

    #[test]
    fn comma_search_tolerates_abbreviation_both_ways() {
        let items = vec![pack("a", "New York", "USA"), pack("b", "York", "UK")];
        assert_eq!(ids(&apply(&items, &search("New York City, USA"))), ["a"]);
        assert_eq!(ids(&apply(&items, &search("york, us"))), ["a"]);
    }

    #[test]
    fn plain_search_checks_text_fields() {
        let mut by_title = pack("a", "Lisbon", "Portugal");
        by_title.title = "Tram 28 Cafés".to_string();
        let mut by_description = pack("b", "Oslo", "Norway");
        by_description.description = "Best cafés near the fjord".to_string();
        let other = pack("c", "Rome", "Italy");

        let items = vec![by_title, by_description, other];
        assert_eq!(ids(&apply(&items, &search("CAFÉS"))), ["a", "b"]);
        assert_eq!(ids(&apply(&items, &search("norway"))), ["b"]);
        assert_eq!(ids(&apply(&items, &search("   "))), ["a", "b", "c"]);
    }

    #[test]
    fn category_filter_requires_membership() {
        let mut nightlife = item("b");
        nightlife.categories = vec!["nightlife".to_string()];
        let items = vec![item("a"), nightlife];

        let criteria = FilterCriteria {
            category: CategoryFilter::from("nightlife"),
            ..FilterCriteria::default()
        };
        assert_eq!(ids(&apply(&items, &criteria)), ["b"]);
        assert_eq!(CategoryFilter::from("all"), CategoryFilter::All);
    }

    #[test]
    fn bucket_boundaries_are_inclusive() {
        assert!(PinBucket::Small.contains(0));
        assert!(PinBucket::Small.contains(5));
        assert!(!PinBucket::Small.contains(6));
        assert!(PinBucket::Medium.contains(6));
        assert!(PinBucket::Medium.contains(15));
        assert!(!PinBucket::Medium.contains(16));
        assert!(PinBucket::Large.contains(16));
        assert!(PinBucket::All.contains(1000));
    }

    #[test]
    fn rating_floor_uses_fallback_for_unrated_packs() {
        let mut rated = item("a");
        rated.average_rating = Some(4.6);
        let mut unrated = item("b");
        unrated.download_count = 49;
        let mut zero = item("c");
        zero.average_rating = Some(0.0);
        zero.download_count = 0;

        assert_eq!(fallback_rating(49), 3.99);
        assert_eq!(fallback_rating(100), 3.5);
        assert_eq!(effective_rating(&zero), 3.5);

        let items = vec![rated, unrated, zero];
        let floor = |f: f64| FilterCriteria {
            star_rating_floor: RatingFloor::AtLeast(f),
            ..FilterCriteria::default()
        };
        assert_eq!(ids(&apply(&items, &floor(3.9))), ["a", "b"]);
        assert_eq!(ids(&apply(&items, &floor(4.5))), ["a"]);
    }

    #[test]
    fn sorts_by_each_key() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut items = Vec::new();
        for (i, (days, downloads, rating)) in [(1, 10, 4.0), (3, 30, 4.8), (2, 20, 3.0)]
            .into_iter()
            .enumerate()
        {
            let mut pack = item(&i.to_string());
            pack.created_at = base + Duration::days(days);
            pack.download_count = downloads;
            pack.average_rating = Some(rating);
            items.push(pack);
        }

        let sorted = |key| {
            let criteria = FilterCriteria {
                sort_key: key,
                ..FilterCriteria::default()
            };
            ids(&apply(&items, &criteria))
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        assert_eq!(sorted(SortKey::Newest), ["1", "2", "0"]);
        assert_eq!(sorted(SortKey::Oldest), ["0", "2", "1"]);
        assert_eq!(sorted(SortKey::Rating), ["1", "0", "2"]);
        assert_eq!(sorted(SortKey::Downloaded), ["1", "2", "0"]);
    }

    #[test]
    fn equal_keys_keep_prior_order() {
        let items: Vec<CatalogItem> = ["d", "a", "c", "b"].iter().map(|id| item(id)).collect();
        for key in [
            SortKey::Newest,
            SortKey::Oldest,
            SortKey::Rating,
            SortKey::Downloaded,
        ] {
            let criteria = FilterCriteria {
                sort_key: key,
                ..FilterCriteria::default()
            };
            assert_eq!(ids(&apply(&items, &criteria)), ["d", "a", "c", "b"]);
        }
    }

    #[test]
    fn apply_is_deterministic() {
        let mut items: Vec<CatalogItem> = (0..20).map(|i| item(&i.to_string())).collect();
        for (i, pack) in items.iter_mut().enumerate() {
            pack.download_count = (i * 7 % 5) as u64;
            pack.pin_count = (i * 3) as u32;
        }
        let criteria = FilterCriteria {
            pin_count_bucket: PinBucket::Large,
            sort_key: SortKey::Rating,
            ..FilterCriteria::default()
        };
        assert_eq!(apply(&items, &criteria), apply(&items, &criteria));
    }

    #[test]
    fn criteria_values_cycle_back_to_start() {
        assert_eq!(PinBucket::Large.next(), PinBucket::All);
        assert_eq!(SortKey::Downloaded.next(), SortKey::Newest);
        assert_eq!(RatingFloor::AtLeast(4.5).next(), RatingFloor::All);
    }

    #[test]
    fn cache_key_differs_per_criteria() {
        let a = FilterCriteria::default();
        let b = FilterCriteria {
            sort_key: SortKey::Oldest,
            ..FilterCriteria::default()
        };
        assert_eq!(a.cache_key(), FilterCriteria::default().cache_key());
        assert_ne!(a.cache_key(), b.cache_key());
    }
}
