use std::collections::HashMap;

use crate::backend::catalog::CatalogItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuggestionKind {
    Location,
    Title,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    /// Text to put in the search box. Locations use "City, Country" so the
    /// comma search kicks in.
    pub text: String,
}

struct Candidate {
    text: String,
    prefix: bool,
    downloads: u64,
}

/// Locations and titles from the snapshot that contain `term`.
///
/// Prefix matches come first, then the most downloaded, then alphabetical.
pub fn suggest(items: &[CatalogItem], term: &str, limit: usize) -> Vec<Suggestion> {
    let term = term.trim().to_lowercase();
    if term.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut candidates: HashMap<(SuggestionKind, String), Candidate> = HashMap::new();
    let mut consider = |kind: SuggestionKind, text: String, downloads: u64| {
        let lowered = text.to_lowercase();
        let Some(pos) = lowered.find(&term) else {
            return;
        };
        let entry = candidates
            .entry((kind, lowered))
            .or_insert_with(|| Candidate {
                text,
                prefix: pos == 0,
                downloads: 0,
            });
        entry.downloads += downloads;
    };

    for item in items {
        consider(SuggestionKind::Location, item.location(), item.download_count);
        consider(SuggestionKind::Title, item.title.clone(), item.download_count);
    }

    let mut ranked: Vec<(SuggestionKind, Candidate)> = candidates
        .into_iter()
        .map(|((kind, _), candidate)| (kind, candidate))
        .collect();
    ranked.sort_by(|(_, a), (_, b)| {
        b.prefix
            .cmp(&a.prefix)
            .then_with(|| b.downloads.cmp(&a.downloads))
            .then_with(|| a.text.cmp(&b.text))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(kind, candidate)| Suggestion {
            kind,
            text: candidate.text,
        })
        .collect()
}
