//! Decides when each result's cover image should start loading.
//!
//! The first `priority_count` positions load eagerly at high priority, no
//! matter where they are on screen. Everything else waits for an
//! intersection signal and then loads at normal priority. Each entry is a
//! small state machine so the rules can be exercised without a terminal.

use std::collections::HashMap;

use crate::backend::images::Priority;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Cover URL not known yet.
    AwaitingUrl { intersecting: bool },
    /// Waiting to come near the viewport.
    Observing { url: String },
    Requested { url: String, priority: Priority },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadRequest {
    pub pack_id: String,
    pub url: String,
    pub priority: Priority,
}

#[derive(Debug, Clone)]
struct Entry {
    position: usize,
    state: EntryState,
}

#[derive(Debug, Clone)]
pub struct PreloadPlanner {
    priority_count: usize,
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl PreloadPlanner {
    pub fn new(priority_count: usize) -> Self {
        Self {
            priority_count,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn is_priority(&self, position: usize) -> bool {
        position < self.priority_count
    }

    /// Starts tracking a fresh result list, `(pack id, cover url)` in display
    /// order. Returns the loads to start right away.
    pub fn reset<I>(&mut self, items: I) -> Vec<PreloadRequest>
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        self.entries.clear();
        self.order.clear();

        let mut requests = Vec::new();
        for (position, (pack_id, url)) in items.into_iter().enumerate() {
            let state = match url {
                Some(url) if self.is_priority(position) => {
                    requests.push(PreloadRequest {
                        pack_id: pack_id.clone(),
                        url: url.clone(),
                        priority: Priority::High,
                    });
                    EntryState::Requested {
                        url,
                        priority: Priority::High,
                    }
                }
                Some(url) => EntryState::Observing { url },
                None => EntryState::AwaitingUrl {
                    intersecting: false,
                },
            };
            self.order.push(pack_id.clone());
            self.entries.insert(pack_id, Entry { position, state });
        }
        requests
    }

    /// Intersection signal for one entry.
    pub fn on_intersection(&mut self, pack_id: &str, intersecting: bool) -> Option<PreloadRequest> {
        let entry = self.entries.get_mut(pack_id)?;
        match &mut entry.state {
            EntryState::AwaitingUrl { intersecting: seen } => {
                *seen = intersecting;
                None
            }
            EntryState::Observing { url } if intersecting => {
                let url = std::mem::take(url);
                entry.state = EntryState::Requested {
                    url: url.clone(),
                    priority: Priority::Normal,
                };
                Some(PreloadRequest {
                    pack_id: pack_id.to_string(),
                    url,
                    priority: Priority::Normal,
                })
            }
            _ => None,
        }
    }

    /// A cover URL arrived for an entry that had none.
    pub fn url_resolved(&mut self, pack_id: &str, url: &str) -> Option<PreloadRequest> {
        let priority_count = self.priority_count;
        let entry = self.entries.get_mut(pack_id)?;
        let EntryState::AwaitingUrl { intersecting } = entry.state else {
            return None;
        };

        let priority = if entry.position < priority_count {
            Priority::High
        } else if intersecting {
            Priority::Normal
        } else {
            entry.state = EntryState::Observing {
                url: url.to_string(),
            };
            return None;
        };

        entry.state = EntryState::Requested {
            url: url.to_string(),
            priority,
        };
        Some(PreloadRequest {
            pack_id: pack_id.to_string(),
            url: url.to_string(),
            priority,
        })
    }

    /// Runs the intersection test over every still-waiting entry.
    pub fn observe<F>(&mut self, mut is_near: F) -> Vec<PreloadRequest>
    where
        F: FnMut(usize) -> bool,
    {
        let waiting: Vec<(String, usize)> = self
            .order
            .iter()
            .filter_map(|id| {
                let entry = self.entries.get(id)?;
                match entry.state {
                    EntryState::Requested { .. } => None,
                    _ => Some((id.clone(), entry.position)),
                }
            })
            .collect();

        waiting
            .into_iter()
            .filter_map(|(id, position)| self.on_intersection(&id, is_near(position)))
            .collect()
    }

    /// Stops observing. Entries that never got requested are dropped; returns
    /// how many were released.
    pub fn disconnect(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| matches!(entry.state, EntryState::Requested { .. }));
        let kept = &self.entries;
        self.order.retain(|id| kept.contains_key(id));
        before - self.entries.len()
    }

    #[cfg(test)]
    pub fn state(&self, pack_id: &str) -> Option<&EntryState> {
        self.entries.get(pack_id).map(|entry| &entry.state)
    }

    #[cfg(test)]
    pub fn observing(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| !matches!(entry.state, EntryState::Requested { .. }))
            .count()
    }
}
