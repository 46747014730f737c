use image::DynamicImage;
use ratatui_image::{picker::Picker, protocol::StatefulProtocol};
use std::collections::HashMap;

use crate::backend::images::ImageScheduler;
use crate::engine::filter::CategoryFilter;
use crate::engine::session::{CatalogSession, CriteriaChange};

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Catalog,
    Wishlist,
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Grid,
    Search,
}

pub struct App {
    pub session: CatalogSession,
    pub images: ImageScheduler,
    pub tab: Tab,
    pub focus: Focus,
    pub selected: usize,
    pub wishlist_selected: usize,
    pub loading_message: String,
    pub status: Option<String>,
    pub categories: Vec<String>,
    pub picker: Option<Picker>,
    pub image_states: HashMap<String, StatefulProtocol>,
    /// Last (height, columns) pushed into the session.
    pub grid_size: Option<(u16, usize)>,
}

impl App {
    pub fn new(session: CatalogSession, images: ImageScheduler) -> Self {
        let picker = Picker::from_query_stdio().ok();

        Self {
            session,
            images,
            tab: Tab::Catalog,
            focus: Focus::Grid,
            selected: 0,
            wishlist_selected: 0,
            loading_message: "Initializing...".to_string(),
            status: None,
            categories: Vec::new(),
            picker,
            image_states: HashMap::new(),
            grid_size: None,
        }
    }

    pub fn set_loading(&mut self, message: &str) {
        self.loading_message = message.to_string();
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
    }

    pub fn add_cover_image(&mut self, pack_id: &str, image: DynamicImage) {
        if let Some(ref picker) = self.picker {
            let protocol = picker.new_resize_protocol(image);
            self.image_states.insert(pack_id.to_string(), protocol);
        }
    }

    /// The pack the current tab has selected.
    pub fn selected_pack_id(&self) -> Option<String> {
        match self.tab {
            Tab::Catalog => self
                .session
                .results()
                .get(self.selected)
                .map(|item| item.id.clone()),
            Tab::Wishlist => self
                .session
                .wishlist()
                .entries()
                .nth(self.wishlist_selected)
                .map(|entry| entry.id.clone()),
        }
    }

    pub fn move_selection(&mut self, delta: isize) {
        match self.tab {
            Tab::Catalog => {
                self.selected = step(self.selected, delta, self.session.results().len());
                self.session.reveal(self.selected);
            }
            // The wishlist is a single column.
            Tab::Wishlist => {
                let len = self.session.wishlist().len();
                self.wishlist_selected = step(self.wishlist_selected, delta.signum(), len);
            }
        }
    }

    /// Scrolls the grid by whole screens and selects the first card that is
    /// fully in view. On the wishlist it jumps to either end.
    pub fn page(&mut self, pages: isize) {
        match self.tab {
            Tab::Catalog => {
                let windower = self.session.windower();
                let offset = windower.scroll_offset() + pages as f64 * windower.container_height();
                self.session.on_scroll(offset);

                let first = self.session.windower().first_full_row() * self.columns();
                self.selected = step(first, 0, self.session.results().len());
            }
            Tab::Wishlist => {
                let len = self.session.wishlist().len();
                self.wishlist_selected = if pages < 0 { 0 } else { len.saturating_sub(1) };
            }
        }
    }

    /// Keeps the wishlist selection on an entry after one is removed.
    pub fn wishlist_changed(&mut self) {
        let len = self.session.wishlist().len();
        self.wishlist_selected = step(self.wishlist_selected, 0, len);
    }

    pub fn columns(&self) -> usize {
        self.session.windower().geometry().column_count
    }

    /// Selection goes back to the top whenever the result list changes.
    pub fn results_changed(&mut self) {
        self.selected = 0;
    }

    pub async fn refresh_categories(&mut self) {
        self.categories = self.session.categories().await;
    }

    /// all -> first category -> ... -> last category -> all
    pub fn next_category(&self) -> CriteriaChange {
        let current = &self.session.criteria().category;
        let next = match current {
            CategoryFilter::All => self.categories.first(),
            CategoryFilter::Named(name) => self
                .categories
                .iter()
                .position(|c| c == name)
                .and_then(|pos| self.categories.get(pos + 1)),
        };
        CriteriaChange::Category(match next {
            Some(name) => CategoryFilter::from(name.as_str()),
            None => CategoryFilter::All,
        })
    }
}

/// Moves `current` by `delta`, staying inside `0..len`.
fn step(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (current as isize + delta).clamp(0, len as isize - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_stays_inside_the_list() {
        assert_eq!(step(0, -1, 5), 0);
        assert_eq!(step(2, 4, 5), 4);
        assert_eq!(step(3, -2, 5), 1);
        assert_eq!(step(7, 0, 3), 2);
        assert_eq!(step(4, 1, 0), 0);
    }
}
