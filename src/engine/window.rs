//! Grid virtualization: which rows of a uniform card grid need to exist for a
//! given scroll position.
//!
//! Every query is constant time in the number of items; nothing here looks at
//! the items themselves, only at their count and geometry.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub item_height: f64,
    pub gap: f64,
    pub column_count: usize,
    pub buffer_rows: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            item_height: 240.0,
            gap: 24.0,
            column_count: 4,
            buffer_rows: 2,
        }
    }
}

/// Materialized slice of the grid. Indices are half-open: `start_index..end_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowRange {
    pub start_row: usize,
    pub end_row: usize,
    pub start_index: usize,
    pub end_index: usize,
}

impl WindowRange {
    pub fn is_empty(&self) -> bool {
        self.start_index == self.end_index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attachment {
    Attached,
    Detached,
}

#[derive(Debug, Clone)]
pub struct Windower {
    geometry: Geometry,
    item_count: usize,
    scroll_offset: f64,
    container_height: f64,
    attachment: Attachment,
}

/// Number of columns that fit `width`, never less than one.
pub fn columns_for_width(width: f64, min_item_width: f64, gap: f64) -> usize {
    if min_item_width <= 0.0 || width <= min_item_width {
        return 1;
    }
    (((width + gap) / (min_item_width + gap)).floor() as usize).max(1)
}

impl Windower {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry: Geometry {
                column_count: geometry.column_count.max(1),
                ..geometry
            },
            item_count: 0,
            scroll_offset: 0.0,
            container_height: 0.0,
            attachment: Attachment::Attached,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn row_height(&self) -> f64 {
        self.geometry.item_height + self.geometry.gap
    }

    pub fn total_rows(&self) -> usize {
        self.item_count.div_ceil(self.geometry.column_count)
    }

    pub fn total_height(&self) -> f64 {
        self.total_rows() as f64 * self.row_height()
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    pub fn container_height(&self) -> f64 {
        self.container_height
    }

    pub fn is_attached(&self) -> bool {
        self.attachment == Attachment::Attached
    }

    fn max_scroll(&self) -> f64 {
        (self.total_height() - self.container_height).max(0.0)
    }

    pub fn set_scroll_offset(&mut self, offset: f64) {
        self.scroll_offset = if offset.is_finite() {
            offset.clamp(0.0, self.max_scroll())
        } else {
            0.0
        };
    }

    pub fn set_container_height(&mut self, height: f64) {
        self.container_height = height.max(0.0);
        self.set_scroll_offset(self.scroll_offset);
    }

    pub fn set_column_count(&mut self, columns: usize) {
        self.geometry.column_count = columns.max(1);
        self.set_scroll_offset(self.scroll_offset);
    }

    /// New result list: the count changes and the view returns to the top.
    pub fn set_item_count(&mut self, count: usize) {
        self.item_count = count;
        self.scroll_offset = 0.0;
    }

    pub fn detach(&mut self) {
        self.attachment = Attachment::Detached;
    }

    pub fn attach(&mut self) {
        self.attachment = Attachment::Attached;
    }

    pub fn window(&self) -> WindowRange {
        let row_height = self.row_height();
        if !self.is_attached() || self.item_count == 0 || row_height <= 0.0 {
            return WindowRange::default();
        }

        let total_rows = self.total_rows();
        let buffer = self.geometry.buffer_rows;
        let first_visible = (self.scroll_offset / row_height).floor() as usize;
        let last_visible =
            ((self.scroll_offset + self.container_height) / row_height).ceil() as usize;

        let start_row = first_visible.saturating_sub(buffer).min(total_rows);
        let end_row = (last_visible + buffer).min(total_rows);
        let columns = self.geometry.column_count;

        WindowRange {
            start_row,
            end_row,
            start_index: (start_row * columns).min(self.item_count),
            end_index: (end_row * columns).min(self.item_count),
        }
    }

    /// Height of the unrendered rows above the window.
    pub fn offset_top(&self) -> f64 {
        self.window().start_row as f64 * self.row_height()
    }

    /// Height of the unrendered rows below the window.
    pub fn offset_bottom(&self) -> f64 {
        let window = self.window();
        self.total_rows().saturating_sub(window.end_row) as f64 * self.row_height()
    }

    pub fn row_of(&self, index: usize) -> usize {
        index / self.geometry.column_count
    }

    /// First row whose top edge is inside the viewport.
    pub fn first_full_row(&self) -> usize {
        let row_height = self.row_height();
        if row_height <= 0.0 {
            return 0;
        }
        let row = (self.scroll_offset / row_height).ceil() as usize;
        row.min(self.total_rows().saturating_sub(1))
    }

    /// Whether item `index` overlaps the viewport grown by `margin` on both edges.
    pub fn is_near_viewport(&self, index: usize, margin: f64) -> bool {
        if !self.is_attached() || index >= self.item_count {
            return false;
        }
        let top = self.row_of(index) as f64 * self.row_height();
        let bottom = top + self.geometry.item_height;
        top < self.scroll_offset + self.container_height + margin
            && bottom > self.scroll_offset - margin
    }

    /// Smallest scroll change that brings item `index` fully into view.
    pub fn scroll_to_index(&mut self, index: usize) {
        if self.item_count == 0 {
            return;
        }
        let index = index.min(self.item_count - 1);
        let top = self.row_of(index) as f64 * self.row_height();
        let bottom = top + self.geometry.item_height;

        if top < self.scroll_offset {
            self.set_scroll_offset(top);
        } else if bottom > self.scroll_offset + self.container_height {
            self.set_scroll_offset(bottom - self.container_height);
        }
    }
}
