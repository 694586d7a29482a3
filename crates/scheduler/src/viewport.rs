//! Viewport relevance tracking
//!
//! Decides which pages deserve render work. Pages on screen are rendered at
//! [`JobPriority::Visible`], pages within the prefetch margin at
//! [`JobPriority::Adjacent`]; everything else is irrelevant and its pending
//! renders should be cancelled. A completed render is applied only if its page
//! is still relevant when the completion arrives.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::priority::JobPriority;

#[derive(Debug, Clone)]
pub struct VisiblePages {
    page_count: usize,
    visible: Range<usize>,
    /// Pages on either side of the visible range that are prefetched
    margin: usize,
}

impl VisiblePages {
    pub fn new(page_count: usize) -> Self {
        Self { page_count, visible: 0..0, margin: 1 }
    }

    pub fn with_margin(mut self, margin: usize) -> Self {
        self.margin = margin;
        self
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Update the page count after pages were deleted, keeping the visible
    /// range inside the document.
    pub fn set_page_count(&mut self, page_count: usize) -> Vec<usize> {
        let before = self.relevant_pages();
        let was_showing = !self.visible.is_empty();
        self.page_count = page_count;
        self.visible = self.visible.start.min(page_count)..self.visible.end.min(page_count);
        if was_showing && self.visible.is_empty() && page_count > 0 {
            self.visible = page_count - 1..page_count;
        }
        let after = self.relevant_pages();
        before.difference(&after).copied().collect()
    }

    /// Set the pages currently on screen. Returns the pages that stopped being
    /// relevant, in ascending order.
    pub fn update(&mut self, visible: Range<usize>) -> Vec<usize> {
        let before = self.relevant_pages();
        let end = visible.end.min(self.page_count);
        self.visible = visible.start.min(end)..end;
        let after = self.relevant_pages();
        before.difference(&after).copied().collect()
    }

    pub fn is_visible(&self, page_index: usize) -> bool {
        self.visible.contains(&page_index)
    }

    /// Visible or within the prefetch margin
    pub fn is_relevant(&self, page_index: usize) -> bool {
        self.priority_for(page_index).is_some()
    }

    /// Render priority for a page, `None` when it should not be rendered
    pub fn priority_for(&self, page_index: usize) -> Option<JobPriority> {
        if page_index >= self.page_count || self.visible.is_empty() {
            return None;
        }
        if self.is_visible(page_index) {
            return Some(JobPriority::Visible);
        }

        let start = self.visible.start.saturating_sub(self.margin);
        let end = self.visible.end.saturating_add(self.margin);
        (start..end).contains(&page_index).then_some(JobPriority::Adjacent)
    }

    pub fn relevant_pages(&self) -> BTreeSet<usize> {
        if self.visible.is_empty() {
            return BTreeSet::new();
        }
        let start = self.visible.start.saturating_sub(self.margin);
        let end = self.visible.end.saturating_add(self.margin).min(self.page_count);
        (start..end).collect()
    }
}
