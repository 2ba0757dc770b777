//! Pagination utilities.

use serde::{Deserialize, Serialize};

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page number (0-indexed).
    pub index: usize,

    /// Items per page, at least 1.
    pub size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { index: 0, size: 20 }
    }
}

impl PageRequest {
    /// Build a request from caller input, clamping a negative index to 0 and
    /// a non-positive size to 1.
    pub fn new(index: i64, size: i64) -> Self {
        Self {
            index: usize::try_from(index).unwrap_or(0),
            size: usize::try_from(size).unwrap_or(0).max(1),
        }
    }

    /// Rows to skip.
    pub fn offset(&self) -> usize {
        self.index.saturating_mul(self.size)
    }

    /// Rows to take.
    pub fn limit(&self) -> usize {
        self.size
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items in this page.
    pub items: Vec<T>,

    /// Number of rows matching the query across all pages.
    pub total: usize,

    /// Page number (0-indexed).
    pub index: usize,

    /// Requested page size.
    pub size: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: usize) -> Self {
        Self {
            items,
            total,
            index: request.index,
            size: request.size,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.size.max(1))
    }

    pub fn has_next(&self) -> bool {
        self.index + 1 < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.index > 0
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Map items to a different type.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            index: self.index,
            size: self.size,
        }
    }
}
