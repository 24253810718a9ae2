//! Pagination contract shared by every paginated query: `page ≥ 1`, `1 ≤ limit ≤ 500`.

use thiserror::Error;

pub const MAX_LIMIT: u32 = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("page must be >= 1, got {0}")]
    InvalidPage(u32),
    #[error("limit must be between 1 and {MAX_LIMIT}, got {0}")]
    InvalidLimit(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Result<Self, PaginationError> {
        if page < 1 {
            return Err(PaginationError::InvalidPage(page));
        }
        if limit < 1 || limit > MAX_LIMIT {
            return Err(PaginationError::InvalidLimit(limit));
        }
        Ok(Self { page, limit })
    }

    pub(crate) fn offset(&self) -> i64 {
        ((self.page - 1) as i64) * (self.limit as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, req: PageRequest, total: u64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            ((total - 1) / req.limit as u64 + 1) as u32
        };
        Self {
            data,
            page: req.page,
            limit: req.limit,
            total,
            total_pages,
            has_next: (req.page as u64) < total_pages as u64,
            has_prev: req.page > 1,
        }
    }
}
