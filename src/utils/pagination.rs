use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::model::{
    announcement::Announcement, fee_outline::FeeOutline, message::Message, salary::SalaryRecord,
};

const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Default, Clone, Copy, Deserialize, IntoParams, ToSchema)]
pub struct PageQuery {
    /// Pagination page number (start with 1)
    #[schema(example = 1)]
    pub page: Option<u32>,
    /// Items per page, at most 100
    #[schema(example = 10)]
    pub limit: Option<u32>,
}

/// Normalized page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn from_query(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }

    /// Slices an already ordered result set.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.limit as usize)
            .collect()
    }

    pub fn wrap<T>(&self, data: Vec<T>, total: i64) -> Paginated<T> {
        Paginated {
            data,
            page: self.page,
            limit: self.limit,
            total,
        }
    }
}

impl From<PageQuery> for Page {
    fn from(q: PageQuery) -> Self {
        Page::from_query(q.page, q.limit)
    }
}

/// List response. Clients compute the page count as `ceil(total / limit)`.
#[derive(Debug, Serialize, ToSchema)]
#[aliases(
    FeeOutlineList = Paginated<FeeOutline>,
    SalaryList = Paginated<SalaryRecord>,
    AnnouncementList = Paginated<Announcement>,
    MessageList = Paginated<Message>
)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 10)]
    pub limit: u32,
    #[schema(example = 1)]
    pub total: i64,
}
