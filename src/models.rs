use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type BookId = i64;
pub type LoanId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Book {
    pub id: BookId,
    pub owner_id: UserId,
    pub shareable: bool,
    pub archived: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanState {
    Open,
    ReturnPending,
    Closed,
}

// one row per loan; a new borrow never reuses a closed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LoanRecord {
    pub id: LoanId,
    pub book_id: BookId,
    pub borrower_id: UserId,
    pub returned: bool,
    pub return_approved: bool,
    pub created_at: NaiveDateTime,
}

impl LoanRecord {
    pub fn state(&self) -> LoanState {
        // approval is final; agrees with `is_active`
        match (self.returned, self.return_approved) {
            (_, true) => LoanState::Closed,
            (true, false) => LoanState::ReturnPending,
            (false, false) => LoanState::Open,
        }
    }

    /// Open or return-pending; counts against the one-active-loan rule.
    pub fn is_active(&self) -> bool {
        !self.return_approved
    }

    /// OPEN -> RETURN_PENDING. Returns `false` and leaves the record untouched
    /// from any other state.
    pub fn mark_returned(&mut self) -> bool {
        if self.state() != LoanState::Open {
            return false;
        }
        self.returned = true;
        true
    }

    /// RETURN_PENDING -> CLOSED. Returns `false` and leaves the record
    /// untouched from any other state.
    pub fn approve_return(&mut self) -> bool {
        if self.state() != LoanState::ReturnPending {
            return false;
        }
        self.return_approved = true;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "PageRequest::default_size")]
    pub size: u32,
}

pub const MAX_PAGE_SIZE: u32 = 100;

impl PageRequest {
    fn default_size() -> u32 {
        10
    }

    // page * MAX_PAGE_SIZE stays far below i64::MAX for any u32 page
    pub fn offset(&self) -> i64 {
        i64::from(self.page).saturating_mul(self.limit())
    }

    /// Requested size, capped at `MAX_PAGE_SIZE`.
    pub fn limit(&self) -> i64 {
        i64::from(self.size.min(MAX_PAGE_SIZE))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: Self::default_size(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BookChunk {
    pub items: Vec<Book>,
    pub total_count: u32,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LoanChunk {
    pub items: Vec<LoanRecord>,
    pub total_count: u32,
}
