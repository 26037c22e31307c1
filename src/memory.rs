use crate::{
    error::{LendingError, LendingResult},
    guard::is_lendable,
    lending::ALREADY_BORROWED,
    models::{
        Book, BookChunk, BookId, LoanChunk, LoanRecord, LoanState, PageRequest, UserId,
    },
    repository::{BookRepository, LoanRepository, SessionRepository},
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::{collections::HashMap, sync::RwLock};

// arena store: ids are 1-based positions, records are never removed
#[derive(Debug, Default)]
pub struct MemoryStore {
    books: RwLock<Vec<Book>>,
    loans: RwLock<Vec<LoanRecord>>,
    sessions: RwLock<HashMap<String, UserId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_session(&self, token: &str, user_id: UserId) -> LendingResult<()> {
        let mut sessions = self.sessions.write().ok().context("poisoned")?;
        sessions.insert(token.to_string(), user_id);
        Ok(())
    }

    fn owner_of(books: &[Book], book_id: BookId) -> Option<UserId> {
        slot(book_id).and_then(|idx| books.get(idx)).map(|book| book.owner_id)
    }

    fn owner_loans(
        &self,
        owner_id: UserId,
        page: PageRequest,
        state: LoanState,
    ) -> LendingResult<LoanChunk> {
        let books = self.books.read().ok().context("poisoned")?;
        let loans = self.loans.read().ok().context("poisoned")?;

        let filtered: Vec<_> = loans
            .iter()
            .rev()
            .filter(|loan| loan.state() == state)
            .filter(|loan| Self::owner_of(&books, loan.book_id) == Some(owner_id))
            .collect();

        let (items, total_count) = paginate(filtered, page);
        Ok(LoanChunk { items, total_count })
    }
}

fn slot(id: i64) -> Option<usize> {
    usize::try_from(id).ok()?.checked_sub(1)
}

fn next_id(len: usize) -> LendingResult<i64> {
    Ok(i64::try_from(len).context("arena overflow")? + 1)
}

fn paginate<T: Clone>(filtered: Vec<&T>, page: PageRequest) -> (Vec<T>, u32) {
    let total_count = filtered.len() as u32;
    let items = filtered
        .into_iter()
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(usize::try_from(page.limit()).unwrap_or_default())
        .cloned()
        .collect();
    (items, total_count)
}

#[async_trait]
impl BookRepository for MemoryStore {
    async fn find_book(&self, book_id: BookId) -> LendingResult<Option<Book>> {
        let books = self.books.read().ok().context("poisoned")?;
        Ok(slot(book_id).and_then(|idx| books.get(idx)).cloned())
    }

    async fn create_book(&self, owner_id: UserId, shareable: bool) -> LendingResult<Book> {
        let mut books = self.books.write().ok().context("poisoned")?;
        let book = Book {
            id: next_id(books.len())?,
            owner_id,
            shareable,
            archived: false,
            created_at: Utc::now().naive_utc(),
        };
        books.push(book.clone());
        Ok(book)
    }

    async fn update_book_flags(&self, book: &Book) -> LendingResult<()> {
        let mut books = self.books.write().ok().context("poisoned")?;
        let stored = slot(book.id)
            .and_then(|idx| books.get_mut(idx))
            .ok_or_else(|| LendingError::book_not_found(book.id))?;
        stored.shareable = book.shareable;
        stored.archived = book.archived;
        Ok(())
    }

    async fn list_displayable(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> LendingResult<BookChunk> {
        let books = self.books.read().ok().context("poisoned")?;
        let filtered: Vec<_> = books
            .iter()
            .rev()
            .filter(|book| is_lendable(book) && book.owner_id != user_id)
            .collect();

        let (items, total_count) = paginate(filtered, page);
        Ok(BookChunk { items, total_count })
    }

    async fn list_by_owner(&self, owner_id: UserId, page: PageRequest) -> LendingResult<BookChunk> {
        let books = self.books.read().ok().context("poisoned")?;
        let filtered: Vec<_> = books
            .iter()
            .rev()
            .filter(|book| book.owner_id == owner_id)
            .collect();

        let (items, total_count) = paginate(filtered, page);
        Ok(BookChunk { items, total_count })
    }
}

#[async_trait]
impl LoanRepository for MemoryStore {
    async fn has_active_loan(&self, book_id: BookId, borrower_id: UserId) -> LendingResult<bool> {
        let loans = self.loans.read().ok().context("poisoned")?;
        Ok(loans.iter().any(|loan| {
            loan.book_id == book_id && loan.borrower_id == borrower_id && loan.is_active()
        }))
    }

    async fn find_open_loan(
        &self,
        book_id: BookId,
        borrower_id: UserId,
    ) -> LendingResult<Option<LoanRecord>> {
        let loans = self.loans.read().ok().context("poisoned")?;
        Ok(loans
            .iter()
            .find(|loan| {
                loan.book_id == book_id
                    && loan.borrower_id == borrower_id
                    && loan.state() == LoanState::Open
            })
            .cloned())
    }

    async fn find_return_pending_loan(
        &self,
        book_id: BookId,
        owner_id: UserId,
    ) -> LendingResult<Option<LoanRecord>> {
        let books = self.books.read().ok().context("poisoned")?;
        if Self::owner_of(&books, book_id) != Some(owner_id) {
            return Ok(None);
        }

        let loans = self.loans.read().ok().context("poisoned")?;
        Ok(loans
            .iter()
            .find(|loan| loan.book_id == book_id && loan.state() == LoanState::ReturnPending)
            .cloned())
    }

    async fn create_loan(
        &self,
        book_id: BookId,
        borrower_id: UserId,
    ) -> LendingResult<LoanRecord> {
        // check and insert under one write lock
        let mut loans = self.loans.write().ok().context("poisoned")?;
        let duplicate = loans.iter().any(|loan| {
            loan.book_id == book_id && loan.borrower_id == borrower_id && loan.is_active()
        });
        if duplicate {
            return Err(LendingError::not_permitted(ALREADY_BORROWED));
        }

        let loan = LoanRecord {
            id: next_id(loans.len())?,
            book_id,
            borrower_id,
            returned: false,
            return_approved: false,
            created_at: Utc::now().naive_utc(),
        };
        loans.push(loan.clone());
        Ok(loan)
    }

    async fn update_loan(&self, loan: &LoanRecord) -> LendingResult<()> {
        let mut loans = self.loans.write().ok().context("poisoned")?;
        let stored = slot(loan.id)
            .and_then(|idx| loans.get_mut(idx))
            .context("loan not found")?;
        // flags never go back to false
        stored.returned |= loan.returned;
        stored.return_approved |= loan.return_approved;
        Ok(())
    }

    async fn list_borrowed(
        &self,
        borrower_id: UserId,
        page: PageRequest,
    ) -> LendingResult<LoanChunk> {
        let loans = self.loans.read().ok().context("poisoned")?;
        let filtered: Vec<_> = loans
            .iter()
            .rev()
            .filter(|loan| loan.borrower_id == borrower_id)
            .collect();

        let (items, total_count) = paginate(filtered, page);
        Ok(LoanChunk { items, total_count })
    }

    async fn list_returned(&self, owner_id: UserId, page: PageRequest) -> LendingResult<LoanChunk> {
        self.owner_loans(owner_id, page, LoanState::Closed)
    }

    async fn list_pending_returns(
        &self,
        owner_id: UserId,
        page: PageRequest,
    ) -> LendingResult<LoanChunk> {
        self.owner_loans(owner_id, page, LoanState::ReturnPending)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn user_id_for_token(&self, token: &str) -> LendingResult<Option<UserId>> {
        let sessions = self.sessions.read().ok().context("poisoned")?;
        Ok(sessions.get(token).copied())
    }
}

#[cfg(test)]
mod test {
    use super::MemoryStore;
    use crate::{
        error::LendingError,
        models::{LoanState, PageRequest},
        repository::{BookRepository, LoanRepository, SessionRepository},
    };

    #[actix_web::test]
    async fn test_ids_are_sequential() {
        let store = MemoryStore::new();
        let first = store.create_book(1, true).await.unwrap();
        let second = store.create_book(1, false).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert!(store.find_book(0).await.unwrap().is_none());
        assert!(store.find_book(-4).await.unwrap().is_none());
        assert!(store.find_book(3).await.unwrap().is_none());
        assert_eq!(store.find_book(2).await.unwrap(), Some(second));
    }

    #[actix_web::test]
    async fn test_create_loan_rejects_second_active_loan() {
        let store = MemoryStore::new();
        let book = store.create_book(1, true).await.unwrap();

        let mut loan = store.create_loan(book.id, 2).await.unwrap();
        let err = store.create_loan(book.id, 2).await.unwrap_err();
        assert!(matches!(err, LendingError::OperationNotPermitted(_)));

        // another borrower is not affected
        store.create_loan(book.id, 3).await.unwrap();

        // a return-pending loan still counts as active
        assert!(loan.mark_returned());
        store.update_loan(&loan).await.unwrap();
        assert!(store.create_loan(book.id, 2).await.is_err());

        assert!(loan.approve_return());
        store.update_loan(&loan).await.unwrap();
        let next = store.create_loan(book.id, 2).await.unwrap();
        assert_ne!(next.id, loan.id);
        assert_eq!(next.state(), LoanState::Open);
    }

    #[actix_web::test]
    async fn test_update_loan_never_clears_flags() {
        let store = MemoryStore::new();
        let book = store.create_book(1, true).await.unwrap();
        let original = store.create_loan(book.id, 2).await.unwrap();

        let mut returned = original.clone();
        returned.mark_returned();
        store.update_loan(&returned).await.unwrap();

        store.update_loan(&original).await.unwrap();
        let stored = store.find_open_loan(book.id, 2).await.unwrap();
        assert!(stored.is_none());
        assert!(store.find_return_pending_loan(book.id, 1).await.unwrap().is_some());
    }

    #[actix_web::test]
    async fn test_return_pending_lookup_is_keyed_by_owner() {
        let store = MemoryStore::new();
        let book = store.create_book(1, true).await.unwrap();
        let mut loan = store.create_loan(book.id, 2).await.unwrap();
        loan.mark_returned();
        store.update_loan(&loan).await.unwrap();

        assert!(store.find_return_pending_loan(book.id, 2).await.unwrap().is_none());
        let found = store.find_return_pending_loan(book.id, 1).await.unwrap();
        assert_eq!(found.map(|loan| loan.id), Some(loan.id));
    }

    #[actix_web::test]
    async fn test_listings_paginate_newest_first() {
        let store = MemoryStore::new();
        for _ in 0..5 {
            store.create_book(1, true).await.unwrap();
        }
        store.create_book(2, true).await.unwrap();
        let hidden = store.create_book(1, false).await.unwrap();

        let chunk = store
            .list_displayable(2, PageRequest { page: 1, size: 2 })
            .await
            .unwrap();
        assert_eq!(chunk.total_count, 5);
        let ids: Vec<_> = chunk.items.iter().map(|book| book.id).collect();
        assert_eq!(ids, vec![3, 2]);

        let chunk = store.list_by_owner(1, PageRequest::default()).await.unwrap();
        assert_eq!(chunk.total_count, 6);
        assert_eq!(chunk.items.first().map(|book| book.id), Some(hidden.id));

        let chunk = store
            .list_by_owner(1, PageRequest { page: 0, size: 0 })
            .await
            .unwrap();
        assert!(chunk.items.is_empty());
        assert_eq!(chunk.total_count, 6);
    }

    #[actix_web::test]
    async fn test_sessions() {
        let store = MemoryStore::new();
        store.insert_session("token-a", 5).unwrap();
        assert_eq!(store.user_id_for_token("token-a").await.unwrap(), Some(5));
        assert_eq!(store.user_id_for_token("token-b").await.unwrap(), None);
    }
}
