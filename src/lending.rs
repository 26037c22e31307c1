use crate::{
    error::{LendingError, LendingResult},
    guard::{is_lendable, is_owner, is_self_dealing, CatalogGuard},
    models::{Book, BookId, LoanChunk, LoanId, PageRequest, UserId},
    repository::{BookRepository, LoanRepository},
};
use std::sync::Arc;

pub const NOT_LENDABLE_BORROW: &str =
    "You cannot borrow books since it is archived or not shareable";
pub const NOT_LENDABLE_RETURN: &str = "You cannot return book since it is archived or not shareable";
pub const NOT_LENDABLE_APPROVE: &str =
    "You cannot approve return of a book since it is archived or not shareable";
pub const OWN_BOOK_BORROW: &str = "You cannot borrow your own books";
pub const OWN_BOOK_RETURN: &str = "You cannot return your own books";
pub const NOT_OWNER_APPROVE: &str = "You cannot approve return of books you do not own";
pub const ALREADY_BORROWED: &str = "The requested book is already borrowed";
pub const NOT_BORROWED: &str = "You did not borrow this book";
pub const NOT_RETURNED_YET: &str = "The book is not returned yet";

/// Borrow, return and approve transitions over loan records.
///
/// Each operation re-reads the book and the loan it needs, checks its
/// preconditions in a fixed order and commits at most one write. A rejected
/// call leaves the store untouched.
#[derive(Clone)]
pub struct Lending {
    guard: CatalogGuard,
    loans: Arc<dyn LoanRepository>,
}

impl Lending {
    pub fn new(books: Arc<dyn BookRepository>, loans: Arc<dyn LoanRepository>) -> Self {
        Self {
            guard: CatalogGuard::new(books),
            loans,
        }
    }

    pub fn guard(&self) -> &CatalogGuard {
        &self.guard
    }

    async fn lendable_book(&self, book_id: BookId, reason: &str) -> LendingResult<Book> {
        let book = self.guard.find_book(book_id).await?;
        if !is_lendable(&book) {
            return Err(reject(reason));
        }
        Ok(book)
    }

    #[tracing::instrument(skip(self))]
    pub async fn borrow(&self, book_id: BookId, requester_id: UserId) -> LendingResult<LoanId> {
        let book = self.lendable_book(book_id, NOT_LENDABLE_BORROW).await?;

        if is_self_dealing(&book, requester_id) {
            return Err(reject(OWN_BOOK_BORROW));
        }

        if self.loans.has_active_loan(book_id, requester_id).await? {
            return Err(reject(ALREADY_BORROWED));
        }

        let loan = self.loans.create_loan(book_id, requester_id).await?;
        tracing::info!(loan_id = loan.id, "book borrowed");
        Ok(loan.id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn return_book(&self, book_id: BookId, requester_id: UserId) -> LendingResult<LoanId> {
        let book = self.lendable_book(book_id, NOT_LENDABLE_RETURN).await?;

        if is_self_dealing(&book, requester_id) {
            return Err(reject(OWN_BOOK_RETURN));
        }

        let mut loan = self
            .loans
            .find_open_loan(book_id, requester_id)
            .await?
            .ok_or_else(|| reject(NOT_BORROWED))?;

        // the lookup only yields open loans
        if !loan.mark_returned() {
            return Err(reject(NOT_BORROWED));
        }
        self.loans.update_loan(&loan).await?;

        tracing::info!(loan_id = loan.id, "book returned, awaiting approval");
        Ok(loan.id)
    }

    /// Closes a return-pending loan. Only the owner of the book may approve.
    #[tracing::instrument(skip(self))]
    pub async fn approve_return(&self, book_id: BookId, owner_id: UserId) -> LendingResult<LoanId> {
        let book = self.lendable_book(book_id, NOT_LENDABLE_APPROVE).await?;

        if !is_owner(&book, owner_id) {
            return Err(reject(NOT_OWNER_APPROVE));
        }

        let mut loan = self
            .loans
            .find_return_pending_loan(book_id, owner_id)
            .await?
            .ok_or_else(|| reject(NOT_RETURNED_YET))?;

        if !loan.approve_return() {
            return Err(reject(NOT_RETURNED_YET));
        }
        self.loans.update_loan(&loan).await?;

        tracing::info!(loan_id = loan.id, "return approved");
        Ok(loan.id)
    }

    pub async fn list_borrowed(
        &self,
        borrower_id: UserId,
        page: PageRequest,
    ) -> LendingResult<LoanChunk> {
        self.loans.list_borrowed(borrower_id, page).await
    }

    pub async fn list_returned(&self, owner_id: UserId, page: PageRequest) -> LendingResult<LoanChunk> {
        self.loans.list_returned(owner_id, page).await
    }

    pub async fn list_pending_returns(
        &self,
        owner_id: UserId,
        page: PageRequest,
    ) -> LendingResult<LoanChunk> {
        self.loans.list_pending_returns(owner_id, page).await
    }
}

fn reject(reason: &str) -> LendingError {
    tracing::debug!(reason, "lending operation rejected");
    LendingError::not_permitted(reason)
}
