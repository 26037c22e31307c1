use crate::{
    error::LendingResult,
    models::{Book, BookChunk, BookId, LoanChunk, LoanRecord, PageRequest, UserId},
};
use async_trait::async_trait;

#[async_trait]
pub trait BookRepository: Send + Sync {
    async fn find_book(&self, book_id: BookId) -> LendingResult<Option<Book>>;
    async fn create_book(&self, owner_id: UserId, shareable: bool) -> LendingResult<Book>;
    // persists `shareable` and `archived` only
    async fn update_book_flags(&self, book: &Book) -> LendingResult<()>;
    // lendable books whose owner is not `user_id`
    async fn list_displayable(&self, user_id: UserId, page: PageRequest)
        -> LendingResult<BookChunk>;
    async fn list_by_owner(&self, owner_id: UserId, page: PageRequest) -> LendingResult<BookChunk>;
}

#[async_trait]
pub trait LoanRepository: Send + Sync {
    // open or return-pending loan by (book, borrower)
    async fn has_active_loan(&self, book_id: BookId, borrower_id: UserId) -> LendingResult<bool>;
    async fn find_open_loan(
        &self,
        book_id: BookId,
        borrower_id: UserId,
    ) -> LendingResult<Option<LoanRecord>>;
    // return-pending loan on a book owned by `owner_id`
    async fn find_return_pending_loan(
        &self,
        book_id: BookId,
        owner_id: UserId,
    ) -> LendingResult<Option<LoanRecord>>;
    /// Inserts an OPEN loan. Implementations reject a second active loan for
    /// the same (book, borrower) with `OperationNotPermitted`, whatever the
    /// caller checked beforehand.
    async fn create_loan(&self, book_id: BookId, borrower_id: UserId)
        -> LendingResult<LoanRecord>;
    // persists `returned` and `return_approved` only
    async fn update_loan(&self, loan: &LoanRecord) -> LendingResult<()>;
    async fn list_borrowed(&self, borrower_id: UserId, page: PageRequest)
        -> LendingResult<LoanChunk>;
    async fn list_returned(&self, owner_id: UserId, page: PageRequest) -> LendingResult<LoanChunk>;
    async fn list_pending_returns(
        &self,
        owner_id: UserId,
        page: PageRequest,
    ) -> LendingResult<LoanChunk>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn user_id_for_token(&self, token: &str) -> LendingResult<Option<UserId>>;
}
