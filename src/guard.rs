use crate::{
    error::{LendingError, LendingResult},
    models::{Book, BookChunk, BookId, PageRequest, UserId},
    repository::BookRepository,
};
use std::sync::Arc;

/// A book can enter or move through a loan only while it is shared and not
/// archived.
pub fn is_lendable(book: &Book) -> bool {
    book.shareable && !book.archived
}

pub fn is_owner(book: &Book, user_id: UserId) -> bool {
    book.owner_id == user_id
}

// acting user and owner are the same identity
pub fn is_self_dealing(book: &Book, user_id: UserId) -> bool {
    is_owner(book, user_id)
}

#[derive(Clone, Copy)]
enum Flag {
    Shareable,
    Archived,
}

/// Eligibility and ownership facts about books. Never touches loans.
#[derive(Clone)]
pub struct CatalogGuard {
    books: Arc<dyn BookRepository>,
}

impl CatalogGuard {
    pub fn new(books: Arc<dyn BookRepository>) -> Self {
        Self { books }
    }

    pub async fn find_book(&self, book_id: BookId) -> LendingResult<Book> {
        self.books
            .find_book(book_id)
            .await?
            .ok_or_else(|| LendingError::book_not_found(book_id))
    }

    #[tracing::instrument(skip(self))]
    pub async fn register_book(&self, owner_id: UserId, shareable: bool) -> LendingResult<BookId> {
        let book = self.books.create_book(owner_id, shareable).await?;
        tracing::info!(book_id = book.id, "book registered");
        Ok(book.id)
    }

    pub async fn list_displayable(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> LendingResult<BookChunk> {
        self.books.list_displayable(user_id, page).await
    }

    pub async fn list_by_owner(
        &self,
        owner_id: UserId,
        page: PageRequest,
    ) -> LendingResult<BookChunk> {
        self.books.list_by_owner(owner_id, page).await
    }

    /// Flips `shareable`. Outstanding loans do not block the owner.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_shareable(
        &self,
        book_id: BookId,
        requester_id: UserId,
    ) -> LendingResult<BookId> {
        self.toggle(book_id, requester_id, Flag::Shareable).await
    }

    /// Flips `archived`. Outstanding loans do not block the owner.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_archived(
        &self,
        book_id: BookId,
        requester_id: UserId,
    ) -> LendingResult<BookId> {
        self.toggle(book_id, requester_id, Flag::Archived).await
    }

    async fn toggle(
        &self,
        book_id: BookId,
        requester_id: UserId,
        flag: Flag,
    ) -> LendingResult<BookId> {
        let mut book = self.find_book(book_id).await?;

        if !is_owner(&book, requester_id) {
            let reason = match flag {
                Flag::Shareable => "You can't update others books shareable status",
                Flag::Archived => "You can't update others books archived status",
            };
            tracing::debug!(reason, "toggle rejected");
            return Err(LendingError::Forbidden(reason.to_string()));
        }

        match flag {
            Flag::Shareable => book.shareable = !book.shareable,
            Flag::Archived => book.archived = !book.archived,
        }
        self.books.update_book_flags(&book).await?;

        tracing::info!(
            shareable = book.shareable,
            archived = book.archived,
            "book flags updated"
        );
        Ok(book.id)
    }
}
