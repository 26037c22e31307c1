use crate::{
    error::{LendingError, LendingResult},
    lending::ALREADY_BORROWED,
    models::{Book, BookChunk, BookId, LoanChunk, LoanRecord, PageRequest, UserId},
    repository::{BookRepository, LoanRepository, SessionRepository},
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

// partial unique index on loans (book_id, borrower_id) WHERE NOT return_approved
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct Entity {
    pool: PgPool,
}

impl Entity {
    pub async fn new(db_url: &str) -> LendingResult<Self> {
        let pool = PgPool::connect(db_url)
            .await
            .map_err(LendingError::Storage)?;
        Ok(Entity { pool })
    }

    pub async fn migrate(&self) -> LendingResult<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    async fn count(&self, sql: &str, id: i64) -> LendingResult<u32> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(LendingError::Storage)?;
        Ok(u32::try_from(count).context("failed to count")?)
    }

    async fn loan_page(
        &self,
        select: &str,
        count: &str,
        id: i64,
        page: PageRequest,
    ) -> LendingResult<LoanChunk> {
        let items = sqlx::query_as::<_, LoanRecord>(select)
            .bind(id)
            .bind(page.offset())
            .bind(page.limit())
            .fetch_all(&self.pool)
            .await
            .map_err(LendingError::Storage)?;

        let total_count = self.count(count, id).await?;

        Ok(LoanChunk { items, total_count })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|err| err.code())
        .map_or(false, |code| code == UNIQUE_VIOLATION)
}

#[async_trait]
impl BookRepository for Entity {
    async fn find_book(&self, book_id: BookId) -> LendingResult<Option<Book>> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(LendingError::Storage)
    }

    async fn create_book(&self, owner_id: UserId, shareable: bool) -> LendingResult<Book> {
        sqlx::query_as::<_, Book>(
            "INSERT INTO books (owner_id, shareable, archived, created_at) VALUES ($1, $2, FALSE, $3) RETURNING *",
        )
        .bind(owner_id)
        .bind(shareable)
        .bind(Utc::now().naive_utc())
        .fetch_one(&self.pool)
        .await
        .map_err(LendingError::Storage)
    }

    async fn update_book_flags(&self, book: &Book) -> LendingResult<()> {
        let result = sqlx::query("UPDATE books SET shareable = $1, archived = $2 WHERE id = $3")
            .bind(book.shareable)
            .bind(book.archived)
            .bind(book.id)
            .execute(&self.pool)
            .await
            .map_err(LendingError::Storage)?;

        if result.rows_affected() == 0 {
            return Err(LendingError::book_not_found(book.id));
        }
        Ok(())
    }

    async fn list_displayable(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> LendingResult<BookChunk> {
        let items = sqlx::query_as::<_, Book>(
            "SELECT * FROM books WHERE shareable AND NOT archived AND owner_id <> $1 ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3",
        )
        .bind(user_id)
        .bind(page.offset())
        .bind(page.limit())
        .fetch_all(&self.pool)
        .await
        .map_err(LendingError::Storage)?;

        let total_count = self
            .count(
                "SELECT COUNT(*) FROM books WHERE shareable AND NOT archived AND owner_id <> $1",
                user_id,
            )
            .await?;

        Ok(BookChunk { items, total_count })
    }

    async fn list_by_owner(&self, owner_id: UserId, page: PageRequest) -> LendingResult<BookChunk> {
        let items = sqlx::query_as::<_, Book>(
            "SELECT * FROM books WHERE owner_id = $1 ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3",
        )
        .bind(owner_id)
        .bind(page.offset())
        .bind(page.limit())
        .fetch_all(&self.pool)
        .await
        .map_err(LendingError::Storage)?;

        let total_count = self
            .count("SELECT COUNT(*) FROM books WHERE owner_id = $1", owner_id)
            .await?;

        Ok(BookChunk { items, total_count })
    }
}

#[async_trait]
impl LoanRepository for Entity {
    async fn has_active_loan(&self, book_id: BookId, borrower_id: UserId) -> LendingResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM loans WHERE book_id = $1 AND borrower_id = $2 AND NOT return_approved)",
        )
        .bind(book_id)
        .bind(borrower_id)
        .fetch_one(&self.pool)
        .await
        .map_err(LendingError::Storage)
    }

    async fn find_open_loan(
        &self,
        book_id: BookId,
        borrower_id: UserId,
    ) -> LendingResult<Option<LoanRecord>> {
        sqlx::query_as::<_, LoanRecord>(
            "SELECT * FROM loans WHERE book_id = $1 AND borrower_id = $2 AND NOT returned AND NOT return_approved",
        )
        .bind(book_id)
        .bind(borrower_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LendingError::Storage)
    }

    async fn find_return_pending_loan(
        &self,
        book_id: BookId,
        owner_id: UserId,
    ) -> LendingResult<Option<LoanRecord>> {
        sqlx::query_as::<_, LoanRecord>(
            "SELECT loans.* FROM loans JOIN books ON books.id = loans.book_id WHERE books.owner_id = $1 AND loans.book_id = $2 AND loans.returned AND NOT loans.return_approved ORDER BY loans.id LIMIT 1",
        )
        .bind(owner_id)
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LendingError::Storage)
    }

    async fn create_loan(
        &self,
        book_id: BookId,
        borrower_id: UserId,
    ) -> LendingResult<LoanRecord> {
        sqlx::query_as::<_, LoanRecord>(
            "INSERT INTO loans (book_id, borrower_id, returned, return_approved, created_at) VALUES ($1, $2, FALSE, FALSE, $3) RETURNING *",
        )
        .bind(book_id)
        .bind(borrower_id)
        .bind(Utc::now().naive_utc())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                LendingError::not_permitted(ALREADY_BORROWED)
            } else {
                LendingError::Storage(err)
            }
        })
    }

    async fn update_loan(&self, loan: &LoanRecord) -> LendingResult<()> {
        // OR keeps both flags monotonic against stale writers
        let result = sqlx::query(
            "UPDATE loans SET returned = returned OR $1, return_approved = return_approved OR $2 WHERE id = $3",
        )
        .bind(loan.returned)
        .bind(loan.return_approved)
        .bind(loan.id)
        .execute(&self.pool)
        .await
        .map_err(LendingError::Storage)?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("loan {} not found", loan.id).into());
        }
        Ok(())
    }

    async fn list_borrowed(
        &self,
        borrower_id: UserId,
        page: PageRequest,
    ) -> LendingResult<LoanChunk> {
        self.loan_page(
            "SELECT * FROM loans WHERE borrower_id = $1 ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3",
            "SELECT COUNT(*) FROM loans WHERE borrower_id = $1",
            borrower_id,
            page,
        )
        .await
    }

    async fn list_returned(&self, owner_id: UserId, page: PageRequest) -> LendingResult<LoanChunk> {
        self.loan_page(
            "SELECT loans.* FROM loans JOIN books ON books.id = loans.book_id WHERE books.owner_id = $1 AND loans.return_approved ORDER BY loans.created_at DESC, loans.id DESC OFFSET $2 LIMIT $3",
            "SELECT COUNT(*) FROM loans JOIN books ON books.id = loans.book_id WHERE books.owner_id = $1 AND loans.return_approved",
            owner_id,
            page,
        )
        .await
    }

    async fn list_pending_returns(
        &self,
        owner_id: UserId,
        page: PageRequest,
    ) -> LendingResult<LoanChunk> {
        self.loan_page(
            "SELECT loans.* FROM loans JOIN books ON books.id = loans.book_id WHERE books.owner_id = $1 AND loans.returned AND NOT loans.return_approved ORDER BY loans.created_at DESC, loans.id DESC OFFSET $2 LIMIT $3",
            "SELECT COUNT(*) FROM loans JOIN books ON books.id = loans.book_id WHERE books.owner_id = $1 AND loans.returned AND NOT loans.return_approved",
            owner_id,
            page,
        )
        .await
    }
}

#[async_trait]
impl SessionRepository for Entity {
    async fn user_id_for_token(&self, token: &str) -> LendingResult<Option<UserId>> {
        sqlx::query_scalar("SELECT user_id FROM sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(LendingError::Storage)
    }
}
