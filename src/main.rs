mod config;
mod entity;
mod error;
mod guard;
mod lending;
mod memory;
mod models;
mod repository;
mod session;

use actix_web::{
    get, middleware::Logger, patch, post,
    web::{route, Data, Json, Path, Query, ServiceConfig},
    App, HttpResponse, HttpServer,
};
use clap::Parser;
use config::Config;
use entity::Entity;
use error::LendingResult;
use lending::Lending;
use memory::MemoryStore;
use models::{BookId, PageRequest};
use repository::SessionRepository;
use serde::Deserialize;
use session::CurrentUser;
use std::{error::Error, sync::Arc};
use tracing_subscriber::EnvFilter;

type E = Box<dyn Error>;

#[actix_web::main]
async fn main() -> Result<(), E> {
    let config = Config::parse();

    let filter = match &config.log_filter {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (lending, sessions) = match &config.database_url {
        Some(db_url) => {
            let entity = Arc::new(Entity::new(db_url).await?);
            entity.migrate().await?;
            tracing::info!("using postgres store");
            let sessions: Arc<dyn SessionRepository> = entity.clone();
            (Lending::new(entity.clone(), entity), sessions)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            for (token, user_id) in &config.seed_sessions {
                store.insert_session(token, *user_id)?;
            }
            tracing::warn!("no DATABASE_URL given, using in-memory store");
            let sessions: Arc<dyn SessionRepository> = store.clone();
            (Lending::new(store.clone(), store), sessions)
        }
    };

    let addr = config.addr();
    tracing::info!(%addr, "listening");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(Data::new(lending.clone()))
            .app_data(Data::from(sessions.clone()))
            .configure(routes)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}

fn routes(cfg: &mut ServiceConfig) {
    // literal paths before `/books/{id}`
    cfg.service(book_register)
        .service(book_query)
        .service(book_by_owner)
        .service(borrowed_query)
        .service(returned_query)
        .service(pending_return_query)
        .service(book_get)
        .service(shareable_toggle)
        .service(archived_toggle)
        .service(book_borrow)
        .service(book_return)
        .service(book_return_approve)
        .default_service(route().to(fallback));
}

#[derive(Debug, Deserialize)]
struct BookRegisterData {
    #[serde(default)]
    shareable: bool,
}

#[post("/books")]
async fn book_register(
    user: CurrentUser,
    data: Json<BookRegisterData>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let book_id = lending.guard().register_book(user.id, data.shareable).await?;
    Ok(HttpResponse::Ok().json(book_id))
}

#[get("/books")]
async fn book_query(
    user: CurrentUser,
    page: Query<PageRequest>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let result = lending.guard().list_displayable(user.id, *page).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/books/by-owner")]
async fn book_by_owner(
    user: CurrentUser,
    page: Query<PageRequest>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let result = lending.guard().list_by_owner(user.id, *page).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/books/borrowed")]
async fn borrowed_query(
    user: CurrentUser,
    page: Query<PageRequest>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let result = lending.list_borrowed(user.id, *page).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/books/returned")]
async fn returned_query(
    user: CurrentUser,
    page: Query<PageRequest>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let result = lending.list_returned(user.id, *page).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/books/pending-returns")]
async fn pending_return_query(
    user: CurrentUser,
    page: Query<PageRequest>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let result = lending.list_pending_returns(user.id, *page).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/books/{id}")]
async fn book_get(
    _: CurrentUser,
    book_id: Path<BookId>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let book = lending.guard().find_book(*book_id).await?;
    Ok(HttpResponse::Ok().json(book))
}

#[patch("/books/shareable/{id}")]
async fn shareable_toggle(
    user: CurrentUser,
    book_id: Path<BookId>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let book_id = lending.guard().toggle_shareable(*book_id, user.id).await?;
    Ok(HttpResponse::Ok().json(book_id))
}

#[patch("/books/archived/{id}")]
async fn archived_toggle(
    user: CurrentUser,
    book_id: Path<BookId>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let book_id = lending.guard().toggle_archived(*book_id, user.id).await?;
    Ok(HttpResponse::Ok().json(book_id))
}

#[post("/books/borrow/{id}")]
async fn book_borrow(
    user: CurrentUser,
    book_id: Path<BookId>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let loan_id = lending.borrow(*book_id, user.id).await?;
    Ok(HttpResponse::Ok().json(loan_id))
}

#[patch("/books/borrowed/return/{id}")]
async fn book_return(
    user: CurrentUser,
    book_id: Path<BookId>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let loan_id = lending.return_book(*book_id, user.id).await?;
    Ok(HttpResponse::Ok().json(loan_id))
}

#[patch("/books/borrowed/return/approve/{id}")]
async fn book_return_approve(
    user: CurrentUser,
    book_id: Path<BookId>,
    lending: Data<Lending>,
) -> LendingResult<HttpResponse> {
    let loan_id = lending.approve_return(*book_id, user.id).await?;
    Ok(HttpResponse::Ok().json(loan_id))
}

async fn fallback() -> HttpResponse {
    HttpResponse::NotFound().body("no endpoint, but connection to api is successful.")
}

#[cfg(test)]
mod test {
    use super::routes;
    use crate::{
        lending::Lending,
        memory::MemoryStore,
        models::{Book, BookChunk, LoanChunk, MAX_PAGE_SIZE},
        repository::SessionRepository,
    };
    use actix_web::{http::StatusCode, test, web::Data, App};
    use std::sync::Arc;

    fn state() -> (Data<Lending>, Data<dyn SessionRepository>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_session("owner", 1).unwrap();
        store.insert_session("reader", 2).unwrap();
        let sessions: Arc<dyn SessionRepository> = store.clone();
        (
            Data::new(Lending::new(store.clone(), store)),
            Data::from(sessions),
        )
    }

    fn authed(req: test::TestRequest, token: &str) -> test::TestRequest {
        req.insert_header(("Authorization", format!("Bearer {token}")))
    }

    #[actix_web::test]
    async fn test_lending_over_http() {
        let (lending, sessions) = state();
        let app = test::init_service(
            App::new()
                .app_data(lending)
                .app_data(sessions)
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/books")
            .set_json(serde_json::json!({ "shareable": true }));
        let res = test::call_service(&app, authed(req, "owner").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let book_id: i64 = test::read_body_json(res).await;

        let req = test::TestRequest::get().uri("/books");
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        let books: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(books["total_count"], 1);

        let borrow_uri = format!("/books/borrow/{book_id}");
        let req = test::TestRequest::post().uri(&borrow_uri);
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let loan_id: i64 = test::read_body_json(res).await;

        let req = test::TestRequest::post().uri(&borrow_uri);
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = test::read_body(res).await;
        assert_eq!(body, "The requested book is already borrowed");

        let req = test::TestRequest::patch().uri(&format!("/books/borrowed/return/{book_id}"));
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        assert_eq!(test::read_body_json::<i64, _>(res).await, loan_id);

        let req = test::TestRequest::get().uri("/books/pending-returns");
        let res = test::call_service(&app, authed(req, "owner").to_request()).await;
        let pending: LoanChunk = test::read_body_json(res).await;
        assert_eq!(pending.total_count, 1);

        let approve_uri = format!("/books/borrowed/return/approve/{book_id}");
        let req = test::TestRequest::patch().uri(&approve_uri);
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::patch().uri(&approve_uri);
        let res = test::call_service(&app, authed(req, "owner").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(test::read_body_json::<i64, _>(res).await, loan_id);

        let req = test::TestRequest::get().uri("/books/returned?page=0&size=5");
        let res = test::call_service(&app, authed(req, "owner").to_request()).await;
        let returned: LoanChunk = test::read_body_json(res).await;
        assert_eq!(returned.items.len(), 1);
        assert!(returned.items.iter().all(|loan| loan.return_approved));
    }

    #[actix_web::test]
    async fn test_error_statuses() {
        let (lending, sessions) = state();
        let app = test::init_service(
            App::new()
                .app_data(lending)
                .app_data(sessions)
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/books").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get().uri("/books");
        let res = test::call_service(&app, authed(req, "stranger").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get().uri("/books/77");
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/books")
            .set_json(serde_json::json!({ "shareable": true }));
        let res = test::call_service(&app, authed(req, "owner").to_request()).await;
        let book_id: i64 = test::read_body_json(res).await;

        let req = test::TestRequest::patch().uri(&format!("/books/archived/{book_id}"));
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get().uri(&format!("/books/{book_id}"));
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        let book: Book = test::read_body_json(res).await;
        assert!(!book.archived);

        let req = test::TestRequest::get().uri("/nowhere");
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_oversized_page_is_capped() {
        let (lending, sessions) = state();
        let app = test::init_service(
            App::new()
                .app_data(lending)
                .app_data(sessions)
                .configure(routes),
        )
        .await;

        for _ in 0..(MAX_PAGE_SIZE + 5) {
            let req = test::TestRequest::post()
                .uri("/books")
                .set_json(serde_json::json!({ "shareable": true }));
            let res = test::call_service(&app, authed(req, "owner").to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get().uri("/books?page=4294967295&size=4294967295");
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let books: BookChunk = test::read_body_json(res).await;
        assert!(books.items.is_empty());
        assert_eq!(books.total_count, MAX_PAGE_SIZE + 5);

        let req = test::TestRequest::get().uri("/books?size=4294967295");
        let res = test::call_service(&app, authed(req, "reader").to_request()).await;
        let books: BookChunk = test::read_body_json(res).await;
        assert_eq!(books.items.len(), MAX_PAGE_SIZE as usize);

        for uri in [
            "/books/by-owner",
            "/books/borrowed",
            "/books/returned",
            "/books/pending-returns",
        ] {
            let req = test::TestRequest::get()
                .uri(&format!("{uri}?page=4294967295&size=4294967295"));
            let res = test::call_service(&app, authed(req, "owner").to_request()).await;
            assert_eq!(res.status(), StatusCode::OK);
        }
    }
}
