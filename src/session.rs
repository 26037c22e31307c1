use crate::{
    error::LendingError,
    models::UserId,
    repository::SessionRepository,
};
use actix_web::{dev::Payload, http::header, web::Data, FromRequest, HttpRequest};
use anyhow::Context;
use std::{future::Future, pin::Pin};

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl FromRequest for CurrentUser {
    type Error = LendingError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let token = bearer_token(req);
        let sessions = req.app_data::<Data<dyn SessionRepository>>().cloned();

        Box::pin(async move {
            let token = token.ok_or(LendingError::Unauthenticated)?;
            let sessions = sessions.context("session store is not configured")?;
            let id = sessions
                .user_id_for_token(&token)
                .await?
                .ok_or(LendingError::Unauthenticated)?;
            Ok(CurrentUser { id })
        })
    }
}
