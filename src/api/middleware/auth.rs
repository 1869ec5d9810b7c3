use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::AUTHORIZATION;

use crate::api::server::{AppState, RouteError};
use crate::db::prelude::Principal;
use crate::service::accounts;

/// The session token as received on the wire, kept around so logout can
/// delete the exact session that authenticated the request.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Resolve `Authorization: Bearer <token>` to a [`Principal`] and stash it
/// in the request extensions for the handlers downstream.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, RouteError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(RouteError::Service(
            crate::service::ServiceError::Unauthorized,
        ))?
        .to_string();

    let user = accounts::authorize(state.store.as_ref(), &token).await?;

    req.extensions_mut().insert(Principal::from(&user));
    req.extensions_mut().insert(BearerToken(token));

    Ok(next.run(req).await)
}
