use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use http::StatusCode;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::middleware::auth::BearerToken;
use crate::api::server::{AppState, JsonResult, RouteError};
use crate::db::prelude::*;
use crate::service::accounts::{self, AdminOverview, Credentials, ProfilePatch, ProfileView, Registration};
use crate::service::achievements::{self, AchievementDraft, Unlocked};
use crate::service::challenges::{self, ChallengeDetail, ChallengeDraft, CommentDraft};
use crate::service::progress::{self, Dashboard, ProgressMark, ProgressMarked};

#[derive(Debug, Serialize)]
pub struct Created {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionToken {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    pub limit: Option<i64>,
}

// -- identity --

#[instrument(skip(state, registration), fields(username = %registration.username))]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<Registration>,
) -> JsonResult<Created> {
    let id = accounts::register(state.store.as_ref(), registration).await?;
    Ok(Json(Created { id }))
}

#[instrument(skip(state, credentials), fields(username = %credentials.username))]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> JsonResult<SessionToken> {
    let token = accounts::login(state.store.as_ref(), credentials).await?;
    Ok(Json(SessionToken { token }))
}

#[instrument(skip(state, token))]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<BearerToken>,
) -> Result<StatusCode, RouteError> {
    accounts::logout(state.store.as_ref(), &token.0).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> JsonResult<Dashboard> {
    Ok(Json(progress::dashboard(state.store.as_ref(), principal).await?))
}

// -- challenge registry --

#[instrument(skip(state))]
pub async fn list_challenges(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> JsonResult<Vec<Challenge>> {
    Ok(Json(
        challenges::list_challenges(state.store.as_ref(), principal).await?,
    ))
}

#[instrument(skip(state, draft))]
pub async fn create_challenge(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(draft): Json<ChallengeDraft>,
) -> JsonResult<Created> {
    let id = challenges::create_challenge(state.store.as_ref(), principal, draft).await?;
    Ok(Json(Created { id }))
}

#[instrument(skip(state))]
pub async fn my_challenges(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> JsonResult<Vec<Challenge>> {
    Ok(Json(
        challenges::list_owned(state.store.as_ref(), principal).await?,
    ))
}

#[instrument(skip(state))]
pub async fn challenge_detail(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> JsonResult<ChallengeDetail> {
    Ok(Json(
        challenges::challenge_detail(state.store.as_ref(), principal, id).await?,
    ))
}

#[instrument(skip(state, draft))]
pub async fn edit_challenge(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(draft): Json<ChallengeDraft>,
) -> Result<StatusCode, RouteError> {
    challenges::edit_challenge(state.store.as_ref(), principal, id, draft).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete_challenge(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<StatusCode, RouteError> {
    challenges::delete_challenge(state.store.as_ref(), principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn join_challenge(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<StatusCode, RouteError> {
    challenges::join_challenge(state.store.as_ref(), principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn leave_challenge(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<StatusCode, RouteError> {
    challenges::leave_challenge(state.store.as_ref(), principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn challenge_participants(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> JsonResult<Vec<Participant>> {
    Ok(Json(
        challenges::list_participants(state.store.as_ref(), principal, id).await?,
    ))
}

#[instrument(skip(state, draft))]
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(draft): Json<CommentDraft>,
) -> JsonResult<Created> {
    let comment_id = challenges::add_comment(state.store.as_ref(), principal, id, draft).await?;
    Ok(Json(Created { id: comment_id }))
}

// -- progress --

#[instrument(skip(state, mark))]
pub async fn mark_progress(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(mark): Json<ProgressMark>,
) -> JsonResult<ProgressMarked> {
    Ok(Json(
        progress::mark_progress(state.store.as_ref(), principal, id, mark).await?,
    ))
}

#[instrument(skip(state))]
pub async fn progress_history(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ProgressQuery>,
) -> JsonResult<Vec<ProgressRow>> {
    Ok(Json(
        progress::list_progress(state.store.as_ref(), principal, query.limit).await?,
    ))
}

#[instrument(skip(state))]
pub async fn progress_report(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Response, RouteError> {
    let csv = progress::progress_report_csv(state.store.as_ref(), principal).await?;

    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8"),
            (CONTENT_DISPOSITION, "attachment; filename=\"progress.csv\""),
        ],
        csv,
    )
        .into_response())
}

// -- profile --

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> JsonResult<ProfileView> {
    Ok(Json(accounts::profile(state.store.as_ref(), principal).await?))
}

#[instrument(skip(state, patch))]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(patch): Json<ProfilePatch>,
) -> Result<StatusCode, RouteError> {
    accounts::update_profile(state.store.as_ref(), principal, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- achievements --

#[instrument(skip(state))]
pub async fn list_achievements(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> JsonResult<Vec<AchievementStatus>> {
    Ok(Json(
        achievements::list_achievements(state.store.as_ref(), principal).await?,
    ))
}

#[instrument(skip(state))]
pub async fn attempt_achievement(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> JsonResult<Unlocked> {
    Ok(Json(
        achievements::attempt_achievement(state.store.as_ref(), principal, id).await?,
    ))
}

// -- admin surface --

#[instrument(skip(state))]
pub async fn admin_overview(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> JsonResult<AdminOverview> {
    Ok(Json(
        accounts::admin_overview(state.store.as_ref(), principal).await?,
    ))
}

#[instrument(skip(state, draft))]
pub async fn create_achievement(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(draft): Json<AchievementDraft>,
) -> JsonResult<Created> {
    let id = achievements::create_achievement(state.store.as_ref(), principal, draft).await?;
    Ok(Json(Created { id }))
}

#[instrument(skip(state))]
pub async fn delete_achievement(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<StatusCode, RouteError> {
    achievements::delete_achievement(state.store.as_ref(), principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn reset_points(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<StatusCode, RouteError> {
    accounts::admin_reset_points(state.store.as_ref(), principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
