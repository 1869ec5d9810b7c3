use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::auth::require_session;
use crate::db::prelude::Store;
use crate::service::ServiceError;
use crate::util::env::{EnvErr, Var};
use crate::var;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
}

pub async fn router(store: Arc<dyn Store>) -> Result<Router, RouteError> {
    let state = Arc::new(AppState { store });

    let public_routes = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login));

    let session_routes = Router::new()
        .route("/auth/logout", post(logout))
        .route("/dashboard", get(dashboard))
        //
        // challenge registry
        .route("/challenges", get(list_challenges).post(create_challenge))
        .route("/challenges/mine", get(my_challenges))
        .route(
            "/challenges/{id}",
            get(challenge_detail)
                .patch(edit_challenge)
                .delete(delete_challenge),
        )
        .route("/challenges/{id}/join", post(join_challenge))
        .route("/challenges/{id}/leave", post(leave_challenge))
        .route("/challenges/{id}/participants", get(challenge_participants))
        .route("/challenges/{id}/progress", post(mark_progress))
        .route("/challenges/{id}/comments", post(add_comment))
        //
        // progress & profile
        .route("/progress", get(progress_history))
        .route("/profile", get(profile).patch(update_profile))
        .route("/reports/progress.csv", get(progress_report))
        //
        // achievements
        .route("/achievements", get(list_achievements))
        .route("/achievements/{id}/attempt", post(attempt_achievement))
        //
        // admin surface
        .route("/admin/overview", get(admin_overview))
        .route("/admin/achievements", post(create_achievement))
        .route("/admin/achievements/{id}", delete(delete_achievement))
        .route("/admin/users/{id}/reset-points", post(reset_points))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    let app = Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .route("/", get(|| async { Response::new(Body::empty()) }))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(cors_layer().await?)
        .with_state(state);

    Ok(app)
}

async fn cors_layer() -> Result<CorsLayer, RouteError> {
    let origins = var!(Var::CorsAllowOrigins).await?;

    let layer = if origins.trim() == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed = origins
            .split(',')
            .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
            .collect::<Vec<_>>();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Ok(layer)
}

/// Route handler errors are attached to the response as an extension by
/// [`RouteError::into_response`]; this layer is where they reach the log.
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument(skip(store))]
pub async fn start_server(store: Arc<dyn Store>) -> Result<(), RouteError> {
    let app = router(store).await?;

    let port = var!(Var::ServerApiPort)
        .await?
        .parse::<u16>()
        .map_err(|_| RouteError::BadPort)?;

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(%socket_addr, "server ready");
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error("SERVER_API_PORT is not a valid port")]
    BadPort,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message, err) = match &self {
            RouteError::Service(service_err) => match service_err {
                ServiceError::Unauthorized => (
                    StatusCode::UNAUTHORIZED,
                    service_err.to_string(),
                    // expired/bad tokens are routine, not server faults
                    None,
                ),

                ServiceError::Forbidden => (StatusCode::FORBIDDEN, service_err.to_string(), None),

                ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, service_err.to_string(), None),

                ServiceError::Validation(_) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    service_err.to_string(),
                    None,
                ),

                ServiceError::InsufficientPoints { .. } => {
                    (StatusCode::CONFLICT, service_err.to_string(), None)
                }

                ServiceError::AlreadyRedeemed => {
                    (StatusCode::CONFLICT, service_err.to_string(), None)
                }

                ServiceError::Password(_) | ServiceError::Store(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    String::from("internal error"),
                    Some(self),
                ),
            },

            RouteError::Env(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                Some(self),
            ),

            RouteError::BadPort => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("internal error"),
                Some(self),
            ),

            RouteError::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                Some(self),
            ),
        };

        let mut response = (status, Json(ErrorResponse { message })).into_response();
        if let Some(err) = err {
            response.extensions_mut().insert(Arc::new(err));
        }

        response
    }
}

#[cfg(test)]
mod test {
    use axum::body::to_bytes;
    use http::Method;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::db::memory::MemStore;

    async fn app() -> Router {
        router(Arc::new(MemStore::new())).await.unwrap()
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = send_raw(app, method, uri, token, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }

    async fn send_raw(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, axum::body::Bytes) {
        let mut builder = http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, bytes)
    }

    async fn login_as(app: &Router, username: &str, role: &str) -> String {
        let (status, _) = send(
            app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "username": username, "password": "hunter2", "role": role })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": username, "password": "hunter2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_routes_require_session() {
        let app = app().await;

        let (status, body) = send(&app, Method::GET, "/dashboard", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "unauthorized");

        let (status, _) = send(&app, Method::GET, "/dashboard", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_full_flow_over_http() {
        let app = app().await;

        let admin = login_as(&app, "root", "admin").await;
        let coach = login_as(&app, "coach", "coach").await;
        let ana = login_as(&app, "ana", "user").await;

        // admin seeds the achievement catalog
        let (status, badge) = send(
            &app,
            Method::POST,
            "/admin/achievements",
            Some(&admin),
            Some(json!({ "code": "starter", "name": "Getting started", "cost": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let badge_id = badge["id"].as_i64().unwrap();

        // coach publishes a challenge; plain users may not
        let (status, _) = send(
            &app,
            Method::POST,
            "/challenges",
            Some(&ana),
            Some(json!({ "title": "morning run", "is_public": true })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, challenge) = send(
            &app,
            Method::POST,
            "/challenges",
            Some(&coach),
            Some(json!({ "title": "morning run", "is_public": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let challenge_id = challenge["id"].as_i64().unwrap();

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/challenges/{challenge_id}/join"),
            Some(&ana),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, marked) = send(
            &app,
            Method::POST,
            &format!("/challenges/{challenge_id}/progress"),
            Some(&ana),
            Some(json!({ "date": "2026-08-01", "completed": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(marked["awarded"], 10);

        let (status, dashboard) = send(&app, Method::GET, "/dashboard", Some(&ana), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dashboard["points"], 10);
        assert_eq!(dashboard["joined_challenges"], 1);

        let (status, unlocked) = send(
            &app,
            Method::POST,
            &format!("/achievements/{badge_id}/attempt"),
            Some(&ana),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unlocked["remaining_points"], 0);

        // repeat attempt conflicts instead of charging again
        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/achievements/{badge_id}/attempt"),
            Some(&ana),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "achievement already redeemed");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app().await;
        let ana = login_as(&app, "ana", "user").await;

        let (status, body) = send(&app, Method::GET, "/challenges/999", Some(&ana), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "challenges not found");

        let (status, _) = send(
            &app,
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "username": "ana", "password": "hunter2" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, Method::GET, "/admin/overview", Some(&ana), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_csv_report_over_http() {
        let app = app().await;
        let coach = login_as(&app, "coach", "coach").await;

        let (_, challenge) = send(
            &app,
            Method::POST,
            "/challenges",
            Some(&coach),
            Some(json!({ "title": "run", "is_public": true })),
        )
        .await;
        let id = challenge["id"].as_i64().unwrap();

        send(&app, Method::POST, &format!("/challenges/{id}/join"), Some(&coach), None).await;
        send(
            &app,
            Method::POST,
            &format!("/challenges/{id}/progress"),
            Some(&coach),
            Some(json!({ "date": "2026-08-01", "completed": true })),
        )
        .await;

        let (status, bytes) =
            send_raw(&app, Method::GET, "/reports/progress.csv", Some(&coach), None).await;
        assert_eq!(status, StatusCode::OK);

        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(csv, "challenge,date,completed\nrun,2026-08-01,true\n");
    }

    #[tokio::test]
    async fn test_logout_over_http() {
        let app = app().await;
        let ana = login_as(&app, "ana", "user").await;

        let (status, _) = send(&app, Method::POST, "/auth/logout", Some(&ana), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, Method::GET, "/profile", Some(&ana), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
