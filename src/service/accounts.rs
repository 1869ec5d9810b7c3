//! Registration, sessions, profiles and the admin surface.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::prelude::*;
use crate::service::{ServiceError, ServiceResult};
use crate::util::password;

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub user: User,
    pub unlocked: Vec<Achievement>,
}

#[derive(Debug, Serialize)]
pub struct AdminOverview {
    pub users: Vec<User>,
    pub challenges: Vec<Challenge>,
}

pub async fn register(store: &dyn Store, registration: Registration) -> ServiceResult<i64> {
    let username = registration.username.trim().to_string();
    if username.is_empty() {
        return Err(ServiceError::validation("username must not be empty"));
    }
    if registration.password.is_empty() {
        return Err(ServiceError::validation("password must not be empty"));
    }

    let display_name = registration
        .display_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| username.clone());

    let role = registration.role.unwrap_or(Role::User);
    let password_hash = password::hash_password(&registration.password)?;

    let id = store
        .create_user(NewUser {
            username: username.clone(),
            display_name,
            password_hash,
            role_id: role.id(),
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate { .. } => ServiceError::validation("username already taken"),
            other => other.into(),
        })?;

    info!(%username, %role, "registered user");
    Ok(id)
}

/// Successful login mints a fresh session token; the credential failure and
/// the unknown-username case are indistinguishable to the caller.
pub async fn login(store: &dyn Store, credentials: Credentials) -> ServiceResult<String> {
    let user = store
        .user_by_username(credentials.username.trim())
        .await?
        .ok_or(ServiceError::Unauthorized)?;

    if !password::verify_password(&credentials.password, &user.password_hash) {
        return Err(ServiceError::Unauthorized);
    }

    let token = Uuid::new_v4().to_string();
    store.insert_session(&token, user.id).await?;

    info!(username = %user.username, "session opened");
    Ok(token)
}

pub async fn logout(store: &dyn Store, token: &str) -> ServiceResult<()> {
    store.delete_session(token).await?;
    Ok(())
}

/// Resolve a bearer token to the stored user, or `Unauthorized`.
pub async fn authorize(store: &dyn Store, token: &str) -> ServiceResult<User> {
    store
        .session_user(token)
        .await?
        .ok_or(ServiceError::Unauthorized)
}

pub async fn profile(store: &dyn Store, principal: Principal) -> ServiceResult<ProfileView> {
    let user = store
        .user_by_id(principal.user_id)
        .await?
        .ok_or(ServiceError::NotFound("users"))?;
    let unlocked = store.list_unlocked(principal.user_id).await?;

    Ok(ProfileView { user, unlocked })
}

pub async fn update_profile(
    store: &dyn Store,
    principal: Principal,
    patch: ProfilePatch,
) -> ServiceResult<()> {
    if let Some(display_name) = patch.display_name {
        let display_name = display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(ServiceError::validation("display name must not be empty"));
        }
        store
            .update_display_name(principal.user_id, &display_name)
            .await?;
    }

    if let Some(new_password) = patch.password {
        if new_password.is_empty() {
            return Err(ServiceError::validation("password must not be empty"));
        }
        let hash = password::hash_password(&new_password)?;
        store.update_password_hash(principal.user_id, &hash).await?;
    }

    Ok(())
}

pub async fn admin_overview(store: &dyn Store, principal: Principal) -> ServiceResult<AdminOverview> {
    if !principal.is_admin() {
        return Err(ServiceError::Forbidden);
    }

    Ok(AdminOverview {
        users: store.list_users().await?,
        challenges: store.list_all_challenges().await?,
    })
}

pub async fn admin_reset_points(
    store: &dyn Store,
    principal: Principal,
    user_id: i64,
) -> ServiceResult<()> {
    if !principal.is_admin() {
        return Err(ServiceError::Forbidden);
    }

    store.reset_points(user_id).await?;
    info!(user_id, "points reset");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::testutil;

    fn registration(username: &str) -> Registration {
        Registration {
            username: username.to_string(),
            password: "hunter2".to_string(),
            display_name: None,
            role: None,
        }
    }

    #[tokio::test]
    async fn test_register_login_roundtrip() {
        let store = testutil::store();

        let id = register(&store, registration("ana")).await.unwrap();
        let token = login(
            &store,
            Credentials {
                username: "ana".to_string(),
                password: "hunter2".to_string(),
            },
        )
        .await
        .unwrap();

        let user = authorize(&store, &token).await.unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role(), Role::User);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_and_duplicate() {
        let store = testutil::store();

        let mut empty = registration("");
        empty.username = "   ".to_string();
        assert!(matches!(
            register(&store, empty).await,
            Err(ServiceError::Validation(_))
        ));

        register(&store, registration("ana")).await.unwrap();
        assert!(matches!(
            register(&store, registration("ana")).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_login_bad_password() {
        let store = testutil::store();
        register(&store, registration("ana")).await.unwrap();

        let result = login(
            &store,
            Credentials {
                username: "ana".to_string(),
                password: "wrong".to_string(),
            },
        )
        .await;

        assert!(matches!(result, Err(ServiceError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_logout_invalidates_token() {
        let store = testutil::store();
        register(&store, registration("ana")).await.unwrap();

        let token = login(
            &store,
            Credentials {
                username: "ana".to_string(),
                password: "hunter2".to_string(),
            },
        )
        .await
        .unwrap();

        logout(&store, &token).await.unwrap();
        assert!(matches!(
            authorize(&store, &token).await,
            Err(ServiceError::Unauthorized)
        ));

        // repeat logout stays a silent success
        logout(&store, &token).await.unwrap();
    }

    #[tokio::test]
    async fn test_admin_overview_gate() {
        let store = testutil::store();
        let admin = testutil::seed_user(&store, "root", Role::Admin).await;
        let user = testutil::seed_user(&store, "ana", Role::User).await;

        let overview = admin_overview(&store, admin).await.unwrap();
        assert_eq!(overview.users.len(), 2);

        assert!(matches!(
            admin_overview(&store, user).await,
            Err(ServiceError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_reset_points_clears_balance() {
        let store = testutil::store();
        let admin = testutil::seed_user(&store, "root", Role::Admin).await;
        let user = testutil::seed_user(&store, "ana", Role::User).await;

        let challenge = testutil::seed_challenge(&store, admin, "run", true).await;
        store.join_challenge(user.user_id, challenge).await.unwrap();
        store
            .mark_progress(
                user.user_id,
                challenge,
                chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
                true,
            )
            .await
            .unwrap();
        assert_eq!(testutil::points_of(&store, user.user_id).await, 10);

        admin_reset_points(&store, admin, user.user_id).await.unwrap();
        assert_eq!(testutil::points_of(&store, user.user_id).await, 0);

        // absent target surfaces as a missing row
        assert!(matches!(
            admin_reset_points(&store, admin, 9999).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
