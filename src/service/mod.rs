//! Role-gated operations over a [`Store`].
//!
//! Everything here is a free async function taking `&dyn Store`, so the same
//! logic runs against Postgres in production and the in-memory store in
//! tests. Authorization is decided in this layer; the store below it trusts
//! its callers.

pub mod accounts;
pub mod achievements;
pub mod challenges;
pub mod progress;

use thiserror::Error;

use crate::db::prelude::StoreError;
use crate::util::password::PasswordError;

pub type ServiceResult<T> = core::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("insufficient points: have {points}, need {cost}")]
    InsufficientPoints { points: i64, cost: i64 },

    #[error("achievement already redeemed")]
    AlreadyRedeemed,

    #[error("password hashing failed")]
    Password(#[from] PasswordError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            // a missing referenced row is the caller's 404, not a fault
            StoreError::NotFound { table } => ServiceError::NotFound(table),
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::db::memory::MemStore;
    use crate::db::prelude::*;
    use crate::util::password;

    pub fn store() -> MemStore {
        MemStore::new()
    }

    /// Seed a user directly through the store and hand back its principal.
    pub async fn seed_user(store: &dyn Store, username: &str, role: Role) -> Principal {
        let id = store
            .create_user(NewUser {
                username: username.to_string(),
                display_name: username.to_string(),
                password_hash: password::hash_password("hunter2").unwrap(),
                role_id: role.id(),
            })
            .await
            .unwrap();

        Principal { user_id: id, role }
    }

    pub async fn seed_challenge(store: &dyn Store, creator: Principal, title: &str, public: bool) -> i64 {
        store
            .insert_challenge(NewChallenge {
                title: title.to_string(),
                description: String::new(),
                duration_days: 7,
                is_public: public,
                creator_id: creator.user_id,
                points_per_day: 10,
            })
            .await
            .unwrap()
    }

    pub async fn seed_achievement(store: &dyn Store, code: &str, cost: i64) -> i64 {
        store
            .insert_achievement(NewAchievement {
                code: code.to_string(),
                name: code.to_string(),
                description: String::new(),
                cost,
            })
            .await
            .unwrap()
    }

    pub async fn points_of(store: &dyn Store, user_id: i64) -> i64 {
        store.user_by_id(user_id).await.unwrap().unwrap().points
    }
}
