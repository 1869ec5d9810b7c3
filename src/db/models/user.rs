use core::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Closed role set, stored as a smallint discriminant.
///
/// Unknown discriminants decode as `User` rather than failing the row;
/// role-gated operations stay closed against bad data that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Coach,
}

impl Role {
    pub fn from_id(id: i16) -> Self {
        match id {
            1 => Role::Admin,
            3 => Role::Coach,
            _ => Role::User,
        }
    }

    pub fn id(self) -> i16 {
        match self {
            Role::Admin => 1,
            Role::User => 2,
            Role::Coach => 3,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::User => write!(f, "user"),
            Role::Coach => write!(f, "coach"),
        }
    }
}

/// Base users table model
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role_id: i16,
    pub points: i64,
    pub level: i32,
    pub created_at: NaiveDateTime,
}

impl User {
    pub fn role(&self) -> Role {
        Role::from_id(self.role_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub role_id: i16,
}

/// The resolved caller of an operation: fixed for the session's lifetime,
/// derived from the stored role id at session resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: i64,
    pub role: Role,
}

impl Principal {
    /// Capability check for owner-restricted mutations: admin overrides
    /// ownership, everyone else must be the owner.
    pub fn can_mutate(&self, owner_id: i64) -> bool {
        self.role == Role::Admin || self.user_id == owner_id
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Principal {
            user_id: user.id,
            role: user.role(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_role_id_mapping() {
        assert_eq!(Role::from_id(1), Role::Admin);
        assert_eq!(Role::from_id(2), Role::User);
        assert_eq!(Role::from_id(3), Role::Coach);
        assert_eq!(Role::from_id(99), Role::User);

        for role in [Role::Admin, Role::User, Role::Coach] {
            assert_eq!(Role::from_id(role.id()), role);
        }
    }

    #[test]
    fn test_admin_override() {
        let admin = Principal { user_id: 1, role: Role::Admin };
        let coach = Principal { user_id: 2, role: Role::Coach };

        assert!(admin.can_mutate(2));
        assert!(coach.can_mutate(2));
        assert!(!coach.can_mutate(1));
    }
}
