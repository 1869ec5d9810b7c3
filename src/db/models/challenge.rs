use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DURATION_DAYS: i32 = 7;
pub const DEFAULT_POINTS_PER_DAY: i64 = 10;

/// Base challenges table model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Challenge {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub duration_days: i32,
    pub is_public: bool,
    pub creator_id: i64,
    pub points_per_day: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub title: String,
    pub description: String,
    pub duration_days: i32,
    pub is_public: bool,
    pub creator_id: i64,
    pub points_per_day: i64,
}

/// Full-replace edit payload; the registry has no partial-field updates.
#[derive(Debug, Clone)]
pub struct ChallengeUpdate {
    pub title: String,
    pub description: String,
    pub duration_days: i32,
    pub is_public: bool,
    pub points_per_day: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Participant {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CommentRow {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub message: String,
    pub created_at: NaiveDateTime,
}
