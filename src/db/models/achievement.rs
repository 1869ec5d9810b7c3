use serde::Serialize;

/// Base achievements table model
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Achievement {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: String,
    pub cost: i64,
}

#[derive(Debug, Clone)]
pub struct NewAchievement {
    pub code: String,
    pub name: String,
    pub description: String,
    pub cost: i64,
}

/// Achievement listing entry with the viewer's unlock state.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AchievementStatus {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: String,
    pub cost: i64,
    pub unlocked: bool,
}

/// Outcome of an atomic redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    Unlocked { remaining: i64 },
    InsufficientPoints { points: i64, cost: i64 },
    AlreadyRedeemed,
    NotFound,
}
