use chrono::NaiveDate;
use serde::Serialize;

/// One row of a user's progress history, joined with the challenge title.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProgressRow {
    pub challenge: String,
    pub entry_date: NaiveDate,
    pub completed: bool,
}

/// Result of a progress upsert.
///
/// `prior` is the completion state the (user, challenge, date) key held
/// before this call; `awarded` is the number of points credited, which is
/// non-zero only on a transition into the completed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkOutcome {
    pub prior: Option<bool>,
    pub awarded: i64,
}
