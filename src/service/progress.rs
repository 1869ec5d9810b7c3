//! Daily progress marking, the points credit, and progress reporting.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::prelude::*;
use crate::service::{ServiceError, ServiceResult};

const DASHBOARD_RECENT: i64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressMark {
    pub date: Option<NaiveDate>,
    pub completed: bool,
}

#[derive(Debug, Serialize)]
pub struct ProgressMarked {
    pub date: NaiveDate,
    pub completed: bool,
    pub awarded: i64,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub public_challenges: i64,
    pub joined_challenges: i64,
    pub points: i64,
    pub level: i32,
    pub recent: Vec<ProgressRow>,
}

/// Upsert today's (or an explicit day's) entry for a joined challenge.
/// The store credits `points_per_day` only when the entry transitions into
/// completed; re-submitting a complete day and unmarking both award nothing.
pub async fn mark_progress(
    store: &dyn Store,
    principal: Principal,
    challenge_id: i64,
    mark: ProgressMark,
) -> ServiceResult<ProgressMarked> {
    let challenge = store
        .challenge_by_id(challenge_id)
        .await?
        .ok_or(ServiceError::NotFound("challenges"))?;

    if !challenge.is_public && !principal.can_mutate(challenge.creator_id) {
        return Err(ServiceError::NotFound("challenges"));
    }
    if !store.is_participant(principal.user_id, challenge_id).await? {
        return Err(ServiceError::Forbidden);
    }

    let date = mark.date.unwrap_or_else(|| Utc::now().date_naive());
    let outcome = store
        .mark_progress(principal.user_id, challenge_id, date, mark.completed)
        .await?;

    if outcome.awarded > 0 {
        info!(
            user = principal.user_id,
            challenge_id,
            %date,
            awarded = outcome.awarded,
            "progress credited"
        );
    }

    Ok(ProgressMarked {
        date,
        completed: mark.completed,
        awarded: outcome.awarded,
    })
}

pub async fn list_progress(
    store: &dyn Store,
    principal: Principal,
    limit: Option<i64>,
) -> ServiceResult<Vec<ProgressRow>> {
    if limit.is_some_and(|n| n < 0) {
        return Err(ServiceError::validation("limit must not be negative"));
    }

    Ok(store.list_progress(principal.user_id, limit).await?)
}

pub async fn dashboard(store: &dyn Store, principal: Principal) -> ServiceResult<Dashboard> {
    let user = store
        .user_by_id(principal.user_id)
        .await?
        .ok_or(ServiceError::NotFound("users"))?;

    Ok(Dashboard {
        public_challenges: store.count_public_challenges().await?,
        joined_challenges: store.count_participations(principal.user_id).await?,
        points: user.points,
        level: user.level,
        recent: store
            .list_progress(principal.user_id, Some(DASHBOARD_RECENT))
            .await?,
    })
}

/// Full progress history as CSV, header `challenge,date,completed`.
pub async fn progress_report_csv(store: &dyn Store, principal: Principal) -> ServiceResult<String> {
    let rows = store.list_progress(principal.user_id, None).await?;

    let mut csv = String::from("challenge,date,completed\n");
    for row in rows {
        csv.push_str(&csv_field(&row.challenge));
        csv.push(',');
        csv.push_str(&row.entry_date.to_string());
        csv.push(',');
        csv.push_str(if row.completed { "true" } else { "false" });
        csv.push('\n');
    }

    Ok(csv)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
