//! Postgres implementation of [`Store`].
//!
//! Queries are runtime-bound (`sqlx::query` / `query_as`); the uniqueness
//! constraints in [`SCHEMA`] are the concurrency mechanism, and every
//! idempotent insert goes through `ON CONFLICT`. The two point mutations
//! run inside a transaction that first locks the user row, so concurrent
//! credits/debits for the same user serialize instead of losing updates.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::db::prelude::*;
use crate::db::store::award_due;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role_id SMALLINT NOT NULL DEFAULT 2,
    points BIGINT NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS challenges (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    duration_days INTEGER NOT NULL DEFAULT 7,
    is_public BOOLEAN NOT NULL DEFAULT false,
    creator_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    points_per_day BIGINT NOT NULL DEFAULT 10,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_challenges_created ON challenges(created_at DESC);

CREATE TABLE IF NOT EXISTS participations (
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    challenge_id BIGINT NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    joined_at TIMESTAMP NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, challenge_id)
);

CREATE TABLE IF NOT EXISTS progress_entries (
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    challenge_id BIGINT NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    entry_date DATE NOT NULL,
    completed BOOLEAN NOT NULL DEFAULT false,
    PRIMARY KEY (user_id, challenge_id, entry_date)
);

CREATE INDEX IF NOT EXISTS idx_progress_user_date ON progress_entries(user_id, entry_date DESC);

CREATE TABLE IF NOT EXISTS comments (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    challenge_id BIGINT NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    message TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS achievements (
    id BIGSERIAL PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    cost BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS achievement_redemptions (
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    achievement_id BIGINT NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
    redeemed_at TIMESTAMP NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, achievement_id)
);
"#;

mod sql_fragment {
    pub const USER_FIELDS: &str =
        "id, username, display_name, password_hash, role_id, points, level, created_at";

    pub const CHALLENGE_FIELDS: &str =
        "id, title, description, duration_days, is_public, creator_id, points_per_day, created_at";
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply the schema; `CREATE ... IF NOT EXISTS` makes this
    /// safe to run on every startup.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!("postgres store ready");

        Ok(Self { pool })
    }
}

/// Fold constraint violations back into the store taxonomy: unique conflicts
/// are duplicates, foreign-key misses mean the referenced row is gone.
fn map_constraint(e: sqlx::Error, table: &'static str) -> StoreError {
    if let sqlx::Error::Database(ref db) = e {
        match db.code().as_deref() {
            Some("23505") => return StoreError::Duplicate { table },
            Some("23503") => return StoreError::NotFound { table },
            _ => {}
        }
    }

    StoreError::Sqlx(e)
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self, user))]
    async fn create_user(&self, user: NewUser) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (username, display_name, password_hash, role_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_constraint(e, "users"))
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            sql_fragment::USER_FIELDS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE username = $1",
            sql_fragment::USER_FIELDS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users ORDER BY id ASC",
            sql_fragment::USER_FIELDS
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_display_name(&self, user_id: i64, display_name: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET display_name = $1 WHERE id = $2")
            .bind(display_name)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { table: "users" });
        }
        Ok(())
    }

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { table: "users" });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset_points(&self, user_id: i64) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET points = 0, level = 1 WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { table: "users" });
        }
        Ok(())
    }

    async fn insert_session(&self, token: &str, user_id: i64) -> StoreResult<()> {
        sqlx::query("INSERT INTO sessions (token, user_id) VALUES ($1, $2)")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_constraint(e, "users"))?;

        Ok(())
    }

    async fn session_user(&self, token: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.display_name, u.password_hash,
                   u.role_id, u.points, u.level, u.created_at
            FROM users u
            JOIN sessions s ON s.user_id = u.id
            WHERE s.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self, challenge))]
    async fn insert_challenge(&self, challenge: NewChallenge) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO challenges
                (title, description, duration_days, is_public, creator_id, points_per_day)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&challenge.title)
        .bind(&challenge.description)
        .bind(challenge.duration_days)
        .bind(challenge.is_public)
        .bind(challenge.creator_id)
        .bind(challenge.points_per_day)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_constraint(e, "users"))
    }

    async fn challenge_by_id(&self, id: i64) -> StoreResult<Option<Challenge>> {
        Ok(sqlx::query_as::<_, Challenge>(&format!(
            "SELECT {} FROM challenges WHERE id = $1",
            sql_fragment::CHALLENGE_FIELDS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_challenge(&self, id: i64, update: ChallengeUpdate) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE challenges
            SET title = $1,
                description = $2,
                duration_days = $3,
                is_public = $4,
                points_per_day = $5
            WHERE id = $6
            "#,
        )
        .bind(&update.title)
        .bind(&update.description)
        .bind(update.duration_days)
        .bind(update.is_public)
        .bind(update.points_per_day)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { table: "challenges" });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_challenge(&self, id: i64) -> StoreResult<()> {
        // participations/progress/comments go with the FK cascade
        let result = sqlx::query("DELETE FROM challenges WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { table: "challenges" });
        }
        Ok(())
    }

    async fn list_visible_challenges(&self, viewer_id: i64) -> StoreResult<Vec<Challenge>> {
        Ok(sqlx::query_as::<_, Challenge>(&format!(
            r#"
            SELECT {}
            FROM challenges
            WHERE is_public OR creator_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
            sql_fragment::CHALLENGE_FIELDS
        ))
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_owned_challenges(&self, creator_id: i64) -> StoreResult<Vec<Challenge>> {
        Ok(sqlx::query_as::<_, Challenge>(&format!(
            r#"
            SELECT {}
            FROM challenges
            WHERE creator_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
            sql_fragment::CHALLENGE_FIELDS
        ))
        .bind(creator_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_all_challenges(&self) -> StoreResult<Vec<Challenge>> {
        Ok(sqlx::query_as::<_, Challenge>(&format!(
            "SELECT {} FROM challenges ORDER BY created_at DESC, id DESC",
            sql_fragment::CHALLENGE_FIELDS
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn count_public_challenges(&self) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM challenges WHERE is_public")
                .fetch_one(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self))]
    async fn join_challenge(&self, user_id: i64, challenge_id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO participations (user_id, challenge_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, challenge_id)
            DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(challenge_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_constraint(e, "challenges"))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn leave_challenge(&self, user_id: i64, challenge_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM participations WHERE user_id = $1 AND challenge_id = $2")
            .bind(user_id)
            .bind(challenge_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn is_participant(&self, user_id: i64, challenge_id: i64) -> StoreResult<bool> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM participations WHERE user_id = $1 AND challenge_id = $2)",
        )
        .bind(user_id)
        .bind(challenge_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn count_participations(&self, user_id: i64) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM participations WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn list_participants(&self, challenge_id: i64) -> StoreResult<Vec<Participant>> {
        Ok(sqlx::query_as::<_, Participant>(
            r#"
            SELECT u.id AS user_id, u.username, u.display_name, p.joined_at
            FROM participations p
            JOIN users u ON u.id = p.user_id
            WHERE p.challenge_id = $1
            ORDER BY p.joined_at DESC, u.id DESC
            "#,
        )
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn mark_progress(
        &self,
        user_id: i64,
        challenge_id: i64,
        date: NaiveDate,
        completed: bool,
    ) -> StoreResult<MarkOutcome> {
        let mut tx = self.pool.begin().await?;

        // lock the user row first: concurrent marks for the same user
        // serialize here, so the transition check and the credit cannot race
        let points = sqlx::query_scalar::<_, i64>("SELECT points FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if points.is_none() {
            return Err(StoreError::NotFound { table: "users" });
        }

        let points_per_day = sqlx::query_scalar::<_, i64>(
            "SELECT points_per_day FROM challenges WHERE id = $1",
        )
        .bind(challenge_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound { table: "challenges" })?;

        let prior = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT completed FROM progress_entries
            WHERE user_id = $1 AND challenge_id = $2 AND entry_date = $3
            "#,
        )
        .bind(user_id)
        .bind(challenge_id)
        .bind(date)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO progress_entries (user_id, challenge_id, entry_date, completed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, challenge_id, entry_date)
            DO UPDATE SET completed = EXCLUDED.completed
            "#,
        )
        .bind(user_id)
        .bind(challenge_id)
        .bind(date)
        .bind(completed)
        .execute(&mut *tx)
        .await?;

        let mut awarded = 0;
        if award_due(prior, completed) {
            sqlx::query("UPDATE users SET points = points + $1 WHERE id = $2")
                .bind(points_per_day)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            awarded = points_per_day;
        }

        tx.commit().await?;
        Ok(MarkOutcome { prior, awarded })
    }

    async fn list_progress(
        &self,
        user_id: i64,
        limit: Option<i64>,
    ) -> StoreResult<Vec<ProgressRow>> {
        Ok(sqlx::query_as::<_, ProgressRow>(
            r#"
            SELECT c.title AS challenge, p.entry_date, p.completed
            FROM progress_entries p
            JOIN challenges c ON c.id = p.challenge_id
            WHERE p.user_id = $1
            ORDER BY p.entry_date DESC, c.title ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_comment(
        &self,
        user_id: i64,
        challenge_id: i64,
        message: &str,
    ) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO comments (user_id, challenge_id, message)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(challenge_id)
        .bind(message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_constraint(e, "challenges"))
    }

    async fn list_comments(&self, challenge_id: i64) -> StoreResult<Vec<CommentRow>> {
        Ok(sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT c.id, c.user_id, u.username, c.message, c.created_at
            FROM comments c
            JOIN users u ON u.id = c.user_id
            WHERE c.challenge_id = $1
            ORDER BY c.created_at DESC, c.id DESC
            "#,
        )
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, achievement))]
    async fn insert_achievement(&self, achievement: NewAchievement) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO achievements (code, name, description, cost)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&achievement.code)
        .bind(&achievement.name)
        .bind(&achievement.description)
        .bind(achievement.cost)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_constraint(e, "achievements"))
    }

    #[instrument(skip(self))]
    async fn delete_achievement(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM achievements WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { table: "achievements" });
        }
        Ok(())
    }

    async fn list_achievements_for(&self, user_id: i64) -> StoreResult<Vec<AchievementStatus>> {
        Ok(sqlx::query_as::<_, AchievementStatus>(
            r#"
            SELECT a.id, a.code, a.name, a.description, a.cost,
                   (r.user_id IS NOT NULL) AS unlocked
            FROM achievements a
            LEFT JOIN achievement_redemptions r
                ON r.achievement_id = a.id AND r.user_id = $1
            ORDER BY a.cost ASC, a.id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_unlocked(&self, user_id: i64) -> StoreResult<Vec<Achievement>> {
        Ok(sqlx::query_as::<_, Achievement>(
            r#"
            SELECT a.id, a.code, a.name, a.description, a.cost
            FROM achievements a
            JOIN achievement_redemptions r ON r.achievement_id = a.id
            WHERE r.user_id = $1
            ORDER BY r.redeemed_at DESC, a.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn redeem_achievement(
        &self,
        user_id: i64,
        achievement_id: i64,
    ) -> StoreResult<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(cost) =
            sqlx::query_scalar::<_, i64>("SELECT cost FROM achievements WHERE id = $1")
                .bind(achievement_id)
                .fetch_optional(&mut *tx)
                .await?
        else {
            return Ok(RedeemOutcome::NotFound);
        };

        // per-user serialization point for the check-and-debit
        let points = sqlx::query_scalar::<_, i64>("SELECT points FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound { table: "users" })?;

        let redeemed = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM achievement_redemptions
                WHERE user_id = $1 AND achievement_id = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(achievement_id)
        .fetch_one(&mut *tx)
        .await?;

        if redeemed {
            return Ok(RedeemOutcome::AlreadyRedeemed);
        }

        if points < cost {
            return Ok(RedeemOutcome::InsufficientPoints { points, cost });
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO achievement_redemptions (user_id, achievement_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, achievement_id)
            DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(achievement_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Ok(RedeemOutcome::AlreadyRedeemed);
        }

        let remaining = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET points = points - $1 WHERE id = $2 RETURNING points",
        )
        .bind(cost)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RedeemOutcome::Unlocked { remaining })
    }
}
