//! In-memory implementation of [`Store`].
//!
//! Selected at startup when `DATABASE_URL` is unset; also the collaborator
//! the service and router tests run against. One `RwLock` guards the whole
//! state, so every mutation (in particular the credit/debit
//! read-modify-writes) is serialized through the write guard.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use tokio::sync::RwLock;

use crate::db::prelude::*;
use crate::db::store::award_due;

#[derive(Debug, Clone)]
struct StoredComment {
    id: i64,
    user_id: i64,
    challenge_id: i64,
    message: String,
    created_at: NaiveDateTime,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: HashMap<i64, User>,
    sessions: HashMap<String, i64>,
    challenges: HashMap<i64, Challenge>,
    participations: HashMap<(i64, i64), NaiveDateTime>,
    progress: HashMap<(i64, i64, NaiveDate), bool>,
    comments: Vec<StoredComment>,
    achievements: HashMap<i64, Achievement>,
    redemptions: HashMap<(i64, i64), NaiveDateTime>,
}

impl Inner {
    fn alloc_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[async_trait]
impl Store for MemStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;

        if inner.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate { table: "users" });
        }

        let id = inner.alloc_id();
        inner.users.insert(
            id,
            User {
                id,
                username: user.username,
                display_name: user.display_name,
                password_hash: user.password_hash,
                role_id: user.role_id,
                points: 0,
                level: 1,
                created_at: now(),
            },
        );

        Ok(id)
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by_key(|u| u.id);

        Ok(users)
    }

    async fn update_display_name(&self, user_id: i64, display_name: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound { table: "users" })?;

        user.display_name = display_name.to_string();
        Ok(())
    }

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound { table: "users" })?;

        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn reset_points(&self, user_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound { table: "users" })?;

        user.points = 0;
        user.level = 1;
        Ok(())
    }

    async fn insert_session(&self, token: &str, user_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::NotFound { table: "users" });
        }

        inner.sessions.insert(token.to_string(), user_id);
        Ok(())
    }

    async fn session_user(&self, token: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .get(token)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        self.inner.write().await.sessions.remove(token);
        Ok(())
    }

    async fn insert_challenge(&self, challenge: NewChallenge) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;
        let id = inner.alloc_id();

        inner.challenges.insert(
            id,
            Challenge {
                id,
                title: challenge.title,
                description: challenge.description,
                duration_days: challenge.duration_days,
                is_public: challenge.is_public,
                creator_id: challenge.creator_id,
                points_per_day: challenge.points_per_day,
                created_at: now(),
            },
        );

        Ok(id)
    }

    async fn challenge_by_id(&self, id: i64) -> StoreResult<Option<Challenge>> {
        Ok(self.inner.read().await.challenges.get(&id).cloned())
    }

    async fn update_challenge(&self, id: i64, update: ChallengeUpdate) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let challenge = inner
            .challenges
            .get_mut(&id)
            .ok_or(StoreError::NotFound { table: "challenges" })?;

        challenge.title = update.title;
        challenge.description = update.description;
        challenge.duration_days = update.duration_days;
        challenge.is_public = update.is_public;
        challenge.points_per_day = update.points_per_day;

        Ok(())
    }

    async fn delete_challenge(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .challenges
            .remove(&id)
            .ok_or(StoreError::NotFound { table: "challenges" })?;

        inner.participations.retain(|(_, ch), _| *ch != id);
        inner.progress.retain(|(_, ch, _), _| *ch != id);
        inner.comments.retain(|c| c.challenge_id != id);

        Ok(())
    }

    async fn list_visible_challenges(&self, viewer_id: i64) -> StoreResult<Vec<Challenge>> {
        let inner = self.inner.read().await;
        let mut challenges: Vec<Challenge> = inner
            .challenges
            .values()
            .filter(|c| c.is_public || c.creator_id == viewer_id)
            .cloned()
            .collect();

        challenges.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(challenges)
    }

    async fn list_owned_challenges(&self, creator_id: i64) -> StoreResult<Vec<Challenge>> {
        let inner = self.inner.read().await;
        let mut challenges: Vec<Challenge> = inner
            .challenges
            .values()
            .filter(|c| c.creator_id == creator_id)
            .cloned()
            .collect();

        challenges.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(challenges)
    }

    async fn list_all_challenges(&self) -> StoreResult<Vec<Challenge>> {
        let inner = self.inner.read().await;
        let mut challenges: Vec<Challenge> = inner.challenges.values().cloned().collect();
        challenges.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(challenges)
    }

    async fn count_public_challenges(&self) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner.challenges.values().filter(|c| c.is_public).count() as i64)
    }

    async fn join_challenge(&self, user_id: i64, challenge_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.challenges.contains_key(&challenge_id) {
            return Err(StoreError::NotFound { table: "challenges" });
        }

        // re-join is a no-op, keep the original join timestamp
        inner
            .participations
            .entry((user_id, challenge_id))
            .or_insert_with(now);

        Ok(())
    }

    async fn leave_challenge(&self, user_id: i64, challenge_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.participations.remove(&(user_id, challenge_id));

        Ok(())
    }

    async fn is_participant(&self, user_id: i64, challenge_id: i64) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.participations.contains_key(&(user_id, challenge_id)))
    }

    async fn count_participations(&self, user_id: i64) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .participations
            .keys()
            .filter(|(uid, _)| *uid == user_id)
            .count() as i64)
    }

    async fn list_participants(&self, challenge_id: i64) -> StoreResult<Vec<Participant>> {
        let inner = self.inner.read().await;
        let mut participants: Vec<Participant> = inner
            .participations
            .iter()
            .filter(|((_, ch), _)| *ch == challenge_id)
            .filter_map(|((uid, _), joined_at)| {
                inner.users.get(uid).map(|u| Participant {
                    user_id: u.id,
                    username: u.username.clone(),
                    display_name: u.display_name.clone(),
                    joined_at: *joined_at,
                })
            })
            .collect();

        participants.sort_by(|a, b| (b.joined_at, b.user_id).cmp(&(a.joined_at, a.user_id)));
        Ok(participants)
    }

    async fn mark_progress(
        &self,
        user_id: i64,
        challenge_id: i64,
        date: NaiveDate,
        completed: bool,
    ) -> StoreResult<MarkOutcome> {
        let mut inner = self.inner.write().await;

        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::NotFound { table: "users" });
        }
        let points_per_day = inner
            .challenges
            .get(&challenge_id)
            .ok_or(StoreError::NotFound { table: "challenges" })?
            .points_per_day;

        let prior = inner.progress.insert((user_id, challenge_id, date), completed);

        let mut awarded = 0;
        if award_due(prior, completed) {
            if let Some(user) = inner.users.get_mut(&user_id) {
                user.points += points_per_day;
                awarded = points_per_day;
            }
        }

        Ok(MarkOutcome { prior, awarded })
    }

    async fn list_progress(
        &self,
        user_id: i64,
        limit: Option<i64>,
    ) -> StoreResult<Vec<ProgressRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ProgressRow> = inner
            .progress
            .iter()
            .filter(|((uid, _, _), _)| *uid == user_id)
            .filter_map(|((_, ch, date), completed)| {
                inner.challenges.get(ch).map(|c| ProgressRow {
                    challenge: c.title.clone(),
                    entry_date: *date,
                    completed: *completed,
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            b.entry_date
                .cmp(&a.entry_date)
                .then_with(|| a.challenge.cmp(&b.challenge))
        });

        if let Some(limit) = limit {
            rows.truncate(limit.max(0) as usize);
        }

        Ok(rows)
    }

    async fn insert_comment(
        &self,
        user_id: i64,
        challenge_id: i64,
        message: &str,
    ) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;
        if !inner.challenges.contains_key(&challenge_id) {
            return Err(StoreError::NotFound { table: "challenges" });
        }

        let id = inner.alloc_id();
        inner.comments.push(StoredComment {
            id,
            user_id,
            challenge_id,
            message: message.to_string(),
            created_at: now(),
        });

        Ok(id)
    }

    async fn list_comments(&self, challenge_id: i64) -> StoreResult<Vec<CommentRow>> {
        let inner = self.inner.read().await;
        let mut comments: Vec<CommentRow> = inner
            .comments
            .iter()
            .filter(|c| c.challenge_id == challenge_id)
            .filter_map(|c| {
                inner.users.get(&c.user_id).map(|u| CommentRow {
                    id: c.id,
                    user_id: c.user_id,
                    username: u.username.clone(),
                    message: c.message.clone(),
                    created_at: c.created_at,
                })
            })
            .collect();

        comments.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(comments)
    }

    async fn insert_achievement(&self, achievement: NewAchievement) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;

        if inner.achievements.values().any(|a| a.code == achievement.code) {
            return Err(StoreError::Duplicate { table: "achievements" });
        }

        let id = inner.alloc_id();
        inner.achievements.insert(
            id,
            Achievement {
                id,
                code: achievement.code,
                name: achievement.name,
                description: achievement.description,
                cost: achievement.cost,
            },
        );

        Ok(id)
    }

    async fn delete_achievement(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .achievements
            .remove(&id)
            .ok_or(StoreError::NotFound { table: "achievements" })?;

        inner.redemptions.retain(|(_, ach), _| *ach != id);
        Ok(())
    }

    async fn list_achievements_for(&self, user_id: i64) -> StoreResult<Vec<AchievementStatus>> {
        let inner = self.inner.read().await;
        let mut statuses: Vec<AchievementStatus> = inner
            .achievements
            .values()
            .map(|a| AchievementStatus {
                id: a.id,
                code: a.code.clone(),
                name: a.name.clone(),
                description: a.description.clone(),
                cost: a.cost,
                unlocked: inner.redemptions.contains_key(&(user_id, a.id)),
            })
            .collect();

        statuses.sort_by(|a, b| (a.cost, a.id).cmp(&(b.cost, b.id)));
        Ok(statuses)
    }

    async fn list_unlocked(&self, user_id: i64) -> StoreResult<Vec<Achievement>> {
        let inner = self.inner.read().await;
        let mut unlocked: Vec<(NaiveDateTime, Achievement)> = inner
            .redemptions
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .filter_map(|((_, ach), redeemed_at)| {
                inner.achievements.get(ach).map(|a| (*redeemed_at, a.clone()))
            })
            .collect();

        unlocked.sort_by(|a, b| (b.0, b.1.id).cmp(&(a.0, a.1.id)));
        Ok(unlocked.into_iter().map(|(_, a)| a).collect())
    }

    async fn redeem_achievement(
        &self,
        user_id: i64,
        achievement_id: i64,
    ) -> StoreResult<RedeemOutcome> {
        let mut inner = self.inner.write().await;

        let Some(cost) = inner.achievements.get(&achievement_id).map(|a| a.cost) else {
            return Ok(RedeemOutcome::NotFound);
        };

        if inner.redemptions.contains_key(&(user_id, achievement_id)) {
            return Ok(RedeemOutcome::AlreadyRedeemed);
        }

        let points = inner
            .users
            .get(&user_id)
            .ok_or(StoreError::NotFound { table: "users" })?
            .points;

        if points < cost {
            return Ok(RedeemOutcome::InsufficientPoints { points, cost });
        }

        inner.redemptions.insert((user_id, achievement_id), now());
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::NotFound { table: "users" })?;
        user.points -= cost;

        Ok(RedeemOutcome::Unlocked { remaining: user.points })
    }
}
