pub mod memory;
pub mod models;
pub mod pg;
pub mod store;

pub mod prelude {
    pub use crate::db::models::achievement::{
        Achievement, AchievementStatus, NewAchievement, RedeemOutcome,
    };
    pub use crate::db::models::challenge::{
        Challenge, ChallengeUpdate, CommentRow, NewChallenge, Participant,
    };
    pub use crate::db::models::progress::{MarkOutcome, ProgressRow};
    pub use crate::db::models::user::{NewUser, Principal, Role, User};
    pub use crate::db::store::{Store, StoreError, StoreResult};
}
