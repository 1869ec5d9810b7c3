pub mod achievement;
pub mod challenge;
pub mod progress;
pub mod user;
