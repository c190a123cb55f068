// Public API for integration tests and potential library usage

pub mod abuse;
pub mod api;
pub mod auth;
pub mod botdetect;
pub mod janitor;
pub mod protocol;
pub mod session;
pub mod state;
pub mod stats;
pub mod types;
pub mod ws;
