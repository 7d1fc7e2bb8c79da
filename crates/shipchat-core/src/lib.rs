//! Crew messaging core: channel identity, live message views with optimistic
//! sends and backward pagination, heartbeat-derived presence, retention sweeps
//! and report-threshold moderation, all over a pluggable [`store::DocumentStore`].

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod moderation;
pub mod presence;
pub mod retention;
pub mod send;
pub mod session;
pub mod store;

pub use channel::channel_id;
pub use client::CrewClient;
pub use config::ChatConfig;
pub use error::ChatError;
pub use messages::{ChatMessage, Delivery, MessageStore, Subscription};
pub use moderation::{Moderation, ReportOutcome};
pub use presence::{PresenceTracker, is_online};
pub use retention::RetentionSweeper;
pub use send::SendOutcome;
pub use session::Session;
pub use store::{DocumentStore, SqliteStore, StoreChange};
