//! Client-side conversation session manager for the Σ-Unlimited assistant.
//!
//! The [`service::ChatClient`] owns a [`store::SessionStore`] and keeps it
//! reconciled with a remote [`remote::ConversationBackend`]: optimistic user
//! messages, provisional → durable session ids, history import and
//! time-bucketed grouping for display.

pub mod bucket;
pub mod config;
pub mod errors;
pub mod importer;
pub mod models;
pub mod remote;
pub mod service;
pub mod store;

pub use bucket::DisplayGroup;
pub use config::ClientConfig;
pub use errors::ClientError;
pub use service::{ChatClient, SendOutcome};
