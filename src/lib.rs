//! Service health polling and transition notifications.
//!
//! A [`poller::Poller`] checks every registered service concurrently,
//! appends one result per service to the store, compares it with the
//! result stored before it and hands any transition to the
//! [`notifier::Notifier`], which fans out to webhooks and Telegram.

pub mod checker;
pub mod config;
pub mod error;
pub mod models;
pub mod notifier;
pub mod poller;
pub mod storage;
pub mod sync;
pub mod transition;
pub mod version;
