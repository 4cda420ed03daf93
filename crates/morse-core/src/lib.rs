//! Core of the `morse` connection manager: Telegram accounts exposed to an
//! IM middleware as connections, contacts, presences and channels.
//!
//! The crate knows neither the wire protocol of the middleware nor the
//! Telegram client library. Both live behind ports implemented in adapter
//! crates.

pub mod channel;
pub mod config;
pub mod connection;
pub mod contact_info;
pub mod dispatcher;
pub mod errors;
pub mod handles;
pub mod logging;
pub mod peer;
pub mod ports;
pub mod presence;
pub mod protocol;
pub mod roster;
pub mod storage;
pub mod telegram;

pub use errors::{Error, Result};
