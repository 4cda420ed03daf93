//! Telegram client boundary: what the wrapped library offers and emits.

pub mod client;
pub mod types;
