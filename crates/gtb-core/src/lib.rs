//! Core domain + application logic for the Gemini Telegram ask-bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and Gemini live
//! behind ports (traits) implemented in adapter crates.

pub mod allowlist;
pub mod answer;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod pending;
pub mod security;

pub use errors::{Error, Result};
