//! Core domain + application logic for the Teams AI bot.
//!
//! This crate is intentionally framework-agnostic. Bot Framework, OpenAI and the
//! HTTP surface live behind ports (traits) implemented in adapter crates.

pub mod activity;
pub mod bot;
pub mod config;
pub mod connector;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod health;
pub mod logging;
pub mod model;
pub mod planner;
pub mod prompts;

pub use errors::{Error, Result};
