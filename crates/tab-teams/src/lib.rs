//! Bot Framework adapter.
//!
//! This crate implements the `tab-core` `ConnectorPort` over the Bot Framework
//! connector REST API and authenticates inbound requests.

pub mod auth;
pub mod connector;
pub mod credentials;
pub mod inbound;

pub use auth::TokenProvider;
pub use connector::ConnectorClient;
pub use credentials::{AppType, BotCredentials};
pub use inbound::InboundAuth;
