//! Parley reference server library.
//!
//! Exposes the chat server for use in tests and embedding. The server
//! accepts WebSocket connections keyed by announced identity, routes
//! messages and presence between users, and serves the paginated
//! history / unread-count / session-list HTTP endpoints.

pub mod config;
pub mod server;
pub mod store;
