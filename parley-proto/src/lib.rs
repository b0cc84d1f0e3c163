//! Shared protocol definitions for the Parley wire format and HTTP API.

pub mod api;
pub mod codec;
pub mod event;
pub mod message;
