//! Clients for external services used by the built-in agents.

pub mod chat;
