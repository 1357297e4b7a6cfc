//! Task board sync hub library.
//!
//! Exposes the hub for use in tests and embedding. The hub accepts
//! WebSocket connections, sends each a snapshot of the board, applies
//! intents to the task store, and broadcasts the results to every client.

pub mod config;
pub mod hub;
pub mod store;
pub mod upload;
