//! Task board client library.
//!
//! Connects to the sync hub, keeps a local mirror of the board, and uploads
//! attachments.

pub mod attach;
pub mod client;
pub mod config;
pub mod mirror;
pub mod render;
pub mod upload;
