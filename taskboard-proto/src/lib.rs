//! Shared task model and sync protocol definitions for the task board.

pub mod board;
pub mod codec;
pub mod sync;
pub mod task;
