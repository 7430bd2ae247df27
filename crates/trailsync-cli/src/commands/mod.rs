pub mod common;
pub mod config;
pub mod conflicts;
pub mod enqueue;
pub mod retry;
pub mod status;
pub mod sync;
