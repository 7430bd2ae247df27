//! Shared service wrappers used across clients.

mod store;

pub use store::LocalStore;
