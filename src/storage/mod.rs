//! Storage module - block store, persisted chain state and block cache

mod error;
mod state;
mod store;
mod cache;
pub mod db;

pub use error::*;
pub use state::*;
pub use store::*;
pub use cache::*;
pub use db::SledStore;
