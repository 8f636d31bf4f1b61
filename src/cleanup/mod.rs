//! Deferred cleanup queue: durable task records, the store that holds
//! them, and the runner that drains due tasks against the entity graph.

pub mod record;
pub mod runner;
pub mod store;

mod charm;
mod machine;
mod model;
mod storage;
mod unit;

pub use record::{
    CleanupKind, CleanupRecord, decode_flag_pair, decode_force_flag, decode_model_params,
};
pub use runner::CleanupRunner;
pub use store::{CleanupStore, InMemoryCleanupStore};
