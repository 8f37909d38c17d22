pub mod backend;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod export;
pub mod journal;
pub mod recorder;
pub mod store;

pub use wfrec_common::protocol;
pub use wfrec_common::state;
