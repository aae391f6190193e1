//! Domain model for the procurement platform core: the order aggregate
//! with its state machine, the CSV staging pipeline entities, and the
//! request/response shapes of the public API.
//!
//! Wire field names follow the platform's public (Spanish) API; Rust
//! identifiers stay English via serde renames.

mod api;
mod order;
mod staging;

pub use api::*;
pub use order::*;
pub use staging::*;
