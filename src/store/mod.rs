//! Persistence layer
//!
//! - `traits` - the `Store`/`StoreTx` seams the engine is written against
//! - `memory` - in-memory backend with per-row locks
//! - `postgres` - PostgreSQL backend (`postgres` feature)

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use memory::{MemoryStore, MemoryTx};
#[cfg(feature = "postgres")]
pub use postgres::{PgStore, PgTx};
pub use traits::{NewReserveDetail, Store, StoreTx};
