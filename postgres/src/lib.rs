//! `PostgreSQL` inventory store for the raffle number inventory.
//!
//! This crate provides the production implementation of the `InventoryStore` and
//! `InventoryTx` traits from `raffle-inventory-core`. It uses sqlx and supports:
//!
//! - Occupancy bitmaps stored as `BYTEA` chunks of 65,536 numbers, row-locked per chunk
//! - A partition index with a `CHECK` constraint on its counts
//! - The reservation/sale ledger with a partial index for the expiry scan
//! - Idempotent purchase receipts
//! - Embedded migrations
//!
//! # Example
//!
//! ```ignore
//! use raffle_inventory_postgres::PostgresInventoryStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresInventoryStore::connect("postgres://localhost/raffle", 20).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod store;
mod tx;

pub use store::PostgresInventoryStore;
pub use tx::PostgresTx;
