//! # Executor Crate
//!
//! This crate owns every trading decision for the configured instrument basket
//! and the lifecycle of the orders those decisions produce.
//!
//! ## Architectural Principles
//!
//! - **Single Writer Ledger:** The `InstrumentLedger` is only ever mutated by the
//!   task that currently owns the `Executor`. While running, that is the decision
//!   task; after `ExecutorHandle::stop` it is the caller again. No lock guards it.
//! - **Shared, Replaced State:** Last prices and the account snapshot are written
//!   by stream tasks and read by the decision task through `StateCache`. Writes
//!   replace whole values under a short-lived lock.
//! - **Business No-ops Are Not Errors:** Unaffordable buys, unprofitable sells and
//!   unfilled orders are logged and skipped. Only gateway failures are errors.
//!
//! ## Public API
//!
//! - `Executor`: The decision engine (`buy`, `sell`, `sell_out`, `on_last_price`).
//! - `ExecutorHandle`: A running executor; `stop` drains its tasks and hands it back.
//! - `StateCache`: The shared last-price and position cache.
//! - `InstrumentLedger` / `Instrument`: Per-instrument trading state.
//! - `ExecutorError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod cache;
pub mod error;
pub mod executor;
pub mod ledger;

// Re-export the key components to provide a clean, public-facing API.
pub use cache::StateCache;
pub use error::ExecutorError;
pub use executor::{Executor, ExecutorHandle};
pub use ledger::{Instrument, InstrumentLedger};
