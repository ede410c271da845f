//! Integration tests against live services.
//!
//! Run with a local Redis (and Postgres for the mirror tests):
//!
//! ```bash
//! REDIS_URL=redis://127.0.0.1:6379 cargo test --features integration
//! ```
//!
//! Without the `integration` feature every test here is ignored.

mod common;

mod boundaries;
mod lifecycle;
mod mirror;
mod scenarios;
