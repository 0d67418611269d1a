//! meshquery - distributed shared-scan query execution core for a
//! partitioned MPP SQL engine.
//!
//! Czar-side dispatch lives in [`czar`], worker-side scheduling and result
//! transmission in [`worker`], the wire protocol both sides share in
//! [`wire`], and the chunk/sub-chunk partitioning scheme in [`chunking`].

pub mod chunking;
pub mod common;
pub mod config;
pub mod csv;
pub mod czar;
pub mod error;
pub mod transport;
pub mod wire;
pub mod worker;

pub use config::{CzarConfig, WorkerConfig};
pub use error::{CoreError, Result};
