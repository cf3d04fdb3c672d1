#![doc = "gtfs-transformer: applies transformation scripts to GTFS archives landing in S3."]

//! The job reacts to an S3 "object created" notification for a `.zip` feed,
//! fetches the feed and its `<key>.transform.txt` script, runs the external
//! transformation tool and uploads the result to `<bucket>-transformed`.
//!
//! # Modules
//! - [`pipeline`]: orchestration of a single invocation
//! - [`event`]: notification decoding
//! - [`contract`]: the store and transformer seams
//! - [`store`], [`transform`], [`archive`], [`workspace`], [`script`]: the pieces behind them
//! - [`lambda`], [`cli`]: ways to run it

pub mod archive;
pub mod cli;
pub mod config;
pub mod contract;
pub mod event;
pub mod lambda;
pub mod load_config;
pub mod pipeline;
pub mod script;
pub mod store;
pub mod transform;
pub mod workspace;

pub use cli::{run, Cli, Commands};
