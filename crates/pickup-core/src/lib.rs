#![doc = include_str!("../README.md")]

mod backend;
pub mod cache;
mod error;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod sweep;

pub use backend::{Backend, BackendConfig};
pub use error::{Error, Result, ResultExt};
