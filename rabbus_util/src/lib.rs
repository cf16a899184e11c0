#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Implements the delay policy applied between repeated attempts.
#[cfg(feature = "backoff")]
mod backoff {
    pub mod config;
    pub mod wrapper;
}
#[cfg(feature = "backoff")]
pub use self::backoff::{config::BackoffConfig, wrapper::Backoff};
