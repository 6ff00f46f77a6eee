//! Core of the channel-link relay.
//!
//! Pairing codes, link groups, endpoint caching and message fan-out live here.
//! Chat platforms plug in through the traits in [`ports`]; the Telegram
//! adapter is a separate crate.

pub mod commands;
pub mod config;
pub mod domain;
pub mod endpoints;
pub mod errors;
pub mod locks;
pub mod logging;
pub mod pairing;
pub mod ports;
pub mod relay;
pub mod store;

#[cfg(test)]
mod testing;

pub use errors::{DeliveryError, Error, Result};
