//! breathing-bridge library crate
//!
//! This module exposes the relay pipeline for integration testing.
//! The main binary is in main.rs.

#[macro_use]
extern crate log;

pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod event;
pub mod id;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod track;
pub mod transcode;
pub mod transport;
pub mod youtube;

#[cfg(feature = "discord")]
pub mod discord;

// Test modules
#[cfg(test)]
mod config_tests;
