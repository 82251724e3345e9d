#![cfg_attr(docsrs, feature(doc_cfg))]
//! # antrabms_lib
//!
//! This crate provides a library for polling an Antra BMS (Battery Management
//! System) stack over its ASCII-hex serial protocol.
//!
//! The protocol layers are usable on their own: [`protocol`] builds and checks
//! frames, [`fields`] extracts hex fields, [`analog`] decodes the header and
//! battery blocks of the analog data reply and [`snapshot`] assembles them. The
//! asynchronous client and the poll coordinator sit on top.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `antrabms` command-line tool.
//!
//! ### Client Features
//! - `tokio-serial-async`: Enables the **asynchronous** client and the poll coordinator using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for serializing/deserializing data structures.
//! - `bin-dependencies`: Enables all features required by the `antrabms` binary executable.

/// Contains error types for the library.
mod error;
/// Hex field extraction.
pub mod fields;
/// Defines the framing, checksum and command set of the protocol.
pub mod protocol;
/// Decoders for the analog data reply.
pub mod analog;
/// Assembles one analog reply into a per-battery snapshot.
pub mod snapshot;
/// Labels for status and protection bitmasks.
pub mod labels;
/// Sensor tables for group and battery readings.
pub mod sensors;

pub use error::Error;

/// Asynchronous client for Antra BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;

/// Single-flight poll coordinator sharing the latest snapshot.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod coordinator;
