//! Blockchain RPC access.
//!
//! This module provides the `Connection` trait and its JSON-RPC
//! implementation `RpcConnection`, plus decoders for the raw account layouts
//! of the expense program and the two governance backends.

pub mod client;
pub mod decode;
pub mod error;

pub use client::{Account, AccountFilter, Connection, RpcConnection};
pub use decode::DecodeError;
pub use error::RpcError;
