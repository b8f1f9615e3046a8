//! h2mux - multiplexed HTTP/2 client core
//!
//! This crate provides an HTTP/2 client that gates application traffic on the
//! connection-level SETTINGS handshake and multiplexes many request/response
//! exchanges over a single connection, correlating each response back to the
//! caller that issued it.

pub mod http;
