//! Wire-compatible message schemas for the relay.
//!
//! Everything here is plain JSON via `serde_json`. The same types are used on
//! both sides of the relay: decoding what callers send to the front-end, and
//! encoding what the relay sends on to a backend.

pub mod jsonrpc;
pub mod tools;
