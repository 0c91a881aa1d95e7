//! Domain types - core business entities
//!
//! Tenant identity, envelope documents and configuration. These types are
//! independent of the transport, lock store and actor protocol.

pub mod client;
pub mod config;
pub mod envelope;
