//! Domain layer - Core types and port definitions
//!
//! This module defines the storage provider port that the appliance adapter
//! and the failover cluster implement.

pub mod ports;

pub use ports::*;
