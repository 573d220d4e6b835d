//! Wrappers around the shared infrastructure: each `build` adds its resources
//! to the graph and returns a value owning the handles dependents need.

pub mod alerts;
pub mod cache;
pub mod cluster;
pub mod database;
pub mod entry_point;
pub mod network;
