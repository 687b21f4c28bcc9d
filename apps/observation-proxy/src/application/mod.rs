//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (observation service, location, imagery).
pub mod ports;

/// Application services for proxying streams and collecting reports.
pub mod services;
