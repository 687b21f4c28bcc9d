//! Domain Layer - Core proxy types and business logic.
//!
//! This layer contains the offering/record/report types and the offering
//! resolver. Nothing here performs I/O.

/// Offering discovery types and the offering resolver.
pub mod offering;

/// Sensor record and schema types.
pub mod record;

/// Spot report submissions and their record layout.
pub mod report;
