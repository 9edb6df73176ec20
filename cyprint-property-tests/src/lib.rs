//! CyPrint Property-Based Tests
//!
//! Standalone proptest suite for the simulation core's invariants.
//!
//! # Usage
//!
//! ```bash
//! cargo test -p cyprint-property-tests            # Run all property tests
//! cargo test -p cyprint-property-tests planner    # Only planner properties
//! PROPTEST_CASES=1000 cargo test -p cyprint-property-tests
//! ```
//!
//! # Test Modules
//!
//! - `kernel`: event ordering, mutex FIFO, clock monotonicity
//! - `container`: level bounds under arbitrary get/put sequences
//! - `planner`: profile selection, zero-distance moves, timing identities
//! - `gcode`: tolerant parsing, idempotent interpretation
//! - `printer`: log timestamps and ECU transition logging on random programs

// Re-export for convenience in tests
pub use cyprint_core::*;
