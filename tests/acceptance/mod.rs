//! Integration tests for cycle timer acceptance testing.
//!
//! These tests verify end-to-end timing behaviour:
//! - Elapsed arithmetic and anomaly reporting
//! - Construction-time capability failures
//! - Pinned measurements and calibration against wall time

mod calibration_test;
mod common;
mod pinning_test;
mod timer_test;
