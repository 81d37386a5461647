//! Heart-rate telemetry from a Zephyr HxM monitor.

pub mod domain;
pub mod infrastructure;
pub mod presentation;
