//! ConfigReloader CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the config reloader controller.

pub mod config_reloader;

pub use config_reloader::*;
