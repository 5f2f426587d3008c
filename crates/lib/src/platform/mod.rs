//! Host-specific locations for configuration and data.

pub mod paths;
