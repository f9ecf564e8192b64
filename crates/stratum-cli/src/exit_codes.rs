//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - catalog, manifest or effective configuration rejected
pub const CONFIG_ERROR: i32 = 2;

/// Cluster error - the API server or package tool could not be reached
pub const CLUSTER_ERROR: i32 = 3;

/// Component error - the named component does not exist
pub const COMPONENT_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;
