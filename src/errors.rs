//! Top-level error types. Per §7, only configuration errors are ever
//! surfaced to the caller; everything else is logged and dropped.

use std::fmt;

#[derive(Debug)]
pub enum StartError {
    InvalidConfig(String),
    BruteForceSetup(String),
    RecordLogSetup(String),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            StartError::BruteForceSetup(msg) => write!(f, "cannot start brute-force service: {}", msg),
            StartError::RecordLogSetup(msg) => write!(f, "cannot open record log: {}", msg),
        }
    }
}

impl std::error::Error for StartError {}
