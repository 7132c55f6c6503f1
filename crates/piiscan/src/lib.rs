//! PII Scan service: discovery, lifecycle control and the JSON control API.
//!
//! The heavy lifting lives in the companion crates (`piiscan_db`,
//! `piiscan_scheduler`, `piiscan_analyzer`); this crate wires them into an
//! operator-facing service.

pub mod config;
pub mod http;
pub mod scan;
pub mod service;
