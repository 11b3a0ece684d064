//! Agent runtime admission controller (C9): dispatch permits, lease
//! lifecycle, capacity fairness.

mod config;
mod core;

pub use config::AdmissionConfig;
pub use core::{AdmissionController, DispatchOutcome, DispatchPermitInput};
