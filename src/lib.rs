//! Curve advisor: GPS smoothing, route tracking and curve-speed advice
//!
//! Fixes go through a constant-velocity Kalman filter, the smoothed state is
//! located on the active route, upcoming turns are detected by one of two
//! interchangeable detectors and each turn gets a physics-based speed
//! advisory. `scheduler::AdvisorRuntime` wires everything together.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod filters;
pub mod geometry;
pub mod prediction;
pub mod route;
pub mod scheduler;
pub mod simulation;
pub mod smoothing;
pub mod types;

pub use config::Settings;
pub use error::{AdvisorError, ProviderError, Result};
pub use scheduler::{AdvisorHandle, AdvisorRuntime, Notice};
