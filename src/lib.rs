//! MedicTrack — instructor onboarding service for a paramedic program.

pub mod config;
pub mod directory;
pub mod error;
pub mod notify;
pub mod onboarding;
pub mod roles;
pub mod store;

pub use error::{Error, Result};
