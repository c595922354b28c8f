//! # Firmcast Common Library
//!
//! Shared code for the firmcast broadcast update agent:
//! - Error types
//! - Device identity and scan configuration
//! - Broadcast (GPS) clock
//! - Bounded, deduplicated event ring

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use config::{AgentConfig, AttributeFilter, DeviceIdentity, ScanParams};
pub use error::{Error, Result};
pub use events::{EventCategory, EventRing};
pub use time::BroadcastClock;
