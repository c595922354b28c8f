//! # Firmcast Update Agent Library (firmcast-agent)
//!
//! Scans a broadcast data carousel for firmware updates addressed to this
//! device and downloads the ones it is compatible with.
//!
//! **Pipeline:** channel discovery (service, association, and map tables)
//! finds carousel streams; server-initiate and module-info messages are
//! parsed into download candidates; the best candidate's blocks are
//! reassembled into modules, validated against the signature header and
//! the on-device manifest, and handed to a [`download::ModuleSink`].
//!
//! **Architecture:** synchronous event functions over a [`SectionSource`]
//! and [`Tuner`] pair, driven by the pure state machine in [`state`]. All
//! per-tuner context lives in a [`ScanSession`].
//!
//! [`SectionSource`]: section::SectionSource
//! [`Tuner`]: section::Tuner

pub mod carousel;
pub mod compat;
pub mod diag;
pub mod discovery;
pub mod download;
pub mod error;
pub mod manifest;
pub mod platform;
pub mod proto;
pub mod section;
pub mod session;
pub mod state;

pub use error::{DownloadError, ParseError, ScanError};
pub use session::ScanSession;
