//! Configuration loading: device identity and scan parameters
//!
//! Resolution priority for the configuration file path:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform default location (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity of this receiver, matched against broadcast compatibility data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Organization unique identifier assigned by the network operator
    pub oui: u32,
    /// Model group within the organization
    pub model_group: u16,
    /// Hardware model number of this unit
    pub hardware_model: u16,
    /// Currently installed software version
    pub software_version: u16,
    /// Unit participates in field tests
    #[serde(default)]
    pub field_test_mode: bool,
    /// Unit is on a factory test line
    #[serde(default)]
    pub factory_test_mode: bool,
    /// Accept re-broadcast of the installed module version (lab loop testing)
    #[serde(default)]
    pub loop_test_mode: bool,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        DeviceIdentity {
            oui: 0x001234,
            model_group: 1,
            hardware_model: 1,
            software_version: 1,
            field_test_mode: false,
            factory_test_mode: false,
            loop_test_mode: false,
        }
    }
}

/// Passes over modules whose priority byte carries flagged attribute bits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AttributeFilter {
    /// Which priority bits participate in the comparison
    pub bit_mask: u8,
    /// Masked bits that disqualify a module when set
    pub sense_mask: u8,
}

impl AttributeFilter {
    /// Whether a module with this priority byte stays in contention.
    pub fn selects(&self, priority: u8) -> bool {
        priority & self.bit_mask & self.sense_mask == 0
    }
}

/// Scan and download timing parameters.
///
/// Defaults mirror the broadcast network's reference timing profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanParams {
    /// Frequencies (Hz) to walk during a full scan
    pub frequencies: Vec<u32>,
    /// Explicit carousel stream id, skipping channel discovery when set
    #[serde(default)]
    pub stream_id_override: Option<u16>,
    /// Candidate selection filter on the module priority byte
    #[serde(default)]
    pub attribute_filter: Option<AttributeFilter>,
    /// Wait for a service table section (ms)
    #[serde(default = "default_wait_vct")]
    pub wait_vct_ms: u64,
    /// Wait for an association table section (ms)
    #[serde(default = "default_wait_vct")]
    pub wait_pat_ms: u64,
    /// Wait for a map table section (ms)
    #[serde(default = "default_wait_vct")]
    pub wait_pmt_ms: u64,
    /// Wait for a well-formed server-initiate message (ms)
    #[serde(default = "default_wait_dsi")]
    pub wait_dsi_ms: u64,
    /// Wait for module-info messages covering every known group (ms)
    #[serde(default = "default_wait_dii")]
    pub wait_dii_ms: u64,
    /// How long before a scheduled download the device wakes (ms);
    /// also the lower bound on an acceptable schedule slot
    #[serde(default = "default_wake_up_early")]
    pub wake_up_early_ms: u64,
    /// Schedule slots further out than this are rejected (ms)
    #[serde(default = "default_too_far")]
    pub too_far_ms: u64,
    /// Above this the tuner is released and a dedicated wake is scheduled (ms)
    #[serde(default = "default_sleep_short")]
    pub hold_tuner_ms: u64,
    /// Retry delay after a failed or empty scan (ms)
    #[serde(default = "default_sleep_short")]
    pub retry_ms: u64,
    /// Settle time after a completed update before scanning again (ms)
    #[serde(default = "default_sleep_long")]
    pub sleep_long_ms: u64,
    /// Delay between download completion and the done notification (ms)
    #[serde(default = "default_done_delay")]
    pub done_delay_ms: u64,
    /// Upper bound on one full channel scan (ms), part of re-arm decisions
    #[serde(default = "default_channel_scan")]
    pub channel_scan_ms: u64,
}

fn default_wait_vct() -> u64 {
    1_000
}
fn default_wait_dsi() -> u64 {
    40_000
}
fn default_wait_dii() -> u64 {
    240_000
}
fn default_wake_up_early() -> u64 {
    100_000
}
fn default_too_far() -> u64 {
    25 * 60 * 60 * 1_000
}
fn default_sleep_short() -> u64 {
    30 * 60 * 1_000
}
fn default_sleep_long() -> u64 {
    24 * 60 * 60 * 1_000
}
fn default_done_delay() -> u64 {
    5_000
}
fn default_channel_scan() -> u64 {
    100_000
}

impl Default for ScanParams {
    fn default() -> Self {
        ScanParams {
            frequencies: Vec::new(),
            stream_id_override: None,
            attribute_filter: None,
            wait_vct_ms: default_wait_vct(),
            wait_pat_ms: default_wait_vct(),
            wait_pmt_ms: default_wait_vct(),
            wait_dsi_ms: default_wait_dsi(),
            wait_dii_ms: default_wait_dii(),
            wake_up_early_ms: default_wake_up_early(),
            too_far_ms: default_too_far(),
            hold_tuner_ms: default_sleep_short(),
            retry_ms: default_sleep_short(),
            sleep_long_ms: default_sleep_long(),
            done_delay_ms: default_done_delay(),
            channel_scan_ms: default_channel_scan(),
        }
    }
}

/// Top-level agent configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub device: DeviceIdentity,
    #[serde(default)]
    pub scan: ScanParams,
}

impl AgentConfig {
    /// Load configuration from the resolved path, falling back to defaults
    /// when no file exists anywhere in the priority chain.
    pub fn load(cli_arg: Option<&str>, env_var_name: &str) -> Result<AgentConfig> {
        match resolve_config_path(cli_arg, env_var_name) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)?;
                toml::from_str(&text)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
            }
            None => Ok(AgentConfig::default()),
        }
    }
}

/// Resolve the configuration file path by priority; None means no file found.
pub fn resolve_config_path(cli_arg: Option<&str>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: Platform default location
    let user_config = dirs::config_dir().map(|d| d.join("firmcast").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }
    let system_config = PathBuf::from("/etc/firmcast/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
