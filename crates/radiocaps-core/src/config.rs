use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::capability::{CapabilityParseError, LogicalModemId, RatMask};
use crate::device::{default_logical_modem, SlotConfig, SlotIndex};
use crate::policy::SwapPolicy;

pub const CONFIG_VERSION: u32 = 1;

const MIN_APPLY_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{field}: {source}")]
    Rat {
        field: String,
        #[source]
        source: CapabilityParseError,
    },
    #[error("full_rat must not be empty")]
    EmptyFullRat,
    #[error("reduced_rat {reduced} covers the whole full_rat {full}")]
    ReducedCoversFull { reduced: RatMask, full: RatMask },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RadiocapsConfigInput {
    pub version: u32,
    pub manager: ManagerConfigInput,
    pub slots: Vec<SlotConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManagerConfigInput {
    pub apply_timeout_ms: Option<u64>,
    pub first_session_id: Option<u32>,
    pub full_rat: Option<Vec<String>>,
    pub reduced_rat: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlotConfigInput {
    pub slot: Option<SlotIndex>,
    pub logical_modem_id: Option<String>,
    pub supported_rat: Option<Vec<String>>,
}

/// Tunables of the capability manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Upper bound on the wait for every APPLY confirmation.
    pub apply_timeout: Duration,
    /// Session id of the first transaction.
    pub first_session_id: u32,
    pub full_rat: RatMask,
    pub reduced_rat: RatMask,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let policy = SwapPolicy::default();
        Self {
            apply_timeout: Duration::from_secs(30),
            first_session_id: 1,
            full_rat: policy.full_rat,
            reduced_rat: policy.reduced_rat,
        }
    }
}

impl ManagerConfig {
    pub fn policy(&self) -> SwapPolicy {
        SwapPolicy::new(self.full_rat, self.reduced_rat)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiocapsConfig {
    pub version: u32,
    pub manager: ManagerConfig,
    pub slots: Vec<SlotConfig>,
}

impl Default for RadiocapsConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            manager: ManagerConfig::default(),
            slots: Vec::new(),
        }
    }
}

fn parse_rat(field: impl Into<String>, names: &[String]) -> Result<RatMask, ConfigError> {
    RatMask::from_names(names).map_err(|source| ConfigError::Rat {
        field: field.into(),
        source,
    })
}

impl ManagerConfigInput {
    pub fn resolve(self) -> Result<ManagerConfig, ConfigError> {
        let defaults = ManagerConfig::default();

        let full_rat = match &self.full_rat {
            Some(names) => parse_rat("manager.full_rat", names)?,
            None => defaults.full_rat,
        };
        if full_rat.is_empty() {
            return Err(ConfigError::EmptyFullRat);
        }
        let reduced_rat = match &self.reduced_rat {
            Some(names) => parse_rat("manager.reduced_rat", names)?,
            None => defaults.reduced_rat,
        };
        if reduced_rat.contains(full_rat) {
            return Err(ConfigError::ReducedCoversFull {
                reduced: reduced_rat,
                full: full_rat,
            });
        }

        let apply_timeout = self
            .apply_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.apply_timeout)
            .max(MIN_APPLY_TIMEOUT);

        Ok(ManagerConfig {
            apply_timeout,
            first_session_id: self.first_session_id.unwrap_or(defaults.first_session_id).max(1),
            full_rat,
            reduced_rat,
        })
    }
}

impl RadiocapsConfigInput {
    pub fn resolve(self) -> Result<RadiocapsConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let manager = self.manager.resolve()?;

        let mut used = HashSet::new();
        let mut slots = Vec::new();
        for (idx, input) in self.slots.into_iter().enumerate() {
            let slot = input.slot.unwrap_or(idx as SlotIndex);
            if !used.insert(slot) {
                continue;
            }
            let supported_rat = match &input.supported_rat {
                Some(names) => parse_rat(format!("slots[{idx}].supported_rat"), names)?,
                None => manager.full_rat,
            };
            let logical_modem_id = input
                .logical_modem_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .map(LogicalModemId::new)
                .unwrap_or_else(|| default_logical_modem(slot));
            slots.push(SlotConfig {
                slot,
                logical_modem_id,
                supported_rat,
            });
        }

        Ok(RadiocapsConfig {
            version,
            manager,
            slots,
        })
    }
}

impl RadiocapsConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(RadiocapsConfig::default());
        }
        let parsed: RadiocapsConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}
