//! Directory configuration.
//!
//! Loaded from a JSON file, then overridden by environment:
//!
//! | variable                   | field                        |
//! |----------------------------|------------------------------|
//! | `MESH_IV_TEST_MODE`        | `iv_update_test_mode`        |
//! | `MESH_IV_RECOVERY_OVER_42` | `allow_iv_recovery_over_42`  |

use std::path::Path;

use mesh_core::{AllocatedGroupRange, AllocatedSceneRange, AllocatedUnicastRange, MAX_TTL};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::helpers::parse_bool;

pub const ENV_IV_TEST_MODE: &str = "MESH_IV_TEST_MODE";
pub const ENV_IV_RECOVERY_OVER_42: &str = "MESH_IV_RECOVERY_OVER_42";

pub const DEFAULT_PROVISIONER_NAME: &str = "Mesh Provisioner";
pub const DEFAULT_GLOBAL_TTL: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Relaxes the IV Index dwell-time rule by one state.
    pub iv_update_test_mode: bool,
    /// Accepts IV Index jumps larger than 42.
    pub allow_iv_recovery_over_42: bool,
    pub default_unicast_range: AllocatedUnicastRange,
    pub default_group_range: AllocatedGroupRange,
    pub default_scene_range: AllocatedSceneRange,
    pub global_ttl: u8,
    pub provisioner_name: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            iv_update_test_mode: false,
            allow_iv_recovery_over_42: false,
            default_unicast_range: AllocatedUnicastRange::full(),
            default_group_range: AllocatedGroupRange::full(),
            default_scene_range: AllocatedSceneRange::full(),
            global_ttl: DEFAULT_GLOBAL_TTL,
            provisioner_name: DEFAULT_PROVISIONER_NAME.to_string(),
        }
    }
}

impl DirectoryConfig {
    /// Reads a config file, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_IV_TEST_MODE) {
            self.iv_update_test_mode = parse_bool(&value);
        }
        if let Some(value) = lookup(ENV_IV_RECOVERY_OVER_42) {
            self.allow_iv_recovery_over_42 = parse_bool(&value);
        }
    }

    /// Range bounds are already checked when the ranges are built.
    pub fn validate(&self) -> Result<()> {
        if self.global_ttl > MAX_TTL {
            return Err(Error::config(format!(
                "global_ttl {} exceeds {MAX_TTL}",
                self.global_ttl
            )));
        }
        if self.provisioner_name.trim().is_empty() {
            return Err(Error::config("provisioner_name must not be empty"));
        }
        Ok(())
    }
}
