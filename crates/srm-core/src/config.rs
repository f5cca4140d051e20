// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security Resource Manager configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// File name of the configuration inside the data directory.
pub const CONFIG_FILE: &str = "srm.json";

/// Settings fixed at device bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrmConfig {
    /// This device's own identifier.
    pub device_id: Uuid,
    /// Directory holding the persisted security resource blob.
    pub storage_dir: PathBuf,
    /// Base name of the blob; two slots (`<name>.a`, `<name>.b`) are kept.
    pub blob_name: String,
    /// Persist commits to storage (false = memory-only store).
    pub persist: bool,
    /// Allow the default ACL to be overridden once in normal operation.
    pub allow_default_acl_override_in_rfnop: bool,
}

impl Default for SrmConfig {
    fn default() -> Self {
        Self {
            device_id: Uuid::nil(),
            storage_dir: PathBuf::from("."),
            blob_name: "svr.db".into(),
            persist: true,
            allow_default_acl_override_in_rfnop: false,
        }
    }
}

impl SrmConfig {
    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Write this configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Load `srm.json` from `dir`, or fall back to defaults rooted at `dir`.
    pub fn load_or_default(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::load(dir.join(CONFIG_FILE)).unwrap_or_else(|_| Self {
            storage_dir: dir.to_path_buf(),
            ..Self::default()
        })
    }
}
