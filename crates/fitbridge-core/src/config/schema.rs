use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `fitbridge.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FitbridgeConfig {
    pub source: SourceConfig,
    pub backup: BackupConfig,
    pub auth: AuthConfig,
    pub ledger: LedgerConfig,
    pub destination: DestinationConfig,
}

/// Where the training app drops its activity files and how they are named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SourceConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub extension: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "MyNewActivity-".to_string(),
            extension: "fit".to_string(),
        }
    }
}

/// Directory receiving corrected, timestamped copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BackupConfig {
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("MyWhooshFitBackup"),
        }
    }
}

/// Token persistence and validity policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthConfig {
    pub token_path: PathBuf,
    /// A token expiring within this window is treated as already expired.
    pub expiry_skew_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_path: PathBuf::from(".fitbridge/tokens.json"),
            expiry_skew_seconds: 300,
        }
    }
}

/// Delivery ledger location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".fitbridge/ledger.db"),
        }
    }
}

/// Endpoints of the fitness backend receiving uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DestinationConfig {
    pub token_url: String,
    pub upload_url: String,
    pub client_id: String,
    pub timeout_seconds: u64,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            token_url: String::new(),
            upload_url: String::new(),
            client_id: String::new(),
            timeout_seconds: 30,
        }
    }
}
