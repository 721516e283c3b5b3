// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Startup configuration.
//!
//! Loaded once from a TOML file and immutable for the lifetime of the
//! process. Every timing knob has a default, so a minimal file only lists
//! the asset requirements and funding identities:
//!
//! ```
//! use faucet_dispatch::FaucetConfig;
//!
//! let config = FaucetConfig::from_toml_str(r#"
//!     [[assets]]
//!     asset_id = "ETH"
//!     amount = "1"
//!
//!     [[identities]]
//!     address = "0x6c10d9c1744f149d4b17660e14faa247964749c7"
//! "#).unwrap();
//!
//! assert_eq!(config.identities.len(), 1);
//! assert_eq!(config.dispatch.poll_interval().as_millis(), 100);
//! ```

use crate::base::AssetId;
use crate::error::ConfigError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Complete service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FaucetConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Ordered list of assets transferred per disbursement.
    pub assets: Vec<AssetRequirement>,
    /// Funding identities, one dispatch queue each.
    pub identities: Vec<FundingIdentity>,
    /// Seed balances for the in-memory ledger.
    #[serde(default)]
    pub demo: DemoConfig,
}

impl FaucetConfig {
    /// Reads, parses, and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates config from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: FaucetConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the dispatcher relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.is_empty() {
            return Err(ConfigError::NoAssets);
        }
        if self.identities.is_empty() {
            return Err(ConfigError::NoIdentities);
        }
        if let Some(asset) = self.assets.iter().find(|a| a.amount <= Decimal::ZERO) {
            return Err(ConfigError::NonPositiveAmount(asset.asset_id.clone()));
        }

        let mut seen = HashSet::new();
        for identity in &self.identities {
            if !seen.insert(identity.address.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateIdentity(identity.address.clone()));
            }
        }

        let d = &self.dispatch;
        if d.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("poll_interval_ms"));
        }
        if d.monitor_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("monitor_interval_ms"));
        }
        if d.restart_base_ms == 0 || d.restart_base_ms > d.restart_cap_ms {
            return Err(ConfigError::InvalidBackoff("restart"));
        }
        if d.confirm_base_ms == 0 || d.confirm_base_ms > d.confirm_cap_ms {
            return Err(ConfigError::InvalidBackoff("confirmation"));
        }
        Ok(())
    }
}

/// HTTP intake settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:2880".to_string()
}

/// Timing knobs for workers, the availability monitor, and backoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Sleep between checks of an empty queue.
    pub poll_interval_ms: u64,
    /// Cadence of balance probing.
    pub monitor_interval_ms: u64,
    /// First delay before restarting a crashed worker.
    pub restart_base_ms: u64,
    /// Upper bound of the restart delay.
    pub restart_cap_ms: u64,
    /// A run at least this long resets the restart delay.
    pub healthy_run_ms: u64,
    /// First delay between confirmation polls.
    pub confirm_base_ms: u64,
    /// Upper bound of the confirmation poll delay.
    pub confirm_cap_ms: u64,
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn restart_base(&self) -> Duration {
        Duration::from_millis(self.restart_base_ms)
    }

    pub fn restart_cap(&self) -> Duration {
        Duration::from_millis(self.restart_cap_ms)
    }

    pub fn healthy_run(&self) -> Duration {
        Duration::from_millis(self.healthy_run_ms)
    }

    pub fn confirm_base(&self) -> Duration {
        Duration::from_millis(self.confirm_base_ms)
    }

    pub fn confirm_cap(&self) -> Duration {
        Duration::from_millis(self.confirm_cap_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            monitor_interval_ms: 30_000,
            restart_base_ms: 1_000,
            restart_cap_ms: 600_000,
            healthy_run_ms: 60_000,
            confirm_base_ms: 500,
            confirm_cap_ms: 10_000,
        }
    }
}

/// One asset transferred per disbursement, and the minimum balance an
/// identity must hold to stay available.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AssetRequirement {
    pub asset_id: AssetId,
    #[serde(default)]
    pub symbol: Option<String>,
    pub amount: Decimal,
}

impl AssetRequirement {
    pub fn new(asset_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            asset_id: AssetId::new(asset_id),
            symbol: None,
            amount,
        }
    }
}

/// An independently funded sender. The dispatcher only uses its address
/// to address ledger calls; signing material stays with the ledger client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FundingIdentity {
    pub address: String,
}

impl FundingIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// Initial balances for the in-memory ledger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DemoConfig {
    #[serde(default)]
    pub balances: Vec<DemoBalance>,
    /// Status polls an operation stays pending before it settles.
    #[serde(default)]
    pub confirmation_polls: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemoBalance {
    pub identity: String,
    pub asset_id: AssetId,
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"
        [[assets]]
        asset_id = "ETH"
        amount = "1"

        [[assets]]
        asset_id = "DAI"
        symbol = "DAI"
        amount = "300"

        [[identities]]
        address = "0x6c10d9c1744f149d4b17660e14faa247964749c7"

        [[identities]]
        address = "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147"
    "#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = FaucetConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.assets.len(), 2);
        assert_eq!(config.assets[1].amount, dec!(300));
        assert_eq!(config.assets[1].symbol.as_deref(), Some("DAI"));
        assert_eq!(config.identities.len(), 2);
        assert_eq!(config.server.listen, "127.0.0.1:2880");
        assert_eq!(config.dispatch.monitor_interval(), Duration::from_secs(30));
        assert_eq!(config.dispatch.restart_cap(), Duration::from_secs(600));
        assert_eq!(config.dispatch.healthy_run(), Duration::from_secs(60));
    }

    #[test]
    fn overrides_dispatch_timing() {
        let raw = format!("[dispatch]\npoll_interval_ms = 5\nrestart_base_ms = 10\n{MINIMAL}");
        let config = FaucetConfig::from_toml_str(&raw).unwrap();
        assert_eq!(config.dispatch.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.dispatch.restart_base(), Duration::from_millis(10));
        assert_eq!(config.dispatch.confirm_base(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_empty_assets() {
        let raw = r#"
            assets = []
            [[identities]]
            address = "0x6c10d9c1744f149d4b17660e14faa247964749c7"
        "#;
        assert!(matches!(
            FaucetConfig::from_toml_str(raw),
            Err(ConfigError::NoAssets)
        ));
    }

    #[test]
    fn rejects_missing_identities() {
        let raw = r#"
            identities = []
            [[assets]]
            asset_id = "ETH"
            amount = "1"
        "#;
        assert!(matches!(
            FaucetConfig::from_toml_str(raw),
            Err(ConfigError::NoIdentities)
        ));
    }

    #[test]
    fn rejects_non_positive_amount() {
        let raw = MINIMAL.replace("amount = \"300\"", "amount = \"0\"");
        assert!(matches!(
            FaucetConfig::from_toml_str(&raw),
            Err(ConfigError::NonPositiveAmount(asset)) if asset == AssetId::new("DAI")
        ));
    }

    #[test]
    fn rejects_duplicate_identity() {
        let raw = MINIMAL.replace(
            "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147",
            "0x6C10D9C1744F149D4B17660E14FAA247964749C7",
        );
        assert!(matches!(
            FaucetConfig::from_toml_str(&raw),
            Err(ConfigError::DuplicateIdentity(_))
        ));
    }

    #[test]
    fn rejects_inverted_backoff() {
        let raw = format!("[dispatch]\nrestart_base_ms = 5000\nrestart_cap_ms = 100\n{MINIMAL}");
        assert!(matches!(
            FaucetConfig::from_toml_str(&raw),
            Err(ConfigError::InvalidBackoff("restart"))
        ));
    }

    #[test]
    fn rejects_zero_intervals() {
        let raw = format!("[dispatch]\nmonitor_interval_ms = 0\n{MINIMAL}");
        assert!(matches!(
            FaucetConfig::from_toml_str(&raw),
            Err(ConfigError::ZeroInterval("monitor_interval_ms"))
        ));

        let raw = format!("[dispatch]\npoll_interval_ms = 0\n{MINIMAL}");
        assert!(matches!(
            FaucetConfig::from_toml_str(&raw),
            Err(ConfigError::ZeroInterval("poll_interval_ms"))
        ));
    }

    #[test]
    fn reports_parse_errors() {
        assert!(matches!(
            FaucetConfig::from_toml_str("assets = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            FaucetConfig::load("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
