//! Configuration: TOML file, environment and command-line overrides.
//!
//! Everything is validated here, before any connection is made. This is the
//! only place a setup error can stop the process besides the readiness gate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dispatch_engine::{PollPolicy, RetryPolicy, TargetWindow};
use evm_upstream::{
    APPROVE_GAS_LIMIT, ContractAddresses, DEPOSIT_GAS_LIMIT, EvmSettings, GasSettings, KeyRing,
    MAINNET_USDC, MAINNET_VAULT, SettlementSettings, USDC_DECIMALS, format_amount, parse_amount,
};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "hourglass.toml";

/// Comma separated private keys; overrides `private_keys` in the file.
pub const PRIVATE_KEYS_ENV: &str = "HOURGLASS_PRIVATE_KEYS";

/// Target block timestamp: 2025-11-06 14:00:00 UTC.
pub const DEFAULT_TARGET_TIMESTAMP: i64 = 1_762_437_600;
pub const DEFAULT_TOLERANCE_SECS: i64 = 3;

/// Deposit bounds in whole tokens.
pub const MIN_DEPOSIT: u128 = 1_000;
pub const MAX_DEPOSIT: u128 = 100_000;

const GWEI_DECIMALS: u8 = 9;

/// Raw file contents. Every field has a default so partial files work.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub private_keys: Vec<String>,
    pub upstream: UpstreamSection,
    pub target: TargetSection,
    pub deposit: DepositSection,
    pub contracts: ContractsSection,
    pub gas: GasSection,
    pub retry: RetrySection,
    pub monitor: MonitorSection,
    pub settlement: SettlementSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamSection {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetSection {
    pub timestamp: i64,
    pub tolerance: i64,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            timestamp: DEFAULT_TARGET_TIMESTAMP,
            tolerance: DEFAULT_TOLERANCE_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DepositSection {
    /// Whole token units as a decimal string, e.g. `"1000"` or `"2500.5"`.
    pub amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContractsSection {
    pub vault: String,
    pub token: String,
    pub token_decimals: u8,
    pub token_symbol: String,
}

impl Default for ContractsSection {
    fn default() -> Self {
        Self {
            vault: MAINNET_VAULT.to_string(),
            token: MAINNET_USDC.to_string(),
            token_decimals: USDC_DECIMALS,
            token_symbol: "USDC".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GasSection {
    pub gas_price_gwei: Option<String>,
    pub max_fee_gwei: Option<String>,
    pub max_priority_fee_gwei: Option<String>,
    pub approve_gas_limit: u64,
    pub deposit_gas_limit: u64,
}

impl Default for GasSection {
    fn default() -> Self {
        Self {
            gas_price_gwei: None,
            max_fee_gwei: None,
            max_priority_fee_gwei: None,
            approve_gas_limit: APPROVE_GAS_LIMIT,
            deposit_gas_limit: DEPOSIT_GAS_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: dispatch_engine::retry::DEFAULT_ATTEMPTS,
            delay_ms: dispatch_engine::retry::DEFAULT_DELAY.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSection {
    pub fast_interval_ms: u64,
    pub slow_interval_ms: u64,
    pub countdown_secs: u64,
    pub heartbeat_secs: u64,
    pub error_backoff_ms: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            fast_interval_ms: 100,
            slow_interval_ms: 500,
            countdown_secs: 10,
            heartbeat_secs: 10,
            error_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettlementSection {
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for SettlementSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub dir: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
        }
    }
}

impl FileConfig {
    /// Read the file at `path`. A missing default file yields the defaults;
    /// a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        if !path.exists() {
            if explicit {
                return Err(Error::config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            debug!("No {} found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Values given on the command line; they win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub target_timestamp: Option<i64>,
    pub tolerance: Option<i64>,
    pub rpc: Option<String>,
    pub backup_rpc: Option<String>,
}

/// Validated configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub primary: Url,
    pub secondary: Option<Url>,
    pub window: TargetWindow,
    /// Per-actor amount in base units.
    pub amount: u128,
    pub token_decimals: u8,
    pub token_symbol: String,
    pub evm: EvmSettings,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
    pub log_dir: PathBuf,
    pub keys: KeyRing,
}

impl AppConfig {
    /// Load from disk and the environment, then validate.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let file = FileConfig::load(path)?;
        let env_keys = std::env::var(PRIVATE_KEYS_ENV).ok();
        Self::resolve(file, overrides, env_keys.as_deref())
    }

    /// Merge the sources and validate.
    pub fn resolve(file: FileConfig, overrides: Overrides, env_keys: Option<&str>) -> Result<Self> {
        let keys: Vec<String> = match env_keys.filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.split(',').map(str::to_string).collect(),
            None => file.private_keys.clone(),
        };
        let keys = KeyRing::parse(&keys)?;

        let primary = overrides.rpc.or(file.upstream.primary).ok_or_else(|| {
            Error::validation("primary RPC endpoint is not set ([upstream] primary or --rpc)")
        })?;
        let primary = parse_url("primary", &primary)?;
        let secondary = overrides
            .backup_rpc
            .or(file.upstream.secondary)
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_url("secondary", &s))
            .transpose()?;

        let window = TargetWindow::new(
            overrides.target_timestamp.unwrap_or(file.target.timestamp),
            overrides.tolerance.unwrap_or(file.target.tolerance),
        )?;

        let decimals = file.contracts.token_decimals;
        let amount_raw = file
            .deposit
            .amount
            .ok_or_else(|| Error::validation("[deposit] amount is not set"))?;
        let amount = parse_amount(&amount_raw, decimals)?;
        let min = parse_amount(&MIN_DEPOSIT.to_string(), decimals)?;
        let max = parse_amount(&MAX_DEPOSIT.to_string(), decimals)?;
        if amount < min || amount > max {
            return Err(Error::validation(format!(
                "deposit amount {} is outside [{}, {}]",
                format_amount(amount, decimals),
                MIN_DEPOSIT,
                MAX_DEPOSIT
            )));
        }

        let contracts = ContractAddresses::parse(&file.contracts.vault, &file.contracts.token)?;
        let gas = resolve_gas(&file.gas)?;

        if file.retry.attempts == 0 {
            return Err(Error::validation("[retry] attempts must be at least 1"));
        }
        let retry = RetryPolicy::new(
            file.retry.attempts,
            Duration::from_millis(file.retry.delay_ms),
        );

        let monitor = &file.monitor;
        for (name, value) in [
            ("fast_interval_ms", monitor.fast_interval_ms),
            ("slow_interval_ms", monitor.slow_interval_ms),
            ("heartbeat_secs", monitor.heartbeat_secs),
            ("error_backoff_ms", monitor.error_backoff_ms),
        ] {
            if value == 0 {
                return Err(Error::validation(format!("[monitor] {} must be positive", name)));
            }
        }
        let poll = PollPolicy::two_speed(
            monitor.countdown_secs,
            Duration::from_millis(monitor.fast_interval_ms),
            Duration::from_millis(monitor.slow_interval_ms),
        )
        .with_heartbeat(Duration::from_secs(monitor.heartbeat_secs))
        .with_error_backoff(Duration::from_millis(monitor.error_backoff_ms));

        if file.settlement.poll_interval_ms == 0 || file.settlement.timeout_secs == 0 {
            return Err(Error::validation(
                "[settlement] poll_interval_ms and timeout_secs must be positive",
            ));
        }
        let settlement = SettlementSettings {
            poll_interval: Duration::from_millis(file.settlement.poll_interval_ms),
            timeout: Duration::from_secs(file.settlement.timeout_secs),
        };

        Ok(Self {
            primary,
            secondary,
            window,
            amount,
            token_decimals: decimals,
            token_symbol: file.contracts.token_symbol,
            evm: EvmSettings {
                contracts,
                gas,
                settlement,
            },
            retry,
            poll,
            log_dir: PathBuf::from(file.logging.dir),
            keys,
        })
    }

    /// Amount formatted with the token symbol, e.g. `1000 USDC`.
    pub fn display_amount(&self, amount: u128) -> String {
        format!(
            "{} {}",
            format_amount(amount, self.token_decimals),
            self.token_symbol
        )
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("primary", &mask_url(&self.primary))
            .field("secondary", &self.secondary.as_ref().map(mask_url))
            .field("window", &self.window)
            .field("amount", &self.amount)
            .field("evm", &self.evm)
            .field("retry", &self.retry)
            .field("poll", &self.poll)
            .field("log_dir", &self.log_dir)
            .field("keys", &self.keys)
            .finish()
    }
}

fn parse_url(name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        Error::validation(format!("{} RPC endpoint is not a valid URL: {}", name, e))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::validation(format!(
            "{} RPC endpoint must be http(s), got {}",
            name, other
        ))),
    }
}

/// Hosted endpoints often carry an API key in the path; keep only the host.
fn mask_url(url: &Url) -> String {
    format!("{}://{}/***", url.scheme(), url.host_str().unwrap_or("?"))
}

fn resolve_gas(section: &GasSection) -> Result<GasSettings> {
    let gwei = |field: &Option<String>| -> Result<Option<u128>> {
        field
            .as_deref()
            .map(|v| parse_amount(v, GWEI_DECIMALS).map_err(Error::from))
            .transpose()
    };
    let gas_price = gwei(&section.gas_price_gwei)?;
    let max_fee = gwei(&section.max_fee_gwei)?;
    let priority = gwei(&section.max_priority_fee_gwei)?;

    if gas_price.is_some() && (max_fee.is_some() || priority.is_some()) {
        return Err(Error::validation(
            "[gas] set either gas_price_gwei or the EIP-1559 fees, not both",
        ));
    }
    if let (Some(max_fee), Some(priority)) = (max_fee, priority)
        && priority > max_fee
    {
        return Err(Error::validation(
            "[gas] max_priority_fee_gwei must not exceed max_fee_gwei",
        ));
    }
    if section.approve_gas_limit == 0 || section.deposit_gas_limit == 0 {
        return Err(Error::validation("[gas] gas limits must be positive"));
    }

    Ok(GasSettings {
        approve_gas_limit: section.approve_gas_limit,
        deposit_gas_limit: section.deposit_gas_limit,
        gas_price,
        max_fee_per_gas: max_fee,
        max_priority_fee_per_gas: priority,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KEY_1: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn minimal() -> FileConfig {
        FileConfig::parse(&format!(
            r#"
private_keys = ["{KEY_0}"]

[upstream]
primary = "https://eth.example.com/v2/secret-api-key"

[deposit]
amount = "1000"
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::resolve(minimal(), Overrides::default(), None).unwrap();
        assert_eq!(config.window.target(), 1_762_437_600);
        assert_eq!(config.window.tolerance(), 3);
        assert_eq!(config.amount, 1_000_000_000);
        assert_eq!(config.retry.max_attempts(), 3);
        assert_eq!(config.retry.delay(), Duration::from_millis(2000));
        assert_eq!(config.poll.interval_for(10), Duration::from_millis(100));
        assert_eq!(config.poll.interval_for(11), Duration::from_millis(500));
        assert_eq!(config.evm.gas.deposit_gas_limit, 300_000);
        assert_eq!(config.evm.contracts, ContractAddresses::default());
        assert!(config.secondary.is_none());
        assert_eq!(config.display_amount(config.amount), "1000 USDC");
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            target_timestamp: Some(2_000),
            tolerance: Some(0),
            rpc: Some("http://localhost:8545".into()),
            backup_rpc: Some("http://localhost:8546".into()),
        };
        let config = AppConfig::resolve(minimal(), overrides, None).unwrap();
        assert_eq!(config.window.target(), 2_000);
        assert_eq!(config.window.tolerance(), 0);
        assert_eq!(config.primary.as_str(), "http://localhost:8545/");
        assert_eq!(config.secondary.unwrap().as_str(), "http://localhost:8546/");
    }

    #[test]
    fn test_env_keys_override_file() {
        let env = format!("{KEY_0}, {KEY_1}");
        let config = AppConfig::resolve(minimal(), Overrides::default(), Some(&env)).unwrap();
        assert_eq!(config.keys.len(), 2);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let no_keys = FileConfig {
            private_keys: Vec::new(),
            ..minimal()
        };
        assert!(AppConfig::resolve(no_keys, Overrides::default(), None).is_err());

        let mut small = minimal();
        small.deposit.amount = Some("999.99".into());
        assert!(matches!(
            AppConfig::resolve(small, Overrides::default(), None),
            Err(Error::Validation(_))
        ));

        let negative_tolerance = Overrides {
            tolerance: Some(-1),
            ..Overrides::default()
        };
        assert!(matches!(
            AppConfig::resolve(minimal(), negative_tolerance, None),
            Err(Error::Engine(_))
        ));

        let mut both_gas_modes = minimal();
        both_gas_modes.gas.gas_price_gwei = Some("30".into());
        both_gas_modes.gas.max_fee_gwei = Some("50".into());
        assert!(AppConfig::resolve(both_gas_modes, Overrides::default(), None).is_err());

        let mut no_retries = minimal();
        no_retries.retry.attempts = 0;
        assert!(AppConfig::resolve(no_retries, Overrides::default(), None).is_err());

        let bad_url = Overrides {
            rpc: Some("ws://localhost:8546".into()),
            ..Overrides::default()
        };
        assert!(AppConfig::resolve(minimal(), bad_url, None).is_err());
    }

    #[test]
    fn test_gas_in_gwei() {
        let mut file = minimal();
        file.gas.max_fee_gwei = Some("50".into());
        file.gas.max_priority_fee_gwei = Some("1.5".into());
        let config = AppConfig::resolve(file, Overrides::default(), None).unwrap();
        assert_eq!(config.evm.gas.max_fee_per_gas, Some(50_000_000_000));
        assert_eq!(config.evm.gas.max_priority_fee_per_gas, Some(1_500_000_000));
        assert_eq!(config.evm.gas.gas_price, None);
    }

    #[test]
    fn test_debug_masks_secrets() {
        let config = AppConfig::resolve(minimal(), Overrides::default(), None).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("ac0974bec39a17e36ba4a6b4d238ff944bacb478"));
        assert!(!debug.contains("secret-api-key"));
        assert!(debug.contains("eth.example.com"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(FileConfig::parse("[target]\ntimestmap = 5\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[target]\ntimestamp = 1700000000\n\n[retry]\nattempts = 5"
        )
        .unwrap();
        let loaded = FileConfig::load(Some(file.path())).unwrap();
        assert_eq!(loaded.target.timestamp, 1_700_000_000);
        assert_eq!(loaded.target.tolerance, 3);
        assert_eq!(loaded.retry.attempts, 5);
        assert_eq!(loaded.retry.delay_ms, 2000);

        let dir = tempfile::tempdir().unwrap();
        assert!(FileConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
