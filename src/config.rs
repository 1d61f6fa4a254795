//! Configuration loading: defaults, optional TOML file, environment overrides.
//!
//! Every tunable has a default so a bare environment starts cleanly. A
//! TOML file (same shape as `AppConfig`) may override defaults, and the
//! flat environment keys used in `.env` override both. Secrets are never
//! read from the file; they come from the environment only and are kept
//! behind `secrecy::SecretString`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::types::{ExecutionMode, TraderError};

/// Default config file, skipped silently when absent.
pub const DEFAULT_CONFIG_FILE: &str = "dexwatch.toml";

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub watch: WatchConfig,
    pub market: MarketConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub portfolio: PortfolioConfig,
    pub telegram: TelegramConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchConfig {
    /// Seconds between cycle starts.
    pub interval_secs: u64,
    /// Upper bound on a single market fetch.
    pub fetch_timeout_secs: u64,
    pub heartbeat: bool,
    /// Apply strategy actions to the paper portfolio.
    pub auto_trade: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            fetch_timeout_secs: 15,
            heartbeat: false,
            auto_trade: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    pub chain_id: String,
    pub search_query: String,
    pub scan_limit: usize,
    pub top_k: usize,
    /// Signals reported by the on-demand `scan` command.
    pub command_top_k: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            chain_id: "solana".to_string(),
            search_query: "sol".to_string(),
            scan_limit: 30,
            top_k: 5,
            command_top_k: 3,
        }
    }
}

/// Which decision path the loop runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Ranked,
    Threshold,
}

impl FromStr for StrategyKind {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ranked" | "scan" => Ok(StrategyKind::Ranked),
            "threshold" | "momentum" => Ok(StrategyKind::Threshold),
            other => Err(TraderError::Config(format!("unknown strategy: {other}"))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    /// Trigger for the threshold strategy, as a fraction (0.01 = 1%).
    pub threshold: f64,
    /// Symbol watched by the threshold strategy.
    pub symbol: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Ranked,
            threshold: 0.01,
            symbol: "SOL".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub max_position_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_pct: dec!(0.05),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PortfolioConfig {
    pub starting_cash: Decimal,
    pub execution_mode: ExecutionMode,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            starting_cash: dec!(1000),
            execution_mode: ExecutionMode::Paper,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelegramConfig {
    pub chat_id: Option<String>,
    pub rate_limit_secs: f64,
    /// Long-poll the bot for `/status`, `/scan`, `/trade`.
    pub commands_enabled: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            chat_id: None,
            rate_limit_secs: 1.0,
            commands_enabled: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load from `path` if it exists, then apply process environment overrides.
    pub fn load(path: &str) -> Result<Self, TraderError> {
        let base = if Path::new(path).exists() {
            Self::from_toml_file(path)?
        } else {
            Self::default()
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Parse a TOML config file.
    pub fn from_toml_file(path: &str) -> Result<Self, TraderError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TraderError::Config(format!("failed to read {path}: {e}")))?;
        toml::from_str(&contents)
            .map_err(|e| TraderError::Config(format!("failed to parse {path}: {e}")))
    }

    /// Overlay flat key/value settings (the `.env` vocabulary) on top of
    /// this config. Absent keys keep their current value; malformed
    /// values are a `Config` error.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, TraderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("WATCH_INTERVAL") {
            self.watch.interval_secs = parse_value("WATCH_INTERVAL", &v)?;
        }
        if let Some(v) = get("FETCH_TIMEOUT_SECS") {
            self.watch.fetch_timeout_secs = parse_value("FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("HEARTBEAT") {
            self.watch.heartbeat = parse_flag("HEARTBEAT", &v)?;
        }
        if let Some(v) = get("AUTO_TRADE") {
            self.watch.auto_trade = parse_flag("AUTO_TRADE", &v)?;
        }

        if let Some(v) = get("TARGET_CHAIN") {
            self.market.chain_id = v;
        }
        if let Some(v) = get("SEARCH_QUERY") {
            self.market.search_query = v;
        }
        if let Some(v) = get("SCAN_LIMIT") {
            self.market.scan_limit = parse_value("SCAN_LIMIT", &v)?;
        }
        if let Some(v) = get("SCAN_TOP_K") {
            self.market.top_k = parse_value("SCAN_TOP_K", &v)?;
        }
        if let Some(v) = get("COMMAND_TOP_K") {
            self.market.command_top_k = parse_value("COMMAND_TOP_K", &v)?;
        }

        if let Some(v) = get("STRATEGY") {
            self.strategy.kind = v.parse()?;
        }
        if let Some(v) = get("STRATEGY_THRESHOLD") {
            self.strategy.threshold = parse_value("STRATEGY_THRESHOLD", &v)?;
        }
        if let Some(v) = get("STRATEGY_SYMBOL") {
            self.strategy.symbol = v;
        }

        if let Some(v) = get("MAX_POSITION_PCT") {
            self.risk.max_position_pct = parse_value("MAX_POSITION_PCT", &v)?;
        }
        if let Some(v) = get("STARTING_CASH") {
            self.portfolio.starting_cash = parse_value("STARTING_CASH", &v)?;
        }
        if let Some(v) = get("EXECUTION_MODE") {
            self.portfolio.execution_mode = v.parse()?;
        }

        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(v);
        }
        if let Some(v) = get("TELEGRAM_RATE_LIMIT_SECONDS") {
            self.telegram.rate_limit_secs = parse_value("TELEGRAM_RATE_LIMIT_SECONDS", &v)?;
        }
        if let Some(v) = get("TELEGRAM_COMMANDS") {
            self.telegram.commands_enabled = parse_flag("TELEGRAM_COMMANDS", &v)?;
        }

        if let Some(v) = get("DASHBOARD_ENABLED") {
            self.dashboard.enabled = parse_flag("DASHBOARD_ENABLED", &v)?;
        }
        if let Some(v) = get("DASHBOARD_PORT") {
            self.dashboard.port = parse_value("DASHBOARD_PORT", &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values that would make the loop misbehave.
    pub fn validate(&self) -> Result<(), TraderError> {
        if self.watch.interval_secs == 0 {
            return Err(TraderError::Config("WATCH_INTERVAL must be positive".into()));
        }
        if self.watch.fetch_timeout_secs == 0 {
            return Err(TraderError::Config("FETCH_TIMEOUT_SECS must be positive".into()));
        }
        if self.market.top_k == 0 || self.market.command_top_k == 0 {
            return Err(TraderError::Config("top-k values must be at least 1".into()));
        }
        if !(self.strategy.threshold > 0.0) {
            return Err(TraderError::Config("STRATEGY_THRESHOLD must be positive".into()));
        }
        if self.risk.max_position_pct <= Decimal::ZERO || self.risk.max_position_pct > Decimal::ONE {
            return Err(TraderError::Config("MAX_POSITION_PCT must be in (0, 1]".into()));
        }
        if self.portfolio.starting_cash < Decimal::ZERO {
            return Err(TraderError::Config("STARTING_CASH cannot be negative".into()));
        }
        if !(self.telegram.rate_limit_secs >= 0.0) || !self.telegram.rate_limit_secs.is_finite() {
            return Err(TraderError::Config(
                "TELEGRAM_RATE_LIMIT_SECONDS must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, TraderError> {
    raw.parse::<T>()
        .map_err(|_| TraderError::Config(format!("{key} has an invalid value: '{raw}'")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, TraderError> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(TraderError::Config(format!("{key} must be true or false, got '{raw}'"))),
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Secrets resolved from the environment at startup.
#[derive(Debug, Default)]
pub struct Credentials {
    pub telegram_bot_token: Option<SecretString>,
    pub wallet_keypair_path: Option<PathBuf>,
}

impl Credentials {
    /// Resolve secrets and fail fast when a configured feature needs one
    /// that is missing.
    pub fn resolve<F>(config: &AppConfig, lookup: F) -> Result<Self, TraderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telegram_bot_token = non_empty("TELEGRAM_BOT_TOKEN")
            .or_else(|| non_empty("BOT_TOKEN"))
            .map(SecretString::new);
        let wallet_keypair_path = non_empty("WALLET_KEYPAIR_PATH").map(PathBuf::from);

        if telegram_bot_token.is_none() {
            if config.telegram.chat_id.is_some() {
                return Err(TraderError::Config(
                    "TELEGRAM_CHAT_ID is set but TELEGRAM_BOT_TOKEN is missing".into(),
                ));
            }
            if config.telegram.commands_enabled {
                return Err(TraderError::Config(
                    "TELEGRAM_COMMANDS requires TELEGRAM_BOT_TOKEN".into(),
                ));
            }
        }

        if config.portfolio.execution_mode == ExecutionMode::Live && wallet_keypair_path.is_none() {
            return Err(TraderError::Config(
                "EXECUTION_MODE=live requires WALLET_KEYPAIR_PATH".into(),
            ));
        }

        Ok(Self {
            telegram_bot_token,
            wallet_keypair_path,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
