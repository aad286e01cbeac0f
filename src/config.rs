use anyhow::Result;
use config::Config;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

use crate::types::InstrumentClass;

/// Top-level settings deserialized from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub ai: Option<AiConfig>,
}

impl AppSettings {
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub pair: String,
    pub granularity: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub base_url: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    1000
}

/// Chat-completions endpoint settings for the AI decision path. The key can
/// live in the config file or in AI_API_KEY.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl AiConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| env::var("AI_API_KEY").ok())
    }
}

/// Which decision path turns structure into a setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DecisionMode {
    #[serde(rename = "rule_cascade")]
    RuleCascade,
    #[serde(rename = "ai_adapter")]
    AiAdapter,
}

impl Default for DecisionMode {
    fn default() -> Self {
        DecisionMode::RuleCascade
    }
}

/// Recognized engine options. Everything has a default so a partial config
/// file is fine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_swing_length")]
    pub swing_length: usize,
    #[serde(default)]
    pub strict_mode: bool,
    /// Minimum ATR (in pips) per granularity; missing tier = floor disabled.
    #[serde(default = "default_min_atr_pips")]
    pub min_atr_pips: HashMap<String, Decimal>,
    #[serde(default)]
    pub decision_mode: DecisionMode,
    #[serde(default = "default_htf_granularity")]
    pub htf_granularity: String,
    /// Override for non-standard quote conventions; otherwise the pip factor
    /// comes from the instrument class.
    #[serde(default)]
    pub pip_factor: Option<Decimal>,
}

fn default_swing_length() -> usize {
    5
}

fn default_htf_granularity() -> String {
    "1h".to_string()
}

fn default_min_atr_pips() -> HashMap<String, Decimal> {
    let mut m = HashMap::new();
    m.insert("5m".to_string(), Decimal::from(5));
    m.insert("15m".to_string(), Decimal::from(8));
    m
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            swing_length: default_swing_length(),
            strict_mode: false,
            min_atr_pips: default_min_atr_pips(),
            decision_mode: DecisionMode::default(),
            htf_granularity: default_htf_granularity(),
            pip_factor: None,
        }
    }
}

impl EngineConfig {
    /// ATR floor for a granularity; zero disables the check.
    pub fn min_atr_for(&self, granularity: &str) -> Decimal {
        self.min_atr_pips
            .get(granularity)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn pip_factor_for(&self, pair: &str) -> Decimal {
        self.pip_factor
            .unwrap_or_else(|| InstrumentClass::classify(pair).pip_factor())
    }

    /// Granularities the strict-mode session/HTF rejects apply to.
    pub fn is_strict_granularity(granularity: &str) -> bool {
        matches!(granularity, "5m" | "15m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_atr_floors() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.min_atr_for("5m"), Decimal::from(5));
        assert_eq!(cfg.min_atr_for("15m"), Decimal::from(8));
        assert_eq!(cfg.min_atr_for("1h"), Decimal::ZERO);
        assert_eq!(cfg.min_atr_for("1d"), Decimal::ZERO);
    }

    #[test]
    fn test_pip_factor_override_wins() {
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.pip_factor_for("EURUSD"), Decimal::from(10_000));
        assert_eq!(cfg.pip_factor_for("USDJPY"), Decimal::from(100));
        cfg.pip_factor = Some(Decimal::ONE);
        assert_eq!(cfg.pip_factor_for("EURUSD"), Decimal::ONE);
    }

    #[test]
    fn test_strict_granularities() {
        assert!(EngineConfig::is_strict_granularity("5m"));
        assert!(EngineConfig::is_strict_granularity("15m"));
        assert!(!EngineConfig::is_strict_granularity("1h"));
    }
}
