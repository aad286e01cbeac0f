use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// CANDLE & SESSION FLAGS
// =============================================================================

/// One OHLCV bar with pre-computed session membership.
/// Session flags are supplied by the data collaborator (see connect.rs);
/// the engine itself never looks at the clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(default)]
    pub is_london: bool,
    #[serde(default)]
    pub is_ny: bool,
    #[serde(default)]
    pub is_killzone: bool,
}

// =============================================================================
// STRUCTURE & SETUP TYPES
// =============================================================================

/// Directional bias derived from the EMA relationship (one value per candle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "BEARISH")]
    Bearish,
    #[serde(rename = "RANGING")]
    Ranging,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Bias::Bullish => "BULLISH",
            Bias::Bearish => "BEARISH",
            Bias::Ranging => "RANGING",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupKind {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl fmt::Display for SetupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupKind::Buy => write!(f, "BUY"),
            SetupKind::Sell => write!(f, "SELL"),
        }
    }
}

/// Which branch of the cascade produced a setup. The HTF disagreement
/// penalty differs between the structure retest and the later branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    StructureRetest,
    ImbalanceRebalance,
    EmaDynamic,
    RangeReversal,
    AiAdapter,
}

impl StrategyKind {
    pub fn tag(&self) -> &'static str {
        match self {
            StrategyKind::StructureRetest => "structure_retest",
            StrategyKind::ImbalanceRebalance => "imbalance_rebalance",
            StrategyKind::EmaDynamic => "ema_dynamic",
            StrategyKind::RangeReversal => "range_reversal",
            StrategyKind::AiAdapter => "ai_adapter",
        }
    }

    /// HTF disagreement multiplier, in percent (applied with integer
    /// truncation, floored at 60).
    pub fn htf_penalty_pct(&self) -> u32 {
        match self {
            StrategyKind::StructureRetest => 80,
            _ => 85,
        }
    }
}

/// Free-form macro/news note attached by the AI path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalNote {
    pub bias: String,
    pub summary: String,
}

/// Candidate signal produced by the cascade (or the AI adapter), consumed
/// immediately by the risk gate. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    #[serde(rename = "type")]
    pub kind: SetupKind,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Estimated win probability, 0-100.
    pub probability: u8,
    pub strategy: StrategyKind,
    pub reason: String,
    /// Expected bars until target, clamped to [1, 5].
    pub estimated_duration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fundamental: Option<FundamentalNote>,
}

impl Setup {
    /// Invariant: Buy => sl < entry < tp, Sell mirrored. A violation is a
    /// construction bug in the strategy that built the setup.
    pub fn new(
        kind: SetupKind,
        entry: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        probability: u8,
        strategy: StrategyKind,
        reason: impl Into<String>,
    ) -> Self {
        match kind {
            SetupKind::Buy => {
                debug_assert!(stop_loss < entry && entry < take_profit);
            }
            SetupKind::Sell => {
                debug_assert!(stop_loss > entry && entry > take_profit);
            }
        }
        Self {
            kind,
            entry,
            stop_loss,
            take_profit,
            probability,
            strategy,
            reason: reason.into(),
            estimated_duration: 1,
            fundamental: None,
        }
    }

    pub fn risk(&self) -> Decimal {
        (self.entry - self.stop_loss).abs()
    }

    pub fn reward(&self) -> Decimal {
        (self.take_profit - self.entry).abs()
    }
}

// =============================================================================
// VERDICT — exactly one per analysis run
// =============================================================================

/// Stable, machine-readable rejection codes. UI and tests key off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    #[serde(rename = "atr_low")]
    AtrLow,
    #[serde(rename = "rsi_extreme")]
    RsiExtreme,
    #[serde(rename = "htf_mismatch")]
    HtfMismatch,
    #[serde(rename = "session_off")]
    SessionOff,
    #[serde(rename = "no_setup")]
    NoSetup,
    #[serde(rename = "rr_insufficient")]
    RrInsufficient,
    #[serde(rename = "probability_insufficient")]
    ProbabilityInsufficient,
    #[serde(rename = "invalid_setup")]
    InvalidSetup,
    #[serde(rename = "data_unavailable")]
    DataUnavailable,
    #[serde(rename = "ai_empty_response")]
    AiEmptyResponse,
    #[serde(rename = "ai_json_parse_error")]
    AiJsonParseError,
    #[serde(rename = "ai_invalid_params")]
    AiInvalidParams,
    #[serde(rename = "ai_zero_risk")]
    AiZeroRisk,
    #[serde(rename = "ai_wait")]
    AiWait,
    #[serde(rename = "ai_decision_unknown")]
    AiDecisionUnknown,
    #[serde(rename = "ai_error")]
    AiError,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::AtrLow => "atr_low",
            RejectReason::RsiExtreme => "rsi_extreme",
            RejectReason::HtfMismatch => "htf_mismatch",
            RejectReason::SessionOff => "session_off",
            RejectReason::NoSetup => "no_setup",
            RejectReason::RrInsufficient => "rr_insufficient",
            RejectReason::ProbabilityInsufficient => "probability_insufficient",
            RejectReason::InvalidSetup => "invalid_setup",
            RejectReason::DataUnavailable => "data_unavailable",
            RejectReason::AiEmptyResponse => "ai_empty_response",
            RejectReason::AiJsonParseError => "ai_json_parse_error",
            RejectReason::AiInvalidParams => "ai_invalid_params",
            RejectReason::AiZeroRisk => "ai_zero_risk",
            RejectReason::AiWait => "ai_wait",
            RejectReason::AiDecisionUnknown => "ai_decision_unknown",
            RejectReason::AiError => "ai_error",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub rejected: bool,
    pub reason_code: RejectReason,
    pub human_message: String,
}

impl Rejection {
    pub fn new(reason_code: RejectReason, human_message: impl Into<String>) -> Self {
        Self {
            rejected: true,
            reason_code,
            human_message: human_message.into(),
        }
    }
}

/// Setup that survived the risk gate, with realized risk:reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedSignal {
    #[serde(rename = "type")]
    pub kind: SetupKind,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward: Decimal,
    pub probability: u8,
    pub strategy: StrategyKind,
    pub reason: String,
    pub estimated_duration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fundamental_note: Option<FundamentalNote>,
}

impl AcceptedSignal {
    pub fn from_setup(setup: Setup, risk_reward: Decimal) -> Self {
        Self {
            kind: setup.kind,
            entry: setup.entry,
            stop_loss: setup.stop_loss,
            take_profit: setup.take_profit,
            risk_reward,
            probability: setup.probability,
            strategy: setup.strategy,
            reason: setup.reason,
            estimated_duration: setup.estimated_duration,
            fundamental_note: setup.fundamental,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Verdict {
    Signal(AcceptedSignal),
    Rejected(Rejection),
}

impl Verdict {
    pub fn reject(reason: RejectReason, message: impl Into<String>) -> Self {
        Verdict::Rejected(Rejection::new(reason, message))
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, Verdict::Signal(_))
    }
}

// =============================================================================
// INSTRUMENT CLASS & PIP FACTOR
// =============================================================================

/// Quote-convention lookup: pip distances are price deltas scaled by the
/// instrument's pip factor. Equity/index symbols trade 1:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentClass {
    FxMajor,
    FxJpyQuote,
    EquityIndex,
}

impl InstrumentClass {
    pub fn classify(pair: &str) -> Self {
        let upper = pair.to_uppercase();
        if upper.starts_with('^') || upper.contains('.') {
            InstrumentClass::EquityIndex
        } else if upper.contains("JPY") {
            InstrumentClass::FxJpyQuote
        } else {
            InstrumentClass::FxMajor
        }
    }

    pub fn pip_factor(&self) -> Decimal {
        match self {
            InstrumentClass::FxMajor => Decimal::from(10_000),
            InstrumentClass::FxJpyQuote => Decimal::from(100),
            InstrumentClass::EquityIndex => Decimal::ONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_classification() {
        assert_eq!(
            InstrumentClass::classify("EURUSD"),
            InstrumentClass::FxMajor
        );
        assert_eq!(
            InstrumentClass::classify("USDJPY"),
            InstrumentClass::FxJpyQuote
        );
        assert_eq!(
            InstrumentClass::classify("eurjpy"),
            InstrumentClass::FxJpyQuote
        );
        assert_eq!(
            InstrumentClass::classify("^GSPC"),
            InstrumentClass::EquityIndex
        );
        assert_eq!(
            InstrumentClass::classify("GGAL.BA"),
            InstrumentClass::EquityIndex
        );
    }

    #[test]
    fn test_pip_factors() {
        assert_eq!(InstrumentClass::FxMajor.pip_factor(), Decimal::from(10_000));
        assert_eq!(InstrumentClass::FxJpyQuote.pip_factor(), Decimal::from(100));
        assert_eq!(InstrumentClass::EquityIndex.pip_factor(), Decimal::ONE);
    }

    #[test]
    fn test_reject_reason_codes_are_stable() {
        assert_eq!(RejectReason::AtrLow.code(), "atr_low");
        assert_eq!(RejectReason::RsiExtreme.code(), "rsi_extreme");
        assert_eq!(RejectReason::HtfMismatch.code(), "htf_mismatch");
        assert_eq!(RejectReason::SessionOff.code(), "session_off");
        assert_eq!(RejectReason::NoSetup.code(), "no_setup");
    }

    #[test]
    fn test_rejection_serializes_with_code() {
        let r = Rejection::new(RejectReason::AtrLow, "volatility below floor");
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"reason_code\":\"atr_low\""));
        assert!(json.contains("\"rejected\":true"));
    }

    #[test]
    fn test_setup_risk_reward_distances() {
        let setup = Setup::new(
            SetupKind::Buy,
            Decimal::new(11000, 4), // 1.1000
            Decimal::new(10950, 4), // 1.0950
            Decimal::new(11100, 4), // 1.1100
            80,
            StrategyKind::StructureRetest,
            "retest",
        );
        assert_eq!(setup.risk(), Decimal::new(50, 4));
        assert_eq!(setup.reward(), Decimal::new(100, 4));
    }
}
