use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::AiConfig;
use crate::series::AnnotatedSeries;
use crate::types::{
    Bias, FundamentalNote, RejectReason, Rejection, Setup, SetupKind, StrategyKind,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are an institutional FX execution trader. \
Analyze the provided market structure and respond EXCLUSIVELY with a JSON \
object of this exact shape: {\"action\": \"BUY\"|\"SELL\"|\"WAIT\", \
\"entry\": float, \"sl\": float, \"tp\": float, \"estimated_candles\": int, \
\"reason\": \"terse bullets\", \"fundamental_analysis\": {\"bias\": \
\"BULLISH\"|\"BEARISH\"|\"NEUTRAL\", \"summary\": \"one line\"}, \
\"confidence\": 65-100}. Use WAIT when there is no clear setup. No theory, \
no disclaimers.";

/// The structural context handed to the model. Same inputs the rule cascade
/// sees; the model only replaces strategy selection, never the risk gate.
pub struct AiContext<'a> {
    pub pair: &'a str,
    pub granularity: &'a str,
    pub series: &'a AnnotatedSeries,
    pub bias: Bias,
    pub htf_bias: Bias,
    pub atr_pips: Decimal,
}

/// Chat-completions client for the AI decision path. One request per
/// analysis, 60 s timeout, no retries.
#[derive(Debug, Clone)]
pub struct AiAdapter {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Raw decision payload as the model returns it. Everything is optional so
/// parse failures map to a specific reject code instead of a type error.
#[derive(Debug, Deserialize)]
struct AiDecision {
    action: Option<String>,
    entry: Option<Decimal>,
    sl: Option<Decimal>,
    tp: Option<Decimal>,
    estimated_candles: Option<u32>,
    reason: Option<String>,
    fundamental_analysis: Option<FundamentalNote>,
    confidence: Option<u8>,
}

impl AiAdapter {
    pub fn new(cfg: &AiConfig) -> Result<Self> {
        let api_key = cfg
            .resolved_api_key()
            .ok_or_else(|| anyhow::anyhow!("AI mode enabled but no api_key configured"))?;
        Ok(Self {
            client: Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
        })
    }

    /// Ask the model for a setup. Every failure mode becomes a `Rejection`
    /// so the caller reports it the same way as a cascade reject.
    pub async fn propose(&self, ctx: &AiContext<'_>) -> Result<Setup, Rejection> {
        let fallback_entry = ctx
            .series
            .last_candle()
            .map(|c| c.close)
            .ok_or_else(|| Rejection::new(RejectReason::DataUnavailable, "empty candle series"))?;

        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_user_payload(ctx).to_string()},
            ],
            "response_format": {"type": "json_object"},
        });

        let url = format!("{}/chat/completions", self.base_url);
        info!(model = %self.model, "requesting AI decision");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                error!("AI transport error: {}", e);
                Rejection::new(RejectReason::AiError, format!("transport error: {e}"))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!("AI endpoint returned {}: {}", status, text);
            return Err(Rejection::new(
                RejectReason::AiError,
                format!("endpoint returned {status}"),
            ));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            error!("AI response body unreadable: {}", e);
            Rejection::new(RejectReason::AiError, format!("unreadable response: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        parse_decision(&content, fallback_entry)
    }
}

/// Structural context serialized for the user message: last 10 candles with
/// RSI/EMA50, pivot levels and gap flags.
fn build_user_payload(ctx: &AiContext<'_>) -> serde_json::Value {
    let tail = ctx.series.len().saturating_sub(10);
    let candles: Vec<serde_json::Value> = ctx.series.candles[tail..]
        .iter()
        .zip(&ctx.series.rows[tail..])
        .map(|(c, r)| {
            json!({
                "time": c.timestamp.to_rfc3339(),
                "open": c.open,
                "high": c.high,
                "low": c.low,
                "close": c.close,
                "rsi": r.rsi.round_dp(1),
                "ema_50": r.ema_50,
            })
        })
        .collect();

    let last_candle = ctx.series.last_candle();
    let last_row = ctx.series.last_row();
    json!({
        "pair": ctx.pair,
        "timeframe": ctx.granularity,
        "current_price": last_candle.map(|c| c.close),
        "atr_pips": ctx.atr_pips.round_dp(1),
        "bias": ctx.bias,
        "htf_bias": ctx.htf_bias,
        "session_london": last_candle.map_or(false, |c| c.is_london),
        "session_ny": last_candle.map_or(false, |c| c.is_ny),
        "last_10_candles": candles,
        "smc_levels": {
            "last_pivot_high": last_row.and_then(|r| r.last_pivot_high),
            "last_pivot_low": last_row.and_then(|r| r.last_pivot_low),
            "fvg_bullish": last_row.map_or(false, |r| r.fvg_bullish),
            "fvg_bearish": last_row.map_or(false, |r| r.fvg_bearish),
        },
    })
}

/// Turn raw model output into a setup. Pure so the mapping is testable
/// without a network. The setup still has to clear the risk gate; geometry
/// the model got wrong is caught there.
fn parse_decision(content: &str, fallback_entry: Decimal) -> Result<Setup, Rejection> {
    if content.trim().is_empty() {
        return Err(Rejection::new(
            RejectReason::AiEmptyResponse,
            "model returned no content",
        ));
    }

    let clean = content.replace("```json", "").replace("```", "");
    let decision: AiDecision = serde_json::from_str(clean.trim()).map_err(|_| {
        Rejection::new(RejectReason::AiJsonParseError, "model output is not valid JSON")
    })?;

    let action = decision
        .action
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_uppercase();
    let reason_text = decision
        .reason
        .clone()
        .unwrap_or_else(|| "no clear decision".to_string());

    let kind = match action.as_str() {
        "" | "WAIT" => {
            return Err(Rejection::new(RejectReason::AiWait, reason_text));
        }
        "BUY" => SetupKind::Buy,
        "SELL" => SetupKind::Sell,
        other => {
            return Err(Rejection::new(
                RejectReason::AiDecisionUnknown,
                format!("unrecognized action: {other}"),
            ));
        }
    };

    let (sl, tp) = match (decision.sl, decision.tp) {
        (Some(sl), Some(tp)) => (sl, tp),
        _ => {
            return Err(Rejection::new(
                RejectReason::AiInvalidParams,
                "decision missing stop loss or take profit",
            ));
        }
    };
    let entry = decision.entry.unwrap_or(fallback_entry);
    if (entry - sl).abs() == Decimal::ZERO {
        return Err(Rejection::new(
            RejectReason::AiZeroRisk,
            "stop loss equals entry",
        ));
    }

    Ok(Setup {
        kind,
        entry,
        stop_loss: sl,
        take_profit: tp,
        probability: decision.confidence.unwrap_or(70),
        strategy: StrategyKind::AiAdapter,
        reason: format!("AI: {reason_text}"),
        estimated_duration: decision.estimated_candles.unwrap_or(5),
        fundamental: decision.fundamental_analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Decimal {
        Decimal::new(11000, 4)
    }

    #[test]
    fn test_empty_content_rejects() {
        let err = parse_decision("   ", entry()).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::AiEmptyResponse);
    }

    #[test]
    fn test_non_json_rejects() {
        let err = parse_decision("I think you should buy here.", entry()).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::AiJsonParseError);
    }

    #[test]
    fn test_markdown_fences_are_stripped() {
        let content = r#"```json
{"action": "BUY", "entry": 1.1000, "sl": 1.0950, "tp": 1.1120, "confidence": 82, "reason": "demand retest"}
```"#;
        let setup = parse_decision(content, entry()).unwrap();
        assert_eq!(setup.kind, SetupKind::Buy);
        assert_eq!(setup.probability, 82);
        assert_eq!(setup.strategy, StrategyKind::AiAdapter);
        assert_eq!(setup.stop_loss, Decimal::new(10950, 4));
    }

    #[test]
    fn test_wait_carries_model_reason() {
        let content = r#"{"action": "WAIT", "reason": "chop into news"}"#;
        let err = parse_decision(content, entry()).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::AiWait);
        assert_eq!(err.human_message, "chop into news");
    }

    #[test]
    fn test_missing_action_is_wait() {
        let content = r#"{"bias": "BULLISH", "reason": "unclear"}"#;
        let err = parse_decision(content, entry()).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::AiWait);
    }

    #[test]
    fn test_missing_levels_reject() {
        let content = r#"{"action": "SELL", "entry": 1.1000, "tp": 1.0900}"#;
        let err = parse_decision(content, entry()).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::AiInvalidParams);
    }

    #[test]
    fn test_zero_risk_rejects() {
        let content = r#"{"action": "BUY", "entry": 1.1000, "sl": 1.1000, "tp": 1.1100}"#;
        let err = parse_decision(content, entry()).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::AiZeroRisk);
    }

    #[test]
    fn test_unknown_action_rejects() {
        let content = r#"{"action": "HOLD", "sl": 1.0, "tp": 1.2}"#;
        let err = parse_decision(content, entry()).unwrap_err();
        assert_eq!(err.reason_code, RejectReason::AiDecisionUnknown);
    }

    #[test]
    fn test_entry_defaults_to_last_close() {
        let content = r#"{"action": "BUY", "sl": 1.0950, "tp": 1.1120}"#;
        let setup = parse_decision(content, entry()).unwrap();
        assert_eq!(setup.entry, entry());
        assert_eq!(setup.estimated_duration, 5);
        assert_eq!(setup.probability, 70);
    }

    #[test]
    fn test_fundamental_note_passes_through() {
        let content = r#"{"action": "SELL", "entry": 1.1000, "sl": 1.1050, "tp": 1.0880,
            "fundamental_analysis": {"bias": "BEARISH", "summary": "dovish repricing"}}"#;
        let setup = parse_decision(content, entry()).unwrap();
        let note = setup.fundamental.expect("note should survive parsing");
        assert_eq!(note.bias, "BEARISH");
        assert_eq!(note.summary, "dovish repricing");
    }
}
