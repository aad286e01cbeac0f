use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::ai::{AiAdapter, AiContext};
use crate::config::{AiConfig, DataConfig, DecisionMode, EngineConfig};
use crate::connect::MarketDataClient;
use crate::engine::SignalEngine;
use crate::risk::RiskGate;
use crate::series::AnnotatedSeries;
use crate::types::{Bias, RejectReason, Verdict};

/// One analysis run, serialized to stdout. `market_context` and `levels`
/// are absent when no data came back.
#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub pair: String,
    pub granularity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_context: Option<MarketContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<StructuralLevels>,
    pub verdict: Verdict,
}

#[derive(Debug, Serialize)]
pub struct MarketContext {
    pub current_price: Decimal,
    pub bias: Bias,
    pub htf_bias: Bias,
    pub session: String,
}

/// Last validated supply/demand pivots and the pip distance to each.
#[derive(Debug, Serialize)]
pub struct StructuralLevels {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supply_zone: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demand_zone: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist_supply_pips: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist_demand_pips: Option<Decimal>,
}

/// Orchestrates one (pair, granularity) run: fetch, annotate, decide, gate.
pub struct MarketAnalyzer {
    client: MarketDataClient,
    engine: SignalEngine,
    gate: RiskGate,
    ai: Option<AiAdapter>,
    config: EngineConfig,
    limit: usize,
}

impl MarketAnalyzer {
    pub fn new(
        data: &DataConfig,
        engine_config: EngineConfig,
        ai_config: Option<&AiConfig>,
    ) -> Result<Self> {
        let ai = match (engine_config.decision_mode, ai_config) {
            (DecisionMode::AiAdapter, Some(cfg)) => Some(AiAdapter::new(cfg)?),
            (DecisionMode::AiAdapter, None) => {
                anyhow::bail!("decision_mode = ai_adapter but [ai] section is missing")
            }
            _ => None,
        };
        Ok(Self {
            client: MarketDataClient::new(&data.base_url),
            engine: SignalEngine::new(engine_config.clone()),
            gate: RiskGate::new(),
            ai,
            config: engine_config,
            limit: data.limit,
        })
    }

    pub async fn analyze(&self, pair: &str, granularity: &str) -> AnalysisReport {
        let candles = match self.client.fetch_candles(pair, granularity, self.limit).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!("candle fetch failed for {} ({}): {}", pair, granularity, e);
                Vec::new()
            }
        };
        if candles.is_empty() {
            return AnalysisReport {
                pair: pair.to_string(),
                granularity: granularity.to_string(),
                market_context: None,
                levels: None,
                verdict: Verdict::reject(
                    RejectReason::DataUnavailable,
                    format!("no candle data for {pair} ({granularity})"),
                ),
            };
        }

        let series = AnnotatedSeries::analyze(candles, self.config.swing_length);
        let htf_bias = self.htf_bias(pair).await;
        self.report(series, htf_bias, pair, granularity).await
    }

    /// HTF confluence bias. A failed or empty HTF fetch degrades to
    /// RANGING rather than aborting the run.
    async fn htf_bias(&self, pair: &str) -> Bias {
        let granularity = &self.config.htf_granularity;
        match self.client.fetch_candles(pair, granularity, self.limit).await {
            Ok(candles) if !candles.is_empty() => {
                AnnotatedSeries::analyze(candles, self.config.swing_length).market_bias()
            }
            Ok(_) => {
                warn!("HTF series empty for {} ({}), bias neutral", pair, granularity);
                Bias::Ranging
            }
            Err(e) => {
                warn!("HTF fetch failed for {} ({}): {}", pair, granularity, e);
                Bias::Ranging
            }
        }
    }

    async fn report(
        &self,
        series: AnnotatedSeries,
        htf_bias: Bias,
        pair: &str,
        granularity: &str,
    ) -> AnalysisReport {
        let pip_factor = self.config.pip_factor_for(pair);
        let (context, levels) = describe(&series, htf_bias, pip_factor);
        if let Some(ctx) = &context {
            info!(
                "{} {} | price {} bias {} htf {} session {}",
                pair, granularity, ctx.current_price, ctx.bias, ctx.htf_bias, ctx.session
            );
        }

        let setup = match (&self.ai, self.config.decision_mode) {
            (Some(ai), DecisionMode::AiAdapter) => {
                let atr_pips = series
                    .last_row()
                    .map(|r| r.atr * pip_factor)
                    .unwrap_or(Decimal::ZERO);
                ai.propose(&AiContext {
                    pair,
                    granularity,
                    series: &series,
                    bias: series.market_bias(),
                    htf_bias,
                    atr_pips,
                })
                .await
            }
            _ => self.engine.evaluate(&series, htf_bias, pair, granularity),
        };

        let verdict = match setup {
            Ok(setup) => {
                let verdict = self.gate.apply(setup);
                if let Verdict::Signal(sig) = &verdict {
                    info!(
                        "signal: {} {} @ {} ({})",
                        sig.kind,
                        pair,
                        sig.entry,
                        sig.strategy.tag()
                    );
                }
                verdict
            }
            Err(rejection) => {
                info!("no signal: {} ({})", rejection.human_message, rejection.reason_code.code());
                Verdict::Rejected(rejection)
            }
        };

        AnalysisReport {
            pair: pair.to_string(),
            granularity: granularity.to_string(),
            market_context: context,
            levels: Some(levels),
            verdict,
        }
    }
}

fn describe(
    series: &AnnotatedSeries,
    htf_bias: Bias,
    pip_factor: Decimal,
) -> (Option<MarketContext>, StructuralLevels) {
    let (candle, row) = match (series.last_candle(), series.last_row()) {
        (Some(c), Some(r)) => (c, r),
        _ => {
            return (
                None,
                StructuralLevels {
                    supply_zone: None,
                    demand_zone: None,
                    dist_supply_pips: None,
                    dist_demand_pips: None,
                },
            )
        }
    };

    let context = MarketContext {
        current_price: candle.close,
        bias: row.bias,
        htf_bias,
        session: session_label(candle.is_london, candle.is_ny),
    };

    let dist = |level: Decimal| ((candle.close - level).abs() * pip_factor).round_dp(1);
    let levels = StructuralLevels {
        supply_zone: row.last_pivot_high,
        demand_zone: row.last_pivot_low,
        dist_supply_pips: row.last_pivot_high.map(dist),
        dist_demand_pips: row.last_pivot_low.map(dist),
    };
    (Some(context), levels)
}

fn session_label(is_london: bool, is_ny: bool) -> String {
    match (is_london, is_ny) {
        (true, true) => "LONDON + NEW YORK".to_string(),
        (true, false) => "LONDON".to_string(),
        (false, true) => "NEW YORK".to_string(),
        (false, false) => "ASIA / OFF-HOURS".to_string(),
    }
}
