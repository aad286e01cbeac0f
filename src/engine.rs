use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::series::{AnnotatedSeries, StructureRow};
use crate::types::{Bias, Candle, RejectReason, Rejection, Setup, SetupKind, StrategyKind};

/// Read-only view of the latest candle plus the context the strategies need.
/// Built once per evaluation; every strategy is a pure function of it.
pub struct SignalContext<'a> {
    pub series: &'a AnnotatedSeries,
    pub candle: &'a Candle,
    pub row: &'a StructureRow,
    pub bias: Bias,
    pub htf_bias: Bias,
    pub pip_factor: Decimal,
}

impl<'a> SignalContext<'a> {
    pub fn new(
        series: &'a AnnotatedSeries,
        htf_bias: Bias,
        pip_factor: Decimal,
    ) -> Option<Self> {
        let candle = series.last_candle()?;
        let row = series.last_row()?;
        Some(Self {
            series,
            candle,
            row,
            bias: row.bias,
            htf_bias,
            pip_factor,
        })
    }

    fn in_session(&self) -> bool {
        self.candle.is_london || self.candle.is_ny
    }

    fn in_killzone(&self) -> bool {
        self.candle.is_killzone
    }

    /// Probability tier keyed by killzone > session > off-session.
    fn probability_tier(&self, kz: u8, session: u8, off: u8) -> u8 {
        if self.in_killzone() {
            kz
        } else if self.in_session() {
            session
        } else {
            off
        }
    }
}

/// The ordered rule cascade. Stateless; one invocation per analysis run.
pub struct SignalEngine {
    config: EngineConfig,
}

impl SignalEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run the cascade against the latest candle. Returns the candidate
    /// setup or the rejection that stopped it; the risk gate runs after.
    pub fn evaluate(
        &self,
        series: &AnnotatedSeries,
        htf_bias: Bias,
        pair: &str,
        granularity: &str,
    ) -> Result<Setup, Rejection> {
        let pip_factor = self.config.pip_factor_for(pair);
        let ctx = SignalContext::new(series, htf_bias, pip_factor).ok_or_else(|| {
            Rejection::new(RejectReason::DataUnavailable, "empty candle series")
        })?;

        // 1. Volatility floor.
        let min_atr = self.config.min_atr_for(granularity);
        let atr_pips = ctx.row.atr * pip_factor;
        if min_atr > Decimal::ZERO && atr_pips < min_atr {
            return Err(Rejection::new(
                RejectReason::AtrLow,
                format!(
                    "volatility too low ({} < {} pips)",
                    atr_pips.round_dp(1),
                    min_atr.round_dp(1)
                ),
            ));
        }

        // 2-4. Ordered setup strategies; first hit wins.
        let strategies: [fn(&SignalContext) -> Option<Setup>; 3] =
            [structure_retest, imbalance_rebalance, ema_dynamic];
        let candidate = strategies.iter().find_map(|strategy| strategy(&ctx));

        if let Some(mut setup) = candidate {
            // 5. Post-construction vetoes.
            let rsi = ctx.row.rsi;
            let overbought = setup.kind == SetupKind::Buy && rsi > Decimal::from(70);
            let oversold = setup.kind == SetupKind::Sell && rsi < Decimal::from(30);
            if overbought || oversold {
                return Err(Rejection::new(
                    RejectReason::RsiExtreme,
                    format!("momentum extreme without edge (RSI {})", rsi.round_dp(1)),
                ));
            }

            if ctx.htf_bias != ctx.bias {
                setup.probability = apply_htf_penalty(setup.probability, setup.strategy);
            }

            if self.config.strict_mode && EngineConfig::is_strict_granularity(granularity) {
                if ctx.htf_bias != ctx.bias {
                    return Err(Rejection::new(
                        RejectReason::HtfMismatch,
                        "misalignment with higher-timeframe bias",
                    ));
                }
                if !(ctx.in_session() || ctx.in_killzone()) {
                    return Err(Rejection::new(
                        RejectReason::SessionOff,
                        "outside London/NY sessions and killzone",
                    ));
                }
            }

            setup.estimated_duration = estimate_duration(&ctx, &setup);
            return Ok(setup);
        }

        // 6. Range fallback, no vetoes.
        if ctx.bias == Bias::Ranging {
            if let Some(mut setup) = range_reversal(&ctx) {
                setup.estimated_duration = estimate_duration(&ctx, &setup);
                return Ok(setup);
            }
        }

        // 7. Nothing qualified.
        Err(Rejection::new(
            RejectReason::NoSetup,
            "no valid proximity to structure zones",
        ))
    }
}

// =============================================================================
// STRATEGIES — each a pure (context) -> Option<Setup>
// =============================================================================

/// Price retesting the last confirmed pivot in trend direction, within a
/// bounded pip distance of (0, 30).
fn structure_retest(ctx: &SignalContext) -> Option<Setup> {
    let close = ctx.candle.close;
    let atr = ctx.row.atr;
    let prob = ctx.probability_tier(88, 82, 72);
    let max_dist = Decimal::from(30);

    match ctx.bias {
        Bias::Bullish => {
            let pivot_low = ctx.row.last_pivot_low?;
            let dist_pips = (close - pivot_low) * ctx.pip_factor;
            if dist_pips > Decimal::ZERO && dist_pips < max_dist {
                let sl = pivot_low - atr * Decimal::new(12, 1);
                let tp = close + atr * Decimal::from(3);
                return Some(Setup::new(
                    SetupKind::Buy,
                    close,
                    sl,
                    tp,
                    prob,
                    StrategyKind::StructureRetest,
                    "SMC: retest of demand zone (last pivot low)",
                ));
            }
            None
        }
        Bias::Bearish => {
            let pivot_high = ctx.row.last_pivot_high?;
            let dist_pips = (pivot_high - close) * ctx.pip_factor;
            if dist_pips > Decimal::ZERO && dist_pips < max_dist {
                let sl = pivot_high + atr * Decimal::new(12, 1);
                let tp = close - atr * Decimal::from(3);
                return Some(Setup::new(
                    SetupKind::Sell,
                    close,
                    sl,
                    tp,
                    prob,
                    StrategyKind::StructureRetest,
                    "SMC: retest of supply zone (last pivot high)",
                ));
            }
            None
        }
        Bias::Ranging => None,
    }
}

/// Latest candle carries a same-direction fair value gap: trade the
/// rebalance, stop buffered beyond the gap edge.
fn imbalance_rebalance(ctx: &SignalContext) -> Option<Setup> {
    let close = ctx.candle.close;
    let atr = ctx.row.atr;
    let prob = ctx.probability_tier(84, 78, 68);

    match ctx.bias {
        Bias::Bullish if ctx.row.fvg_bullish => {
            let gap_bottom = ctx.row.fvg_bottom?;
            let sl = gap_bottom - atr;
            let tp = close + atr * Decimal::new(25, 1);
            Some(Setup::new(
                SetupKind::Buy,
                close,
                sl,
                tp,
                prob,
                StrategyKind::ImbalanceRebalance,
                "FVG: bullish imbalance rebalance",
            ))
        }
        Bias::Bearish if ctx.row.fvg_bearish => {
            let gap_top = ctx.row.fvg_top?;
            let sl = gap_top + atr;
            let tp = close - atr * Decimal::new(25, 1);
            Some(Setup::new(
                SetupKind::Sell,
                close,
                sl,
                tp,
                prob,
                StrategyKind::ImbalanceRebalance,
                "FVG: bearish imbalance rebalance",
            ))
        }
        _ => None,
    }
}

/// Price riding the EMA50 within 15 pips, aligned with the trend.
fn ema_dynamic(ctx: &SignalContext) -> Option<Setup> {
    let close = ctx.candle.close;
    let ema_50 = ctx.row.ema_50;
    let atr = ctx.row.atr;
    let dist_pips = (close - ema_50).abs() * ctx.pip_factor;
    if dist_pips >= Decimal::from(15) {
        return None;
    }
    let prob = ctx.probability_tier(80, 74, 64);

    match ctx.bias {
        Bias::Bullish if close > ema_50 => {
            let sl = ema_50 - atr * Decimal::new(12, 1);
            let tp = close + atr * Decimal::new(24, 1);
            Some(Setup::new(
                SetupKind::Buy,
                close,
                sl,
                tp,
                prob,
                StrategyKind::EmaDynamic,
                "Trend: dynamic rebound off EMA50",
            ))
        }
        Bias::Bearish if close < ema_50 => {
            let sl = ema_50 + atr * Decimal::new(12, 1);
            let tp = close - atr * Decimal::new(24, 1);
            Some(Setup::new(
                SetupKind::Sell,
                close,
                sl,
                tp,
                prob,
                StrategyKind::EmaDynamic,
                "Trend: dynamic rejection off EMA50",
            ))
        }
        _ => None,
    }
}

/// Ranging market scalp: resistance rejection checked before support
/// rebound, fixed probability, no vetoes downstream.
fn range_reversal(ctx: &SignalContext) -> Option<Setup> {
    let close = ctx.candle.close;
    let atr = ctx.row.atr;
    let rsi = ctx.row.rsi;
    let fifty = Decimal::from(50);
    let max_dist = Decimal::from(30);

    if rsi > fifty {
        if let Some(pivot_high) = ctx.row.last_pivot_high {
            let dist_pips = (pivot_high - close) * ctx.pip_factor;
            if dist_pips > Decimal::ZERO && dist_pips < max_dist {
                let sl = pivot_high + atr;
                let tp = close - atr * Decimal::new(22, 1);
                return Some(Setup::new(
                    SetupKind::Sell,
                    close,
                    sl,
                    tp,
                    72,
                    StrategyKind::RangeReversal,
                    "Range: rejection at resistance (scalp)",
                ));
            }
        }
    }

    if rsi < fifty {
        if let Some(pivot_low) = ctx.row.last_pivot_low {
            let dist_pips = (close - pivot_low) * ctx.pip_factor;
            if dist_pips > Decimal::ZERO && dist_pips < max_dist {
                let sl = pivot_low - atr;
                let tp = close + atr * Decimal::new(22, 1);
                return Some(Setup::new(
                    SetupKind::Buy,
                    close,
                    sl,
                    tp,
                    72,
                    StrategyKind::RangeReversal,
                    "Range: rebound at support (scalp)",
                ));
            }
        }
    }

    None
}

// =============================================================================
// POST-PROCESSING HELPERS
// =============================================================================

/// Integer-truncated multiplicative penalty, floored at 60.
fn apply_htf_penalty(probability: u8, strategy: StrategyKind) -> u8 {
    let scaled = (probability as u32 * strategy.htf_penalty_pct()) / 100;
    scaled.max(60) as u8
}

/// Expected bars to target: |tp - entry| / (0.7 * ATR), clamped to [1, 5].
/// When the ATR column is unusable, fall back to the mean candle range of
/// the last 20 bars, then the mean close-to-close move, then a fraction of
/// the stop distance.
fn estimate_duration(ctx: &SignalContext, setup: &Setup) -> u32 {
    let mut atr = ctx.row.atr;

    if atr <= Decimal::ZERO {
        atr = recent_mean(ctx.series, 20, |c| c.high - c.low);
    }
    if atr <= Decimal::ZERO {
        atr = recent_close_change_mean(ctx.series, 20);
    }
    if atr <= Decimal::ZERO {
        atr = setup.risk() * Decimal::new(4, 1);
    }

    let denom = atr * Decimal::new(7, 1);
    if denom <= Decimal::ZERO {
        return 1;
    }
    let bars = (setup.reward() / denom).round();
    bars.to_u32().unwrap_or(5).clamp(1, 5)
}

fn recent_mean(
    series: &AnnotatedSeries,
    window: usize,
    f: impl Fn(&Candle) -> Decimal,
) -> Decimal {
    let tail: Vec<Decimal> = series
        .candles
        .iter()
        .rev()
        .take(window)
        .map(|c| f(c))
        .collect();
    if tail.is_empty() {
        return Decimal::ZERO;
    }
    tail.iter().copied().sum::<Decimal>() / Decimal::from(tail.len())
}

fn recent_close_change_mean(series: &AnnotatedSeries, window: usize) -> Decimal {
    let closes: Vec<Decimal> = series.candles.iter().map(|c| c.close).collect();
    if closes.len() < 2 {
        return Decimal::ZERO;
    }
    let deltas: Vec<Decimal> = closes
        .windows(2)
        .rev()
        .take(window)
        .map(|w| (w[1] - w[0]).abs())
        .collect();
    deltas.iter().copied().sum::<Decimal>() / Decimal::from(deltas.len())
}
