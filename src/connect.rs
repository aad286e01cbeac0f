use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::types::Candle;

/// REST client for the kline feed. One bounded history fetch per analysis,
/// no streaming.
pub struct MarketDataClient {
    base_url: String,
    client: reqwest::Client,
}

impl MarketDataClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetch up to `limit` closed candles, oldest first, with session flags
    /// already stamped.
    pub async fn fetch_candles(
        &self,
        pair: &str,
        granularity: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit_s = limit.to_string();
        let params = [
            ("symbol", pair),
            ("interval", granularity),
            ("limit", &limit_s),
        ];

        info!("fetching {} candles for {} {}", limit, pair, granularity);
        let resp = self.client.get(&url).query(&params).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("kline fetch failed ({status}): {text}");
        }
        let rows: Vec<Vec<serde_json::Value>> = resp.json().await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            // Kline row: [open_time, open, high, low, close, volume, ...]
            if row.len() < 6 {
                continue;
            }
            let open_time_ms = row[0]
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("invalid kline timestamp"))?;
            let timestamp = DateTime::<Utc>::from_timestamp_millis(open_time_ms)
                .ok_or_else(|| anyhow::anyhow!("kline timestamp out of range"))?;

            let field = |i: usize| -> Result<Decimal> {
                let s = row[i]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("kline field {i} is not a string"))?;
                Ok(s.parse()?)
            };

            let mut candle = Candle {
                timestamp,
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
                is_london: false,
                is_ny: false,
                is_killzone: false,
            };
            annotate_sessions(&mut candle);
            candles.push(candle);
        }

        Ok(candles)
    }
}

/// Fixed UTC session windows: London [08, 17), New York [13, 22), killzone
/// is their overlap. DST drift is accepted.
pub fn annotate_sessions(candle: &mut Candle) {
    let hour = candle.timestamp.hour();
    candle.is_london = (8..17).contains(&hour);
    candle.is_ny = (13..22).contains(&hour);
    candle.is_killzone = candle.is_london && candle.is_ny;
}
