use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use common::{Candle, Error, PriceQuote, Result, Timeframe};

use crate::{http_client, MarketDataProvider};

const BASE_URL: &str = "https://api.kraken.com/0/public";

/// Kraken REST client. Last resort in the default chain.
pub struct KrakenProvider {
    http: reqwest::Client,
}

impl KrakenProvider {
    pub fn new() -> Self {
        Self { http: http_client() }
    }

    fn pair(symbol: &str) -> String {
        // Kraken names bitcoin XBT
        match symbol {
            "BTC" => "XBTUSD".to_string(),
            other => format!("{other}USD"),
        }
    }
}

impl Default for KrakenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for KrakenProvider {
    fn name(&self) -> &'static str {
        "Kraken"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let pair = Self::pair(symbol);
        let interval = timeframe.minutes();
        let since = Utc::now().timestamp() - (limit as i64) * i64::from(interval) * 60;
        let url = format!("{BASE_URL}/OHLC");

        let resp: KrakenResponse = self
            .http
            .get(&url)
            .query(&[
                ("pair", pair.clone()),
                ("interval", interval.to_string()),
                ("since", since.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if let Some(err) = resp.error.first() {
            return Err(Error::Provider(format!("Kraken: {err}")));
        }

        // the result object is keyed by Kraken's own pair name plus a "last" cursor
        let bars = resp
            .result
            .iter()
            .find(|(k, _)| k.as_str() != "last")
            .and_then(|(_, v)| v.as_array())
            .ok_or_else(|| Error::Provider("Kraken returned no OHLC data".into()))?;

        let candles: Vec<Candle> = bars.iter().filter_map(parse_bar).collect();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote> {
        let pair = Self::pair(symbol);
        let url = format!("{BASE_URL}/Ticker");

        let resp: KrakenResponse = self
            .http
            .get(&url)
            .query(&[("pair", pair.as_str())])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if let Some(err) = resp.error.first() {
            return Err(Error::Provider(format!("Kraken: {err}")));
        }

        let ticker = resp
            .result
            .values()
            .next()
            .ok_or_else(|| Error::Provider(format!("Kraken has no ticker for {symbol}")))?;

        Ok(PriceQuote {
            price: field_f64(ticker, "c", 0)?,
            change_24h_pct: 0.0, // Kraken's ticker has no percent change
            volume_24h: field_f64(ticker, "v", 1)?,
            high_24h: field_f64(ticker, "h", 1)?,
            low_24h: field_f64(ticker, "l", 1)?,
        })
    }
}

/// OHLC bars arrive as `[time, "open", "high", "low", "close", "vwap", "volume", count]`.
fn parse_bar(bar: &Value) -> Option<Candle> {
    let fields = bar.as_array()?;
    let timestamp = Utc.timestamp_opt(fields.first()?.as_i64()?, 0).single()?;
    let number = |idx: usize| -> Option<f64> { fields.get(idx)?.as_str()?.parse().ok() };
    Some(Candle {
        timestamp,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(6)?,
    })
}

fn field_f64(ticker: &Value, key: &str, idx: usize) -> Result<f64> {
    ticker
        .get(key)
        .and_then(|v| v.as_array())
        .and_then(|a| a.get(idx))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Provider(format!("Kraken ticker missing field '{key}'")))
}

#[derive(Deserialize)]
struct KrakenResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, Value>,
}
