use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use common::{Candle, Error, PriceQuote, Result, Timeframe};

use crate::{http_client, MarketDataProvider};

const BASE_URL: &str = "https://min-api.cryptocompare.com/data";

/// CryptoCompare REST client. First in the default chain.
pub struct CryptoCompareProvider {
    api_key: Option<String>,
    http: reqwest::Client,
}

impl CryptoCompareProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            http: http_client(),
        }
    }

    /// CryptoCompare exposes minute/hour/day endpoints; sub-hour and 4h
    /// intervals are served through `aggregate`.
    fn endpoint_and_aggregate(timeframe: Timeframe) -> (&'static str, u32) {
        match timeframe {
            Timeframe::M5 => ("histominute", 5),
            Timeframe::M15 => ("histominute", 15),
            Timeframe::M30 => ("histominute", 30),
            Timeframe::H1 => ("histohour", 1),
            Timeframe::H4 => ("histohour", 4),
            Timeframe::D1 => ("histoday", 1),
        }
    }
}

#[async_trait]
impl MarketDataProvider for CryptoCompareProvider {
    fn name(&self) -> &'static str {
        "CryptoCompare"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let (endpoint, aggregate) = Self::endpoint_and_aggregate(timeframe);
        let url = format!("{BASE_URL}/{endpoint}");

        let mut request = self.http.get(&url).query(&[
            ("fsym", symbol.to_string()),
            ("tsym", "USD".to_string()),
            ("limit", limit.to_string()),
            ("aggregate", aggregate.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        debug!(%timeframe, limit, "requesting CryptoCompare candles");
        let resp: HistoryResponse = request
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let data = resp
            .data
            .ok_or_else(|| Error::Provider("CryptoCompare returned no data".into()))?;

        let mut candles: Vec<Candle> = data
            .into_iter()
            .filter_map(|bar| {
                let timestamp = Utc.timestamp_opt(bar.time, 0).single()?;
                Some(Candle {
                    timestamp,
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volumeto,
                })
            })
            .collect();
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote> {
        let url = format!("{BASE_URL}/pricemultifull");

        let mut request = self
            .http
            .get(&url)
            .query(&[("fsyms", symbol), ("tsyms", "USD")]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        let resp: PriceResponse = request
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let ticker = resp
            .raw
            .get(symbol)
            .and_then(|m| m.get("USD"))
            .ok_or_else(|| Error::Provider(format!("CryptoCompare has no quote for {symbol}")))?;

        Ok(PriceQuote {
            price: ticker.price,
            change_24h_pct: ticker.changepct24hour,
            volume_24h: ticker.volume24hourto,
            high_24h: ticker.high24hour,
            low_24h: ticker.low24hour,
        })
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(rename = "Data")]
    data: Option<Vec<HistoryBar>>,
}

#[derive(Deserialize)]
struct HistoryBar {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volumeto: f64,
}

#[derive(Deserialize)]
struct PriceResponse {
    #[serde(rename = "RAW")]
    raw: HashMap<String, HashMap<String, RawTicker>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct RawTicker {
    price: f64,
    changepct24hour: f64,
    volume24hourto: f64,
    high24hour: f64,
    low24hour: f64,
}
