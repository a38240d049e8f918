use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use common::{Candle, Error, PriceQuote, Result, Timeframe};

use crate::{http_client, MarketDataProvider};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko REST client. Second in the default chain.
///
/// CoinGecko's OHLC endpoint carries no volume, so candles come back with
/// `volume = 0.0`; volume-based scoring rules simply never fire on them.
pub struct CoinGeckoProvider {
    http: reqwest::Client,
}

impl CoinGeckoProvider {
    pub fn new() -> Self {
        Self { http: http_client() }
    }

    fn coin_id(symbol: &str) -> String {
        match symbol {
            "BTC" => "bitcoin".to_string(),
            "ETH" => "ethereum".to_string(),
            other => other.to_lowercase(),
        }
    }

    /// CoinGecko takes a day span, not a candle count.
    fn days_for(timeframe: Timeframe, limit: usize) -> u32 {
        let bars_per_day = (24 * 60 / timeframe.minutes()).max(1);
        (limit as u32).div_ceil(bars_per_day).max(1)
    }
}

impl Default for CoinGeckoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    fn name(&self) -> &'static str {
        "CoinGecko"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let coin = Self::coin_id(symbol);
        let days = Self::days_for(timeframe, limit);
        let url = format!("{BASE_URL}/coins/{coin}/ohlc");

        let bars: Vec<[f64; 5]> = self
            .http
            .get(&url)
            .query(&[("vs_currency", "usd".to_string()), ("days", days.to_string())])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let candles: Vec<Candle> = bars
            .into_iter()
            .filter_map(|[ts_ms, open, high, low, close]| {
                let timestamp = Utc.timestamp_millis_opt(ts_ms as i64).single()?;
                Some(Candle {
                    timestamp,
                    open,
                    high,
                    low,
                    close,
                    volume: 0.0,
                })
            })
            .collect();

        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote> {
        let coin = Self::coin_id(symbol);
        let url = format!("{BASE_URL}/simple/price");

        let resp: HashMap<String, SimplePrice> = self
            .http
            .get(&url)
            .query(&[
                ("ids", coin.as_str()),
                ("vs_currencies", "usd"),
                ("include_24hr_vol", "true"),
                ("include_24hr_change", "true"),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let quote = resp
            .get(&coin)
            .ok_or_else(|| Error::Provider(format!("CoinGecko has no quote for {symbol}")))?;

        Ok(PriceQuote {
            price: quote.usd,
            change_24h_pct: quote.usd_24h_change.unwrap_or(0.0),
            volume_24h: quote.usd_24h_vol.unwrap_or(0.0),
            // the simple endpoint has no daily range; reuse spot
            high_24h: quote.usd,
            low_24h: quote.usd,
        })
    }
}

#[derive(Deserialize)]
struct SimplePrice {
    usd: f64,
    usd_24h_vol: Option<f64>,
    usd_24h_change: Option<f64>,
}
