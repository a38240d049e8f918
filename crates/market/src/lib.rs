pub mod coingecko;
pub mod cryptocompare;
pub mod kraken;

pub use coingecko::CoinGeckoProvider;
pub use cryptocompare::CryptoCompareProvider;
pub use kraken::KrakenProvider;

use async_trait::async_trait;
use tracing::{info, warn};

use common::{Candle, Error, PriceQuote, Result, Timeframe};

/// Abstraction over one market-data source.
///
/// Implementations must return candles in ascending timestamp order, at most
/// `limit` of them. All implementations are interchangeable; the chain below
/// decides which one actually serves a request.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name shown in logs.
    fn name(&self) -> &'static str;

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote>;
}

/// Ordered list of providers tried in sequence, short-circuiting on the
/// first success. All-providers-failed surfaces as `Error::Provider`, which
/// aborts only the cycle that issued the request.
pub struct ProviderChain {
    providers: Vec<Box<dyn MarketDataProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn MarketDataProvider>>) -> Self {
        Self { providers }
    }

    /// The default chain: CryptoCompare, then CoinGecko, then Kraken.
    pub fn default_chain(cryptocompare_api_key: Option<String>) -> Self {
        Self::new(vec![
            Box::new(CryptoCompareProvider::new(cryptocompare_api_key)),
            Box::new(CoinGeckoProvider::new()),
            Box::new(KrakenProvider::new()),
        ])
    }

    pub async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.fetch_candles(symbol, timeframe, limit).await {
                Ok(candles) => {
                    info!(
                        provider = provider.name(),
                        count = candles.len(),
                        %timeframe,
                        "candles fetched"
                    );
                    return Ok(candles);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "candle fetch failed");
                    last_error = Some(e);
                }
            }
        }
        Err(Error::Provider(format!(
            "no provider could serve candles for {symbol}/{timeframe}: {}",
            last_error.map_or_else(|| "no providers configured".to_string(), |e| e.to_string())
        )))
    }

    pub async fn price(&self, symbol: &str) -> Result<PriceQuote> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.fetch_price(symbol).await {
                Ok(quote) => {
                    info!(provider = provider.name(), price = quote.price, "price fetched");
                    return Ok(quote);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "price fetch failed");
                    last_error = Some(e);
                }
            }
        }
        Err(Error::Provider(format!(
            "no provider could serve a price for {symbol}: {}",
            last_error.map_or_else(|| "no providers configured".to_string(), |e| e.to_string())
        )))
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .use_rustls_tls()
        .build()
        .expect("Failed to build HTTP client")
}
