use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use common::{
    Direction, Error, EventKind, IndicatorSnapshot, Result, Signal, SignalEvent, SignalState,
    Timeframe, TrendBias,
};
use market::ProviderChain;
use strategy::{builder, indicators, scorer, trend, triggers, SignalLevels, TrendContext};

use crate::store::SignalStore;

/// Tunables for signal generation.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub symbol: String,
    /// Signal lifetime before expiry resolves it as a loss.
    pub expiry_minutes: i64,
    /// Window for suppressing duplicate dynamic signals.
    pub duplicate_window_minutes: i64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC".to_string(),
            expiry_minutes: 60,
            duplicate_window_minutes: 15,
        }
    }
}

/// Turns candle windows into persisted signals.
///
/// Two entry points: `evaluate` scores a full indicator window on the
/// configured timeframe, `run_dynamic_analysis` reacts to short-window
/// market triggers. Both paths share the ATR-based level builder and the
/// persistence tail.
pub struct SignalService<S> {
    market: Arc<ProviderChain>,
    store: Arc<S>,
    config: GenerationConfig,
    trigger_config: triggers::TriggerConfig,
}

impl<S: SignalStore> SignalService<S> {
    pub fn new(market: Arc<ProviderChain>, store: Arc<S>, config: GenerationConfig) -> Self {
        Self {
            market,
            store,
            config,
            trigger_config: triggers::TriggerConfig::default(),
        }
    }

    /// Score the current market on `timeframe` and persist a signal when the
    /// rule set accepts a direction. `Ok(None)` is the normal no-signal
    /// outcome; errors mean this cycle could not be evaluated at all.
    pub async fn evaluate(&self, timeframe: Timeframe) -> Result<Option<Signal>> {
        let candles = self
            .market
            .candles(&self.config.symbol, timeframe, scorer::MIN_CANDLES)
            .await?;
        let ind = indicators::snapshot(&candles);

        let result = match scorer::score(&candles, &ind) {
            Ok(result) => result,
            Err(Error::InsufficientData { have, need }) => {
                info!(have, need, "not enough history for evaluation");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(direction) = result.direction else {
            debug!(
                points = result.points,
                long_reasons = result.reasons_long.len(),
                short_reasons = result.reasons_short.len(),
                "no signal this cycle"
            );
            return Ok(None);
        };

        let Some(atr) = ind.atr else {
            debug!("ATR unavailable, cannot size levels");
            return Ok(None);
        };
        let Some(levels) = builder::build(direction, ind.last_close, atr) else {
            info!(%direction, "reward:risk below minimum, signal dropped");
            return Ok(None);
        };

        // higher-timeframe bias: hard veto against counter-trend entries
        let context = self.context(timeframe.higher()).await;
        if !trend::filter(direction, context.bias) {
            info!(%direction, bias = %context.bias, "counter-trend signal vetoed");
            return Ok(None);
        }

        let mut probability = self.calibrated_probability(result.points, &ind).await?;
        let mut reason = result.reason_text();
        if context.bias.aligns_with(direction) {
            probability = trend::apply_alignment_bonus(probability);
            reason.push_str(&format!(
                "; aligned with {} {} trend",
                timeframe.higher(),
                context.bias
            ));
        }

        let signal = self.assemble(
            direction,
            ind.last_close,
            &levels,
            probability,
            reason,
            timeframe,
            result.points,
        );
        self.persist(&signal).await?;
        info!(
            signal_id = %signal.id,
            %direction,
            probability,
            ratio = signal.risk_reward_ratio,
            "signal generated"
        );
        Ok(Some(signal))
    }

    /// Opportunistic path: scan the 5m window for discrete triggers and
    /// assemble a conservative signal when enough of them align.
    pub async fn run_dynamic_analysis(&self) -> Result<Option<Signal>> {
        let candles = self
            .market
            .candles(&self.config.symbol, Timeframe::M5, 60)
            .await?;
        if candles.len() < triggers::MIN_TRIGGER_CANDLES {
            info!(have = candles.len(), "not enough 5m history for trigger analysis");
            return Ok(None);
        }
        let ind = indicators::snapshot(&candles);

        let found = triggers::detect(&candles, &ind, &self.trigger_config);
        if found.is_empty() {
            debug!("no market triggers this cycle");
            return Ok(None);
        }
        info!(count = found.len(), "market triggers detected");

        let Some((direction, aligned)) = triggers::dominant(&found) else {
            debug!("triggers split evenly, no dominant direction");
            return Ok(None);
        };

        let since = Utc::now() - Duration::minutes(self.config.duplicate_window_minutes);
        if self.store.has_recent_signal(direction, since).await? {
            info!(%direction, "recent signal of the same direction exists, skipping");
            return Ok(None);
        }

        // multi-timeframe context shifts the trigger score
        let context_1h = self.context(Timeframe::H1).await;
        let context_4h = self.context(Timeframe::H4).await;
        let base: u32 = aligned.iter().map(|t| t.points).sum();
        let adjusted =
            base as i32 + triggers::context_adjustment(direction, context_4h.bias, context_1h.bias);

        if adjusted < triggers::DYNAMIC_MIN_POINTS as i32
            || aligned.len() < triggers::DYNAMIC_MIN_TRIGGERS
        {
            info!(
                points = adjusted,
                triggers = aligned.len(),
                "dynamic signal below acceptance gates"
            );
            return Ok(None);
        }
        let points = adjusted as u32;

        // size levels off the 1h ATR, same minimum-edge gate as the main path
        let hourly = self
            .market
            .candles(&self.config.symbol, Timeframe::H1, 50)
            .await?;
        let Some(atr) = indicators::snapshot(&hourly).atr else {
            debug!("1h ATR unavailable, dropping dynamic signal");
            return Ok(None);
        };
        let entry = ind.last_close;
        let Some(levels) = builder::build(direction, entry, atr) else {
            info!(%direction, "dynamic signal reward:risk below minimum");
            return Ok(None);
        };

        let probability = points
            .clamp(
                u32::from(triggers::DYNAMIC_MIN_PROBABILITY),
                u32::from(triggers::DYNAMIC_MAX_PROBABILITY),
            ) as u8;

        let mut reason = aligned
            .iter()
            .map(|t| t.detail.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if context_4h.bias != TrendBias::Neutral {
            reason.push_str(&format!("; 4h trend {}", context_4h.bias));
        }

        let signal = self.assemble(
            direction,
            entry,
            &levels,
            probability,
            reason,
            Timeframe::M5,
            points,
        );
        self.persist(&signal).await?;
        info!(
            signal_id = %signal.id,
            %direction,
            probability,
            triggers = aligned.len(),
            "dynamic signal generated"
        );
        Ok(Some(signal))
    }

    /// Calibrated probability when the covering bucket has enough samples,
    /// otherwise the raw score formula.
    async fn calibrated_probability(&self, points: u32, ind: &IndicatorSnapshot) -> Result<u8> {
        if let Some(bucket) = self.store.bucket_for_score(points.min(100)).await? {
            if bucket.has_sufficient_samples() && bucket.adjusted_probability > 0 {
                debug!(
                    bucket_id = bucket.id,
                    adjusted = bucket.adjusted_probability,
                    "using calibrated probability"
                );
                return Ok(bucket.adjusted_probability);
            }
        }
        Ok(scorer::probability(points, ind))
    }

    /// Higher-timeframe trend context; fetch failures degrade to neutral
    /// rather than aborting the evaluation.
    async fn context(&self, timeframe: Timeframe) -> TrendContext {
        match self
            .market
            .candles(&self.config.symbol, timeframe, scorer::MIN_CANDLES)
            .await
        {
            Ok(candles) => trend::classify(&indicators::snapshot(&candles)),
            Err(e) => {
                tracing::warn!(%timeframe, error = %e, "context fetch failed, treating as neutral");
                TrendContext::neutral()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        direction: Direction,
        entry_price: f64,
        levels: &SignalLevels,
        probability: u8,
        reason: String,
        timeframe: Timeframe,
        score: u32,
    ) -> Signal {
        let now = Utc::now();
        Signal {
            id: Uuid::new_v4().to_string(),
            direction,
            entry_price,
            stop_loss: levels.stop_loss,
            take_profit_1: levels.take_profit_1,
            take_profit_2: levels.take_profit_2,
            take_profit_3: levels.take_profit_3,
            probability,
            risk_reward_ratio: levels.risk_reward_ratio,
            reason,
            timeframe,
            score,
            state: SignalState::Active,
            close_percent: 0,
            close_price: None,
            outcome: None,
            created_at: now,
            expires_at: now + Duration::minutes(self.config.expiry_minutes),
        }
    }

    async fn persist(&self, signal: &Signal) -> Result<()> {
        self.store.create_signal(signal).await?;
        self.store
            .append_event(&SignalEvent {
                signal_id: signal.id.clone(),
                at: signal.created_at,
                kind: EventKind::Created,
                detail: format!(
                    "{} entry {:.2}, stop {:.2}, targets {:.2}/{:.2}/{:.2}",
                    signal.direction,
                    signal.entry_price,
                    signal.stop_loss,
                    signal.take_profit_1,
                    signal.take_profit_2,
                    signal.take_profit_3,
                ),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use common::{Candle, PriceQuote};
    use market::MarketDataProvider;

    use crate::store::{ActiveFilter, SqliteStore};

    /// Serves a fixed candle window for every timeframe.
    struct ScriptedProvider {
        candles: Vec<Candle>,
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            limit: usize,
        ) -> Result<Vec<Candle>> {
            let skip = self.candles.len().saturating_sub(limit);
            Ok(self.candles.iter().skip(skip).copied().collect())
        }

        async fn fetch_price(&self, _symbol: &str) -> Result<PriceQuote> {
            let price = self.candles.last().map_or(0.0, |c| c.close);
            Ok(PriceQuote {
                price,
                change_24h_pct: 0.0,
                volume_24h: 0.0,
                high_24h: price,
                low_24h: price,
            })
        }
    }

    fn bar(i: usize, open: f64, close: f64, volume: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let pad = open.max(close) * 0.0002;
        Candle {
            timestamp: start + Duration::minutes(5 * i as i64),
            open,
            high: open.max(close) + pad,
            low: open.min(close) - pad,
            close,
            volume,
        }
    }

    /// Sustained heavy decline: RSI pinned low, EMAs stacked bearish, with a
    /// high-volume bearish bar at the end.
    fn declining_window(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = 100_000.0 - 300.0 * i as f64;
                let volume = if i == n - 1 { 30.0 } else { 10.0 };
                bar(i, close + 300.0, close, volume)
            })
            .collect()
    }

    /// Gentle zig-zag uptrend that trips no scoring rule decisively.
    fn quiet_window(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = 100.0 + 0.1 * i as f64 + 0.3 * (i % 2) as f64;
                bar(i, close - 0.1, close, 10.0)
            })
            .collect()
    }

    async fn service_with(
        candles: Vec<Candle>,
    ) -> (SignalService<SqliteStore>, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let market = Arc::new(ProviderChain::new(vec![Box::new(ScriptedProvider { candles })]));
        let service = SignalService::new(market, store.clone(), GenerationConfig::default());
        (service, store)
    }

    #[tokio::test]
    async fn short_history_yields_no_signal() {
        let (service, store) = service_with(declining_window(120)).await;
        let result = service.evaluate(Timeframe::H1).await.unwrap();
        assert!(result.is_none());
        assert!(store.read_active_signals(&ActiveFilter::none()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quiet_market_yields_no_signal() {
        let (service, _store) = service_with(quiet_window(250)).await;
        let result = service.evaluate(Timeframe::H1).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn provider_failure_propagates_as_provider_error() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let market = Arc::new(ProviderChain::new(Vec::new()));
        let service = SignalService::new(market, store, GenerationConfig::default());

        let err = service.evaluate(Timeframe::H1).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test]
    async fn bearish_confluence_generates_a_persisted_short() {
        let (service, store) = service_with(declining_window(260)).await;
        let signal = service
            .evaluate(Timeframe::H1)
            .await
            .unwrap()
            .expect("decline should produce a short signal");

        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.state, SignalState::Active);
        assert!(signal.risk_reward_ratio >= builder::MIN_RISK_REWARD);
        assert!(signal.take_profit_1 > signal.take_profit_2);
        assert!(signal.take_profit_2 > signal.take_profit_3);
        assert!(signal.stop_loss > signal.entry_price);
        assert!(signal.expires_at > signal.created_at);
        // higher timeframe is the same decline, so the short is aligned
        assert!(signal.reason.contains("trend"));

        let stored = store.read_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(stored.direction, Direction::Short);

        let events = store.read_events(&signal.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Created);
    }

    #[tokio::test]
    async fn calibrated_bucket_overrides_raw_probability() {
        let (service, store) = service_with(declining_window(260)).await;

        // every bucket gets a calibrated probability with enough samples
        for bucket in store.read_score_buckets().await.unwrap() {
            store.update_bucket_stats(bucket.id, 12, 5, 7, 41.7).await.unwrap();
            store.set_adjusted_probability(bucket.id, 42).await.unwrap();
        }

        let signal = service.evaluate(Timeframe::H1).await.unwrap().unwrap();
        // 42 from the bucket, +5 trend alignment bonus
        assert_eq!(signal.probability, 47);
    }

    #[tokio::test]
    async fn dynamic_crash_bar_generates_short_and_suppresses_duplicates() {
        // quiet zig-zag, then a -3% bar on triple volume
        let mut candles = quiet_window(60);
        let n = candles.len();
        let prev_close = candles[n - 2].close;
        candles[n - 1] = bar(n - 1, prev_close, prev_close * 0.97, 30.0);
        let (service, store) = service_with(candles).await;

        let signal = service
            .run_dynamic_analysis()
            .await
            .unwrap()
            .expect("crash bar should produce a dynamic short");
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.timeframe, Timeframe::M5);
        assert!(
            (triggers::DYNAMIC_MIN_PROBABILITY..=triggers::DYNAMIC_MAX_PROBABILITY)
                .contains(&signal.probability)
        );

        // an open short already exists, so the next pass must not duplicate
        let second = service.run_dynamic_analysis().await.unwrap();
        assert!(second.is_none());
        let active = store.read_active_signals(&ActiveFilter::none()).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn dynamic_quiet_market_yields_nothing() {
        let (service, _store) = service_with(quiet_window(60)).await;
        let result = service.run_dynamic_analysis().await.unwrap();
        assert!(result.is_none());
    }
}
