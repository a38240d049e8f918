use std::sync::Arc;

use tracing::{debug, info};

use common::{Error, Result, ScoreBucket};

use crate::store::SignalStore;

/// Calibration only moves a bucket's probability when the realized hit rate
/// differs from it by more than this many percentage points.
pub const MIN_DELTA_PCT: f64 = 5.0;

/// Periodically rewrites each bucket's adjusted probability from realized
/// outcomes. Reads aggregates only; never touches a signal.
pub struct CalibrationService<S> {
    store: Arc<S>,
}

impl<S: SignalStore> CalibrationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// One calibration run over every bucket. A malformed bucket aborts the
    /// run (fatal-config); it must not half-apply.
    pub async fn recalibrate(&self) -> Result<()> {
        let buckets = self.store.read_score_buckets().await?;
        info!(buckets = buckets.len(), "calibration run starting");

        for bucket in buckets {
            match recalibrated_probability(&bucket)? {
                Some(probability) => {
                    self.store.set_adjusted_probability(bucket.id, probability).await?;
                    info!(
                        bucket_id = bucket.id,
                        range = format!("{}-{}", bucket.min_score, bucket.max_score),
                        previous = bucket.adjusted_probability,
                        updated = probability,
                        "bucket probability recalibrated"
                    );
                }
                None => {
                    debug!(
                        bucket_id = bucket.id,
                        samples = bucket.total_signals,
                        "bucket unchanged"
                    );
                }
            }
        }
        Ok(())
    }
}

/// The new adjusted probability for a bucket, or `None` when the bucket has
/// too few samples or the realized hit rate is within tolerance.
pub fn recalibrated_probability(bucket: &ScoreBucket) -> Result<Option<u8>> {
    if bucket.min_score >= bucket.max_score {
        return Err(Error::Config(format!(
            "score bucket {} has inverted bounds [{}, {})",
            bucket.id, bucket.min_score, bucket.max_score
        )));
    }
    if !bucket.has_sufficient_samples() {
        return Ok(None);
    }

    let resolved = bucket.wins + bucket.losses;
    if resolved == 0 {
        return Ok(None);
    }
    let hit_rate = f64::from(bucket.wins) / f64::from(resolved) * 100.0;
    let probability = hit_rate.round() as u8;

    let delta = (f64::from(probability) - f64::from(bucket.adjusted_probability)).abs();
    Ok((delta > MIN_DELTA_PCT).then_some(probability))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::{SignalStore, SqliteStore};
    use std::sync::Arc;

    fn bucket(total: u32, wins: u32, losses: u32, adjusted: u8) -> ScoreBucket {
        ScoreBucket {
            id: 1,
            min_score: 40,
            max_score: 55,
            total_signals: total,
            wins,
            losses,
            hit_rate: 0.0,
            adjusted_probability: adjusted,
        }
    }

    #[test]
    fn large_delta_updates_probability() {
        // 7/12 wins: 58% realized against 50% adjusted, delta 8 > 5
        let updated = recalibrated_probability(&bucket(12, 7, 5, 50)).unwrap();
        assert_eq!(updated, Some(58));
    }

    #[test]
    fn small_delta_leaves_bucket_untouched() {
        // 6/11 wins: 55% against 52%, delta 3 <= 5
        let updated = recalibrated_probability(&bucket(11, 6, 5, 52)).unwrap();
        assert_eq!(updated, None);
    }

    #[test]
    fn undersampled_bucket_is_never_updated() {
        // 8 samples with a wild delta still must not move
        let updated = recalibrated_probability(&bucket(8, 8, 0, 10)).unwrap();
        assert_eq!(updated, None);
    }

    #[test]
    fn unresolved_bucket_is_skipped() {
        let updated = recalibrated_probability(&bucket(12, 0, 0, 50)).unwrap();
        assert_eq!(updated, None);
    }

    #[test]
    fn inverted_bounds_are_fatal_for_the_run() {
        let mut broken = bucket(12, 7, 5, 50);
        broken.min_score = 60;
        broken.max_score = 40;
        let err = recalibrated_probability(&broken).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn recalibration_persists_updates() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let target = store.bucket_for_score(45).await.unwrap().unwrap();
        store.update_bucket_stats(target.id, 12, 7, 5, 58.3).await.unwrap();
        store.set_adjusted_probability(target.id, 50).await.unwrap();

        // an undersampled sibling must stay at zero
        let sibling = store.bucket_for_score(75).await.unwrap().unwrap();
        store.update_bucket_stats(sibling.id, 8, 8, 0, 100.0).await.unwrap();

        let calibration = CalibrationService::new(store.clone());
        calibration.recalibrate().await.unwrap();

        let updated = store.bucket_for_score(45).await.unwrap().unwrap();
        assert_eq!(updated.adjusted_probability, 58);

        let untouched = store.bucket_for_score(75).await.unwrap().unwrap();
        assert_eq!(untouched.adjusted_probability, 0);
    }
}
