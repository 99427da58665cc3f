use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once `threshold` events pile up
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        match engine.compact_if_needed(threshold).await {
            Ok(true) => debug!(threshold, "compactor ran"),
            Ok(false) => {}
            Err(e) => warn!("compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::EngineConfig;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staybook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(
            EngineConfig::new(&path),
            Arc::new(SystemClock),
            Arc::new(NotifyHub::new()),
        )
        .unwrap();

        let host = Ulid::new();
        let unit_id = engine
            .create_unit(
                host,
                AvailabilityPolicy::default(),
                PricingPolicy::new(dec!(100), dec!(0)),
                CancellationPolicy::Flexible,
            )
            .await
            .unwrap();
        for policy in [CancellationPolicy::Firm, CancellationPolicy::Strict, CancellationPolicy::Moderate] {
            engine
                .update_cancellation_policy(&Actor::member(host), unit_id, policy)
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await.unwrap(), 4);

        assert!(!engine.compact_if_needed(10).await.unwrap());
        assert!(engine.compact_if_needed(4).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await.unwrap(), 0);

        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::UnitRestored { state }
            if state.cancellation_policy == CancellationPolicy::Moderate));
    }
}
