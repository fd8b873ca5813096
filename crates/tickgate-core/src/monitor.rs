//! Point-in-time freshness and health queries.
//!
//! The monitor holds no state of its own; every call reads current storage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::storage::Storage;
use crate::{InstrumentId, ProviderId, TrackedInstrument};

/// Default staleness threshold in trading days.
pub const DEFAULT_STALE_AFTER_DAYS: u32 = 2;

/// How current one pair's stored series is.
///
/// `stale` is decided by `trading_days_behind` alone, so weekends and
/// configured holidays never raise it. `age_days` is reported for operators
/// and plays no part in the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessRecord {
    pub instrument: InstrumentId,
    pub provider: ProviderId,
    pub latest: Option<Date>,
    /// Calendar days since `latest`. Informational only.
    pub age_days: Option<i64>,
    /// Trading days strictly between `latest` and today.
    pub trading_days_behind: Option<usize>,
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub storage_reachable: bool,
    pub extensions_ok: bool,
}

pub struct Monitor {
    storage: Arc<dyn Storage>,
    instruments: Vec<TrackedInstrument>,
    providers: Vec<ProviderId>,
    stale_after_days: u32,
}

impl Monitor {
    pub fn new(
        storage: Arc<dyn Storage>,
        instruments: Vec<TrackedInstrument>,
        providers: Vec<ProviderId>,
    ) -> Self {
        Self {
            storage,
            instruments,
            providers,
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
        }
    }

    pub fn with_stale_after_days(mut self, days: u32) -> Self {
        self.stale_after_days = days;
        self
    }

    pub fn freshness(&self) -> Vec<FreshnessRecord> {
        self.freshness_at(OffsetDateTime::now_utc().date())
    }

    /// Freshness of every tracked `(instrument, provider)` pair as of `today`.
    ///
    /// A pair is stale when nothing is stored, storage cannot answer, or more
    /// than `stale_after_days` trading days have passed since its latest row.
    pub fn freshness_at(&self, today: Date) -> Vec<FreshnessRecord> {
        let mut records = Vec::with_capacity(self.instruments.len() * self.providers.len());
        for instrument in &self.instruments {
            for provider in &self.providers {
                records.push(self.pair_freshness(instrument, provider, today));
            }
        }
        records
    }

    fn pair_freshness(
        &self,
        instrument: &TrackedInstrument,
        provider: &ProviderId,
        today: Date,
    ) -> FreshnessRecord {
        let mut record = FreshnessRecord {
            instrument: instrument.id.clone(),
            provider: provider.clone(),
            latest: None,
            age_days: None,
            trading_days_behind: None,
            stale: true,
            error: None,
        };

        match self.storage.latest_timestamp(&instrument.id, provider) {
            Ok(Some(latest)) => {
                let behind = instrument.calendar.trading_days_between(latest, today);
                record.latest = Some(latest);
                record.age_days = Some((today - latest).whole_days());
                record.trading_days_behind = Some(behind);
                record.stale = behind > self.stale_after_days as usize;
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    instrument = %instrument.id,
                    provider = %provider,
                    %error,
                    "freshness lookup failed"
                );
                record.error = Some(error.to_string());
            }
        }
        record
    }

    pub fn health(&self) -> HealthReport {
        let storage_reachable = self.storage.is_healthy();
        HealthReport {
            storage_reachable,
            extensions_ok: storage_reachable && self.storage.extensions_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::storage::MemoryStorage;
    use crate::{Observation, ObservationBatch, ValueRange};

    fn wti() -> TrackedInstrument {
        TrackedInstrument::new(
            InstrumentId::parse("WTI").expect("id"),
            "WTI Crude",
            "USD/bbl",
            ValueRange::new(10.0, 300.0).expect("range"),
        )
    }

    #[test]
    fn unstored_pairs_are_stale() {
        let monitor = Monitor::new(
            Arc::new(MemoryStorage::new()),
            vec![wti()],
            vec![ProviderId::parse("eia").expect("id")],
        );

        let records = monitor.freshness_at(date!(2026 - 03 - 10));
        assert_eq!(records.len(), 1);
        assert!(records[0].stale);
        assert_eq!(records[0].latest, None);
    }

    #[test]
    fn weekend_does_not_count_against_freshness() {
        let storage = Arc::new(MemoryStorage::new());
        let eia = ProviderId::parse("eia").expect("id");
        let batch = ObservationBatch::new(
            eia.clone(),
            wti().id,
            vec![Observation::new(date!(2026 - 03 - 06), 70.0)],
        );
        storage.upsert(&batch.instrument, &eia, &batch).expect("upsert");
        let monitor = Monitor::new(storage, vec![wti()], vec![eia]);

        // Friday's row checked on Monday: three calendar days, zero trading days.
        let record = &monitor.freshness_at(date!(2026 - 03 - 09))[0];
        assert_eq!(record.age_days, Some(3));
        assert_eq!(record.trading_days_behind, Some(0));
        assert!(!record.stale);
    }

    #[test]
    fn unreachable_storage_reports_unhealthy() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_healthy(false);
        let monitor = Monitor::new(storage, vec![wti()], vec![ProviderId::parse("eia").expect("id")]);

        assert_eq!(
            monitor.health(),
            HealthReport {
                storage_reachable: false,
                extensions_ok: false
            }
        );
        let record = &monitor.freshness_at(date!(2026 - 03 - 09))[0];
        assert!(record.stale);
        assert!(record.error.is_some());
    }
}
