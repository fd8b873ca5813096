use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use time::{Date, Weekday};

use crate::source::{FetchError, FetchFuture, FetchRequest, SourceConnector};
use crate::{InstrumentId, Observation, ObservationBatch, ProviderId};

/// What a fixture returns for one instrument.
#[derive(Debug, Clone)]
enum FixtureSeries {
    /// Canned observations, filtered to the requested range.
    Static(Vec<Observation>),
    /// One weekday observation per requested day around `base`.
    Generated { base: f64, wobble: f64 },
}

#[derive(Debug, Default)]
struct FixtureState {
    series: HashMap<InstrumentId, FixtureSeries>,
    scripted_failures: HashMap<InstrumentId, VecDeque<FetchError>>,
    persistent_failures: HashMap<InstrumentId, FetchError>,
    requests: Vec<FetchRequest>,
}

/// In-memory, scriptable connector.
///
/// Unknown instruments fail with `NotFound`. Scripted failures are consumed in
/// order before the canned series is served, which makes retry and partial
/// failure paths reproducible without a network.
#[derive(Debug)]
pub struct FixtureConnector {
    id: ProviderId,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    state: Mutex<FixtureState>,
}

/// Counts one call as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(current)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FixtureConnector {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            state: Mutex::new(FixtureState::default()),
        }
    }

    /// Serve canned observations for an instrument.
    pub fn with_series(self, instrument: InstrumentId, observations: Vec<Observation>) -> Self {
        self.lock()
            .series
            .insert(instrument, FixtureSeries::Static(observations));
        self
    }

    /// Generate a smooth weekday series for whatever range is requested.
    ///
    /// Values stay within `base * (1 ± 3 * wobble)`.
    pub fn with_generated_series(self, instrument: InstrumentId, base: f64, wobble: f64) -> Self {
        self.lock()
            .series
            .insert(instrument, FixtureSeries::Generated { base, wobble });
        self
    }

    /// Fail the next `times` calls for an instrument with `error`.
    pub fn failing_times(self, instrument: InstrumentId, times: usize, error: FetchError) -> Self {
        self.lock()
            .scripted_failures
            .entry(instrument)
            .or_default()
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Fail every call for an instrument.
    pub fn always_failing(self, instrument: InstrumentId, error: FetchError) -> Self {
        self.lock().persistent_failures.insert(instrument, error);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total `fetch` calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were ever in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, request: &FetchRequest) -> Result<ObservationBatch, FetchError> {
        let mut state = self.lock();
        state.requests.push(request.clone());

        if let Some(error) = state
            .scripted_failures
            .get_mut(&request.instrument)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if let Some(error) = state.persistent_failures.get(&request.instrument) {
            return Err(error.clone());
        }

        let observations = match state.series.get(&request.instrument) {
            Some(FixtureSeries::Static(observations)) => observations
                .iter()
                .filter(|obs| request.range.contains(obs.date))
                .cloned()
                .collect(),
            Some(FixtureSeries::Generated { base, wobble }) => {
                generate(*base, *wobble, request.range.start, request.range.end)
            }
            None => {
                return Err(FetchError::not_found(format!(
                    "{} has no series '{}'",
                    self.id, request.series_key
                )))
            }
        };

        Ok(ObservationBatch::new(
            self.id.clone(),
            request.instrument.clone(),
            observations,
        ))
    }
}

impl SourceConnector for FixtureConnector {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn fetch<'a>(&'a self, request: FetchRequest) -> FetchFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.answer(&request)
        })
    }
}

fn generate(base: f64, wobble: f64, start: Date, end: Date) -> Vec<Observation> {
    let mut observations = Vec::new();
    let mut cursor = Some(start);
    while let Some(day) = cursor {
        if day > end {
            break;
        }
        if !matches!(day.weekday(), Weekday::Saturday | Weekday::Sunday) {
            let phase = f64::from(day.to_julian_day().rem_euclid(7)) - 3.0;
            let value = base * (1.0 + wobble * phase);
            observations.push(Observation::new(day, value).with_ohlc(value, value, value, value));
        }
        cursor = day.next_day();
    }
    observations
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::{DateRange, FetchErrorKind};

    fn wti() -> InstrumentId {
        InstrumentId::parse("WTI").expect("id")
    }

    fn request(start: Date, end: Date) -> FetchRequest {
        FetchRequest::new(wti(), "PET.RWTC.D", DateRange::new(start, end).expect("range"))
    }

    #[tokio::test]
    async fn serves_static_series_within_range() {
        let connector = FixtureConnector::new(ProviderId::parse("eia").expect("id")).with_series(
            wti(),
            vec![
                Observation::new(date!(2026 - 03 - 02), 70.0),
                Observation::new(date!(2026 - 03 - 10), 71.0),
            ],
        );

        let batch = connector
            .fetch(request(date!(2026 - 03 - 01), date!(2026 - 03 - 05)))
            .await
            .expect("fetch");

        assert_eq!(batch.len(), 1);
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let connector = FixtureConnector::new(ProviderId::parse("eia").expect("id"))
            .with_generated_series(wti(), 70.0, 0.001)
            .failing_times(wti(), 1, FetchError::server_error("502"));

        let range = (date!(2026 - 03 - 02), date!(2026 - 03 - 06));
        let first = connector.fetch(request(range.0, range.1)).await;
        let second = connector.fetch(request(range.0, range.1)).await;

        assert_eq!(first.expect_err("scripted").kind(), FetchErrorKind::ServerError);
        assert_eq!(second.expect("served").len(), 5);
    }

    #[tokio::test]
    async fn peak_concurrency_counts_overlapping_calls() {
        let connector = FixtureConnector::new(ProviderId::parse("eia").expect("id"))
            .with_generated_series(wti(), 70.0, 0.001)
            .with_delay(Duration::from_millis(20));
        let range = (date!(2026 - 03 - 02), date!(2026 - 03 - 06));

        let (a, b) = tokio::join!(
            connector.fetch(request(range.0, range.1)),
            connector.fetch(request(range.0, range.1))
        );
        assert!(a.is_ok() && b.is_ok());
        connector.fetch(request(range.0, range.1)).await.expect("sequential");

        assert_eq!(connector.peak_concurrency(), 2);
        assert_eq!(connector.calls(), 3);
    }

    #[tokio::test]
    async fn unknown_instrument_is_not_found() {
        let connector = FixtureConnector::new(ProviderId::parse("eia").expect("id"));
        let error = connector
            .fetch(request(date!(2026 - 03 - 02), date!(2026 - 03 - 06)))
            .await
            .expect_err("no series");
        assert_eq!(error.kind(), FetchErrorKind::NotFound);
    }

    #[test]
    fn generated_series_skips_weekends() {
        let values = generate(70.0, 0.001, date!(2026 - 03 - 01), date!(2026 - 03 - 31));
        assert_eq!(values.len(), 22);
        assert!(values
            .iter()
            .all(|obs| obs.value.is_some_and(|v| (v - 70.0).abs() <= 70.0 * 0.003 + 1e-9)));
    }
}
