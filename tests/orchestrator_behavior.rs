//! Behavior-driven tests for pipeline runs
//!
//! These tests drive the orchestrator end to end against in-memory
//! connectors and storage, focusing on what a run reports and persists when
//! upstream providers misbehave.

use std::sync::Arc;
use std::time::Duration;

use time::macros::date;
use tickgate_core::connectors::FixtureConnector;
use tickgate_core::orchestrator::OrchestratorConfig;
use tickgate_core::retry::RetryPolicy;
use tickgate_core::{
    CancelFlag, CapabilitySet, ConnectorRegistry, DateRange, FetchError, FetchErrorKind,
    GateDecision, InstrumentId, MemoryStorage, Observation, ObservationField, Orchestrator,
    PairError, ProviderId, ProviderProfile, RunMode, RunRequest, RunStatus, SourceConnector,
    Storage, TrackedInstrument, ValidationConfig, Validator, ValueRange,
};

fn wti() -> InstrumentId {
    InstrumentId::parse("WTI").expect("id")
}

fn brent() -> InstrumentId {
    InstrumentId::parse("BRENT").expect("id")
}

fn eia() -> ProviderId {
    ProviderId::parse("eia").expect("id")
}

fn fred() -> ProviderId {
    ProviderId::parse("fred").expect("id")
}

fn tracked(id: InstrumentId) -> TrackedInstrument {
    TrackedInstrument::new(id, "crude", "USD/bbl", ValueRange::new(10.0, 300.0).expect("range"))
}

fn profile(provider: ProviderId, budget: u32) -> ProviderProfile {
    ProviderProfile::new(provider, budget)
        .with_series(wti(), "WTI-KEY")
        .with_series(brent(), "BRENT-KEY")
}

fn week() -> DateRange {
    DateRange::new(date!(2026 - 03 - 02), date!(2026 - 03 - 06)).expect("range")
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy::immediate(),
        fetch_timeout: Duration::from_secs(5),
        ..OrchestratorConfig::default()
    }
}

fn healthy(provider: ProviderId) -> FixtureConnector {
    FixtureConnector::new(provider)
        .with_generated_series(wti(), 75.0, 0.002)
        .with_generated_series(brent(), 80.0, 0.002)
}

struct Harness {
    orchestrator: Orchestrator,
    storage: Arc<MemoryStorage>,
}

fn harness(connectors: Vec<(Arc<FixtureConnector>, CapabilitySet)>, instruments: Vec<TrackedInstrument>) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let mut registry = ConnectorRegistry::new();
    let mut profiles = Vec::new();
    for (connector, capabilities) in connectors {
        profiles.push(profile(connector.id(), 500));
        registry.register(connector, capabilities);
    }
    let orchestrator = Orchestrator::new(
        registry,
        profiles,
        Validator::new(ValidationConfig::default(), instruments),
        storage.clone(),
    )
    .with_config(config());
    Harness {
        orchestrator,
        storage,
    }
}

fn request(mode: RunMode) -> RunRequest {
    RunRequest::new(vec![wti(), brent()], vec![eia(), fred()], week(), mode)
}

// =============================================================================
// Orchestrator: Idempotency
// =============================================================================

#[tokio::test]
async fn when_a_stored_range_is_run_again_no_new_rows_appear_but_quality_is_rescored() {
    // Given: A full refresh that already stored the week for every pair
    let h = harness(
        vec![
            (Arc::new(healthy(eia())), CapabilitySet::full()),
            (Arc::new(healthy(fred())), CapabilitySet::full()),
        ],
        vec![tracked(wti()), tracked(brent())],
    );
    let first = h.orchestrator.run(&request(RunMode::FullRefresh), &CancelFlag::new()).await;
    let rows_after_first = h.storage.row_count();

    // When: The same range is refreshed again
    let second = h.orchestrator.run(&request(RunMode::FullRefresh), &CancelFlag::new()).await;

    // Then: Every row is rewritten, none is new, and each pair has a fresh report
    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(first.total_new_rows(), 20);
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.total_new_rows(), 0);
    assert_eq!(second.total_stored(), 20);
    assert_eq!(h.storage.row_count(), rows_after_first);
    assert!(second.outcomes.iter().all(|o| o.report.is_some()));
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn when_an_incremental_run_follows_it_fetches_from_the_lookback_window() {
    // Given: A pair with data stored through Friday
    let connector = Arc::new(healthy(eia()));
    let h = harness(
        vec![(connector.clone(), CapabilitySet::full())],
        vec![tracked(wti())],
    );
    h.orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // When: An incremental run over a longer range is requested
    let bounds = DateRange::new(date!(2026 - 01 - 05), date!(2026 - 03 - 13)).expect("range");
    h.orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia()], bounds, RunMode::Incremental),
            &CancelFlag::new(),
        )
        .await;

    // Then: The second fetch starts the lookback before the latest stored date
    let requests = connector.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].range.start, date!(2026 - 02 - 04));
    assert_eq!(requests[1].range.end, date!(2026 - 03 - 13));
}

// =============================================================================
// Orchestrator: Partial failures
// =============================================================================

#[tokio::test]
async fn when_one_provider_fails_the_other_pairs_still_complete() {
    // Given: fred is down for BRENT while everything else is healthy
    let fred_connector = healthy(fred()).always_failing(brent(), FetchError::server_error("503"));
    let h = harness(
        vec![
            (Arc::new(healthy(eia())), CapabilitySet::full()),
            (Arc::new(fred_connector), CapabilitySet::full()),
        ],
        vec![tracked(wti()), tracked(brent())],
    );

    // When: A run covers all four pairs
    let result = h.orchestrator.run(&request(RunMode::FullRefresh), &CancelFlag::new()).await;

    // Then: The run is partial, with one fetch error and three stored pairs
    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.error_count(), 1);
    let failed = result.outcome(&brent(), &fred()).expect("outcome");
    match &failed.error {
        Some(PairError::Fetch { error }) => assert_eq!(error.kind(), FetchErrorKind::ServerError),
        other => panic!("expected fetch error, got {other:?}"),
    }
    for (instrument, provider) in [(wti(), eia()), (wti(), fred()), (brent(), eia())] {
        let outcome = result.outcome(&instrument, &provider).expect("outcome");
        assert_eq!(outcome.stored, 5, "{instrument}/{provider}");
    }
}

#[tokio::test]
async fn when_a_transient_error_clears_the_retry_recovers_the_pair() {
    // Given: eia fails twice with a server error before answering
    let connector = Arc::new(healthy(eia()).failing_times(wti(), 2, FetchError::server_error("502")));
    let h = harness(
        vec![(connector.clone(), CapabilitySet::full())],
        vec![tracked(wti())],
    );

    // When: A run fetches the pair
    let result = h
        .orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: The third attempt succeeds
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(connector.calls(), 3);
}

#[tokio::test]
async fn when_a_provider_hangs_the_pair_times_out() {
    // Given: A connector slower than the fetch timeout
    let connector = Arc::new(healthy(eia()).with_delay(Duration::from_millis(500)));
    let storage = Arc::new(MemoryStorage::new());
    let orchestrator = Orchestrator::new(
        ConnectorRegistry::new().with(connector, CapabilitySet::full()),
        [profile(eia(), 500)],
        Validator::new(ValidationConfig::default(), [tracked(wti())]),
        storage.clone(),
    )
    .with_config(OrchestratorConfig {
        fetch_timeout: Duration::from_millis(50),
        ..config()
    });

    // When: A run fetches the pair
    let result = orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: The pair reports a timeout and the run fails
    assert!(matches!(
        result.outcome(&wti(), &eia()).and_then(|o| o.error.clone()),
        Some(PairError::Timeout { .. })
    ));
    assert_eq!(result.status, RunStatus::Failure);
    assert_eq!(storage.row_count(), 0);
}

#[tokio::test]
async fn when_storage_rejects_one_pair_the_run_is_partial() {
    // Given: Storage refuses writes for WTI/fred
    let h = harness(
        vec![
            (Arc::new(healthy(eia())), CapabilitySet::full()),
            (Arc::new(healthy(fred())), CapabilitySet::full()),
        ],
        vec![tracked(wti())],
    );
    h.storage.fail_upserts_for(&wti(), &fred());

    // When: Both providers are fetched
    let result = h
        .orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia(), fred()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: The accepted batch records a storage error instead of rows
    let outcome = result.outcome(&wti(), &fred()).expect("outcome");
    assert_eq!(outcome.decision, Some(GateDecision::Accept));
    assert!(matches!(outcome.error, Some(PairError::Storage { .. })));
    assert_eq!(result.status, RunStatus::Partial);
}

#[tokio::test]
async fn when_a_batch_fails_the_gate_it_is_not_stored() {
    // Given: fred returns a WTI week with a missing value
    let mut broken: Vec<Observation> = [2, 3, 4, 5, 6]
        .into_iter()
        .map(|day| {
            Observation::new(
                time::Date::from_calendar_date(2026, time::Month::March, day).expect("date"),
                75.0,
            )
        })
        .collect();
    broken[2].value = None;
    let h = harness(
        vec![
            (Arc::new(healthy(eia())), CapabilitySet::full()),
            (Arc::new(FixtureConnector::new(fred()).with_series(wti(), broken)), CapabilitySet::full()),
        ],
        vec![tracked(wti())],
    );

    // When: Both providers are fetched
    let result = h
        .orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia(), fred()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: The broken batch is rejected with a zero score and nothing stored
    let rejected = result.outcome(&wti(), &fred()).expect("outcome");
    assert_eq!(rejected.decision, Some(GateDecision::Reject));
    assert_eq!(rejected.report.as_ref().map(|r| r.score), Some(0.0));
    assert_eq!(rejected.stored, 0);
    assert!(h.storage.observations(&wti(), &fred()).is_empty());
    assert_eq!(result.status, RunStatus::Partial);
}

// =============================================================================
// Orchestrator: Planning
// =============================================================================

#[tokio::test]
async fn when_a_provider_cannot_deliver_required_fields_the_pair_is_skipped() {
    // Given: WTI requires volume and eia only serves values
    let connector = Arc::new(healthy(eia()));
    let h = harness(
        vec![(connector.clone(), CapabilitySet::value_only())],
        vec![tracked(wti()).requiring(ObservationField::Volume)],
    );

    // When: A run includes the pair
    let result = h
        .orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: The pair is reported unsupported without a fetch
    assert!(matches!(
        result.outcome(&wti(), &eia()).and_then(|o| o.error.clone()),
        Some(PairError::Unsupported { .. })
    ));
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn when_a_run_is_cancelled_before_it_starts_nothing_is_fetched() {
    // Given: A cancel flag that is already set
    let connector = Arc::new(healthy(eia()));
    let h = harness(
        vec![(connector.clone(), CapabilitySet::full())],
        vec![tracked(wti()), tracked(brent())],
    );
    let cancel = CancelFlag::new();
    cancel.cancel();

    // When: The run starts
    let result = h
        .orchestrator
        .run(
            &RunRequest::new(vec![wti(), brent()], vec![eia()], week(), RunMode::Backfill),
            &cancel,
        )
        .await;

    // Then: Every pair is cancelled and the run is still audited
    assert!(result
        .outcomes
        .iter()
        .all(|o| matches!(o.error, Some(PairError::Cancelled))));
    assert_eq!(result.status, RunStatus::Failure);
    assert_eq!(connector.calls(), 0);
    assert_eq!(h.storage.runs().len(), 1);
}

#[tokio::test]
async fn when_the_request_budget_runs_out_retries_stop() {
    // Given: A provider allowed a single request per day that fails once
    let connector = Arc::new(healthy(eia()).failing_times(wti(), 1, FetchError::server_error("500")));
    let orchestrator = Orchestrator::new(
        ConnectorRegistry::new().with(connector.clone(), CapabilitySet::full()),
        [profile(eia(), 1)],
        Validator::new(ValidationConfig::default(), [tracked(wti())]),
        Arc::new(MemoryStorage::new()),
    )
    .with_config(config());

    // When: A run fetches the pair
    let result = orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: The second attempt is refused locally and never reaches upstream
    assert_eq!(connector.calls(), 1);
    match result.outcome(&wti(), &eia()).and_then(|o| o.error.clone()) {
        Some(PairError::Fetch { error }) => {
            assert_eq!(error.kind(), FetchErrorKind::RateLimited);
            assert!(!error.retryable());
        }
        other => panic!("expected budget error, got {other:?}"),
    }
}

#[tokio::test]
async fn when_a_run_finishes_latest_timestamps_reflect_stored_data() {
    // Given: A backfill over the week
    let h = harness(
        vec![(Arc::new(healthy(eia())), CapabilitySet::full())],
        vec![tracked(wti())],
    );

    // When: The run completes
    h.orchestrator
        .run(
            &RunRequest::new(vec![wti()], vec![eia()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: Storage reports Friday as the latest date
    assert_eq!(
        h.storage.latest_timestamp(&wti(), &eia()).expect("latest"),
        Some(date!(2026 - 03 - 06))
    );
}

// =============================================================================
// Orchestrator: Worker pool
// =============================================================================

fn single_provider(
    connector: Arc<FixtureConnector>,
    profile: ProviderProfile,
    instruments: Vec<TrackedInstrument>,
    worker_pool_size: usize,
) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let orchestrator = Orchestrator::new(
        ConnectorRegistry::new().with(connector, CapabilitySet::full()),
        [profile],
        Validator::new(ValidationConfig::default(), instruments),
        storage.clone(),
    )
    .with_config(OrchestratorConfig {
        worker_pool_size,
        ..config()
    });
    Harness {
        orchestrator,
        storage,
    }
}

#[tokio::test]
async fn when_many_pairs_are_due_no_more_than_the_pool_size_fetch_at_once() {
    // Given: Six instruments on one slow provider and a pool of two workers
    let ids: Vec<InstrumentId> = ["WTI", "BRENT", "HH", "RBOB", "HO", "GASOIL"]
        .iter()
        .map(|id| InstrumentId::parse(id).expect("id"))
        .collect();
    let mut connector = FixtureConnector::new(eia()).with_delay(Duration::from_millis(30));
    let mut profile = ProviderProfile::new(eia(), 500);
    for id in &ids {
        connector = connector.with_generated_series(id.clone(), 75.0, 0.002);
        profile = profile.with_series(id.clone(), format!("{id}-KEY"));
    }
    let connector = Arc::new(connector);
    let h = single_provider(
        connector.clone(),
        profile,
        ids.iter().cloned().map(tracked).collect(),
        2,
    );

    // When: One run covers them all
    let result = h
        .orchestrator
        .run(
            &RunRequest::new(ids.clone(), vec![eia()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: Every pair completed but at most two calls ever overlapped
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.outcomes.len(), 6);
    assert!(result.outcomes.iter().all(|o| o.stored == 5));
    assert_eq!(connector.calls(), 6);
    assert_eq!(connector.peak_concurrency(), 2);
}

#[tokio::test]
async fn when_two_instruments_share_a_native_series_it_is_fetched_once() {
    // Given: WTI and a spot alias both mapped to the same eia series
    let spot = InstrumentId::parse("WTI.SPOT").expect("id");
    let connector = Arc::new(
        FixtureConnector::new(eia())
            .with_generated_series(wti(), 75.0, 0.002)
            .with_generated_series(spot.clone(), 75.0, 0.002),
    );
    let profile = ProviderProfile::new(eia(), 500)
        .with_series(wti(), "PET.RWTC.D")
        .with_series(spot.clone(), "PET.RWTC.D");
    let h = single_provider(connector.clone(), profile, vec![tracked(wti()), tracked(spot.clone())], 1);

    // When: Both are run together
    let result = h
        .orchestrator
        .run(
            &RunRequest::new(vec![wti(), spot.clone()], vec![eia()], week(), RunMode::Backfill),
            &CancelFlag::new(),
        )
        .await;

    // Then: One upstream call served both, each stored under its own instrument
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(connector.calls(), 1);
    assert_eq!(h.storage.observations(&wti(), &eia()).len(), 5);
    assert_eq!(h.storage.observations(&spot, &eia()).len(), 5);
}
