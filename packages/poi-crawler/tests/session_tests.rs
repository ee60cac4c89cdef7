//! End-to-end tests for crawl sessions.
//!
//! Every session here runs against the mock fetcher and backend, so the
//! tests exercise the full loop: frontier, agent, ledger, checkpoints and
//! progress events.

use poi_crawler::{
    testing::{mock_deps, MemoryCheckpointStore, MemoryEventSink, MockBackend, MockFailure, MockFetcher},
    BackendError, CheckpointStore, FileCheckpointStore, PageContent, PatternStats, PromptKind,
    SessionConfig, SessionController, SessionDeps, SessionEvent, SessionRegistry, SessionStatus,
    StepOutcome, UrlState,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const SEED: &str = "https://example.com";

/// Helper to build deps around a store that outlives one controller.
fn deps_with_store(
    fetcher: MockFetcher,
    backend: MockBackend,
    store: Arc<dyn CheckpointStore>,
) -> (SessionDeps, MemoryEventSink) {
    let events = MemoryEventSink::new();
    let deps = SessionDeps {
        fetcher: Arc::new(fetcher),
        backend: Arc::new(backend),
        store,
        events: Arc::new(events.clone()),
    };
    (deps, events)
}

fn visited_urls(controller: &SessionController) -> HashSet<String> {
    controller
        .state()
        .frontier
        .records()
        .filter(|r| r.state == UrlState::Visited)
        .map(|r| r.url.clone())
        .collect()
}

#[tokio::test]
async fn test_seed_page_with_duplicate_candidates() {
    let fetcher = MockFetcher::new().with_page(PageContent::from_text(SEED, "Old town guide"));
    let backend = MockBackend::new().with_response(
        SEED,
        r#"{"pois":[
            {"name":"City Museum","category":"museum","address":"12 Main Street","confidence":0.9},
            {"name":"Riverside Park","category":"park","confidence":0.8},
            {"name":"city museum","category":"Museum","address":"12 Main St.","confidence":0.7}
        ],
        "links":[{"url":"/museums","score":4},{"url":"/parks","score":2}],
        "decision":"continue"}"#,
    );
    let (deps, _, events) = mock_deps(fetcher, backend);
    let config = SessionConfig::new().with_max_depth(1).with_max_pages(1);
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();

    assert_eq!(session.run().await, SessionStatus::BudgetExhausted);

    let state = session.state();
    assert_eq!(state.ledger.len(), 2);
    assert_eq!(state.frontier.pending_len(), 2);
    for url in ["https://example.com/museums", "https://example.com/parks"] {
        let record = state.frontier.get(url).unwrap();
        assert_eq!(record.depth, 1);
        assert_eq!(record.state, UrlState::Pending);
        assert_eq!(record.discovered_from.as_deref(), Some(SEED));
    }

    let museum = &session.results()[0];
    assert_eq!(museum.name, "City Museum");
    assert_eq!(museum.sources.len(), 1);
    assert!((museum.confidence - 0.9).abs() < f32::EPSILON);

    assert_eq!(events.count("poi_created"), 2);
    assert_eq!(events.count("poi_updated"), 0);
}

#[tokio::test]
async fn test_page_budget_stops_unbounded_crawl() {
    let fetcher = MockFetcher::new().with_generated_site(SEED, 3);
    let (deps, _, events) = mock_deps(fetcher.clone(), MockBackend::new());
    let config = SessionConfig::new().with_max_pages(5).with_max_depth(50);
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();

    assert_eq!(session.run().await, SessionStatus::BudgetExhausted);
    assert_eq!(session.state().pages_visited, 5);
    assert_eq!(fetcher.calls().len(), 5);
    assert_eq!(events.count("page_processed"), 5);
    assert!(session.state().frontier.pending_len() > 0);
}

#[tokio::test]
async fn test_time_budget_stops_session() {
    let fetcher = MockFetcher::new()
        .with_generated_site(SEED, 2)
        .with_delay(Duration::from_millis(30));
    let (deps, _, _) = mock_deps(fetcher, MockBackend::new());
    let config = SessionConfig::new()
        .unbounded_pages()
        .with_max_depth(50)
        .with_max_duration(Duration::from_millis(100));
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();

    assert_eq!(session.run().await, SessionStatus::BudgetExhausted);
    let state = session.state();
    assert!(state.pages_visited >= 1);
    assert!(state.elapsed > Duration::from_millis(100));
    assert!(state.frontier.pending_len() > 0);
}

#[tokio::test]
async fn test_crash_resume_never_revisits_visited_urls() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(dir.path()));

    // First process: three pages, then an abrupt stop
    let first_fetcher = MockFetcher::new().with_generated_site(SEED, 2);
    let (deps, _) = deps_with_store(first_fetcher.clone(), MockBackend::new(), store.clone());
    let config = SessionConfig::new().unbounded_pages();
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();
    for _ in 0..3 {
        assert!(matches!(session.step().await, StepOutcome::Processed { .. }));
    }
    let session_id = session.session_id();
    drop(session);

    // Second process: restore from disk and finish
    let checkpoint = store.load(session_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, SessionStatus::Running);
    assert_eq!(checkpoint.pages_visited, 3);
    let visited_before: HashSet<String> = checkpoint
        .frontier
        .records()
        .filter(|r| r.state == UrlState::Visited)
        .map(|r| r.url.clone())
        .collect();

    let second_fetcher = MockFetcher::new().with_generated_site(SEED, 2);
    let (deps, _) = deps_with_store(second_fetcher.clone(), MockBackend::new(), store.clone());
    let mut session = SessionController::restore(checkpoint, deps).unwrap();

    assert_eq!(session.run().await, SessionStatus::Completed);

    let refetched: Vec<String> = second_fetcher
        .calls()
        .into_iter()
        .filter(|url| visited_before.contains(url))
        .collect();
    assert!(refetched.is_empty(), "re-fetched visited URLs: {refetched:?}");

    // depth 0..=3 with fanout 2
    assert_eq!(session.state().pages_visited, 15);
    assert_eq!(first_fetcher.calls().len() + second_fetcher.calls().len(), 15);
    assert_eq!(visited_urls(&session).len(), 15);
}

#[tokio::test]
async fn test_retryable_failures_then_terminal_failure() {
    let fetcher = MockFetcher::new()
        .with_page(
            PageContent::from_text(SEED, "home").with_links(vec![
                format!("{SEED}/flaky"),
                format!("{SEED}/missing"),
            ]),
        )
        .with_failures(&format!("{SEED}/flaky"), vec![MockFailure::Status(503); 5]);
    let (deps, _, events) = mock_deps(fetcher.clone(), MockBackend::new());
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps)
        .await
        .unwrap();

    assert_eq!(session.run().await, SessionStatus::Completed);

    let state = session.state();
    // initial attempt plus retry_limit (2) retries
    assert_eq!(fetcher.fetch_count(&format!("{SEED}/flaky")), 3);
    // 404 is not retryable
    assert_eq!(fetcher.fetch_count(&format!("{SEED}/missing")), 1);

    let flaky = state.frontier.get(&format!("{SEED}/flaky")).unwrap();
    assert_eq!(flaky.state, UrlState::Failed);
    assert_eq!(flaky.attempts, 3);
    assert_eq!(state.frontier.failed_len(), 2);
    assert_eq!(state.diagnostics.fetch_retries, 2);
    assert_eq!(state.diagnostics.pages_failed, 2);
    assert_eq!(state.pages_visited, 1);
    assert_eq!(events.count("page_failed"), 4);
}

#[tokio::test]
async fn test_retry_succeeds_after_transient_failure() {
    let fetcher = MockFetcher::new()
        .with_page(PageContent::from_text(SEED, "home").with_links(vec![format!("{SEED}/slow")]))
        .with_page(PageContent::from_text(format!("{SEED}/slow"), "slow page"))
        .with_failures(&format!("{SEED}/slow"), vec![MockFailure::Timeout]);
    let (deps, _, _) = mock_deps(fetcher, MockBackend::new());
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps)
        .await
        .unwrap();

    assert_eq!(session.run().await, SessionStatus::Completed);
    assert_eq!(session.state().pages_visited, 2);
    assert_eq!(session.state().frontier.failed_len(), 0);
}

#[tokio::test]
async fn test_backend_outage_fails_session_with_partial_results() {
    let fetcher = MockFetcher::new().with_generated_site(SEED, 3);
    let backend = MockBackend::new()
        .with_response(
            SEED,
            r#"{"pois":[{"name":"Harbor Lighthouse","category":"landmark","confidence":0.95}]}"#,
        )
        .failing_with(BackendError::Unreachable("connection refused".into()));
    let (deps, store, events) = mock_deps(fetcher, backend);
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps)
        .await
        .unwrap();

    assert_eq!(session.run().await, SessionStatus::Failed);

    let state = session.state();
    assert_eq!(state.pages_visited, 1);
    assert_eq!(state.diagnostics.backend_failures, 3);
    assert!(state
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("connection refused"));

    let results = session.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "Harbor Lighthouse");

    let checkpoint = store.load(session.session_id()).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, SessionStatus::Failed);
    assert_eq!(checkpoint.ledger.len(), 1);
    assert_eq!(events.count("status_changed"), 1);
}

#[tokio::test]
async fn test_backend_error_on_one_page_does_not_stop_session() {
    let gallery = format!("{SEED}/gallery");
    let contact = format!("{SEED}/contact");
    let fetcher = MockFetcher::new()
        .with_page(
            PageContent::from_text(SEED, "home").with_links(vec![gallery.clone(), contact.clone()]),
        )
        .with_page(PageContent::from_text(&gallery, "gallery"))
        .with_page(PageContent::from_text(&contact, "contact"));
    let backend = MockBackend::new()
        .with_error(&gallery, BackendError::Unreachable("connection reset".into()))
        .with_error(&gallery, BackendError::Unreachable("connection reset".into()))
        .with_response(
            &gallery,
            r#"{"pois":[{"name":"Harbor Gallery","category":"gallery","confidence":0.9}]}"#,
        );
    let (deps, _, _) = mock_deps(fetcher, backend);
    let config = SessionConfig::new().with_max_consecutive_backend_failures(2);
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();

    assert!(matches!(session.step().await, StepOutcome::Processed { .. }));
    assert!(matches!(session.step().await, StepOutcome::BackendFailed { .. }));
    // a good page in between resets the consecutive failure count
    assert!(matches!(session.step().await, StepOutcome::Processed { .. }));
    assert!(matches!(session.step().await, StepOutcome::BackendFailed { .. }));
    assert_eq!(session.status(), SessionStatus::Running);

    assert_eq!(session.run().await, SessionStatus::Completed);
    let state = session.state();
    assert_eq!(state.pages_visited, 3);
    assert_eq!(state.diagnostics.backend_failures, 2);
    assert_eq!(state.diagnostics.pages_failed, 0);
    assert_eq!(state.frontier.get(&gallery).unwrap().state, UrlState::Visited);
    assert_eq!(session.results().len(), 1);
}

#[tokio::test]
async fn test_slow_fetch_times_out_and_is_requeued() {
    let fetcher = MockFetcher::new()
        .with_page(PageContent::from_text(SEED, "home"))
        .with_delay(Duration::from_millis(200));
    let (deps, _, events) = mock_deps(fetcher.clone(), MockBackend::new());
    let config = SessionConfig::new().with_fetch_timeout(Duration::from_millis(20));
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();

    assert_eq!(
        session.step().await,
        StepOutcome::FetchFailed {
            url: SEED.to_string(),
            will_retry: true,
        }
    );
    let seed = session.state().frontier.get(SEED).unwrap();
    assert_eq!(seed.state, UrlState::Pending);
    assert_eq!(seed.attempts, 1);
    assert!(events.events().iter().any(|e| matches!(
        &e.event,
        SessionEvent::PageFailed { error_kind, will_retry: true, .. } if error_kind == "timeout"
    )));

    assert_eq!(session.run().await, SessionStatus::Completed);
    assert_eq!(fetcher.fetch_count(SEED), 3);
    assert_eq!(session.state().frontier.failed_len(), 1);
    assert_eq!(session.state().pages_visited, 0);
}

#[tokio::test]
async fn test_checkpoint_every_n_pages() {
    let (deps, store, events) =
        mock_deps(MockFetcher::new().with_generated_site(SEED, 2), MockBackend::new());
    let config = SessionConfig::new()
        .with_max_pages(6)
        .with_checkpoint_interval_pages(3);
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();

    assert_eq!(session.run().await, SessionStatus::BudgetExhausted);
    // on start, after pages 3 and 6, and on finishing
    assert_eq!(store.save_count(), 4);
    assert_eq!(events.count("checkpoint_saved"), 4);
}

#[tokio::test]
async fn test_checkpoint_interval_by_time() {
    async fn saves_with(interval: Duration) -> usize {
        let (deps, store, _) =
            mock_deps(MockFetcher::new().with_generated_site(SEED, 2), MockBackend::new());
        let config = SessionConfig::new()
            .with_max_pages(6)
            .with_checkpoint_interval_pages(1000)
            .with_checkpoint_interval(interval);
        let mut session = SessionController::start(SEED, config, deps).await.unwrap();
        assert_eq!(session.run().await, SessionStatus::BudgetExhausted);
        store.save_count()
    }

    // an elapsed interval checkpoints after every page
    assert_eq!(saves_with(Duration::ZERO).await, 8);
    // otherwise only start and finish are saved
    assert_eq!(saves_with(Duration::from_secs(3600)).await, 2);
}

#[tokio::test]
async fn test_duplicate_content_is_extracted_once() {
    let east = format!("{SEED}/east");
    let west = format!("{SEED}/west");
    let fetcher = MockFetcher::new()
        .with_page(PageContent::from_text(SEED, "home").with_links(vec![east.clone(), west.clone()]))
        .with_page(PageContent::from_text(&east, "Harbor walk: lighthouse, pier, fish market"))
        .with_page(PageContent::from_text(&west, "Harbor walk: lighthouse, pier, fish market"));
    let backend = MockBackend::new()
        .with_response(&east, r#"{"pois":[{"name":"Harbor Lighthouse","confidence":0.9}]}"#)
        .with_response(&west, r#"{"pois":[{"name":"Fish Market","confidence":0.9}]}"#);
    let (deps, _, events) = mock_deps(fetcher, backend.clone());
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps)
        .await
        .unwrap();

    session.step().await;
    session.step().await;
    assert_eq!(
        session.step().await,
        StepOutcome::Duplicate {
            url: west.clone(),
            duplicate_of: east.clone(),
        }
    );
    assert_eq!(session.run().await, SessionStatus::Completed);

    let state = session.state();
    assert_eq!(state.pages_visited, 3);
    assert_eq!(state.diagnostics.duplicate_pages, 1);
    assert_eq!(state.frontier.get(&west).unwrap().state, UrlState::Visited);
    assert_eq!(session.results().len(), 1);

    let extracted: Vec<String> = backend
        .calls_of(PromptKind::Extraction)
        .into_iter()
        .map(|p| p.page_url)
        .collect();
    assert_eq!(extracted, vec![SEED.to_string(), east]);
    assert_eq!(events.count("page_processed"), 3);
}

#[tokio::test]
async fn test_pattern_performance_reaches_the_prompt() {
    let museums = format!("{SEED}/museums");
    let login = format!("{SEED}/login");
    let fetcher = MockFetcher::new()
        .with_page(PageContent::from_text(SEED, "home").with_links(vec![museums.clone(), login.clone()]))
        .with_page(PageContent::from_text(&museums, "museums"))
        .with_page(PageContent::from_text(&login, "login"));
    let backend = MockBackend::new().with_response(
        &museums,
        r#"{"pois":[{"name":"City Museum","category":"museum","confidence":0.9}]}"#,
    );
    let (deps, _, _) = mock_deps(fetcher, backend.clone());
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps)
        .await
        .unwrap();

    assert_eq!(session.run().await, SessionStatus::Completed);
    assert_eq!(
        session.state().pattern_stats.get(SEED),
        Some(&PatternStats {
            children_visited: 2,
            children_with_pois: 1,
        })
    );

    let prompts = backend.calls_of(PromptKind::Extraction);
    let login_prompt = prompts.iter().find(|p| p.page_url == login).unwrap();
    assert!(login_prompt
        .user
        .contains("- https://example.com/<child>: 1/1 success"));
}

#[tokio::test]
async fn test_malformed_responses_do_not_fail_session() {
    let fetcher = MockFetcher::new().with_generated_site(SEED, 2);
    let backend = MockBackend::new().with_default(|_| Ok("Sorry, I can't help with that.".into()));
    let (deps, _, _) = mock_deps(fetcher, backend);
    let config = SessionConfig::new().with_max_pages(4);
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();

    // A malformed reply yields no links either, so the crawl ends after the seed
    assert_eq!(session.run().await, SessionStatus::Completed);
    let state = session.state();
    assert_eq!(state.pages_visited, 1);
    assert_eq!(state.diagnostics.malformed_responses, 1);
    assert!(state.ledger.is_empty());
}

#[tokio::test]
async fn test_pause_checkpoints_and_resume_continues() {
    let fetcher = MockFetcher::new().with_generated_site(SEED, 2);
    let (deps, store, events) = mock_deps(fetcher.clone(), MockBackend::new());
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps)
        .await
        .unwrap();

    session.step().await;
    session.step().await;
    session.pause_handle().cancel();

    assert_eq!(session.step().await, StepOutcome::Paused);
    assert_eq!(session.status(), SessionStatus::Paused);
    assert_eq!(session.step().await, StepOutcome::Paused);
    assert_eq!(fetcher.calls().len(), 2);

    let checkpoint = store.load(session.session_id()).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, SessionStatus::Paused);
    assert_eq!(checkpoint.pages_visited, 2);

    session.resume().unwrap();
    assert_eq!(session.run().await, SessionStatus::Completed);
    assert_eq!(session.state().pages_visited, 15);
    assert_eq!(fetcher.calls().len(), 15);

    // Running -> Paused, Paused -> Running, Running -> Completed
    assert_eq!(events.count("status_changed"), 3);
}

#[tokio::test]
async fn test_persistent_checkpoint_failures_enter_degraded_mode() {
    let store = MemoryCheckpointStore::new();
    store.set_failing(true);
    let (deps, events) = deps_with_store(
        MockFetcher::new().with_generated_site(SEED, 2),
        MockBackend::new(),
        Arc::new(store.clone()),
    );
    let config = SessionConfig::new().with_max_pages(6);
    let mut session = SessionController::start(SEED, config, deps).await.unwrap();

    assert_eq!(session.run().await, SessionStatus::BudgetExhausted);

    let state = session.state();
    assert_eq!(state.pages_visited, 6);
    assert!(state.diagnostics.degraded);
    assert!(state.diagnostics.persistence_failures >= 3);
    assert_eq!(events.count("degraded_mode"), 1);
    assert_eq!(events.count("checkpoint_saved"), 0);
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn test_checkpoint_failure_recovers_when_store_returns() {
    let store = MemoryCheckpointStore::new();
    let (deps, events) = deps_with_store(
        MockFetcher::new().with_generated_site(SEED, 2),
        MockBackend::new(),
        Arc::new(store.clone()),
    );
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps)
        .await
        .unwrap();

    store.set_failing(true);
    session.step().await;
    store.set_failing(false);
    session.step().await;

    assert_eq!(events.count("checkpoint_failed"), 1);
    assert!(!session.state().diagnostics.degraded);
    let checkpoint = store.load(session.session_id()).await.unwrap().unwrap();
    assert_eq!(checkpoint.pages_visited, 2);
}

#[tokio::test]
async fn test_same_poi_on_two_pages_merges_sources() {
    let about = format!("{SEED}/about");
    let fetcher = MockFetcher::new()
        .with_page(PageContent::from_text(SEED, "home").with_links(vec![about.clone()]))
        .with_page(PageContent::from_text(&about, "about"));
    let poi = r#"{"pois":[{"name":"Old Mill","category":"landmark","address":"1 River Road","confidence":0.8}]}"#;
    let backend = MockBackend::new()
        .with_response(SEED, poi)
        .with_response(&about, poi.replace("}]}", r#","description":"Restored 1820 mill"}]}"#));
    let (deps, _, events) = mock_deps(fetcher, backend);
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps)
        .await
        .unwrap();

    assert_eq!(session.run().await, SessionStatus::Completed);

    let results = session.results();
    assert_eq!(results.len(), 1);
    let mill = &results[0];
    assert_eq!(mill.sources.len(), 2);
    assert_eq!(mill.description.as_deref(), Some("Restored 1820 mill"));
    assert_eq!(events.count("poi_updated"), 1);
}

#[tokio::test]
async fn test_stricter_threshold_on_restore_rejects_records() {
    let fetcher = MockFetcher::new().with_page(PageContent::from_text(SEED, "home"));
    let backend = MockBackend::new().with_response(
        SEED,
        r#"{"pois":[{"name":"Maybe Cafe","confidence":0.4},{"name":"Town Hall","confidence":0.9}]}"#,
    );
    let (deps, _, _) = mock_deps(fetcher, backend);
    let mut session = SessionController::start(SEED, SessionConfig::default(), deps.clone())
        .await
        .unwrap();
    session.run().await;

    let mut state = session.into_state();
    state.config = state.config.clone().with_confidence_threshold(0.5);
    let restored = SessionController::restore(state, deps).unwrap();

    let names: Vec<_> = restored.results().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["Town Hall"]);
    assert_eq!(restored.state().ledger.len(), 2);
}

#[tokio::test]
async fn test_registry_pause_resume_and_wait() {
    let fetcher = MockFetcher::new()
        .with_generated_site(SEED, 2)
        .with_delay(Duration::from_millis(10));
    let (deps, _, _) = mock_deps(fetcher, MockBackend::new());
    let registry = SessionRegistry::new(deps);

    let id = registry.start(SEED, SessionConfig::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(35)).await;

    let paused = registry.pause(id).await.unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);
    assert!(paused.pages_visited < 15);
    assert_eq!(registry.status(id).await.unwrap().status, SessionStatus::Paused);
    assert!(registry.pause(id).await.is_err());

    registry.resume(id).await.unwrap();
    assert!(registry.resume(id).await.is_err());

    let done = registry.wait(id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.pages_visited, 15);
}

#[tokio::test]
async fn test_registry_resumes_from_checkpoint_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(dir.path()));

    let slow = MockFetcher::new()
        .with_generated_site(SEED, 2)
        .with_delay(Duration::from_millis(10));
    let (deps, _) = deps_with_store(slow, MockBackend::new(), store.clone());
    let first = SessionRegistry::new(deps);
    let id = first.start(SEED, SessionConfig::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(35)).await;
    let paused = first.pause(id).await.unwrap();
    drop(first);

    let fetcher = MockFetcher::new().with_generated_site(SEED, 2);
    let (deps, _) = deps_with_store(fetcher.clone(), MockBackend::new(), store);
    let second = SessionRegistry::new(deps);

    assert_eq!(second.status(id).await.unwrap().status, SessionStatus::Paused);
    second.resume(id).await.unwrap();
    let done = second.wait(id).await.unwrap();

    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.pages_visited, 15);
    assert_eq!(fetcher.calls().len(), 15 - paused.pages_visited);
}
