//! End-to-end runs against the in-memory engine: every failure stage ends in
//! a report, and no instance outlives its run.

use std::sync::Arc;

use mcp_harness_core::domain::{TestCase, TestCategory};
use mcp_harness_core::fakes::{
    EngineCall, FakeEngine, FakeServer, HandshakeBehavior, MemoryCatalog, RecordingAssessor,
    ScriptedGenerator, StartupScript, ToolBehavior,
};
use mcp_harness_core::{
    CallResult, CatalogStore, Capability, ErrorCode, HarnessConfig, Orchestrator, RunOverrides, SandboxManager, Scheduler,
    TargetMetadata, TerminalErrorKind, TransportFailureKind, TriggerOutcome,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Harness {
    repos: tempfile::TempDir,
    engine: Arc<FakeEngine>,
    catalog: Arc<MemoryCatalog>,
    generator: Arc<ScriptedGenerator>,
    assessor: Arc<RecordingAssessor>,
    orchestrator: Arc<Orchestrator>,
}

impl Harness {
    /// One target, "weather", with a `server.py` checkout.
    fn new(engine: FakeEngine) -> Self {
        Self::with_generator(engine, ScriptedGenerator::new())
    }

    fn with_generator(engine: FakeEngine, generator: ScriptedGenerator) -> Self {
        let repos = tempfile::tempdir().unwrap();
        let source = repos.path().join("weather");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(source.join("server.py"), "print('hi')\n").unwrap();
        std::fs::write(source.join("requirements.txt"), "mcp\n").unwrap();

        let config = HarnessConfig {
            repos_dir: repos.path().to_path_buf(),
            readiness_poll_interval_ms: 10,
            request_timeout_ms: 1_000,
            disconnect_grace_ms: 10,
            call_pause_ms: 0,
            ..HarnessConfig::default()
        };
        let engine = Arc::new(engine);
        let catalog = Arc::new(MemoryCatalog::new().with_target(TargetMetadata::new("weather")));
        let generator = Arc::new(generator);
        let assessor = Arc::new(RecordingAssessor::default());
        let sandbox = Arc::new(SandboxManager::from_config(engine.clone(), &config));
        let orchestrator = Arc::new(Orchestrator::new(
            sandbox,
            catalog.clone(),
            generator.clone(),
            assessor.clone(),
            config,
        ));
        Self {
            repos,
            engine,
            catalog,
            generator,
            assessor,
            orchestrator,
        }
    }
}

fn tool(name: &str) -> Capability {
    Capability::new(
        name,
        format!("{name} tool"),
        json!({
            "type": "object",
            "properties": {"city": {"type": "string"}, "days": {"type": "integer"}},
            "required": ["city"]
        }),
    )
}

fn count_calls(engine: &FakeEngine, pred: impl Fn(&EngineCall) -> bool) -> usize {
    engine.calls().iter().filter(|c| pred(c)).count()
}

// ---------------------------------------------------------------------------
// Happy path and aggregate properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_run_exercises_every_capability_in_order() {
    let server = FakeServer::new()
        .with_tool(tool("forecast"))
        .with_tool_behavior(tool("alerts"), ToolBehavior::ToolError("no alerts feed".into()))
        .with_log_notifications();
    let generator = ScriptedGenerator::new().with_cases(
        "forecast",
        vec![
            TestCase::new(TestCategory::Realistic, json!({"city": "Oslo"})),
            TestCase::new(TestCategory::EdgeCase, json!({"city": ""})),
            TestCase::new(TestCategory::Invalid, json!({"days": "x"})),
        ],
    );
    let h = Harness::with_generator(FakeEngine::new().with_server(server), generator);

    let report = h
        .orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    assert!(report.error.is_none(), "unexpected error: {:?}", report.error);
    assert_eq!(report.capabilities.len(), 2);
    assert_eq!(report.total_tests, 4);
    assert_eq!(report.total_tests, report.passed_tests + report.failed_tests);

    let order: Vec<(&str, &serde_json::Value)> = report
        .results
        .iter()
        .map(|r| (r.capability.as_str(), &r.arguments))
        .collect();
    assert_eq!(order[0], ("forecast", &json!({"city": "Oslo"})));
    assert_eq!(order[1], ("forecast", &json!({"city": ""})));
    assert_eq!(order[2], ("forecast", &json!({"days": "x"})));
    assert_eq!(order[3].0, "alerts");

    assert_eq!(report.capability_summaries["forecast"].test_count, 3);
    assert_eq!(report.capability_summaries["alerts"].test_count, 1);
    assert!(report.quality.is_some());
    assert_eq!(h.assessor.calls().len(), 4);
    assert_eq!(
        h.generator.requests(),
        vec![("forecast".to_string(), 8), ("alerts".to_string(), 8)]
    );
    assert!(h.engine.live_instances().is_empty());
}

#[tokio::test]
async fn test_run_builds_synthesized_recipe_and_execs_detected_command() {
    let h = Harness::new(FakeEngine::new().with_server(FakeServer::new().with_tool(tool("forecast"))));
    h.orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    let calls = h.engine.calls();
    let recipe = calls
        .iter()
        .find_map(|c| match c {
            EngineCall::Build { recipe_content, .. } => Some(recipe_content.clone()),
            _ => None,
        })
        .expect("image was built");
    assert!(recipe.contains("requirements.txt"));

    let command = calls
        .iter()
        .find_map(|c| match c {
            EngineCall::OpenStdio { command, .. } => Some(format!("{command:?}")),
            _ => None,
        })
        .expect("stdio opened");
    assert!(command.contains("server.py"));
    assert_eq!(count_calls(&h.engine, |c| matches!(c, EngineCall::Remove(_))), 1);
}

#[tokio::test]
async fn test_overrides_reach_the_instance() {
    let h = Harness::new(FakeEngine::new().with_server(FakeServer::new().with_tool(tool("forecast"))));
    let overrides = RunOverrides {
        command: Some("uv".into()),
        args: Some(vec!["run".into(), "server.py".into()]),
        env_vars: [("API_KEY".to_string(), "k".to_string())].into(),
        ..RunOverrides::default()
    };
    h.orchestrator.test_target("weather", &overrides).await;

    let spec = h
        .engine
        .calls()
        .into_iter()
        .find_map(|c| match c {
            EngineCall::Run(spec) => Some(spec),
            _ => None,
        })
        .unwrap();
    assert_eq!(spec.environment["API_KEY"], "k");
    assert_eq!(spec.command.unwrap(), vec!["uv", "run", "server.py"]);
    assert!(spec.name.starts_with("mcp-test-"));
}

// ---------------------------------------------------------------------------
// Terminal failures
// ---------------------------------------------------------------------------

/// No resolvable source: zero tests, terminal error, engine untouched.
#[tokio::test]
async fn test_unresolved_source_makes_no_engine_calls() {
    let h = Harness::new(FakeEngine::new());
    let report = h
        .orchestrator
        .test_target("not-cloned", &RunOverrides::default())
        .await;

    assert_eq!(report.total_tests, 0);
    assert_eq!(report.error.unwrap().kind, TerminalErrorKind::SourceUnresolved);
    assert!(h.engine.calls().is_empty());
}

/// The process exits during startup: zero tests, logs captured.
#[tokio::test]
async fn test_premature_exit_reports_logs() {
    let engine = FakeEngine::new()
        .startup(StartupScript::ExitAfter(1))
        .with_logs("Traceback (most recent call last):\nModuleNotFoundError: No module named 'mcp'");
    let h = Harness::new(engine);
    let report = h
        .orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    assert_eq!(report.total_tests, 0);
    assert_eq!(report.error.as_ref().unwrap().kind, TerminalErrorKind::PrematureExit);
    assert!(report.sandbox_logs.as_deref().unwrap().contains("ModuleNotFoundError"));
    assert!(h.engine.live_instances().is_empty());
}

/// Instance is up but the server never completes the handshake.
#[tokio::test]
async fn test_handshake_failure_reports_logs() {
    let engine = FakeEngine::new()
        .with_server(FakeServer::new().handshake(HandshakeBehavior::Close))
        .with_logs("listening on stdio");
    let h = Harness::new(engine);
    let report = h
        .orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    assert_eq!(report.total_tests, 0);
    assert_eq!(report.error.as_ref().unwrap().kind, TerminalErrorKind::Handshake);
    assert!(!report.sandbox_logs.as_deref().unwrap().is_empty());
    assert!(h.assessor.calls().is_empty());
    assert!(h.engine.live_instances().is_empty());
}

#[tokio::test]
async fn test_build_failure_short_circuits() {
    let h = Harness::new(FakeEngine::new().fail_build("pip: command not found"));
    let report = h
        .orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    let err = report.error.unwrap();
    assert_eq!(err.kind, TerminalErrorKind::Build);
    assert!(report.sandbox_logs.unwrap().contains("pip: command not found"));
    assert_eq!(count_calls(&h.engine, |c| matches!(c, EngineCall::Run(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_is_bounded() {
    let h = Harness::new(FakeEngine::new().startup(StartupScript::NeverRunning));
    let overrides = RunOverrides {
        startup_timeout_secs: Some(2),
        ..RunOverrides::default()
    };
    let started = tokio::time::Instant::now();
    let report = h.orchestrator.test_target("weather", &overrides).await;

    assert_eq!(report.error.unwrap().kind, TerminalErrorKind::ReadinessTimeout);
    let waited = started.elapsed();
    assert!(waited >= std::time::Duration::from_secs(2));
    assert!(waited < std::time::Duration::from_secs(3));
    assert!(h.engine.live_instances().is_empty());
}

// ---------------------------------------------------------------------------
// Per-case behaviour
// ---------------------------------------------------------------------------

/// Generator yields nothing: exactly one minimal case runs.
#[tokio::test]
async fn test_empty_generation_runs_one_fallback_case() {
    let h = Harness::new(FakeEngine::new().with_server(FakeServer::new().with_tool(tool("forecast"))));
    let report = h
        .orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    assert_eq!(report.total_tests, 1);
    assert_eq!(report.results[0].arguments, json!({"city": "test"}));
    assert_eq!(h.engine.tool_calls(), vec![("forecast".to_string(), json!({"city": "test"}))]);
}

#[tokio::test]
async fn test_failing_generator_and_assessor_are_advisory() {
    let engine = FakeEngine::new().with_server(FakeServer::new().with_tool(tool("forecast")));
    let h = Harness::with_generator(engine, ScriptedGenerator::failing());
    let report = h
        .orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    assert!(report.error.is_none());
    assert_eq!(report.total_tests, 1);
    assert_eq!(report.passed_tests, 1);
}

/// Error responses fail the case and are still scored.
#[tokio::test]
async fn test_protocol_error_is_failed_result_and_assessed() {
    let server = FakeServer::new().with_tool_behavior(
        tool("forecast"),
        ToolBehavior::RpcError {
            code: -32603,
            message: "upstream API unavailable".into(),
        },
    );
    let h = Harness::new(FakeEngine::new().with_server(server));
    let report = h
        .orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    assert_eq!(report.total_tests, 1);
    assert_eq!(report.failed_tests, 1);
    let result = &report.results[0];
    assert!(!result.passed());
    let CallResult::Error(err) = &result.result else {
        panic!("expected an error response, got {:?}", result.result);
    };
    assert_eq!(err.code, ErrorCode::InternalError);
    assert_eq!(err.message, "upstream API unavailable");

    let assessed = h.assessor.calls();
    assert_eq!(assessed.len(), 1);
    assert!(assessed[0].is_error_response);
}

#[tokio::test(start_paused = true)]
async fn test_silent_tool_times_out_within_bound_and_run_continues() {
    let server = FakeServer::new()
        .with_tool_behavior(tool("slow"), ToolBehavior::Silent)
        .with_tool(tool("forecast"));
    let h = Harness::new(FakeEngine::new().with_server(server));
    let report = h
        .orchestrator
        .test_target("weather", &RunOverrides::default())
        .await;

    assert!(report.error.is_none());
    assert_eq!(report.total_tests, 2);
    let slow = &report.results[0];
    assert!(!slow.passed());
    let CallResult::Transport(failure) = &slow.result else {
        panic!("expected a transport failure, got {:?}", slow.result);
    };
    assert_eq!(failure.kind, TransportFailureKind::Timeout);
    assert!(slow.transcript.request.as_deref().unwrap().contains("slow"));
    assert!(slow.latency_ms >= 1_000);
    assert!(slow.latency_ms < 1_500);
    assert!(report.results[1].passed());
    assert!(h.engine.live_instances().is_empty());
}

// ---------------------------------------------------------------------------
// Cleanup and scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_teardown_twice_is_harmless() {
    let h = Harness::new(FakeEngine::new());
    let sandbox = h.orchestrator.sandbox();
    let config = mcp_harness_core::SandboxConfig::new(h.repos.path().join("weather"));
    let a = sandbox.start("img", &config).await.unwrap();
    let b = sandbox.start("img", &config).await.unwrap();

    sandbox.teardown(&a.instance_id).await;
    sandbox.teardown(&a.instance_id).await;
    assert_eq!(h.engine.live_instances(), vec![b.instance_id.clone()]);
    sandbox.teardown(&b.instance_id).await;
    assert!(h.engine.live_instances().is_empty());
}

/// Back-to-back triggers: one run, one registry entry.
#[tokio::test(start_paused = true)]
async fn test_back_to_back_triggers_run_once() {
    let engine = FakeEngine::new()
        .startup(StartupScript::RunningAfter(5))
        .with_server(FakeServer::new().with_tool(tool("forecast")));
    let h = Harness::new(engine);
    let scheduler = Scheduler::new(h.orchestrator.clone(), true);

    let first = scheduler.trigger("weather", None);
    let second = scheduler.trigger("weather", None);
    assert!(matches!(second, TriggerOutcome::AlreadyRunning));
    assert_eq!(scheduler.status().running_targets, vec!["weather"]);

    let TriggerOutcome::Scheduled(handle) = first else {
        panic!("first trigger should schedule");
    };
    handle.await.unwrap();

    assert_eq!(count_calls(&h.engine, |c| matches!(c, EngineCall::Run(_))), 1);
    assert_eq!(h.catalog.saved_reports().len(), 1);
    assert!(scheduler.status().running_targets.is_empty());
    assert!(h.engine.live_instances().is_empty());
}

#[tokio::test]
async fn test_concurrent_targets_run_independently() {
    let h = Harness::new(FakeEngine::new().with_server(FakeServer::new().with_tool(tool("forecast"))));
    let second = h.repos.path().join("tides");
    std::fs::create_dir(&second).unwrap();
    std::fs::write(second.join("index.js"), "").unwrap();
    h.catalog.put_target(TargetMetadata::new("tides")).await.unwrap();

    let scheduler = Scheduler::new(h.orchestrator.clone(), true);
    let handles: Vec<_> = ["weather", "tides"]
        .into_iter()
        .filter_map(|t| match scheduler.trigger(t, None) {
            TriggerOutcome::Scheduled(handle) => Some(handle),
            _ => None,
        })
        .collect();
    assert_eq!(handles.len(), 2);
    for handle in handles {
        handle.await.unwrap();
    }

    let mut saved: Vec<String> = h.catalog.saved_reports().into_iter().map(|(n, _)| n).collect();
    saved.sort();
    assert_eq!(saved, vec!["tides", "weather"]);
    assert!(h.engine.live_instances().is_empty());
}
