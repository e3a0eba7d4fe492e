//! In-memory fakes for the harness's collaborators (testing only)
//!
//! Provides `FakeEngine` (a scripted container engine whose stdio channels
//! are served by an in-process MCP server), `MemoryCatalog`,
//! `ScriptedGenerator` and `RecordingAssessor`. None of them touch a real
//! container engine or the network.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};

use crate::domain::{
    Capability, DimensionScores, QualityAssessment, TargetMetadata, TestCase, TestReport,
    TestStatus,
};
use crate::external::{
    status_for, AssessmentError, AssessmentInput, CatalogError, CatalogResult, CatalogStore,
    GenerationError, QualityAssessor, TestCaseGenerator,
};
use crate::protocol::StdioChannel;
use crate::sandbox::{
    CapturedOutput, ContainerEngine, InstanceStatus, RunSpec, SandboxError, SandboxResult,
    StdioCommand,
};

// ---------------------------------------------------------------------------
// FakeServer
// ---------------------------------------------------------------------------

/// How the fake server answers `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HandshakeBehavior {
    #[default]
    Ok,
    /// Reply with a line that is not JSON.
    Garbled,
    /// Close both streams without replying.
    Close,
    /// Never reply.
    Silent,
}

/// How the fake server answers `tools/call` for one tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolBehavior {
    /// Text content echoing the arguments.
    Echo,
    Respond(Value),
    RpcError { code: i64, message: String },
    /// Successful response flagged `isError: true`.
    ToolError(String),
    /// Never reply.
    Silent,
    /// Close the streams instead of replying.
    CloseStream,
}

/// Scripted MCP server spoken to over an in-process duplex pipe.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    tools: Vec<(Capability, ToolBehavior)>,
    handshake: HandshakeBehavior,
    log_notifications: bool,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(self, capability: Capability) -> Self {
        self.with_tool_behavior(capability, ToolBehavior::Echo)
    }

    pub fn with_tool_behavior(mut self, capability: Capability, behavior: ToolBehavior) -> Self {
        self.tools.push((capability, behavior));
        self
    }

    pub fn handshake(mut self, behavior: HandshakeBehavior) -> Self {
        self.handshake = behavior;
        self
    }

    /// Emit a `notifications/message` before every tool reply.
    pub fn with_log_notifications(mut self) -> Self {
        self.log_notifications = true;
        self
    }

    async fn send(out: &mut (impl AsyncWrite + Unpin), message: &Value) -> bool {
        let line = format!("{message}\n");
        out.write_all(line.as_bytes()).await.is_ok() && out.flush().await.is_ok()
    }

    async fn serve(
        self,
        input: DuplexStream,
        mut out: DuplexStream,
        calls: Arc<Mutex<Vec<(String, Value)>>>,
    ) {
        let mut lines = BufReader::new(input).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let Some(id) = msg.get("id").cloned() else {
                continue;
            };
            let method = msg.get("method").and_then(Value::as_str).unwrap_or_default();
            let reply = match method {
                "initialize" => match self.handshake {
                    HandshakeBehavior::Ok => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": "2024-11-05",
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "fake-mcp", "version": "0.0.0"}
                        }
                    }),
                    HandshakeBehavior::Garbled => {
                        let _ = out.write_all(b"Server starting on stdio...\n").await;
                        continue;
                    }
                    HandshakeBehavior::Close => return,
                    HandshakeBehavior::Silent => continue,
                },
                "tools/list" => {
                    let tools: Vec<&Capability> = self.tools.iter().map(|(c, _)| c).collect();
                    json!({"jsonrpc": "2.0", "id": id, "result": {"tools": tools}})
                }
                "tools/call" => {
                    let name = msg
                        .pointer("/params/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let args = msg.pointer("/params/arguments").cloned().unwrap_or(Value::Null);
                    calls.lock().unwrap().push((name.clone(), args.clone()));

                    if self.log_notifications {
                        let note = json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/message",
                            "params": {"level": "info", "data": format!("calling {name}")}
                        });
                        if !Self::send(&mut out, &note).await {
                            return;
                        }
                    }

                    let behavior = self
                        .tools
                        .iter()
                        .find(|(c, _)| c.name == name)
                        .map(|(_, b)| b.clone());
                    match behavior {
                        None => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {"code": -32602, "message": format!("Unknown tool: {name}")}
                        }),
                        Some(ToolBehavior::Echo) => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {"content": [{"type": "text", "text": args.to_string()}]}
                        }),
                        Some(ToolBehavior::Respond(result)) => {
                            json!({"jsonrpc": "2.0", "id": id, "result": result})
                        }
                        Some(ToolBehavior::RpcError { code, message }) => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {"code": code, "message": message}
                        }),
                        Some(ToolBehavior::ToolError(text)) => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {"content": [{"type": "text", "text": text}], "isError": true}
                        }),
                        Some(ToolBehavior::Silent) => continue,
                        Some(ToolBehavior::CloseStream) => return,
                    }
                }
                other => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": format!("Method not found: {other}")}
                }),
            };
            if !Self::send(&mut out, &reply).await {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

/// How an instance's status evolves across successive probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupScript {
    /// `Starting` for the first `n` probes, then `Running`.
    RunningAfter(usize),
    /// `Starting` for the first `n` probes, then `Exited`.
    ExitAfter(usize),
    NeverRunning,
}

/// One call made against the engine, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Build {
        tag: String,
        recipe: PathBuf,
        recipe_content: String,
    },
    Pull(String),
    Run(RunSpec),
    Status(String),
    Logs(String),
    Exec { instance: String, argv: Vec<String> },
    Remove(String),
    List(String),
    OpenStdio { instance: String, command: StdioCommand },
}

#[derive(Debug)]
struct FakeInstance {
    name: String,
    probes: usize,
}

#[derive(Debug, Default)]
struct EngineState {
    calls: Vec<EngineCall>,
    instances: BTreeMap<String, FakeInstance>,
    next_id: u64,
}

/// Container engine double. Instances exist only in memory; stdio channels
/// are served by a [`FakeServer`].
#[derive(Debug)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
    startup: StartupScript,
    logs: String,
    build_failure: Option<String>,
    pull_failure: Option<String>,
    run_failure: Option<String>,
    server: FakeServer,
    tool_calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            startup: StartupScript::RunningAfter(0),
            logs: String::new(),
            build_failure: None,
            pull_failure: None,
            run_failure: None,
            server: FakeServer::new(),
            tool_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn startup(mut self, script: StartupScript) -> Self {
        self.startup = script;
        self
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }

    pub fn fail_build(mut self, output: impl Into<String>) -> Self {
        self.build_failure = Some(output.into());
        self
    }

    pub fn fail_pull(mut self, output: impl Into<String>) -> Self {
        self.pull_failure = Some(output.into());
        self
    }

    pub fn fail_run(mut self, output: impl Into<String>) -> Self {
        self.run_failure = Some(output.into());
        self
    }

    pub fn with_server(mut self, server: FakeServer) -> Self {
        self.server = server;
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Ids of instances that exist and have not been removed.
    pub fn live_instances(&self) -> Vec<String> {
        self.state.lock().unwrap().instances.keys().cloned().collect()
    }

    /// `(tool, arguments)` for every `tools/call` any fake server received.
    pub fn tool_calls(&self) -> Vec<(String, Value)> {
        self.tool_calls.lock().unwrap().clone()
    }

    /// Create an instance directly, as if another process had started it.
    pub fn seed_instance(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        Self::insert_instance(&mut state, name)
    }

    fn insert_instance(state: &mut EngineState, name: &str) -> String {
        state.next_id += 1;
        let id = format!("fake{:08x}", state.next_id);
        state.instances.insert(
            id.clone(),
            FakeInstance {
                name: name.to_string(),
                probes: 0,
            },
        );
        id
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn missing(id: &str) -> SandboxError {
        SandboxError::Engine(format!("No such container: {id}"))
    }

    fn exists(&self, id: &str) -> bool {
        self.state.lock().unwrap().instances.contains_key(id)
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build(&self, _context: &Path, recipe: &Path, tag: &str) -> SandboxResult<()> {
        let recipe_content = std::fs::read_to_string(recipe).unwrap_or_default();
        self.record(EngineCall::Build {
            tag: tag.to_string(),
            recipe: recipe.to_path_buf(),
            recipe_content,
        });
        match &self.build_failure {
            Some(output) => Err(SandboxError::Build {
                image: tag.to_string(),
                output: output.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn pull(&self, image: &str) -> SandboxResult<()> {
        self.record(EngineCall::Pull(image.to_string()));
        match &self.pull_failure {
            Some(output) => Err(SandboxError::Pull {
                image: image.to_string(),
                output: output.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn run(&self, spec: &RunSpec) -> SandboxResult<String> {
        self.record(EngineCall::Run(spec.clone()));
        if let Some(output) = &self.run_failure {
            return Err(SandboxError::Start {
                image: spec.image.clone(),
                output: output.clone(),
            });
        }
        let mut state = self.state.lock().unwrap();
        Ok(Self::insert_instance(&mut state, &spec.name))
    }

    async fn status(&self, instance_id: &str) -> SandboxResult<InstanceStatus> {
        self.record(EngineCall::Status(instance_id.to_string()));
        let mut state = self.state.lock().unwrap();
        let inst = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| Self::missing(instance_id))?;
        let probe = inst.probes;
        inst.probes += 1;
        Ok(match self.startup {
            StartupScript::RunningAfter(n) if probe >= n => InstanceStatus::Running,
            StartupScript::ExitAfter(n) if probe >= n => InstanceStatus::Exited { exit_code: Some(1) },
            _ => InstanceStatus::Starting,
        })
    }

    async fn logs(&self, instance_id: &str) -> SandboxResult<CapturedOutput> {
        self.record(EngineCall::Logs(instance_id.to_string()));
        if !self.exists(instance_id) {
            return Err(Self::missing(instance_id));
        }
        Ok(CapturedOutput {
            exit_code: Some(0),
            stdout: self.logs.clone(),
            stderr: String::new(),
        })
    }

    async fn exec(&self, instance_id: &str, argv: &[String]) -> SandboxResult<CapturedOutput> {
        self.record(EngineCall::Exec {
            instance: instance_id.to_string(),
            argv: argv.to_vec(),
        });
        if !self.exists(instance_id) {
            return Err(Self::missing(instance_id));
        }
        Ok(CapturedOutput {
            exit_code: Some(0),
            stdout: argv.join(" "),
            stderr: String::new(),
        })
    }

    async fn remove(&self, instance_id: &str) -> SandboxResult<()> {
        self.record(EngineCall::Remove(instance_id.to_string()));
        let mut state = self.state.lock().unwrap();
        state
            .instances
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| Self::missing(instance_id))
    }

    async fn list(&self, name_prefix: &str) -> SandboxResult<Vec<String>> {
        self.record(EngineCall::List(name_prefix.to_string()));
        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .iter()
            .filter(|(_, inst)| inst.name.starts_with(name_prefix))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn open_stdio(
        &self,
        instance_id: &str,
        command: &StdioCommand,
    ) -> SandboxResult<StdioChannel> {
        self.record(EngineCall::OpenStdio {
            instance: instance_id.to_string(),
            command: command.clone(),
        });
        if !self.exists(instance_id) {
            return Err(Self::missing(instance_id));
        }
        let (client_out, server_in) = duplex(64 * 1024);
        let (server_out, client_in) = duplex(64 * 1024);
        tokio::spawn(
            self.server
                .clone()
                .serve(server_in, server_out, Arc::clone(&self.tool_calls)),
        );
        Ok(StdioChannel::new(client_in, client_out))
    }
}

// ---------------------------------------------------------------------------
// MemoryCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    targets: Mutex<BTreeMap<String, TargetMetadata>>,
    reports: Mutex<Vec<(String, TestReport)>>,
    statuses: Mutex<Vec<(String, TestStatus)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(self, metadata: TargetMetadata) -> Self {
        self.targets
            .lock()
            .unwrap()
            .insert(metadata.name.clone(), metadata);
        self
    }

    /// Every report saved, in order.
    pub fn saved_reports(&self) -> Vec<(String, TestReport)> {
        self.reports.lock().unwrap().clone()
    }

    /// Every status transition, in order (including those implied by saved
    /// reports).
    pub fn status_history(&self) -> Vec<(String, TestStatus)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get_target(&self, name: &str) -> CatalogResult<Option<TargetMetadata>> {
        Ok(self.targets.lock().unwrap().get(name).cloned())
    }

    async fn put_target(&self, metadata: TargetMetadata) -> CatalogResult<()> {
        self.targets
            .lock()
            .unwrap()
            .insert(metadata.name.clone(), metadata);
        Ok(())
    }

    async fn list_targets(&self) -> CatalogResult<Vec<TargetMetadata>> {
        Ok(self.targets.lock().unwrap().values().cloned().collect())
    }

    async fn save_test_report(&self, name: &str, report: &TestReport) -> CatalogResult<()> {
        let status = status_for(report);
        {
            let mut targets = self.targets.lock().unwrap();
            let meta = targets
                .get_mut(name)
                .ok_or_else(|| CatalogError::NotFound(name.to_string()))?;
            meta.test_status = Some(status);
            meta.last_report = Some(report.clone());
        }
        self.statuses.lock().unwrap().push((name.to_string(), status));
        self.reports
            .lock()
            .unwrap()
            .push((name.to_string(), report.clone()));
        Ok(())
    }

    async fn set_test_status(&self, name: &str, status: TestStatus) -> CatalogResult<()> {
        {
            let mut targets = self.targets.lock().unwrap();
            let meta = targets
                .get_mut(name)
                .ok_or_else(|| CatalogError::NotFound(name.to_string()))?;
            meta.test_status = Some(status);
        }
        self.statuses.lock().unwrap().push((name.to_string(), status));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Returns pre-seeded cases per capability (empty when none were seeded).
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    cases: HashMap<String, Vec<TestCase>>,
    failing: bool,
    requests: Mutex<Vec<(String, usize)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cases(mut self, capability: &str, cases: Vec<TestCase>) -> Self {
        self.cases.insert(capability.to_string(), cases);
        self
    }

    /// Every call fails with `GenerationError::Unavailable`.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// `(capability, max_cases)` of every call, in order.
    pub fn requests(&self) -> Vec<(String, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestCaseGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        capability: &Capability,
        max_cases: usize,
    ) -> Result<Vec<TestCase>, GenerationError> {
        self.requests
            .lock()
            .unwrap()
            .push((capability.name.clone(), max_cases));
        if self.failing {
            return Err(GenerationError::Unavailable("scripted failure".into()));
        }
        let mut cases = self.cases.get(&capability.name).cloned().unwrap_or_default();
        cases.truncate(max_cases);
        Ok(cases)
    }
}

// ---------------------------------------------------------------------------
// RecordingAssessor
// ---------------------------------------------------------------------------

/// One `assess` call as seen by [`RecordingAssessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssessedCall {
    pub capability: String,
    pub arguments: Value,
    pub success: bool,
    pub is_error_response: bool,
}

/// Scores every response with a fixed uniform score and records the call.
#[derive(Debug)]
pub struct RecordingAssessor {
    score: f64,
    failing: bool,
    calls: Mutex<Vec<AssessedCall>>,
}

impl Default for RecordingAssessor {
    fn default() -> Self {
        Self::new(7.0)
    }
}

impl RecordingAssessor {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            failing: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with `AssessmentError::Unavailable` (still recorded).
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<AssessedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QualityAssessor for RecordingAssessor {
    async fn assess(&self, input: AssessmentInput<'_>) -> Result<QualityAssessment, AssessmentError> {
        let is_error = input.is_error_response();
        self.calls.lock().unwrap().push(AssessedCall {
            capability: input.capability.name.clone(),
            arguments: input.case.arguments.clone(),
            success: input.outcome.success(),
            is_error_response: is_error,
        });
        if self.failing {
            return Err(AssessmentError::Unavailable("scripted failure".into()));
        }
        Ok(QualityAssessment::from_dimensions(
            DimensionScores::uniform(self.score),
            "recorded",
            is_error,
        ))
    }
}
