//! Sandbox lifecycle: image preparation, start, readiness, teardown.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::SandboxConfig;
use super::engine::{CapturedOutput, ContainerEngine, InstanceStatus, RunSpec};
use super::error::{SandboxError, SandboxResult};
use super::recipe::{self, BUILD_RECIPE};
use crate::config::HarnessConfig;
use crate::metrics::METRICS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Ready,
    Exited,
}

/// A started instance. Owned by the manager; sessions only hold its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInstance {
    pub instance_id: String,
    pub name: String,
    pub image_reference: String,
    pub state: InstanceState,
}

pub struct SandboxManager {
    engine: Arc<dyn ContainerEngine>,
    prefix: String,
    poll_interval: Duration,
    instances: Mutex<HashMap<String, SandboxInstance>>,
}

impl SandboxManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, prefix: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            engine,
            prefix: prefix.into(),
            poll_interval,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(engine: Arc<dyn ContainerEngine>, config: &HarnessConfig) -> Self {
        Self::new(engine, config.instance_prefix.clone(), config.readiness_poll_interval())
    }

    pub fn engine(&self) -> Arc<dyn ContainerEngine> {
        Arc::clone(&self.engine)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn tracked_map(&self) -> MutexGuard<'_, HashMap<String, SandboxInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, instance_id: &str, state: InstanceState) {
        if let Some(inst) = self.tracked_map().get_mut(instance_id) {
            inst.state = state;
        }
    }

    /// Unique, engine-safe name: prefix plus 8 hex chars.
    pub fn generate_name(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}", self.prefix, &id[..8])
    }

    /// Produce an image for `config`: build the source's own recipe, else
    /// pull the configured image, else build a synthesised recipe.
    pub async fn prepare_image(&self, config: &SandboxConfig) -> SandboxResult<String> {
        let source = &config.source_path;
        let tag = || {
            config
                .image_reference
                .clone()
                .unwrap_or_else(|| self.generate_name())
        };

        if source.is_dir() && recipe::has_build_recipe(source) {
            let tag = tag();
            info!(image = %tag, "building from source recipe");
            self.engine
                .build(source, &source.join(BUILD_RECIPE), &tag)
                .await?;
            return Ok(tag);
        }

        if let Some(image) = &config.image_reference {
            self.engine.pull(image).await?;
            return Ok(image.clone());
        }

        if !source.is_dir() {
            return Err(SandboxError::SourceMissing(source.clone()));
        }

        let tag = tag();
        let argv = config.entry_argv();
        let content = recipe::synthesize(source, argv.as_deref());
        debug!(image = %tag, recipe = %content, "synthesised build recipe");
        // Removed when dropped, after the build returns.
        let mut file = tempfile::Builder::new()
            .prefix("mcp-harness-")
            .suffix(".dockerfile")
            .tempfile()?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        self.engine.build(source, file.path(), &tag).await?;
        Ok(tag)
    }

    /// Start a detached instance of `image` and begin tracking it.
    pub async fn start(&self, image: &str, config: &SandboxConfig) -> SandboxResult<SandboxInstance> {
        let spec = RunSpec {
            name: self.generate_name(),
            image: image.to_string(),
            environment: config.environment.clone(),
            command: config.entry_argv(),
        };
        let instance_id = self.engine.run(&spec).await?;
        let instance = SandboxInstance {
            instance_id: instance_id.clone(),
            name: spec.name,
            image_reference: image.to_string(),
            state: InstanceState::Starting,
        };
        info!(instance = %instance.instance_id, name = %instance.name, image = %image, "instance started");
        self.tracked_map().insert(instance_id, instance.clone());
        Ok(instance)
    }

    /// Poll liveness until the instance runs, exits, or `timeout` elapses.
    ///
    /// An exited instance fails immediately with its logs; failed probes
    /// are retried until the deadline.
    pub async fn await_ready(&self, instance: &SandboxInstance, timeout: Duration) -> SandboxResult<()> {
        let id = instance.instance_id.as_str();
        let deadline = Instant::now() + timeout;
        loop {
            match self.engine.status(id).await {
                Ok(InstanceStatus::Running) => {
                    self.set_state(id, InstanceState::Ready);
                    info!(instance = %id, "instance ready");
                    return Ok(());
                }
                Ok(InstanceStatus::Exited { exit_code }) => {
                    self.set_state(id, InstanceState::Exited);
                    warn!(instance = %id, ?exit_code, "instance exited before becoming ready");
                    return Err(SandboxError::PrematureExit {
                        instance: id.to_string(),
                        logs: self.logs(id).await,
                    });
                }
                Ok(InstanceStatus::Starting) => debug!(instance = %id, "instance still starting"),
                Err(e) => debug!(instance = %id, error = %e, "liveness probe failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SandboxError::ReadinessTimeout {
                    instance: id.to_string(),
                    timeout_secs: timeout.as_secs(),
                    logs: self.logs(id).await,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Run a one-shot command inside the instance. Non-zero exits are
    /// returned, not raised.
    pub async fn exec(&self, instance: &SandboxInstance, argv: &[String]) -> SandboxResult<CapturedOutput> {
        self.engine.exec(&instance.instance_id, argv).await
    }

    /// Captured instance output. Never fails; errors become the text.
    pub async fn logs(&self, instance_id: &str) -> String {
        match self.engine.logs(instance_id).await {
            Ok(out) => out.to_string(),
            Err(e) => format!("failed to retrieve logs for {instance_id}: {e}"),
        }
    }

    /// Force-remove an instance. Idempotent; failures are logged only.
    pub async fn teardown(&self, instance_id: &str) {
        let was_tracked = self.tracked_map().remove(instance_id).is_some();
        match self.engine.remove(instance_id).await {
            Ok(()) => {
                METRICS.inc_instances_torn_down();
                info!(instance = %instance_id, "instance removed");
            }
            Err(e) if was_tracked => warn!(instance = %instance_id, error = %e, "teardown failed"),
            Err(e) => debug!(instance = %instance_id, error = %e, "teardown of untracked instance failed"),
        }
    }

    /// Tear down every tracked instance. Returns how many were attempted.
    pub async fn teardown_all(&self) -> usize {
        let ids: Vec<String> = self.tracked_map().keys().cloned().collect();
        for id in &ids {
            self.teardown(id).await;
        }
        info!(count = ids.len(), "tore down all tracked instances");
        ids.len()
    }

    /// Remove every engine instance carrying the harness prefix, tracked or
    /// not (e.g. left behind by a crashed process).
    pub async fn prune_orphans(&self) -> SandboxResult<usize> {
        let ids = self.engine.list(&self.prefix).await?;
        for id in &ids {
            self.teardown(id).await;
        }
        info!(count = ids.len(), prefix = %self.prefix, "pruned harness instances");
        Ok(ids.len())
    }

    /// Snapshot of the instances currently tracked.
    pub fn tracked(&self) -> Vec<SandboxInstance> {
        self.tracked_map().values().cloned().collect()
    }
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("prefix", &self.prefix)
            .field("poll_interval", &self.poll_interval)
            .field("tracked", &self.tracked_map().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{EngineCall, FakeEngine, StartupScript};

    fn manager(engine: &Arc<FakeEngine>) -> SandboxManager {
        SandboxManager::new(engine.clone(), "mcp-test-", Duration::from_secs(1))
    }

    fn source_with(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        dir
    }

    #[test]
    fn test_generate_name() {
        let engine = Arc::new(FakeEngine::new());
        let m = manager(&engine);
        let a = m.generate_name();
        let b = m.generate_name();
        assert!(a.starts_with("mcp-test-"));
        assert_eq!(a.len(), "mcp-test-".len() + 8);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_prepare_image_prefers_source_recipe() {
        let engine = Arc::new(FakeEngine::new());
        let src = source_with(&["Dockerfile"]);
        let cfg = SandboxConfig::new(src.path()).with_image("acme/server:1");
        let image = manager(&engine).prepare_image(&cfg).await.unwrap();
        assert_eq!(image, "acme/server:1");
        let calls = engine.calls();
        assert!(matches!(&calls[..], [EngineCall::Build { recipe, .. }] if recipe.ends_with("Dockerfile")));
    }

    #[tokio::test]
    async fn test_prepare_image_pulls_reference() {
        let engine = Arc::new(FakeEngine::new());
        let cfg = SandboxConfig::new("/does/not/exist").with_image("acme/server:1");
        let image = manager(&engine).prepare_image(&cfg).await.unwrap();
        assert_eq!(image, "acme/server:1");
        assert_eq!(engine.calls(), vec![EngineCall::Pull("acme/server:1".into())]);
    }

    #[tokio::test]
    async fn test_prepare_image_synthesises_recipe() {
        let engine = Arc::new(FakeEngine::new());
        let src = source_with(&["package.json"]);
        let cfg = SandboxConfig::new(src.path());
        let image = manager(&engine).prepare_image(&cfg).await.unwrap();
        assert!(image.starts_with("mcp-test-"));
        match &engine.calls()[..] {
            [EngineCall::Build { recipe_content, .. }] => {
                assert!(recipe_content.contains("FROM node:18-slim"));
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prepare_image_build_failure_embeds_output() {
        let engine = Arc::new(FakeEngine::new().fail_build("npm ERR! missing script"));
        let src = source_with(&["package.json"]);
        let err = manager(&engine)
            .prepare_image(&SandboxConfig::new(src.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Build { .. }));
        assert!(err.to_string().contains("npm ERR! missing script"));
    }

    #[tokio::test]
    async fn test_prepare_image_missing_source() {
        let engine = Arc::new(FakeEngine::new());
        let err = manager(&engine)
            .prepare_image(&SandboxConfig::new("/does/not/exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::SourceMissing(_)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_injects_env_and_tracks() {
        let engine = Arc::new(FakeEngine::new());
        let m = manager(&engine);
        let cfg = SandboxConfig::new("/src")
            .with_env("API_KEY", "k")
            .with_entry("node", vec!["index.js".into()]);
        let inst = m.start("img", &cfg).await.unwrap();
        assert_eq!(inst.state, InstanceState::Starting);
        assert_eq!(m.tracked().len(), 1);
        match &engine.calls()[..] {
            [EngineCall::Run(spec)] => {
                assert_eq!(spec.environment["API_KEY"], "k");
                assert_eq!(spec.command.as_deref(), Some(&["node".to_string(), "index.js".to_string()][..]));
                assert_eq!(spec.name, inst.name);
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_ready_after_polls() {
        let engine = Arc::new(FakeEngine::new().startup(StartupScript::RunningAfter(3)));
        let m = manager(&engine);
        let inst = m.start("img", &SandboxConfig::new("/src")).await.unwrap();
        let started = Instant::now();
        m.await_ready(&inst, Duration::from_secs(60)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(m.tracked()[0].state, InstanceState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_ready_premature_exit_is_immediate() {
        let engine = Arc::new(
            FakeEngine::new()
                .startup(StartupScript::ExitAfter(1))
                .with_logs("Error: cannot find module 'index.js'"),
        );
        let m = manager(&engine);
        let inst = m.start("img", &SandboxConfig::new("/src")).await.unwrap();
        let started = Instant::now();
        let err = m.await_ready(&inst, Duration::from_secs(60)).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(matches!(err, SandboxError::PrematureExit { .. }));
        assert!(err.logs().unwrap().contains("cannot find module"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_ready_timeout_carries_logs() {
        let engine = Arc::new(
            FakeEngine::new()
                .startup(StartupScript::NeverRunning)
                .with_logs("still installing"),
        );
        let m = manager(&engine);
        let inst = m.start("img", &SandboxConfig::new("/src")).await.unwrap();
        let started = Instant::now();
        let err = m.await_ready(&inst, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        match err {
            SandboxError::ReadinessTimeout { timeout_secs, logs, .. } => {
                assert_eq!(timeout_secs, 5);
                assert!(logs.contains("still installing"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_logs_never_fail() {
        let engine = Arc::new(FakeEngine::new());
        let text = manager(&engine).logs("no-such-instance").await;
        assert!(text.contains("failed to retrieve logs"));
    }

    #[tokio::test]
    async fn test_exec_returns_output_regardless_of_exit() {
        let engine = Arc::new(FakeEngine::new());
        let m = manager(&engine);
        let inst = m.start("img", &SandboxConfig::new("/src")).await.unwrap();
        let out = m.exec(&inst, &["ls".to_string(), "/app".to_string()]).await.unwrap();
        assert_eq!(out.stdout, "ls /app");
    }

    #[tokio::test]
    async fn test_teardown_idempotent_and_isolated() {
        let engine = Arc::new(FakeEngine::new());
        let m = manager(&engine);
        let a = m.start("img", &SandboxConfig::new("/src")).await.unwrap();
        let b = m.start("img", &SandboxConfig::new("/src")).await.unwrap();
        m.teardown(&a.instance_id).await;
        m.teardown(&a.instance_id).await;
        let live = engine.live_instances();
        assert_eq!(live, vec![b.instance_id.clone()]);
        assert_eq!(m.tracked().len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_all_and_prune() {
        let engine = Arc::new(FakeEngine::new());
        let m = manager(&engine);
        m.start("img", &SandboxConfig::new("/src")).await.unwrap();
        m.start("img", &SandboxConfig::new("/src")).await.unwrap();
        assert_eq!(m.teardown_all().await, 2);
        assert!(engine.live_instances().is_empty());

        // left behind by another process
        engine.seed_instance("mcp-test-deadbeef");
        engine.seed_instance("unrelated");
        assert_eq!(m.prune_orphans().await.unwrap(), 1);
        assert_eq!(engine.live_instances().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_spares_names_containing_prefix() {
        let engine = Arc::new(FakeEngine::new());
        let m = manager(&engine);
        let fixture = engine.seed_instance("db-mcp-test-fixture");
        engine.seed_instance("mcp-test-0badf00d");
        assert_eq!(m.prune_orphans().await.unwrap(), 1);
        assert_eq!(engine.live_instances(), vec![fixture]);
    }
}
