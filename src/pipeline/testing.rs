//! Test doubles for the pipeline's collaborators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::function::{StageFunction, StageRegistry};
use super::orchestrator::PipelineOrchestrator;
use super::stage::Stage;
use super::types::{StageCall, StageOutput};
use crate::ai::{ModelInvoker, ModelResponse, TokenUsage};
use crate::cache::{
    CacheBackend, CacheEntry, CacheLayer, CacheTier, ManualClock, MemoryBackend, SharedBackend,
    TierStats, TtlClass, TtlPolicy,
};
use crate::config::{PipelineConfig, RoutingConfig};
use crate::routing::{ModelConfig, ModelRouter};
use crate::storage::MemoryRunStatusStore;
use crate::types::{AnalysisRequest, ForgeError, ModelError, Result, StageIdentity};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// =============================================================================
// Fault-injecting cache backend
// =============================================================================

/// Memory backend that fails reads and/or writes on demand
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    failing_read_tiers: Mutex<HashSet<CacheTier>>,
    faults: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Fail loads for one tier only
    pub fn fail_reads_for(&self, tier: CacheTier, failing: bool) {
        let mut tiers = lock(&self.failing_read_tiers);
        if failing {
            tiers.insert(tier);
        } else {
            tiers.remove(&tier);
        }
    }

    /// Number of injected faults so far
    pub fn faults(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    fn check(&self, flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            self.faults.fetch_add(1, Ordering::SeqCst);
            Err(ForgeError::Storage("disk I/O error".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn load(&self, tier: CacheTier, key: &str) -> Result<Option<CacheEntry>> {
        self.check(&self.fail_reads)?;
        if lock(&self.failing_read_tiers).contains(&tier) {
            self.faults.fetch_add(1, Ordering::SeqCst);
            return Err(ForgeError::Storage(format!("{} tier unreadable", tier)));
        }
        self.inner.load(tier, key).await
    }

    async fn save(&self, tier: CacheTier, entry: &CacheEntry) -> Result<()> {
        self.check(&self.fail_writes)?;
        self.inner.save(tier, entry).await
    }

    async fn record_hit(&self, tier: CacheTier, key: &str, at: DateTime<Utc>) -> Result<u64> {
        self.check(&self.fail_writes)?;
        self.inner.record_hit(tier, key, at).await
    }

    async fn purge(&self, tier: CacheTier, class: TtlClass, cutoff: DateTime<Utc>) -> Result<usize> {
        self.check(&self.fail_writes)?;
        self.inner.purge(tier, class, cutoff).await
    }

    async fn delete(&self, tier: CacheTier, key: &str) -> Result<bool> {
        self.check(&self.fail_writes)?;
        self.inner.delete(tier, key).await
    }

    async fn stats(&self, tier: CacheTier) -> Result<TierStats> {
        self.check(&self.fail_reads)?;
        self.inner.stats(tier).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

// =============================================================================
// Recording stage function
// =============================================================================

/// Snapshot of one stage call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub stage: Stage,
    pub identity: StageIdentity,
    pub model_id: String,
    pub attempt: u32,
    pub strict: bool,
    pub fallback: bool,
    pub upstream: Vec<Stage>,
    pub memory_seeded: bool,
}

/// Stage function that records every call and returns canned outputs.
///
/// Per-stage failure scripts are consumed front to back, one per call.
#[derive(Default)]
pub struct RecordingStage {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<Stage, VecDeque<ForgeError>>>,
    cost_usd: f64,
}

impl RecordingStage {
    pub fn new() -> Self {
        Self {
            cost_usd: 0.01,
            ..Self::default()
        }
    }

    pub fn fail_next(&self, stage: Stage, error: ForgeError) {
        lock(&self.failures).entry(stage).or_default().push_back(error);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, stage: Stage) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.stage == stage).collect()
    }

    pub fn output_for(stage: Stage, identity: &StageIdentity) -> Value {
        json!({
            "stage": stage.as_str(),
            "company_profile": {"name": identity.company},
            "industry_insights": [format!("{} is consolidating", identity.industry)],
            "competitors": [{"name": "Globex"}],
            "confidence": 0.8,
        })
    }
}

#[async_trait]
impl StageFunction for RecordingStage {
    async fn call(&self, call: StageCall<'_>) -> Result<StageOutput> {
        lock(&self.calls).push(RecordedCall {
            stage: call.stage,
            identity: call.identity.clone(),
            model_id: call.model.model_id.clone(),
            attempt: call.attempt,
            strict: call.strict,
            fallback: call.fallback,
            upstream: call.inputs.upstream.keys().copied().collect(),
            memory_seeded: call.inputs.memory.is_some(),
        });

        if let Some(error) = lock(&self.failures)
            .get_mut(&call.stage)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }

        Ok(StageOutput {
            payload: Self::output_for(call.stage, call.identity),
            cost_usd: self.cost_usd,
            usage: TokenUsage::new(100, 50),
        })
    }
}

// =============================================================================
// Scripted model invoker
// =============================================================================

/// Invoker that replays scripted replies, then falls back to a valid object
#[derive(Default)]
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<std::result::Result<String, ModelError>>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, text: impl Into<String>) {
        lock(&self.script).push_back(Ok(text.into()));
    }

    pub fn fail(&self, error: ModelError) {
        lock(&self.script).push_back(Err(error));
    }

    /// `(model_id, prompt)` for every invocation
    pub fn prompts(&self) -> Vec<(String, String)> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, model: &ModelConfig, prompt: &str, _schema: &Value) -> Result<ModelResponse> {
        lock(&self.prompts).push((model.model_id.clone(), prompt.to_string()));
        let next = lock(&self.script).pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e.into()),
            None => json!({"confidence": 0.7}).to_string(),
        };
        Ok(ModelResponse::text(&model.model_id, text).with_usage(TokenUsage::new(1000, 1000)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// Orchestrator harness
// =============================================================================

/// Orchestrator wired to a recording stage function and in-memory status
pub struct Harness {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub recording: Arc<RecordingStage>,
    pub status: Arc<MemoryRunStatusStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(backend: SharedBackend) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = CacheLayer::new(
            backend,
            TtlPolicy::default(),
            clock.clone(),
            std::time::Duration::from_secs(1),
        );
        let router = ModelRouter::from_config(&RoutingConfig::default())
            .unwrap_or_else(|e| panic!("default routing config: {}", e));
        let recording = Arc::new(RecordingStage::new());
        let status = Arc::new(MemoryRunStatusStore::new());

        let pipeline = PipelineConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..PipelineConfig::default()
        };
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(cache),
            Arc::new(router),
            StageRegistry::uniform(recording.clone()),
            status.clone(),
        )
        .with_config(pipeline, crate::constants::cache::CHALLENGE_SNIPPET_CHARS);

        Self {
            orchestrator: Arc::new(orchestrator),
            recording,
            status,
            clock,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }
}

pub fn acme_request() -> AnalysisRequest {
    AnalysisRequest::new(
        "Acme",
        "Tech",
        "scale ops",
        json!({"revenue": 10, "headcount": 120, "regions": ["NA", "EU"]}),
    )
}
