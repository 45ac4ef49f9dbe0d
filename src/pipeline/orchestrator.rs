//! Pipeline Orchestrator
//!
//! Drives one run through the fixed six-stage sequence:
//!
//! 1. Whole-run short-circuit on a fresh analysis cache entry (skipped when
//!    regenerating)
//! 2. Per stage: stage cache, then institutional memory, then the routed
//!    model with bounded retry
//! 3. Write-through of stage outputs, entity memory and the final result
//!
//! Cache faults never fail a run. A stage that exhausts its retries fails the
//! run and no later stage executes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::function::StageRegistry;
use super::retry::RetryPolicy;
use super::stage::Stage;
use super::types::{
    PipelineResult, ResultSource, RunMode, RunState, StageCall, StageInputs, StagePhase,
    StageResult, StageSource, aggregate_confidence, build_report,
};
use crate::ai::RunMetrics;
use crate::cache::{CacheKeyDeriver, CacheLayer, CacheTier, Lookup, MemoryRecord, normalized_snippet};
use crate::config::PipelineConfig;
use crate::constants::cache as cache_constants;
use crate::routing::{ModelRouter, RoutingPlan};
use crate::storage::{RunStatusRecord, SharedRunStatus};
use crate::types::{AnalysisRequest, ForgeError, Result, StageIdentity};

pub struct PipelineOrchestrator {
    cache: Arc<CacheLayer>,
    router: Arc<ModelRouter>,
    registry: StageRegistry,
    run_status: SharedRunStatus,
    config: PipelineConfig,
    snippet_chars: usize,
}

/// Mutable state of one run
struct RunContext<'a> {
    run_id: &'a str,
    identity: StageIdentity,
    request: &'a AnalysisRequest,
    plan: RoutingPlan,
    metrics: RunMetrics,
    upstream: BTreeMap<Stage, Value>,
    results: Vec<StageResult>,
}

impl PipelineOrchestrator {
    pub fn new(
        cache: Arc<CacheLayer>,
        router: Arc<ModelRouter>,
        registry: StageRegistry,
        run_status: SharedRunStatus,
    ) -> Self {
        Self {
            cache,
            router,
            registry,
            run_status,
            config: PipelineConfig::default(),
            snippet_chars: cache_constants::CHALLENGE_SNIPPET_CHARS,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig, snippet_chars: usize) -> Self {
        self.config = config;
        self.snippet_chars = snippet_chars;
        self
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    pub fn run_status(&self) -> &SharedRunStatus {
        &self.run_status
    }

    // =========================================================================
    // Keys
    // =========================================================================

    /// Whole-run key: identity, challenge snippet and extracted-data hash
    pub fn run_key(&self, request: &AnalysisRequest) -> Result<String> {
        let identity = request.identity();
        CacheKeyDeriver::derive(
            "analysis",
            &[
                json!(identity.company.to_lowercase()),
                json!(identity.industry.to_lowercase()),
                json!(normalized_snippet(&request.challenge, self.snippet_chars)),
                json!(CacheKeyDeriver::content_hash(&request.extracted_data)),
            ],
        )
    }

    /// Stage key: identity plus a hash over everything the stage consumes
    pub fn stage_key(
        &self,
        stage: Stage,
        identity: &StageIdentity,
        inputs: &StageInputs,
    ) -> Result<String> {
        let upstream: serde_json::Map<String, Value> = inputs
            .upstream
            .iter()
            .map(|(s, output)| (s.as_str().to_string(), output.clone()))
            .collect();
        let upstream_hash = CacheKeyDeriver::content_hash(&json!({
            "challenge": normalized_snippet(&inputs.challenge, self.snippet_chars),
            "data": CacheKeyDeriver::content_hash(&inputs.extracted_data),
            "upstream": upstream,
            "extra": inputs.extra,
        }));
        CacheKeyDeriver::derive(
            stage.as_str(),
            &[
                json!(identity.company.to_lowercase()),
                json!(identity.industry.to_lowercase()),
                json!(upstream_hash),
            ],
        )
    }

    // =========================================================================
    // Entry Points
    // =========================================================================

    pub async fn run(&self, request: AnalysisRequest) -> Result<PipelineResult> {
        self.run_with_mode(request, RunMode::Normal).await
    }

    pub async fn run_with_mode(
        &self,
        request: AnalysisRequest,
        mode: RunMode,
    ) -> Result<PipelineResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.run_with_id(run_id, request, mode).await
    }

    /// Spawn a run and return its id immediately.
    ///
    /// The request is validated up front; afterwards the outcome is only
    /// observable through the handle or the run status store.
    pub fn submit(
        self: &Arc<Self>,
        request: AnalysisRequest,
        mode: RunMode,
    ) -> Result<(String, JoinHandle<Result<PipelineResult>>)> {
        request.validate()?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let this = Arc::clone(self);
        let id = run_id.clone();
        let handle = tokio::spawn(async move { this.run_with_id(id, request, mode).await });
        Ok((run_id, handle))
    }

    /// Run independent requests with bounded concurrency.
    ///
    /// Outcomes come back in input order; one failed run does not affect
    /// the others.
    pub async fn run_batch(
        &self,
        requests: Vec<AnalysisRequest>,
        mode: RunMode,
    ) -> Vec<Result<PipelineResult>> {
        let concurrency = self.config.batch_concurrency.max(1);
        let total = requests.len();
        info!(runs = total, concurrency, "Starting batch");

        let mut outcomes: Vec<(usize, Result<PipelineResult>)> = stream::iter(
            requests.into_iter().enumerate(),
        )
        .map(|(idx, request)| async move { (idx, self.run_with_mode(request, mode).await) })
        .buffer_unordered(concurrency)
        .collect()
        .await;

        outcomes.sort_by_key(|(idx, _)| *idx);
        let outcomes: Vec<Result<PipelineResult>> =
            outcomes.into_iter().map(|(_, outcome)| outcome).collect();

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        info!(runs = total, failed, "Batch finished");
        outcomes
    }

    #[instrument(
        name = "pipeline_run",
        skip_all,
        fields(
            run_id = %run_id,
            company = %request.company,
            industry = %request.industry,
            mode = %mode
        )
    )]
    pub async fn run_with_id(
        &self,
        run_id: String,
        request: AnalysisRequest,
        mode: RunMode,
    ) -> Result<PipelineResult> {
        request.validate()?;
        let run_key = self.run_key(&request)?;
        let identity = request.identity();
        let record = RunStatusRecord::running(&run_id, &identity);
        self.save_status(&record).await;

        let metrics = RunMetrics::new(&run_id);
        let mut state = RunState::NotStarted;

        if mode == RunMode::Normal {
            advance(&run_id, &mut state, RunState::CheckingAnalysisCache);
            if let Some(cached) = self.check_analysis_cache(&run_key, &metrics).await {
                advance(&run_id, &mut state, RunState::ShortCircuited);
                let result = short_circuit(cached, &run_id, &metrics);
                advance(&run_id, &mut state, RunState::Completed);
                info!(
                    stages = result.stage_count(),
                    "Analysis cache hit, skipped all stages"
                );
                self.save_status(&record.completed(serde_json::to_value(&result)?))
                    .await;
                return Ok(result);
            }
        }

        advance(&run_id, &mut state, RunState::RunningStages);
        let outcome = self
            .run_stages(&run_id, &request, identity, metrics, &mut state)
            .await;

        match outcome {
            Ok(result) => {
                let value = serde_json::to_value(&result)?;
                match mode {
                    RunMode::Normal => {
                        self.cache
                            .analysis
                            .put(&run_key, value.clone(), result.total_cost_usd)
                            .await
                    }
                    RunMode::Regenerate => {
                        self.cache
                            .analysis
                            .replace(&run_key, value.clone(), result.total_cost_usd)
                            .await
                    }
                }
                advance(&run_id, &mut state, RunState::Completed);
                info!(
                    stages = result.stage_count(),
                    executed = result.executed_stages(),
                    confidence = result.confidence,
                    "Run completed: {}",
                    result.metrics.display()
                );
                self.save_status(&record.completed(value)).await;
                Ok(result)
            }
            Err(e) => {
                advance(&run_id, &mut state, RunState::Failed);
                warn!(stage = e.stage().unwrap_or("-"), "Run failed: {}", e);
                self.save_status(&record.failed(e.stage().map(str::to_string), e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    // =========================================================================
    // Run Phases
    // =========================================================================

    async fn check_analysis_cache(
        &self,
        run_key: &str,
        metrics: &RunMetrics,
    ) -> Option<PipelineResult> {
        match self.cache.analysis.lookup(run_key).await {
            Lookup::Hit(entry) => match serde_json::from_value::<PipelineResult>(entry.payload) {
                Ok(result) => {
                    metrics.record_hit(CacheTier::Analysis);
                    debug!(hits = entry.hit_count, "Analysis cache hit");
                    Some(result)
                }
                Err(e) => {
                    warn!(key = run_key, "Undecodable analysis entry, running stages: {}", e);
                    None
                }
            },
            Lookup::Miss => None,
            Lookup::Fault(e) => {
                metrics.record_cache_fault();
                warn!("Analysis cache unavailable, running stages: {}", e);
                None
            }
        }
    }

    async fn run_stages(
        &self,
        run_id: &str,
        request: &AnalysisRequest,
        identity: StageIdentity,
        metrics: RunMetrics,
        state: &mut RunState,
    ) -> Result<PipelineResult> {
        let plan = self.router.recommend_for_stages(&request.extracted_data)?;
        let mut ctx = RunContext {
            run_id,
            identity,
            request,
            plan,
            metrics,
            upstream: BTreeMap::new(),
            results: Vec::with_capacity(Stage::ALL.len()),
        };

        for stage in Stage::ALL {
            let result = self.run_stage(&mut ctx, stage).await?;
            ctx.upstream.insert(stage, result.output.clone());
            ctx.results.push(result);
        }

        advance(run_id, state, RunState::Aggregating);
        debug_assert_eq!(ctx.results.len(), Stage::ALL.len());

        let report = build_report(&ctx.identity, &request.challenge, &ctx.results);
        let confidence = aggregate_confidence(&ctx.results);
        let total_cost_usd = ctx.results.iter().map(|r| r.cost_usd).sum();

        Ok(PipelineResult {
            run_id: run_id.to_string(),
            company: ctx.identity.company.clone(),
            industry: ctx.identity.industry.clone(),
            challenge: request.challenge.clone(),
            report,
            confidence,
            total_cost_usd,
            run_cost_usd: ctx.metrics.total_cost_usd(),
            source: ResultSource::Fresh,
            completed_at: Utc::now(),
            metrics: ctx.metrics.summary(),
            stages: ctx.results,
        })
    }

    async fn run_stage(&self, ctx: &mut RunContext<'_>, stage: Stage) -> Result<StageResult> {
        let started = Instant::now();
        let mut inputs = StageInputs {
            upstream: ctx.upstream.clone(),
            ..StageInputs::new(&ctx.request.challenge, ctx.request.extracted_data.clone())
        };
        let key = self.stage_key(stage, &ctx.identity, &inputs)?;

        enter(stage, StagePhase::CheckingStageCache);
        let mut phase = match self.cache.stages.lookup(&key).await {
            Lookup::Hit(entry) => match serde_json::from_value::<StageResult>(entry.payload) {
                Ok(mut cached) => {
                    enter(stage, StagePhase::StageCacheHit);
                    ctx.metrics.record_hit(CacheTier::Stage);
                    cached.source = StageSource::StageCache;
                    cached.duration_ms = elapsed_ms(started);
                    return Ok(cached);
                }
                Err(e) => {
                    warn!(stage = %stage, "Undecodable stage entry, executing: {}", e);
                    StagePhase::Executing
                }
            },
            Lookup::Miss => StagePhase::Executing,
            Lookup::Fault(e) => {
                ctx.metrics.record_cache_fault();
                warn!(stage = %stage, "Stage cache unavailable, executing: {}", e);
                StagePhase::CacheErrorDuringExecution
            }
        };
        enter(stage, phase);

        let profile = stage.profile();
        if let (Some(entity), Some(entity_id)) = (profile.memory, stage.memory_entity_id(&ctx.identity)) {
            match self.cache.memory.recall_lookup(entity, entity_id).await {
                Ok(Some(record)) => {
                    ctx.metrics.record_hit(CacheTier::Memory);
                    debug!(stage = %stage, %entity, entity_id, "Seeding stage with institutional memory");
                    inputs.memory = Some(record);
                }
                Ok(None) => {}
                Err(e) => {
                    ctx.metrics.record_cache_fault();
                    warn!(stage = %stage, %entity, "Institutional memory unavailable: {}", e);
                    if phase == StagePhase::Executing {
                        phase = StagePhase::CacheErrorDuringExecution;
                        enter(stage, phase);
                    }
                }
            }
        }

        if phase == StagePhase::CacheErrorDuringExecution {
            phase = StagePhase::FallbackExecuting;
            enter(stage, phase);
        }

        let model = ctx.plan.get(stage).cloned().ok_or_else(|| {
            ForgeError::Routing(format!("No model planned for stage {}", stage))
        })?;
        let function = self.registry.get(stage)?;
        let policy = RetryPolicy::for_stage(&self.config, stage);

        let fallback = phase == StagePhase::FallbackExecuting;
        let identity = &ctx.identity;
        let inputs_ref = &inputs;
        let model_ref = &model;
        let invoked = Instant::now();
        let output = policy
            .run(stage, move |attempt| {
                function.call(StageCall {
                    stage,
                    identity,
                    inputs: inputs_ref,
                    model: model_ref,
                    attempt,
                    strict: attempt > 1,
                    fallback,
                })
            })
            .await?;
        ctx.metrics
            .record_call(&output.usage, output.cost_usd, elapsed_ms(invoked));

        enter(stage, StagePhase::Executed);
        info!(
            run_id = ctx.run_id,
            stage = %stage,
            model = %model.model_id,
            fallback,
            cost_usd = output.cost_usd,
            "Stage executed"
        );

        let result = StageResult {
            stage,
            output: output.payload,
            cost_usd: output.cost_usd,
            duration_ms: elapsed_ms(started),
            model_id: model.model_id.clone(),
            source: StageSource::Executed,
        };

        self.cache
            .stages
            .put(&key, serde_json::to_value(&result)?, result.cost_usd)
            .await;

        if let (Some(entity), Some(entity_id), Some(data)) = (
            profile.memory,
            stage.memory_entity_id(&ctx.identity),
            stage.memory_payload(&result.output),
        ) {
            let record =
                MemoryRecord::new(entity, entity_id, data, stage.as_str(), self.cache.memory.now());
            self.cache.memory.remember(&record, result.cost_usd).await;
        }

        Ok(result)
    }

    async fn save_status(&self, record: &RunStatusRecord) {
        if let Err(e) = self.run_status.save_run_status(record).await {
            warn!(run_id = %record.run_id, status = %record.status, "Failed to save run status: {}", e);
        }
    }
}

fn advance(run_id: &str, state: &mut RunState, next: RunState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid run transition {:?} -> {:?}",
        state,
        next
    );
    debug!(run_id, from = ?*state, to = ?next, "Run state");
    *state = next;
}

fn enter(stage: Stage, phase: StagePhase) {
    debug!(stage = %stage, phase = ?phase, "Stage phase");
}

fn short_circuit(mut cached: PipelineResult, run_id: &str, metrics: &RunMetrics) -> PipelineResult {
    cached.run_id = run_id.to_string();
    cached.source = ResultSource::AnalysisCache;
    cached.run_cost_usd = 0.0;
    cached.completed_at = Utc::now();
    cached.metrics = metrics.summary();
    cached
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
