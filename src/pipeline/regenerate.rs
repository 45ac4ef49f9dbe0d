//! Regeneration: rerun a request without the whole-run short-circuit.
//!
//! Stage cache and institutional memory hits are still honoured within
//! their own TTLs. The finished result replaces the analysis cache entry
//! under the same run key.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, instrument};

use super::orchestrator::PipelineOrchestrator;
use super::types::{PipelineResult, RunMode};
use crate::types::{AnalysisRequest, Result};

pub struct RegenerationController {
    orchestrator: Arc<PipelineOrchestrator>,
}

impl RegenerationController {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self { orchestrator }
    }

    #[instrument(skip_all, fields(company = %request.company, industry = %request.industry))]
    pub async fn regenerate(&self, request: AnalysisRequest) -> Result<PipelineResult> {
        let result = self
            .orchestrator
            .run_with_mode(request, RunMode::Regenerate)
            .await?;
        info!(
            run_id = %result.run_id,
            reused = result.stage_count() - result.executed_stages(),
            "Analysis regenerated"
        );
        Ok(result)
    }

    /// Fire-and-forget regeneration
    pub fn submit(
        &self,
        request: AnalysisRequest,
    ) -> Result<(String, JoinHandle<Result<PipelineResult>>)> {
        self.orchestrator.submit(request, RunMode::Regenerate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTier, Clock};
    use crate::pipeline::Stage;
    use crate::pipeline::testing::{Harness, acme_request};
    use crate::pipeline::types::{ResultSource, StageSource};
    use crate::storage::{RunStatus, RunStatusStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_regenerate_bypasses_fresh_analysis_entry() {
        let h = Harness::in_memory();
        let first = h.orchestrator.run(acme_request()).await.unwrap();
        let controller = RegenerationController::new(h.orchestrator.clone());

        let regenerated = controller.regenerate(acme_request()).await.unwrap();
        assert_eq!(regenerated.source, ResultSource::Fresh);
        assert_eq!(regenerated.stage_count(), 6);
        // Every stage went through the loop and was served by the stage cache
        assert_eq!(regenerated.executed_stages(), 0);
        assert!(
            regenerated
                .stages
                .iter()
                .all(|r| r.source == StageSource::StageCache)
        );
        assert_eq!(regenerated.metrics.stage_hits, 6);
        assert_eq!(regenerated.metrics.analysis_hits, 0);
        assert_eq!(h.recording.calls().len(), 6);
        assert_ne!(regenerated.run_id, first.run_id);

        // One analysis entry, now holding the regenerated result
        let cache = h.orchestrator.cache();
        assert_eq!(cache.analysis.stats().await.total_records, 1);
        let key = h.orchestrator.run_key(&acme_request()).unwrap();
        let entry = cache.analysis.peek(&key).await.unwrap().unwrap();
        assert_eq!(entry.payload["run_id"], regenerated.run_id.as_str());
        assert_eq!(cache.stats().await.records_by_tier[CacheTier::Analysis.as_str()], 1);
    }

    #[tokio::test]
    async fn test_regenerate_executes_expired_stages() {
        let h = Harness::in_memory();
        h.orchestrator.run(acme_request()).await.unwrap();
        let controller = RegenerationController::new(h.orchestrator.clone());

        // Past the stage TTL, inside the analysis and company TTLs
        h.clock.advance(Duration::from_secs(80 * 3600));
        let regenerated = controller.regenerate(acme_request()).await.unwrap();
        assert_eq!(regenerated.executed_stages(), 6);
        assert_eq!(h.recording.calls().len(), 12);

        // Company memory (30 days) is still fresh; industry memory (3 days) is not
        assert!(h.recording.calls_for(Stage::Extraction)[1].memory_seeded);
        assert!(!h.recording.calls_for(Stage::GapAnalysis)[1].memory_seeded);

        // The analysis entry was still fresh; regeneration gives it a new lifetime
        let key = h.orchestrator.run_key(&acme_request()).unwrap();
        let entry = h.orchestrator.cache().analysis.peek(&key).await.unwrap().unwrap();
        assert_eq!(entry.created_at, h.clock.now());
        assert_eq!(entry.hit_count, 0);

        // A normal run now short-circuits to the regenerated result
        let cached = h.orchestrator.run(acme_request()).await.unwrap();
        assert_eq!(cached.source, ResultSource::AnalysisCache);
        let models = |r: &PipelineResult| -> Vec<(Stage, String)> {
            r.stages.iter().map(|s| (s.stage, s.model_id.clone())).collect()
        };
        assert_eq!(models(&cached), models(&regenerated));
    }

    #[tokio::test]
    async fn test_submit_regeneration() {
        let h = Harness::in_memory();
        let controller = RegenerationController::new(h.orchestrator.clone());

        let (run_id, handle) = controller.submit(acme_request()).unwrap();
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.run_id, run_id);
        assert_eq!(result.executed_stages(), 6);

        let status = h.status.load_run_status(&run_id).await.unwrap().unwrap();
        assert_eq!(status.status, RunStatus::Completed);
    }
}
