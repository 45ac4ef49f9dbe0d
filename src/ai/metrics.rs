//! Run Metrics Collection
//!
//! Per-run aggregation of model usage, cost and cache reuse. Thread-safe so
//! batch runs can share one collector.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use crate::ai::provider::TokenUsage;
use crate::cache::CacheTier;

// =============================================================================
// Metrics Collector
// =============================================================================

/// Counters use atomics; cost is held in microdollars.
pub struct RunMetrics {
    label: String,
    start_time: Instant,
    model_calls: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    total_latency_ms: AtomicU64,
    total_cost_micros: AtomicU64,
    analysis_hits: AtomicU32,
    stage_hits: AtomicU32,
    memory_hits: AtomicU32,
    cache_faults: AtomicU32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub label: String,
    pub total_duration_ms: u64,
    pub model_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: f64,
    pub total_cost_usd: f64,
    pub analysis_hits: u32,
    pub stage_hits: u32,
    pub memory_hits: u32,
    pub cache_faults: u32,
}

fn to_micros(cost_usd: f64) -> u64 {
    if cost_usd.is_finite() && cost_usd > 0.0 {
        (cost_usd * 1_000_000.0).round() as u64
    } else {
        0
    }
}

impl RunMetrics {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start_time: Instant::now(),
            model_calls: AtomicU32::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
            analysis_hits: AtomicU32::new(0),
            stage_hits: AtomicU32::new(0),
            memory_hits: AtomicU32::new(0),
            cache_faults: AtomicU32::new(0),
        }
    }

    /// Record one model call, including failed attempts that still billed
    pub fn record_call(&self, usage: &TokenUsage, cost_usd: f64, latency_ms: u64) {
        self.model_calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(usage.input_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens as u64, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.total_cost_micros
            .fetch_add(to_micros(cost_usd), Ordering::Relaxed);
    }

    pub fn record_hit(&self, tier: CacheTier) {
        let counter = match tier {
            CacheTier::Analysis => &self.analysis_hits,
            CacheTier::Stage => &self.stage_hits,
            CacheTier::Memory => &self.memory_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_fault(&self) {
        self.cache_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn summary(&self) -> MetricsSummary {
        let model_calls = self.model_calls.load(Ordering::Relaxed);
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        let avg_latency = if model_calls > 0 {
            total_latency as f64 / model_calls as f64
        } else {
            0.0
        };

        MetricsSummary {
            label: self.label.clone(),
            total_duration_ms: self.start_time.elapsed().as_millis() as u64,
            model_calls,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            avg_latency_ms: avg_latency,
            total_cost_usd: self.total_cost_usd(),
            analysis_hits: self.analysis_hits.load(Ordering::Relaxed),
            stage_hits: self.stage_hits.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            cache_faults: self.cache_faults.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSummary {
    pub fn display(&self) -> String {
        format!(
            "Run: {}\n\
             Duration: {:.1}s\n\
             Model Calls: {}\n\
             Tokens: {} (input: {}, output: {})\n\
             Cache Hits: analysis {}, stage {}, memory {}\n\
             Estimated Cost: ${:.4}",
            self.label,
            self.total_duration_ms as f64 / 1000.0,
            self.model_calls,
            self.total_tokens,
            self.input_tokens,
            self.output_tokens,
            self.analysis_hits,
            self.stage_hits,
            self.memory_hits,
            self.total_cost_usd
        )
    }
}

pub type SharedMetrics = Arc<RunMetrics>;
