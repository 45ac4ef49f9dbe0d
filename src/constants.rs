//! Global Constants
//!
//! Centralized defaults for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Cache tier constants
pub mod cache {
    /// Whole-run analysis result TTL (hours)
    pub const ANALYSIS_TTL_HOURS: u64 = 168;

    /// Per-stage result TTL (hours)
    pub const STAGE_TTL_HOURS: u64 = 72;

    /// Company profile TTL (days)
    pub const COMPANY_TTL_DAYS: u64 = 30;

    /// Competitor data TTL (days)
    pub const COMPETITOR_TTL_DAYS: u64 = 7;

    /// Industry insight TTL (days)
    pub const INDUSTRY_TTL_DAYS: u64 = 3;

    /// Upper bound for any configured TTL (days)
    pub const MAX_TTL_DAYS: u64 = 3650;

    /// Characters of normalized challenge text included in the run key
    pub const CHALLENGE_SNIPPET_CHARS: usize = 200;

    /// Default database file, relative to the project directory
    pub const DATABASE_FILE: &str = "stratforge.db";
}

/// Complexity scoring constants
pub mod complexity {
    /// Weight of the data-volume term
    pub const DATA_WEIGHT: f64 = 0.30;

    /// Data points beyond which more data no longer raises the score
    pub const DATA_SATURATION: usize = 40;

    /// Weight added when the task requires reasoning
    pub const REASONING_WEIGHT: f64 = 0.25;

    /// Weight added when the task requires creativity
    pub const CREATIVITY_WEIGHT: f64 = 0.15;
}

/// Routing band thresholds (upper bound, exclusive)
pub mod routing {
    pub const ULTRA_CHEAP_BELOW: f64 = 0.20;
    pub const CHEAP_BELOW: f64 = 0.40;
    pub const MID_BELOW: f64 = 0.60;
    pub const PREMIUM_BELOW: f64 = 0.80;
}

/// Pipeline execution constants
pub mod pipeline {
    /// Attempts per stage (initial + strict retry)
    pub const MAX_ATTEMPTS: u32 = 2;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 250;

    /// Maximum delay between retries (milliseconds)
    pub const MAX_DELAY_MS: u64 = 2_000;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;

    /// Per-stage invocation timeout (seconds)
    pub const STAGE_TIMEOUT_SECS: u64 = 120;

    /// Per-operation cache I/O timeout (seconds)
    pub const CACHE_IO_TIMEOUT_SECS: u64 = 5;

    /// Confidence reported when no stage supplies one
    pub const DEFAULT_CONFIDENCE: f64 = 0.5;

    /// Default number of concurrent runs in batch mode
    pub const BATCH_CONCURRENCY: usize = 4;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}
