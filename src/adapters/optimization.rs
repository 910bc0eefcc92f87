//! Query Optimization Service
//!
//! Scores incoming queries for complexity, recommends a model tier for each
//! score band, and applies named optimization presets. Aggregated performance
//! metrics are append-only ring buffers; every report is derived from the
//! samples on demand and never mutates them.

use crate::config::{OptimizationSettings, PresetConfig};
use crate::domain::error::{OrchestratorError, OrchestratorResult};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

const COMPLEX_KEYWORDS: &[&str] = &[
    "analyze",
    "compare",
    "generate",
    "summarize",
    "explain",
    "describe",
    "calculate",
    "translate",
    "evaluate",
];
const QUESTION_WORDS: &[&str] = &["why", "how", "what if"];
const MULTI_REQUIREMENT_MARKERS: &[&str] = &[" and ", " then ", " also ", " after that "];

/// Bounded sample window for response-time percentiles
const METRICS_SAMPLE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct QueryComplexityAnalysis {
    pub query: String,
    pub complexity_score: u8,
    pub word_count: usize,
    pub simple_pattern: bool,
    pub complex_keyword: bool,
    pub question: bool,
    pub multi_requirement: bool,
    pub recommended_model: Option<String>,
}

/// Model tier implied by a complexity score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Balanced,
    Accurate,
}

impl ModelTier {
    pub fn for_score(score: u8) -> Self {
        match score {
            0..=2 => ModelTier::Fast,
            3..=4 => ModelTier::Balanced,
            _ => ModelTier::Accurate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationState {
    pub current_preset: String,
    pub current_model: Option<String>,
    pub cache_enabled: bool,
    pub auto_optimization: bool,
}

#[derive(Default)]
struct PerformanceSamples {
    response_times_ms: VecDeque<f64>,
    complexity_distribution: HashMap<u8, u64>,
    cache_hits: u64,
    cache_misses: u64,
    total_queries: u64,
}

/// Derived snapshot of the performance samples
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub total_queries: u64,
    pub average_response_ms: f64,
    pub median_response_ms: f64,
    pub p95_response_ms: f64,
    pub cache_hit_rate: f64,
    pub complexity_distribution: HashMap<u8, u64>,
    pub current_preset: String,
    pub current_model: Option<String>,
}

pub struct OptimizationService {
    config: OptimizationSettings,
    simple_pattern: Regex,
    state: RwLock<OptimizationState>,
    samples: Mutex<PerformanceSamples>,
}

impl OptimizationService {
    pub fn new(config: OptimizationSettings) -> OrchestratorResult<Self> {
        let simple_pattern = Regex::new(r"^(click|open|go to)\s+\w+$")
            .map_err(|e| OrchestratorError::Internal(format!("bad command pattern: {}", e)))?;

        let default_preset = config.default_preset.clone();
        let preset = config.presets.get(&default_preset).cloned();
        let state = OptimizationState {
            current_model: preset
                .as_ref()
                .map(|p| p.model.clone())
                .or_else(|| config.models.balanced.clone()),
            cache_enabled: preset.map(|p| p.cache_enabled).unwrap_or(true),
            current_preset: default_preset,
            auto_optimization: config.auto_optimization,
        };

        Ok(Self {
            config,
            simple_pattern,
            state: RwLock::new(state),
            samples: Mutex::new(PerformanceSamples::default()),
        })
    }

    /// Score a query 1..=6 and attach the recommended model for that band
    pub async fn analyze_complexity(&self, query: &str) -> QueryComplexityAnalysis {
        let trimmed = query.trim();
        let lowered = trimmed.to_lowercase();
        let word_count = trimmed.split_whitespace().count();

        let mut score: i32 = 1;
        if word_count > 10 {
            score += 2;
        } else if word_count > 5 {
            score += 1;
        }

        let simple_pattern = self.simple_pattern.is_match(&lowered);
        if simple_pattern {
            score = (score - 1).max(1);
        }

        let complex_keyword = COMPLEX_KEYWORDS.iter().any(|k| lowered.contains(k));
        if complex_keyword {
            score += 1;
        }

        let question = QUESTION_WORDS.iter().any(|k| lowered.contains(k));
        if question {
            score += 1;
        }

        let multi_requirement = MULTI_REQUIREMENT_MARKERS.iter().any(|k| lowered.contains(k));
        if multi_requirement {
            score += 1;
        }

        let complexity_score = score.clamp(1, 6) as u8;

        {
            let mut samples = self.samples.lock().await;
            samples.total_queries += 1;
            *samples
                .complexity_distribution
                .entry(complexity_score)
                .or_insert(0) += 1;
        }

        let recommended_model = self.select_model(complexity_score);
        debug!(
            score = complexity_score,
            words = word_count,
            model = ?recommended_model,
            "Query complexity analyzed"
        );

        QueryComplexityAnalysis {
            query: trimmed.to_string(),
            complexity_score,
            word_count,
            simple_pattern,
            complex_keyword,
            question,
            multi_requirement,
            recommended_model,
        }
    }

    /// Map a score to a configured model, falling back through the remaining
    /// tiers when the preferred one is not configured
    pub fn select_model(&self, score: u8) -> Option<String> {
        let models = &self.config.models;
        let chain: [&Option<String>; 3] = match ModelTier::for_score(score) {
            ModelTier::Fast => [&models.fast, &models.balanced, &models.accurate],
            ModelTier::Balanced => [&models.balanced, &models.fast, &models.accurate],
            ModelTier::Accurate => [&models.accurate, &models.balanced, &models.fast],
        };
        chain.iter().find_map(|m| (*m).clone())
    }

    /// Switch the active preset. Idempotent; unknown presets are rejected
    /// without touching the current state.
    pub async fn apply_preset(&self, name: &str) -> OrchestratorResult<OptimizationState> {
        let preset: PresetConfig = self
            .config
            .presets
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::Validation(format!("unknown preset '{}'", name)))?;

        let mut state = self.state.write().await;
        state.current_preset = name.to_string();
        state.current_model = Some(preset.model);
        state.cache_enabled = preset.cache_enabled;
        info!(preset = %name, model = ?state.current_model, "Optimization preset applied");
        Ok(state.clone())
    }

    pub async fn state(&self) -> OptimizationState {
        self.state.read().await.clone()
    }

    pub async fn record_response_time(&self, elapsed_ms: f64) {
        let mut samples = self.samples.lock().await;
        if samples.response_times_ms.len() >= METRICS_SAMPLE_LIMIT {
            samples.response_times_ms.pop_front();
        }
        samples.response_times_ms.push_back(elapsed_ms);
    }

    pub async fn record_cache_hit(&self) {
        self.samples.lock().await.cache_hits += 1;
    }

    pub async fn record_cache_miss(&self) {
        self.samples.lock().await.cache_misses += 1;
    }

    /// Derive a report from the current samples without consuming them
    pub async fn performance_report(&self) -> PerformanceReport {
        let samples = self.samples.lock().await;
        let state = self.state.read().await;

        let mut sorted: Vec<f64> = samples.response_times_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let average = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };
        let median = percentile(&sorted, 50.0);
        let p95 = percentile(&sorted, 95.0);

        let lookups = samples.cache_hits + samples.cache_misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            samples.cache_hits as f64 / lookups as f64
        };

        PerformanceReport {
            total_queries: samples.total_queries,
            average_response_ms: average,
            median_response_ms: median,
            p95_response_ms: p95,
            cache_hit_rate: hit_rate,
            complexity_distribution: samples.complexity_distribution.clone(),
            current_preset: state.current_preset.clone(),
            current_model: state.current_model.clone(),
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelTiers;

    fn settings() -> OptimizationSettings {
        let mut presets = HashMap::new();
        presets.insert(
            "speed".to_string(),
            PresetConfig {
                model: "tiny".to_string(),
                cache_enabled: true,
            },
        );
        presets.insert(
            "balanced".to_string(),
            PresetConfig {
                model: "medium".to_string(),
                cache_enabled: true,
            },
        );
        presets.insert(
            "quality".to_string(),
            PresetConfig {
                model: "large".to_string(),
                cache_enabled: false,
            },
        );
        OptimizationSettings {
            auto_optimization: true,
            default_preset: "balanced".to_string(),
            models: ModelTiers {
                fast: Some("tiny".to_string()),
                balanced: Some("medium".to_string()),
                accurate: Some("large".to_string()),
            },
            presets,
        }
    }

    fn service() -> OptimizationService {
        OptimizationService::new(settings()).unwrap()
    }

    #[tokio::test]
    async fn test_simple_command_scores_minimum() {
        let service = service();
        let analysis = service.analyze_complexity("click start").await;
        assert_eq!(analysis.complexity_score, 1);
        assert!(analysis.simple_pattern);
        assert_eq!(analysis.recommended_model.as_deref(), Some("tiny"));
    }

    #[tokio::test]
    async fn test_long_complex_question_caps_at_six() {
        let service = service();
        let analysis = service
            .analyze_complexity(
                "please analyze the quarterly sales figures and then explain why the totals differ from last year",
            )
            .await;
        // 1 + 2 (words) + 1 (keyword) + 1 (question) + 1 (conjunction) = 6
        assert_eq!(analysis.complexity_score, 6);
        assert!(analysis.complex_keyword);
        assert!(analysis.question);
        assert!(analysis.multi_requirement);
        assert_eq!(analysis.recommended_model.as_deref(), Some("large"));
    }

    #[tokio::test]
    async fn test_medium_query_scores_balanced_band() {
        let service = service();
        let analysis = service
            .analyze_complexity("compare the two open windows on screen")
            .await;
        // 1 + 1 (7 words) + 1 (keyword) = 3
        assert_eq!(analysis.complexity_score, 3);
        assert_eq!(analysis.recommended_model.as_deref(), Some("medium"));
    }

    #[test]
    fn test_model_fallback_chain() {
        let mut cfg = settings();
        cfg.models.accurate = None;
        let service = OptimizationService::new(cfg).unwrap();
        // Accurate tier missing falls back to balanced
        assert_eq!(service.select_model(6).as_deref(), Some("medium"));

        let mut cfg = settings();
        cfg.models.fast = None;
        cfg.models.balanced = None;
        cfg.models.accurate = None;
        let service = OptimizationService::new(cfg).unwrap();
        assert_eq!(service.select_model(1), None);
    }

    #[tokio::test]
    async fn test_apply_preset_atomic_and_idempotent() {
        let service = service();

        let state = service.apply_preset("quality").await.unwrap();
        assert_eq!(state.current_preset, "quality");
        assert_eq!(state.current_model.as_deref(), Some("large"));
        assert!(!state.cache_enabled);

        // Applying the same preset again changes nothing
        let again = service.apply_preset("quality").await.unwrap();
        assert_eq!(again.current_preset, "quality");
        assert_eq!(again.current_model.as_deref(), Some("large"));
    }

    #[tokio::test]
    async fn test_unknown_preset_leaves_state_untouched() {
        let service = service();
        let before = service.state().await;

        let err = service.apply_preset("turbo").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        let after = service.state().await;
        assert_eq!(after.current_preset, before.current_preset);
        assert_eq!(after.current_model, before.current_model);
    }

    #[tokio::test]
    async fn test_performance_report_is_derived() {
        let service = service();
        for ms in [10.0, 20.0, 30.0, 40.0] {
            service.record_response_time(ms).await;
        }
        service.record_cache_hit().await;
        service.record_cache_hit().await;
        service.record_cache_miss().await;

        let report = service.performance_report().await;
        assert_eq!(report.average_response_ms, 25.0);
        assert!((report.cache_hit_rate - 2.0 / 3.0).abs() < 1e-9);

        // Reporting twice yields the same numbers
        let again = service.performance_report().await;
        assert_eq!(again.average_response_ms, 25.0);
    }

    #[tokio::test]
    async fn test_response_time_ring_is_bounded() {
        let service = service();
        for i in 0..(METRICS_SAMPLE_LIMIT + 50) {
            service.record_response_time(i as f64).await;
        }
        let samples = service.samples.lock().await;
        assert_eq!(samples.response_times_ms.len(), METRICS_SAMPLE_LIMIT);
        assert_eq!(samples.response_times_ms.front(), Some(&50.0));
    }

    #[tokio::test]
    async fn test_complexity_distribution_accumulates() {
        let service = service();
        service.analyze_complexity("click start").await;
        service.analyze_complexity("open settings").await;

        let report = service.performance_report().await;
        assert_eq!(report.total_queries, 2);
        assert_eq!(report.complexity_distribution.get(&1), Some(&2));
    }
}
