use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::adapters::message_router::RouterMetrics;
use crate::adapters::cache_service::CacheStats;

/// Prometheus registry fed by the periodic sync task in the server wiring.
/// Router and cache keep their own counters; this collector mirrors them as
/// deltas so scrapes see cumulative values.
pub struct MetricsCollector {
    registry: Registry,

    pub messages_total: CounterVec,
    pub connections_active: Gauge,
    pub sessions_active: Gauge,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub circuit_open: GaugeVec,

    last_router: std::sync::Mutex<RouterSnapshot>,
    last_cache: std::sync::Mutex<CacheSnapshot>,
}

#[derive(Default)]
struct RouterSnapshot {
    successful: u64,
    failed: u64,
    validation_errors: u64,
    unknown_message_types: u64,
}

#[derive(Default)]
struct CacheSnapshot {
    hits: u64,
    misses: u64,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_total = CounterVec::new(
            Opts::new("iris_messages_total", "Total client messages routed"),
            &["outcome"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let connections_active = Gauge::new(
            "iris_connections_active",
            "Number of currently connected clients",
        )?;
        registry.register(Box::new(connections_active.clone()))?;

        let sessions_active = Gauge::new("iris_sessions_active", "Number of live user sessions")?;
        registry.register(Box::new(sessions_active.clone()))?;

        let cache_hits = Counter::new("iris_cache_hits_total", "Total cache hits")?;
        registry.register(Box::new(cache_hits.clone()))?;

        let cache_misses = Counter::new("iris_cache_misses_total", "Total cache misses")?;
        registry.register(Box::new(cache_misses.clone()))?;

        let circuit_open = GaugeVec::new(
            Opts::new(
                "iris_circuit_open",
                "1 while the tool server's circuit breaker is open",
            ),
            &["server"],
        )?;
        registry.register(Box::new(circuit_open.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            connections_active,
            sessions_active,
            cache_hits,
            cache_misses,
            circuit_open,
            last_router: std::sync::Mutex::new(RouterSnapshot::default()),
            last_cache: std::sync::Mutex::new(CacheSnapshot::default()),
        })
    }

    /// Fold the router's cumulative counters in as deltas
    pub fn sync_router(&self, metrics: &RouterMetrics) {
        let mut last = match self.last_router.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let fold = |outcome: &str, current: u64, prior: &mut u64| {
            let delta = current.saturating_sub(*prior);
            if delta > 0 {
                self.messages_total
                    .with_label_values(&[outcome])
                    .inc_by(delta as f64);
            }
            *prior = current;
        };
        fold("success", metrics.successful, &mut last.successful);
        fold("failed", metrics.failed, &mut last.failed);
        fold(
            "validation_error",
            metrics.validation_errors,
            &mut last.validation_errors,
        );
        fold(
            "unknown_type",
            metrics.unknown_message_types,
            &mut last.unknown_message_types,
        );
    }

    pub fn sync_cache(&self, stats: &CacheStats) {
        let mut last = match self.last_cache.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let hits = stats.screen_hits + stats.response_hits;
        let misses = stats.screen_misses + stats.response_misses;
        self.cache_hits.inc_by(hits.saturating_sub(last.hits) as f64);
        self.cache_misses
            .inc_by(misses.saturating_sub(last.misses) as f64);
        last.hits = hits;
        last.misses = misses;
    }

    pub fn set_circuit_open(&self, server: &str, open: bool) {
        self.circuit_open
            .with_label_values(&[server])
            .set(if open { 1.0 } else { 0.0 });
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsHandler {
    collector: Arc<MetricsCollector>,
}

impl MetricsHandler {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub async fn metrics(&self) -> String {
        self.collector.encode().unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            String::from("# Error encoding metrics\n")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        assert!(collector.is_ok());
    }

    #[test]
    fn test_router_sync_is_delta_based() {
        let collector = MetricsCollector::new().unwrap();

        let mut metrics = RouterMetrics::default();
        metrics.successful = 3;
        collector.sync_router(&metrics);
        // A second sync with unchanged counters adds nothing
        collector.sync_router(&metrics);

        let success = collector
            .messages_total
            .with_label_values(&["success"])
            .get();
        assert_eq!(success, 3.0);
    }

    #[test]
    fn test_cache_sync_combines_both_caches() {
        let collector = MetricsCollector::new().unwrap();

        let stats = CacheStats {
            screen_hits: 2,
            screen_misses: 1,
            response_hits: 3,
            response_misses: 4,
        };
        collector.sync_cache(&stats);

        assert_eq!(collector.cache_hits.get(), 5.0);
        assert_eq!(collector.cache_misses.get(), 5.0);
    }

    #[test]
    fn test_metrics_encoding() {
        let collector = MetricsCollector::new().unwrap();
        collector.set_circuit_open("llm_agent", true);

        let metrics_text = collector.encode().unwrap();
        assert!(metrics_text.contains("iris_circuit_open"));
        assert!(metrics_text.contains("iris_messages_total") || !metrics_text.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let handler = MetricsHandler::new(collector.clone());

        collector.connections_active.set(2.0);

        let metrics = handler.metrics().await;
        assert!(metrics.contains("iris_connections_active"));
    }
}
