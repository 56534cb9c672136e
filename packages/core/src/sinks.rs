// ABOUTME: Default fire-and-forget sinks for framework logs, metrics and events
// ABOUTME: Tracing-backed logger, in-memory metrics registry and a broadcast event bus

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::SinkError;
use crate::traits::{EventPublisher, FrameworkLogger, MetricsRecorder};
use crate::types::{CorrelationIds, Event, LogLevel};

/// Renders framework messages as tracing events
#[derive(Debug, Default, Clone)]
pub struct TracingFrameworkLogger;

impl FrameworkLogger for TracingFrameworkLogger {
    fn log_framework_message(
        &self,
        level: LogLevel,
        message: &str,
        component: &str,
        ids: &CorrelationIds,
        metadata: &Value,
    ) -> Result<(), SinkError> {
        let request_id = ids.request_id.as_deref().unwrap_or("-");
        let app_id = ids.app_id.as_deref().unwrap_or("-");
        let component_id = ids.component_id.as_deref().unwrap_or("-");
        let sandbox_id = ids.sandbox_id.as_deref().unwrap_or("-");

        match level {
            LogLevel::Debug => debug!(
                component,
                request_id,
                app_id,
                component_id,
                sandbox_id,
                %metadata,
                "{}",
                message
            ),
            LogLevel::Info => info!(
                component,
                request_id,
                app_id,
                component_id,
                sandbox_id,
                %metadata,
                "{}",
                message
            ),
            LogLevel::Warn => warn!(
                component,
                request_id,
                app_id,
                component_id,
                sandbox_id,
                %metadata,
                "{}",
                message
            ),
            LogLevel::Error => error!(
                component,
                request_id,
                app_id,
                component_id,
                sandbox_id,
                %metadata,
                "{}",
                message
            ),
        }
        Ok(())
    }
}

type SeriesKey = (String, Vec<(String, String)>);

fn series_key(name: &str, labels: &[(&str, &str)]) -> SeriesKey {
    let mut labels: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    (name.to_string(), labels)
}

/// Upper bounds, in seconds, of the fixed histogram buckets
pub const HISTOGRAM_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Fixed-size aggregate of a histogram series
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    /// Cumulative counts per `HISTOGRAM_BUCKETS` bound; values above the last bound only reach `count`
    pub buckets: [u64; HISTOGRAM_BUCKETS.len()],
}

impl HistogramSummary {
    fn new(value: f64) -> Self {
        let mut summary = Self {
            count: 0,
            sum: 0.0,
            min: value,
            max: value,
            buckets: [0; HISTOGRAM_BUCKETS.len()],
        };
        summary.record(value);
        summary
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        for (bucket, bound) in self.buckets.iter_mut().zip(HISTOGRAM_BUCKETS) {
            if value <= bound {
                *bucket += 1;
            }
        }
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }
}

/// Process-local metrics registry, queryable for tests and status endpoints
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<SeriesKey, u64>>,
    histograms: Mutex<HashMap<SeriesKey, HistogramSummary>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter series (0 if never incremented)
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .map(|c| c.get(&series_key(name, labels)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Sum of a counter across all label sets
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|((n, _), _)| n == name)
                    .map(|(_, v)| *v)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSummary> {
        self.histograms
            .lock()
            .ok()
            .and_then(|h| h.get(&series_key(name, labels)).cloned())
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), SinkError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| SinkError::Other("metrics registry poisoned".to_string()))?;
        *counters.entry(series_key(name, labels)).or_insert(0) += 1;
        Ok(())
    }

    fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), SinkError> {
        let mut histograms = self
            .histograms
            .lock()
            .map_err(|_| SinkError::Other("metrics registry poisoned".to_string()))?;
        histograms
            .entry(series_key(name, labels))
            .and_modify(|summary| summary.record(value))
            .or_insert_with(|| HistogramSummary::new(value));
        Ok(())
    }
}

/// In-process event bus; subscribers receive every event published after they subscribe
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventBus {
    async fn publish(&self, event: Event) -> Result<(), SinkError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| SinkError::NoSubscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_counter_labels_are_order_independent() {
        let metrics = InMemoryMetrics::new();
        metrics
            .increment_counter("router_requests_total", &[("app_id", "demo"), ("outcome", "success")])
            .unwrap();
        metrics
            .increment_counter("router_requests_total", &[("outcome", "success"), ("app_id", "demo")])
            .unwrap();

        assert_eq!(
            metrics.counter("router_requests_total", &[("app_id", "demo"), ("outcome", "success")]),
            2
        );
        assert_eq!(metrics.counter_total("router_requests_total"), 2);
        assert_eq!(metrics.counter_total("other"), 0);
    }

    #[test]
    fn test_histogram_observations() {
        let metrics = InMemoryMetrics::new();
        tokio_test::assert_ok!(metrics.observe_histogram("latency", 0.5, &[]));
        tokio_test::assert_ok!(metrics.observe_histogram("latency", 1.5, &[]));

        let summary = metrics.histogram("latency", &[]).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.sum, 2.0);
        assert_eq!(summary.min, 0.5);
        assert_eq!(summary.max, 1.5);
        assert_eq!(summary.mean(), 1.0);
        assert!(metrics.histogram("latency", &[("app_id", "demo")]).is_none());
    }

    #[test]
    fn test_histogram_series_stay_fixed_size() {
        let metrics = InMemoryMetrics::new();
        for i in 0..10_000 {
            metrics
                .observe_histogram("dispatch", (i % 100) as f64 / 10.0 + 0.001, &[])
                .unwrap();
        }
        tokio_test::assert_ok!(metrics.observe_histogram("dispatch", 60.0, &[]));

        let summary = metrics.histogram("dispatch", &[]).unwrap();
        assert_eq!(summary.count, 10_001);
        assert_eq!(summary.max, 60.0);
        assert_eq!(summary.buckets.len(), HISTOGRAM_BUCKETS.len());
        // 0.001 lands in every bucket; 60.0 lands in none
        assert_eq!(summary.buckets[0], 100);
        assert_eq!(summary.buckets[HISTOGRAM_BUCKETS.len() - 1], 10_000);
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = BroadcastEventBus::new(8);
        let event = Event {
            event_type: "greeted".to_string(),
            timestamp: Utc::now(),
            payload: json!({"name": "Ada"}),
        };

        assert_eq!(bus.publish(event.clone()).await, Err(SinkError::NoSubscribers));

        let mut rx = bus.subscribe();
        bus.publish(event.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_tracing_logger_never_fails() {
        let logger = TracingFrameworkLogger;
        let ids = CorrelationIds {
            request_id: Some("req-1".to_string()),
            ..Default::default()
        };
        assert!(logger
            .log_framework_message(LogLevel::Info, "hello", "router", &ids, &json!({}))
            .is_ok());
    }
}
