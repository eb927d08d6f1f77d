//! In-process metrics, rendered in Prometheus text format on demand.

pub mod metrics;

pub use metrics::{AgentMetrics, CounterVec};
