//! In-process metrics, rendered in Prometheus text format on `/metrics`.
//!
//! Vectors are keyed by sorted label pairs in a `DashMap` and updated with
//! relaxed atomics, so recording never takes a lock the packet path waits on.

pub mod metrics;

pub use metrics::{BackendMetrics, CounterVec, GaugeVec, HistogramVec};
