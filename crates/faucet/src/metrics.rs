//! Prometheus metrics for the claim engine

use prometheus::{
    histogram_opts, opts, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct FaucetMetrics {
    registry: Registry,
    pub claims_total: IntCounter,
    /// Rejections before any mutation, by reason
    pub claims_rejected_total: IntCounterVec,
    /// Failures after the lock was taken, by stage
    pub claim_failures_total: IntCounterVec,
    pub lock_wait_seconds: Histogram,
    pub claim_duration_seconds: Histogram,
    pub distributed_total: Gauge,
}

impl FaucetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let claims_total = IntCounter::with_opts(opts!(
            "faucet_claims_total",
            "Successful claims"
        ))?;
        let claims_rejected_total = IntCounterVec::new(
            opts!("faucet_claims_rejected_total", "Claims rejected without side effects"),
            &["reason"],
        )?;
        let claim_failures_total = IntCounterVec::new(
            opts!("faucet_claim_failures_total", "Claims that failed inside the critical section"),
            &["stage"],
        )?;
        let lock_wait_seconds = Histogram::with_opts(histogram_opts!(
            "faucet_lock_wait_seconds",
            "Time spent waiting for the claim lock"
        ))?;
        let claim_duration_seconds = Histogram::with_opts(histogram_opts!(
            "faucet_claim_duration_seconds",
            "End-to-end claim latency"
        ))?;
        let distributed_total = Gauge::with_opts(opts!(
            "faucet_distributed_total",
            "Lifetime amount distributed, fees included"
        ))?;

        registry.register(Box::new(claims_total.clone()))?;
        registry.register(Box::new(claims_rejected_total.clone()))?;
        registry.register(Box::new(claim_failures_total.clone()))?;
        registry.register(Box::new(lock_wait_seconds.clone()))?;
        registry.register(Box::new(claim_duration_seconds.clone()))?;
        registry.register(Box::new(distributed_total.clone()))?;

        Ok(Self {
            registry,
            claims_total,
            claims_rejected_total,
            claim_failures_total,
            lock_wait_seconds,
            claim_duration_seconds,
            distributed_total,
        })
    }

    /// Text exposition format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
