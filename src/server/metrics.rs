//! Counters kept by the engine.

use std::collections::HashSet;
use std::sync::Mutex;
use crate::api::ca::CaId;
use crate::commons::metrics::{Counter, LabeledCounters, Metric, Target};


//------------ EngineMetrics -------------------------------------------------

/// All counters and gauges of the engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Handler invocations by handler name and outcome.
    handler_calls: LabeledCounters<2>,

    /// Outcomes of the concurrent modification check.
    concurrent_modification: LabeledCounters<1>,

    command_retries: Counter,
    invariant_violations: Counter,

    /// CAs that keep resources only because their children still hold
    /// them.
    overclaiming: Mutex<HashSet<CaId>>,
}

impl EngineMetrics {
    pub fn handler_call(&self, handler: &'static str, status: &'static str) {
        self.handler_calls.inc([handler, status])
    }

    pub fn handler_calls(
        &self, handler: &'static str, status: &'static str
    ) -> u64 {
        self.handler_calls.get([handler, status])
    }

    pub fn concurrent_modification(&self, status: &'static str) {
        self.concurrent_modification.inc([status])
    }

    pub fn concurrent_modifications(&self, status: &'static str) -> u64 {
        self.concurrent_modification.get([status])
    }

    pub fn command_retry(&self) {
        self.command_retries.inc()
    }

    pub fn command_retries(&self) -> u64 {
        self.command_retries.get()
    }

    pub fn invariant_violation(&self) {
        self.invariant_violations.inc()
    }

    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.get()
    }

    pub fn set_overclaiming(&self, ca: CaId, overclaiming: bool) {
        let mut cas = self.overclaiming.lock().expect("poisoned lock");
        if overclaiming {
            cas.insert(ca);
        }
        else {
            cas.remove(&ca);
        }
    }

    pub fn overclaiming_cas(&self) -> usize {
        self.overclaiming.lock().expect("poisoned lock").len()
    }

    /// Writes all metrics in Prometheus format.
    pub fn write(&self, target: &mut Target) {
        self.handler_calls.write(
            target,
            Metric::counter(
                "commandhandler_call",
                "Number of command handler invocations by outcome."
            ),
            ["handler", "status"]
        );
        self.concurrent_modification.write(
            target,
            Metric::counter(
                "concurrent_modification",
                "Outcomes of the concurrent modification check."
            ),
            ["status"]
        );
        target.single(
            Metric::counter(
                "command_transaction_retries",
                "Number of commands retried after a serialization failure."
            ),
            self.command_retries()
        );
        target.single(
            Metric::counter(
                "invariant_violations",
                "Number of CA invariant violations detected."
            ),
            self.invariant_violations()
        );
        target.single(
            Metric::gauge(
                "overclaiming_cas",
                "Number of CAs keeping resources still held by children."
            ),
            self.overclaiming_cas()
        );
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_metrics() {
        let metrics = EngineMetrics::default();
        metrics.handler_call("LockHandler", "success");
        metrics.concurrent_modification("passed");
        metrics.set_overclaiming(CaId::new(4), true);
        metrics.set_overclaiming(CaId::new(5), true);
        metrics.set_overclaiming(CaId::new(5), false);

        let mut target = Target::default();
        metrics.write(&mut target);
        let text = target.into_string();
        assert!(text.contains(
            "rpkica_commandhandler_call{handler=\"LockHandler\", \
             status=\"success\"} 1"
        ));
        assert!(text.contains("rpkica_concurrent_modification{status=\"passed\"} 1"));
        assert!(text.contains("rpkica_overclaiming_cas 1"));
        assert!(text.contains("rpkica_command_transaction_retries 0"));
    }
}
