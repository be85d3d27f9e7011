//! Building Prometheus metrics.

use std::fmt;
use std::fmt::Write;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};


/// The prefix of all metrics names.
const PREFIX: &str = "rpkica";


//------------ Target --------------------------------------------------------

/// A buffer collecting metrics in the Prometheus text format.
#[derive(Clone, Debug, Default)]
pub struct Target {
    buf: String,
}

impl Target {
    pub fn into_string(self) -> String {
        self.buf
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn single(&mut self, metric: Metric, value: impl fmt::Display) {
        metric.header(self);
        metric.single(self, value);
    }

    pub fn header(&mut self, metric: Metric) {
        metric.header(self)
    }

    pub fn multi(&mut self, metric: Metric) -> LabelValue {
        metric.multi(self)
    }
}


//------------ Metric --------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct Metric {
    name: &'static str,
    help: &'static str,
    mtype: MetricType,
}

impl Metric {
    pub fn new(
        name: &'static str, help: &'static str, mtype: MetricType
    ) -> Self {
        Metric { name, help, mtype }
    }

    pub fn counter(name: &'static str, help: &'static str) -> Self {
        Self::new(name, help, MetricType::Counter)
    }

    pub fn gauge(name: &'static str, help: &'static str) -> Self {
        Self::new(name, help, MetricType::Gauge)
    }

    fn header(self, target: &mut Target) {
        writeln!(&mut target.buf,
            "# HELP {PREFIX}_{} {}\n\
             # TYPE {PREFIX}_{} {}",
            self.name, self.help, self.name, self.mtype,
        ).expect("writing to string");
    }

    fn single(self, target: &mut Target, value: impl fmt::Display) {
        writeln!(&mut target.buf,
            "{PREFIX}_{} {}", self.name, value
        ).expect("writing to string");
    }

    fn multi(self, target: &mut Target) -> LabelValue {
        LabelValue::new(self, target)
    }
}


//------------ LabelValue ----------------------------------------------------

pub struct LabelValue<'a> {
    target: &'a mut Target,
    first: bool,
}

impl<'a> LabelValue<'a> {
    fn new(metric: Metric, target: &'a mut Target) -> Self {
        write!(
            &mut target.buf, "{PREFIX}_{}{{", metric.name
        ).expect("writing to string");
        LabelValue { target, first: true }
    }

    pub fn label(mut self, name: &str, value: impl fmt::Display) -> Self {
        if self.first {
            self.first = false;
        }
        else {
            self.target.buf.push_str(", ");
        }
        write!(
            &mut self.target.buf, "{}=\"{}\"", name, value
        ).expect("writing to string");
        self
    }

    pub fn value(self, value: impl fmt::Display) {
        writeln!(
            &mut self.target.buf, "}} {}", value
        ).expect("writing to string");
    }
}


//------------ MetricType ----------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub enum MetricType {
    Counter,
    Gauge,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(
            match *self {
                MetricType::Counter => "counter",
                MetricType::Gauge => "gauge",
            }
        )
    }
}


//------------ Counter -------------------------------------------------------

/// A monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}


//------------ LabeledCounters -----------------------------------------------

/// Counters keyed by a set of label values.
///
/// The label values are kept in the order they are given in. Rendering
/// sorts them.
#[derive(Debug, Default)]
pub struct LabeledCounters<const N: usize> {
    counters: Mutex<HashMap<[&'static str; N], u64>>,
}

impl<const N: usize> LabeledCounters<N> {
    pub fn inc(&self, labels: [&'static str; N]) {
        *self.counters.lock().expect("poisoned lock").entry(
            labels
        ).or_default() += 1;
    }

    pub fn get(&self, labels: [&'static str; N]) -> u64 {
        self.counters.lock().expect("poisoned lock").get(
            &labels
        ).copied().unwrap_or(0)
    }

    /// Writes all counters with the given label names.
    pub fn write(
        &self, target: &mut Target, metric: Metric, names: [&str; N]
    ) {
        let mut values: Vec<_> = self.counters.lock().expect(
            "poisoned lock"
        ).iter().map(|(labels, count)| (*labels, *count)).collect();
        values.sort();

        target.header(metric);
        for (labels, count) in values {
            let mut line = target.multi(metric);
            for (name, value) in names.iter().zip(labels.iter()) {
                line = line.label(name, value);
            }
            line.value(count);
        }
    }
}


//============ Tests =========================================================
