// In-process counters for the realtime command surface.
//
// One stats record per ws operation (rate, errors, latency sum/count),
// rendered in the Prometheus text format by the /metrics endpoint.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, OnceLock},
};

#[derive(Default, Clone, Copy)]
struct OperationStats {
    handled: u64,
    errors: u64,
    latency_sum_ms: u64,
    latency_count: u64,
}

#[derive(Default)]
pub struct RealtimeMetrics {
    operations: Mutex<BTreeMap<String, OperationStats>>,
}

static GLOBAL_METRICS: OnceLock<Arc<RealtimeMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<RealtimeMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<RealtimeMetrics>> {
    GLOBAL_METRICS.get()
}

/// Record one handled ws operation against the global registry, if one
/// has been installed.
pub fn record_ws_request(operation: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_request(operation, is_error, latency_ms);
    }
}

impl RealtimeMetrics {
    pub fn record_ws_request(&self, operation: &str, is_error: bool, latency_ms: u64) {
        let mut operations = self.operations.lock().expect("metrics mutex poisoned");
        let stats = operations.entry(operation.to_owned()).or_default();
        stats.handled += 1;
        stats.latency_sum_ms += latency_ms;
        stats.latency_count += 1;
        if is_error {
            stats.errors += 1;
        }
    }

    pub fn render_prometheus(&self) -> String {
        let operations = self.operations.lock().expect("metrics mutex poisoned").clone();
        let mut output = String::new();

        render_counter(&mut output, &operations, |s| s.handled, RATE_HEADER);
        render_counter(&mut output, &operations, |s| s.errors, ERRORS_HEADER);
        render_counter(&mut output, &operations, |s| s.latency_sum_ms, DURATION_SUM_HEADER);
        render_counter(&mut output, &operations, |s| s.latency_count, DURATION_COUNT_HEADER);

        output
    }
}

struct CounterHeader {
    name: &'static str,
    help: &'static str,
}

const RATE_HEADER: CounterHeader = CounterHeader {
    name: "waypoint_ws_rate_total",
    help: "Total websocket messages by operation.",
};
const ERRORS_HEADER: CounterHeader = CounterHeader {
    name: "waypoint_ws_errors_total",
    help: "Total websocket message errors by operation.",
};
const DURATION_SUM_HEADER: CounterHeader = CounterHeader {
    name: "waypoint_ws_duration_ms_sum",
    help: "Sum of websocket message latency in milliseconds by operation.",
};
const DURATION_COUNT_HEADER: CounterHeader = CounterHeader {
    name: "waypoint_ws_duration_ms_count",
    help: "Count of websocket latency samples by operation.",
};

fn render_counter(
    output: &mut String,
    operations: &BTreeMap<String, OperationStats>,
    value_of: impl Fn(&OperationStats) -> u64,
    header: CounterHeader,
) {
    output.push_str(&format!("# HELP {} {}\n", header.name, header.help));
    output.push_str(&format!("# TYPE {} counter\n", header.name));
    for (operation, stats) in operations {
        output.push_str(&format!(
            "{}{{operation=\"{operation}\"}} {}\n",
            header.name,
            value_of(stats)
        ));
    }
}
