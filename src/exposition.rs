//! Prometheus text exposition encoding for a batch of observations.
//!
//! VictoriaMetrics' import endpoint accepts the plain text format with an
//! optional trailing timestamp in milliseconds, which is how samples keep
//! their run-derived timestamps instead of the ingestion time.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::observation::{MetricKind, Observation};

/// Encodes a batch into exposition text, one `# HELP`/`# TYPE` block per
/// family, samples carrying millisecond timestamps. Families and labels
/// are emitted in sorted order so identical batches encode identically.
pub fn encode(observations: &[Observation]) -> String {
    let mut by_family: BTreeMap<MetricKind, Vec<&Observation>> = BTreeMap::new();
    for obs in observations {
        by_family.entry(obs.kind).or_default().push(obs);
    }

    let mut out = String::new();
    for (kind, samples) in by_family {
        let _ = writeln!(out, "# HELP {} {}", kind.as_str(), kind.help());
        let _ = writeln!(out, "# TYPE {} gauge", kind.as_str());
        for obs in samples {
            let _ = write!(out, "{}", kind.as_str());
            if !obs.labels.is_empty() {
                let _ = write!(out, "{{");
                for (i, (key, value)) in obs.labels.iter().enumerate() {
                    if i > 0 {
                        let _ = write!(out, ",");
                    }
                    let _ = write!(out, "{key}=\"{}\"", escape_label_value(value));
                }
                let _ = write!(out, "}}");
            }
            let _ = writeln!(out, " {} {}", obs.value, obs.timestamp_ms);
        }
    }
    out
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}
