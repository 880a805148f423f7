//! Prometheus text exposition format.
//!
//! Low-level writers shared by [`MetricsRegistry::render`](crate::MetricsRegistry::render).
//! Label order is the order the caller passes, so output is deterministic.

use std::fmt::Write;

use crate::histogram::Histogram;

/// Every family name starts with this.
pub const PREFIX: &str = "posproctor_";

/// Content type served for the text format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Escape a label value: backslash, double quote and newline.
pub fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn escape_help(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Write the `# HELP` and `# TYPE` lines for a family.
pub fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {PREFIX}{name} {}", escape_help(help));
    let _ = writeln!(out, "# TYPE {PREFIX}{name} {kind}");
}

fn labels(out: &mut String, pairs: &[(&str, &str)]) {
    if pairs.is_empty() {
        return;
    }
    out.push('{');
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{k}=\"{}\"", escape_label_value(v));
    }
    out.push('}');
}

/// Write one sample line.
pub fn sample(out: &mut String, name: &str, pairs: &[(&str, &str)], value: impl std::fmt::Display) {
    out.push_str(PREFIX);
    out.push_str(name);
    labels(out, pairs);
    let _ = writeln!(out, " {value}");
}

/// Write the `_bucket`, `_sum` and `_count` lines of one histogram series.
pub fn histogram(out: &mut String, name: &str, pairs: &[(&str, &str)], h: &Histogram) {
    let bucket = format!("{name}_bucket");
    for (bound, count) in h.cumulative() {
        let le = match bound {
            Some(b) => b.to_string(),
            None => "+Inf".to_string(),
        };
        let mut with_le = pairs.to_vec();
        with_le.push(("le", le.as_str()));
        sample(out, &bucket, &with_le, count);
    }
    sample(out, &format!("{name}_sum"), pairs, h.sum());
    sample(out, &format!("{name}_count"), pairs, h.count());
}
