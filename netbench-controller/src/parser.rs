//! iperf3 output -> throughput in Mbps.
//!
//! JSON (`-J`) output is preferred; plain text is scanned as a fallback.
//! Output nothing can be read from yields 0.0, which is a valid value and
//! not an error.

use serde_json::Value;

const SUMMARY_KEYS: [&str; 3] = ["sum_received", "sum_sent", "sum"];
const STREAM_SIDES: [&str; 4] = ["receiver", "recv", "sender", "send"];

pub fn parse_throughput(raw: &str) -> f64 {
    if raw.trim().is_empty() {
        return 0.0;
    }
    let mbps = match serde_json::from_str::<Value>(raw) {
        Ok(json) => parse_json(&json),
        Err(_) => parse_text(raw),
    };
    mbps.map(round3).unwrap_or(0.0)
}

fn parse_json(json: &Value) -> Option<f64> {
    let end = json.get("end")?;

    let summaries = SUMMARY_KEYS.iter().filter_map(|key| end.get(*key));
    let streams = end
        .get("streams")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .flat_map(|stream| STREAM_SIDES.iter().filter_map(move |side| stream.get(*side)));

    summaries
        .chain(streams)
        .filter(|section| section.is_object())
        .find_map(|section| section.get("bits_per_second").and_then(bits_to_mbps))
}

fn bits_to_mbps(value: &Value) -> Option<f64> {
    let bps = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    bps.is_finite().then(|| bps / 1_000_000.0)
}

/// `[  5]   0.00-10.00  sec  5.82 GBytes  5.00 Gbits/sec    0   sender`
fn parse_text(raw: &str) -> Option<f64> {
    raw.lines()
        .filter(|line| line.contains("bits/sec") && (line.contains("sender") || line.contains("receiver")))
        .find_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            tokens.iter().enumerate().skip(1).find_map(|(i, unit)| {
                let scale = unit_scale(unit)?;
                let value: f64 = tokens[i - 1].parse().ok()?;
                Some(value * scale)
            })
        })
}

fn unit_scale(token: &str) -> Option<f64> {
    if !token.contains("bits/sec") {
        return None;
    }
    if token.contains("Gbits") {
        Some(1000.0)
    } else if token.contains("Mbits") {
        Some(1.0)
    } else if token.contains("Kbits") {
        Some(0.001)
    } else {
        None
    }
}

fn round3(mbps: f64) -> f64 {
    ((mbps * 1000.0).round() / 1000.0).max(0.0)
}
