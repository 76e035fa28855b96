//! Byte humanization and wire-timestamp formatting shared by the transcript writer.

use prost_types::Timestamp;

const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];

/// Format a byte count the way the Docker CLI renders BuildKit layer progress:
/// decimal (1000-based) units, one decimal place once we've stepped past plain bytes.
pub fn humanize_bytes(n: i64) -> String {
    let n = n.max(0) as f64;
    if n < 1000.0 {
        return format!("{} B", n as u64);
    }

    let mut value = n;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Format the elapsed time between a vertex's observed start and a later wire
/// timestamp as `S.mmm` (seconds, milliseconds zero-padded to 3 digits).
///
/// Clock skew that would produce a negative delta is clamped to `0.000`.
pub fn format_elapsed(start: &Timestamp, at: &Timestamp) -> String {
    let mut secs = at.seconds - start.seconds;
    let mut nanos = at.nanos as i64 - start.nanos as i64;
    if nanos < 0 {
        secs -= 1;
        nanos += 1_000_000_000;
    }
    if secs < 0 {
        return "0.000".to_string();
    }
    let millis = nanos / 1_000_000;
    format!("{secs}.{millis:03}")
}
