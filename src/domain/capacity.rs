//! Capacity strings in the Kubernetes quantity notation
//!
//! Binary suffixes (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`) are powers of 1024,
//! decimal suffixes (`k`, `M`, `G`, `T`, `P`, `E`) powers of 1000.

use crate::error::{Error, Result};

/// Parse a capacity string (e.g. "100Gi", "1T", "512") to bytes
pub fn parse_capacity(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidParameters("empty capacity string".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::InvalidParameters(format!("invalid capacity number: {:?}", s)))?;

    let multiplier: f64 = match unit_str {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        _ => {
            return Err(Error::InvalidParameters(format!(
                "unknown capacity unit: {:?}",
                unit_str
            )))
        }
    };

    let bytes = (num * multiplier).ceil();
    if bytes > i64::MAX as f64 {
        return Err(Error::InvalidParameters(format!("capacity {} overflows", s)));
    }
    Ok(bytes as i64)
}
