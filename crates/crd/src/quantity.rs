//! Kubernetes quantity parsing
//!
//! Converts the textual quantities found in tenant limit ranges into plain
//! numbers: CPU-like resources as counts of elements (`500m` is `0.5`) and
//! memory-like resources as bytes (`1Gi` is `1073741824`).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a resource quantity is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceUnit {
    /// Countable units such as CPU cores or GPUs.
    Element,
    /// Sizes in bytes.
    Byte,
}

impl fmt::Display for ResourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element => f.write_str("element"),
            Self::Byte => f.write_str("byte"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("invalid {unit} quantity \"{raw}\"")]
    Invalid { raw: String, unit: ResourceUnit },
}

/// Parse a quantity string into a number of elements or bytes.
///
/// Empty input parses to zero. Surrounding whitespace is ignored.
pub fn parse_quantity(raw: &str, unit: ResourceUnit) -> Result<f64, QuantityError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(0.0);
    }
    match unit {
        ResourceUnit::Element => parse_elements(value),
        ResourceUnit::Byte => parse_bytes(value).map(|bytes| bytes as f64),
    }
}

fn parse_elements(value: &str) -> Result<f64, QuantityError> {
    let invalid = || QuantityError::Invalid {
        raw: value.to_string(),
        unit: ResourceUnit::Element,
    };
    if let Some(millis) = value.strip_suffix('m') {
        let m: i64 = millis.parse().map_err(|_| invalid())?;
        Ok(m as f64 / 1000.0)
    } else {
        let n: i64 = value.parse().map_err(|_| invalid())?;
        Ok(n as f64)
    }
}

/// Byte quantities are integral. A milli suffix divides by 1000 and
/// truncates toward zero.
fn parse_bytes(value: &str) -> Result<i128, QuantityError> {
    let invalid = || QuantityError::Invalid {
        raw: value.to_string(),
        unit: ResourceUnit::Byte,
    };

    if let Some(millis) = value.strip_suffix('m') {
        let m: i64 = millis.parse().map_err(|_| invalid())?;
        return Ok(i128::from(m / 1000));
    }

    let (base, rest): (i128, &str) = match value.strip_suffix('i') {
        Some(rest) => (1024, rest),
        None => (1000, value),
    };
    let (digits, exponent) = match rest.chars().last().and_then(binary_exponent) {
        Some(exponent) => (&rest[..rest.len() - 1], exponent),
        None => (rest, 0),
    };

    // i64 times 1024^6 stays well inside i128
    let n: i64 = digits.parse().map_err(|_| invalid())?;
    Ok(i128::from(n) * base.pow(exponent))
}

const fn binary_exponent(suffix: char) -> Option<u32> {
    match suffix {
        'k' | 'K' => Some(1),
        'M' => Some(2),
        'G' => Some(3),
        'T' => Some(4),
        'P' => Some(5),
        'E' => Some(6),
        _ => None,
    }
}
