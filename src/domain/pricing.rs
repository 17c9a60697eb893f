//! Weighted pricing helpers
//!
//! Prices are a weighted mean of vendor observations. Strategy names are a
//! closed registry; only `weighted` exists today.

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Price aggregation strategies that may be queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Weighted,
}

impl Strategy {
    pub const ALL: [Strategy; 1] = [Strategy::Weighted];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "weighted" => Some(Strategy::Weighted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Weighted => "weighted",
        }
    }
}

/// Recency multiplier for an observation taken at `observed_at`.
///
/// Halves every `half_life_days`; a non-positive half-life disables decay.
/// Observations from the future count as fresh.
pub fn decay(observed_at: f64, now: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let age_days = (now - observed_at).max(0.0) / SECONDS_PER_DAY;
    0.5f64.powf(age_days / half_life_days)
}

/// Parses `vendor=weight,vendor=weight`.
///
/// Later entries for the same vendor are kept alongside earlier ones; the
/// rules take the maximum.
pub fn parse_vendor_weights(text: &str) -> Result<Vec<(String, f64)>, String> {
    let mut weights = Vec::new();
    for entry in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (vendor, weight) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected vendor=weight, got '{}'", entry))?;
        let vendor = vendor.trim();
        if vendor.is_empty() {
            return Err(format!("missing vendor name in '{}'", entry));
        }
        let weight: f64 = weight
            .trim()
            .parse()
            .map_err(|_| format!("invalid weight in '{}'", entry))?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(format!("weight must be a non-negative number in '{}'", entry));
        }
        weights.push((vendor.to_string(), weight));
    }
    Ok(weights)
}
