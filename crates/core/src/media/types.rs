//! Types for the media tool module.

use serde::{Deserialize, Serialize};

use super::error::MediaToolError;

/// Stream geometry and duration reported by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

impl ProbeInfo {
    /// Parses prober stdout.
    ///
    /// The output must be exactly three non-empty lines, in order: width
    /// (integer), height (integer), duration (float seconds). Anything else
    /// is rejected.
    pub fn parse(stdout: &str) -> Result<Self, MediaToolError> {
        let lines: Vec<&str> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if lines.len() != 3 {
            return Err(MediaToolError::parse(format!(
                "expected 3 lines (width, height, duration), got {}",
                lines.len()
            )));
        }

        let width = lines[0]
            .parse::<u32>()
            .map_err(|_| MediaToolError::parse(format!("invalid width: {:?}", lines[0])))?;
        let height = lines[1]
            .parse::<u32>()
            .map_err(|_| MediaToolError::parse(format!("invalid height: {:?}", lines[1])))?;
        let duration_secs = lines[2]
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| MediaToolError::parse(format!("invalid duration: {:?}", lines[2])))?;

        Ok(Self {
            width,
            height,
            duration_secs,
        })
    }
}

/// Evenly spaced sample timestamps: `duration / (count + 1) * i` for `i = 1..=count`.
pub fn sample_timestamps(duration_secs: f64, count: usize) -> Vec<f64> {
    if count == 0 || duration_secs.is_nan() || duration_secs <= 0.0 {
        return Vec::new();
    }
    let step = duration_secs / (count as f64 + 1.0);
    (1..=count).map(|i| step * i as f64).collect()
}

/// Seconds formatted with three decimal places, as passed to `-ss`.
pub fn format_timestamp(secs: f64) -> String {
    format!("{:.3}", secs)
}
