//! Pressure profile for simulation playback.
//!
//! A CSV file with a header row; one named column holds pressure in
//! pascal. Each row becomes one `SIMP` value, rounded to the nearest
//! integer.

use std::path::Path;

use crate::config::invalid;
use crate::error::Result;

/// Ordered pressure samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressureProfile {
    samples: Vec<i64>,
}

impl PressureProfile {
    /// Load `column` from the CSV file at `path`
    ///
    /// Rows whose cell is empty or not a number are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or has no such column.
    pub fn load<P: AsRef<Path>>(path: P, column: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;
        Self::read(&mut reader, column)
    }

    fn read<R: std::io::Read>(reader: &mut csv::Reader<R>, column: &str) -> Result<Self> {
        let index = reader
            .headers()?
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| invalid(format!("pressure profile has no '{}' column", column)))?;

        let mut samples = Vec::new();
        for row in reader.records() {
            let row = row?;
            if let Some(value) = row.get(index).and_then(|cell| cell.parse::<f64>().ok()) {
                if value.is_finite() {
                    samples.push(value.round() as i64);
                }
            }
        }
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl IntoIterator for PressureProfile {
    type Item = i64;
    type IntoIter = std::vec::IntoIter<i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}
