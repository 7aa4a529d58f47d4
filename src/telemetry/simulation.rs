//! # Dummy Telemetry Generator
//!
//! Produces plausible synthetic frames when no live link is attached.
//! Position, altitude and temperature drift by small random steps; every
//! other field is a fixed placeholder.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::schema::TelemetryRecord;

/// Initial latitude of the synthetic track (degrees)
const START_LATITUDE: f64 = 42.842835;

/// Initial longitude of the synthetic track (degrees)
const START_LONGITUDE: f64 = -2.668065;

/// Initial temperature (°C)
const START_TEMPERATURE: f64 = 15.0;

/// Synthetic record source
#[derive(Debug)]
pub struct SimulationGenerator {
    team_id: String,
    rng: StdRng,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    temperature: f64,
}

impl SimulationGenerator {
    /// Create a generator seeded from OS entropy
    pub fn new(team_id: impl Into<String>) -> Self {
        Self::with_rng(team_id, StdRng::from_entropy())
    }

    /// Create a reproducible generator
    pub fn with_seed(team_id: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(team_id, StdRng::seed_from_u64(seed))
    }

    fn with_rng(team_id: impl Into<String>, rng: StdRng) -> Self {
        Self {
            team_id: team_id.into(),
            rng,
            latitude: START_LATITUDE,
            longitude: START_LONGITUDE,
            altitude: 0.0,
            temperature: START_TEMPERATURE,
        }
    }

    /// Produce the next record
    ///
    /// The packet counter continues from `last_packet_count` (the tracker's
    /// baseline), so switching between live and synthetic input never
    /// restarts the sequence.
    pub fn next(&mut self, last_packet_count: Option<i64>) -> TelemetryRecord {
        let packet_count = last_packet_count.unwrap_or(0).saturating_add(1);

        self.latitude += self.rng.gen_range(0.000_001..0.000_01);
        self.longitude += self.rng.gen_range(0.000_001..0.000_01);
        self.altitude += self.rng.gen_range(0.0..1.0);
        self.temperature += self.rng.gen_range(-0.05..0.05);

        let now = Utc::now().format("%H:%M:%S").to_string();

        let values = [
            self.team_id.clone(),
            now.clone(),
            packet_count.to_string(),
            "F".to_string(),
            "LAUNCH_PAD".to_string(),
            format!("{:.1}", self.altitude),
            format!("{:.1}", self.temperature),
            "101.3".to_string(),
            "12.3".to_string(),
            "0.0".to_string(),
            "0.0".to_string(),
            "0.0".to_string(),
            "0.0".to_string(),
            "0.0".to_string(),
            "0.0".to_string(),
            "0.0".to_string(),
            "0.0".to_string(),
            "0.0".to_string(),
            "0".to_string(),
            now,
            "10.0".to_string(),
            format!("{:.5}", self.latitude),
            format!("{:.5}", self.longitude),
            "7".to_string(),
            "CXON".to_string(),
        ];

        TelemetryRecord::from_array(values)
    }
}
