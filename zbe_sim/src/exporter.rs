//! JSON exporter for drive replays.
//!
//! Exports one frame per simulated second so a drive can be plotted or
//! diffed between seeds.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use zbe_core::{AlertLevelName, AlertRecord, Point, SessionReport, ZoneId};
use zbe_env::Position;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Where the vehicle really is
    pub true_position: Point,

    /// What the GPS reported (absent on dropout)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<Position>,

    /// Alerts fired on this tick
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<FrameAlert>,

    /// Live cache entries after the tick
    pub cache_entries: usize,
}

/// Alert summary inside a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAlert {
    pub zone_id: ZoneId,
    pub level: AlertLevelName,
    pub distance_m: f64,
}

impl From<&AlertRecord> for FrameAlert {
    fn from(alert: &AlertRecord) -> Self {
        Self {
            zone_id: alert.zone_id,
            level: alert.level.name,
            distance_m: alert.distance_meters,
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Session analytics at the end of the drive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SessionReport>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            report: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, report: Option<SessionReport>) {
        self.passed = passed;
        self.report = report;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
