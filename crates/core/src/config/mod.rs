use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    fixture::{FixtureKind, DMX_CHANNELS},
    HustlerError, Result,
};

/// Top-level configuration for a show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowConfig {
    /// Render passes per second.
    pub framerate: f64,
    /// One color organist per entry, playing on that MIDI channel.
    pub organists: Vec<u8>,
    /// Initial rate of every entity trigger.
    pub trigger_bpm: f64,
    /// Initial hustler easing, in signal units per second.
    pub easing: f64,
    pub rotators: Vec<FixtureConfig>,
    /// Start addresses of single-channel dimmers.
    pub dimmers: Vec<usize>,
    /// Fixed seed for the noise sources; fresh entropy when absent.
    pub seed: Option<u64>,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            framerate: 60.0,
            organists: vec![0, 1, 2],
            trigger_bpm: 60.0,
            easing: 0.1,
            rotators: vec![
                FixtureConfig::new(FixtureKind::SmartMove, 495),
                FixtureConfig::new(FixtureKind::RotoQ, 498),
                FixtureConfig::new(FixtureKind::RotoQ, 500),
                FixtureConfig::new(FixtureKind::RotoQ, 502),
                FixtureConfig::new(FixtureKind::RotoQ, 504),
                FixtureConfig::new(FixtureKind::RotoQ, 506),
                FixtureConfig::new(FixtureKind::GoboSpinna, 450),
                FixtureConfig::new(FixtureKind::GoboSpinna, 454),
            ],
            dimmers: vec![0, 1, 2, 3],
            seed: None,
        }
    }
}

impl ShowConfig {
    /// Reads a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded show config");
        Ok(config)
    }

    /// A rig with no DMX fixtures.
    pub fn midi_only() -> Self {
        Self {
            rotators: Vec::new(),
            dimmers: Vec::new(),
            ..Self::default()
        }
    }

    pub fn has_fixtures(&self) -> bool {
        !self.rotators.is_empty() || !self.dimmers.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.framerate.is_finite() && self.framerate > 0.0) {
            return Err(HustlerError::InvalidRate(format!(
                "framerate must be positive, got {}",
                self.framerate
            )));
        }
        if !(self.trigger_bpm.is_finite() && self.trigger_bpm > 0.0) {
            return Err(HustlerError::InvalidRate(format!(
                "trigger_bpm must be positive, got {}",
                self.trigger_bpm
            )));
        }
        if !(self.easing.is_finite() && self.easing > 0.0) {
            return Err(HustlerError::invalid_value(
                "easing",
                format!("must be positive, got {}", self.easing),
            ));
        }
        if let Some(channel) = self.organists.iter().find(|channel| **channel > 15) {
            return Err(HustlerError::invalid_value(
                "organists",
                format!("MIDI channel {channel} is above 15"),
            ));
        }
        if let Some(rotator) = self.rotators.iter().find(|r| r.kind == FixtureKind::Dimmer) {
            return Err(HustlerError::invalid_value(
                "rotators",
                format!("dimmer at {} listed as a rotator", rotator.address),
            ));
        }
        let fixtures = self
            .rotators
            .iter()
            .copied()
            .chain(self.dimmers.iter().map(|a| FixtureConfig::new(FixtureKind::Dimmer, *a)));
        for fixture in fixtures {
            if fixture.address + fixture.kind.channel_count() > DMX_CHANNELS {
                return Err(HustlerError::AddressConflict(format!(
                    "{:?} at {} runs past channel {DMX_CHANNELS}",
                    fixture.kind, fixture.address
                )));
            }
        }
        Ok(())
    }
}

/// One fixture of the rig: its model and first (0-based) frame channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureConfig {
    pub kind: FixtureKind,
    pub address: usize,
}

impl FixtureConfig {
    pub fn new(kind: FixtureKind, address: usize) -> Self {
        Self { kind, address }
    }
}
