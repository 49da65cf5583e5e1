//! DMX output frame and the fixture encoders that write into it.

use std::{collections::HashMap, ops::Range, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    calibration::{CalibrationTable, RotatorProfile},
    HustlerError, Result,
};

/// Channels in one DMX universe.
pub const DMX_CHANNELS: usize = 512;

/// One DMX universe of channel values, addressed from 0.
#[derive(Clone, PartialEq, Eq)]
pub struct DmxFrame {
    channels: [u8; DMX_CHANNELS],
}

impl Default for DmxFrame {
    fn default() -> Self {
        Self {
            channels: [0; DMX_CHANNELS],
        }
    }
}

impl DmxFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: usize) -> Option<u8> {
        self.channels.get(channel).copied()
    }

    /// Writes `value` to `channel`; writes past the end of the frame are
    /// ignored.
    pub fn set(&mut self, channel: usize, value: u8) {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = value;
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.channels
    }

    pub fn range(&self, channels: Range<usize>) -> &[u8] {
        let end = channels.end.min(DMX_CHANNELS);
        let start = channels.start.min(end);
        &self.channels[start..end]
    }
}

impl std::fmt::Debug for DmxFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.channels.iter().filter(|v| **v != 0).count();
        f.debug_struct("DmxFrame").field("active", &active).finish()
    }
}

/// Fixture models the encoders know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureKind {
    /// Apollo Roto-Q DMX: calibrated direction/speed, then a mode channel
    /// that must be 0 for rotation.
    RotoQ,
    /// SmartMove DMX: one calibrated direction/speed channel.
    SmartMove,
    /// Two DC gobo rotators: direction byte then speed byte for each.
    GoboSpinna,
    /// One 8-bit dimmer channel.
    Dimmer,
}

impl FixtureKind {
    pub fn channel_count(self) -> usize {
        match self {
            Self::RotoQ => 2,
            Self::SmartMove => 1,
            Self::GoboSpinna => 4,
            Self::Dimmer => 1,
        }
    }

    pub fn axis_count(self) -> usize {
        match self {
            Self::GoboSpinna => 2,
            _ => 1,
        }
    }
}

/// Builds each rotator calibration at most once and shares it between
/// fixtures of the same model.
#[derive(Debug, Default)]
pub struct CalibrationCache {
    tables: HashMap<RotatorProfile, Arc<CalibrationTable>>,
}

impl CalibrationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&mut self, profile: RotatorProfile) -> Result<Arc<CalibrationTable>> {
        if let Some(table) = self.tables.get(&profile) {
            return Ok(table.clone());
        }
        let table = Arc::new(profile.build_table()?);
        tracing::debug!(?profile, entries = table.len(), "built calibration table");
        self.tables.insert(profile, table.clone());
        Ok(table)
    }
}

/// A fixture instance: a start address, its current axis values and, for
/// calibrated rotators, the table used to quantise them.
///
/// Axis values are in normalised units: speed for rotators (1.0 is
/// [`crate::calibration::UNIT_RATE`], negative reverses), level in `[0, 1]`
/// for dimmers.
#[derive(Debug, Clone)]
pub struct Fixture {
    kind: FixtureKind,
    address: usize,
    axes: Vec<f64>,
    table: Option<Arc<CalibrationTable>>,
}

impl Fixture {
    pub fn new(kind: FixtureKind, address: usize, cache: &mut CalibrationCache) -> Result<Self> {
        let table = match kind {
            FixtureKind::RotoQ => Some(cache.table(RotatorProfile::RotoQ)?),
            FixtureKind::SmartMove => Some(cache.table(RotatorProfile::SmartMove)?),
            FixtureKind::GoboSpinna | FixtureKind::Dimmer => None,
        };
        let fixture = Self {
            kind,
            address,
            axes: vec![0.0; kind.axis_count()],
            table,
        };
        if fixture.channels().end > DMX_CHANNELS {
            return Err(HustlerError::AddressConflict(format!(
                "{kind:?} at {address} runs past channel {DMX_CHANNELS}"
            )));
        }
        Ok(fixture)
    }

    pub fn kind(&self) -> FixtureKind {
        self.kind
    }

    pub fn address(&self) -> usize {
        self.address
    }

    /// The frame channels this fixture writes.
    pub fn channels(&self) -> Range<usize> {
        self.address..self.address + self.kind.channel_count()
    }

    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    pub fn axis(&self, index: usize) -> Option<f64> {
        self.axes.get(index).copied()
    }

    /// Sets one axis. Dimmer levels are clamped to `[0, 1]`.
    pub fn set_axis(&mut self, index: usize, value: f64) {
        let value = match self.kind {
            FixtureKind::Dimmer => value.clamp(0.0, 1.0),
            _ => value,
        };
        if let Some(axis) = self.axes.get_mut(index) {
            *axis = value;
        }
    }

    /// Writes this fixture's channels. Never reads the frame.
    pub fn render(&self, frame: &mut DmxFrame) {
        let base = self.address;
        match self.kind {
            FixtureKind::RotoQ => {
                frame.set(base, self.calibrated_code(self.axes[0]));
                frame.set(base + 1, 0);
            }
            FixtureKind::SmartMove => {
                frame.set(base, self.calibrated_code(self.axes[0]));
            }
            FixtureKind::GoboSpinna => {
                for (i, value) in self.axes.iter().enumerate() {
                    let (direction, speed) = linear_direction_speed(*value);
                    frame.set(base + 2 * i, direction);
                    frame.set(base + 2 * i + 1, speed);
                }
            }
            FixtureKind::Dimmer => {
                frame.set(base, dimmer_level(self.axes[0]));
            }
        }
    }

    fn calibrated_code(&self, value: f64) -> u8 {
        self.table
            .as_ref()
            .map(|table| table.code_for(value))
            .unwrap_or(0)
    }
}

fn linear_direction_speed(value: f64) -> (u8, u8) {
    let direction = if value <= 0.0 { 0 } else { 255 };
    let speed = (value.abs() * 255.0).clamp(0.0, 255.0) as u8;
    (direction, speed)
}

fn dimmer_level(value: f64) -> u8 {
    (value.abs() * 256.0).min(255.0) as u8
}

/// Checks that no two fixtures share a channel.
pub fn check_layout<'a>(fixtures: impl IntoIterator<Item = &'a Fixture>) -> Result<()> {
    let mut ranges: Vec<(Range<usize>, FixtureKind)> = fixtures
        .into_iter()
        .map(|fixture| (fixture.channels(), fixture.kind()))
        .collect();
    ranges.sort_by_key(|(range, _)| range.start);
    for pair in ranges.windows(2) {
        let (first, first_kind) = &pair[0];
        let (second, second_kind) = &pair[1];
        if second.start < first.end {
            return Err(HustlerError::AddressConflict(format!(
                "{first_kind:?} at {} overlaps {second_kind:?} at {}",
                first.start, second.start
            )));
        }
    }
    Ok(())
}
