//! Output seams for a rendered frame.
//!
//! The show writes MIDI messages and DMX frames through these traits; the
//! physical transports live outside the crate.

use std::sync::{Arc, Mutex};

use midly::{live::LiveEvent, num::u4, MidiMessage};

use crate::{fixture::DmxFrame, HustlerError, Result};

pub trait MidiSink: Send {
    fn send(&mut self, channel: u4, message: MidiMessage) -> Result<()>;
}

pub trait DmxSink: Send {
    /// Sends the whole frame. Called once per render pass.
    fn flush(&mut self, frame: &DmxFrame) -> Result<()>;
}

/// Wire bytes of one channel message.
pub fn encode_midi(channel: u4, message: MidiMessage) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(3);
    LiveEvent::Midi { channel, message }.write_std(&mut bytes)?;
    Ok(bytes)
}

/// Keeps every message it is sent. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingMidi {
    events: Arc<Mutex<Vec<(u4, MidiMessage)>>>,
}

impl RecordingMidi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(u4, MidiMessage)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl MidiSink for RecordingMidi {
    fn send(&mut self, channel: u4, message: MidiMessage) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| HustlerError::msg("midi recording lock poisoned"))?
            .push((channel, message));
        Ok(())
    }
}

/// Keeps the latest frame and counts flushes. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingDmx {
    state: Arc<Mutex<(usize, DmxFrame)>>,
}

impl RecordingDmx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().map(|state| state.0).unwrap_or_default()
    }

    pub fn last_frame(&self) -> DmxFrame {
        self.state
            .lock()
            .map(|state| state.1.clone())
            .unwrap_or_default()
    }
}

impl DmxSink for RecordingDmx {
    fn flush(&mut self, frame: &DmxFrame) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| HustlerError::msg("dmx recording lock poisoned"))?;
        state.0 += 1;
        state.1.clone_from(frame);
        Ok(())
    }
}

/// Logs each message's wire bytes at trace level.
#[derive(Debug, Default)]
pub struct TracingMidi;

impl MidiSink for TracingMidi {
    fn send(&mut self, channel: u4, message: MidiMessage) -> Result<()> {
        let bytes = encode_midi(channel, message)?;
        tracing::trace!(channel = channel.as_int(), ?message, ?bytes, "midi");
        Ok(())
    }
}

/// Logs the first `channels` of every flushed frame at trace level.
#[derive(Debug)]
pub struct TracingDmx {
    channels: usize,
}

impl TracingDmx {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl Default for TracingDmx {
    fn default() -> Self {
        Self::new(16)
    }
}

impl DmxSink for TracingDmx {
    fn flush(&mut self, frame: &DmxFrame) -> Result<()> {
        tracing::trace!(head = ?frame.range(0..self.channels), "dmx frame");
        Ok(())
    }
}
