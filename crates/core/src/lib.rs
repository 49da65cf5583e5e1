//! Core library for the Color Hustler show controller.
//!
//! A show continuously generates control signals (color, rotation speed,
//! light level) and renders them on a fixed schedule into MIDI messages for a
//! color organ and a DMX frame for lighting fixtures, while an operator
//! retunes any named entity over the control channel. Each module owns one
//! subsystem: timing, the signal graph, calibration, fixtures, hustlers, the
//! organ, output sinks, the remote message contract and the show scheduler.

pub mod calibration;
pub mod config;
pub mod control;
pub mod error;
pub mod fixture;
pub mod hustler;
pub mod organ;
pub mod remote;
pub mod render;
pub mod show;
pub mod signal;
pub mod timing;

pub use calibration::{CalibrationTable, Mirror, MirrorAnchor, RotatorProfile, UNIT_RATE};
pub use config::{FixtureConfig, ShowConfig};
pub use control::{Controllable, Registry};
pub use error::{HustlerError, Result};
pub use fixture::{CalibrationCache, DmxFrame, Fixture, FixtureKind, DMX_CHANNELS};
pub use hustler::{Bank, BankName, Easer, Hustler};
pub use organ::{Color, ColorGenerator, ColorOrganist};
pub use remote::{Command, ControlChannel, Response, ResponseKind, ShowEndpoint};
pub use render::{DmxSink, MidiSink, RecordingDmx, RecordingMidi, TracingDmx, TracingMidi};
pub use show::{assemble, EntityKey, Show, ShowState, SignalId, TriggerId};
pub use signal::{
    Constant, ConstantList, Constrain, Limiter, Modulator, Noise, NoiseMode, Operation, Rng,
    SignalSource, Waveform, Waveshape,
};
pub use timing::{Clock, ManualTime, MonotonicTime, Rate, TimeSource, Trigger};
