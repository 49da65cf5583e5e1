//! Periodic time: rates, the injectable show clock, and polled triggers.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    control::{parse_bool, parse_positive, unknown_parameter, Controllable},
    HustlerError, Result,
};

/// A periodic rate with three consistent views: hz, period and bpm.
///
/// Only the frequency is stored, so every view stays consistent after any
/// setter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    hz: f64,
}

impl Rate {
    pub fn from_hz(hz: f64) -> Result<Self> {
        Ok(Self {
            hz: validate_rate("hz", hz)?,
        })
    }

    pub fn from_period(period: f64) -> Result<Self> {
        let period = validate_rate("period", period)?;
        Self::from_hz(1.0 / period)
    }

    pub fn from_bpm(bpm: f64) -> Result<Self> {
        let bpm = validate_rate("bpm", bpm)?;
        Self::from_hz(bpm / 60.0)
    }

    pub fn hz(&self) -> f64 {
        self.hz
    }

    pub fn period(&self) -> f64 {
        1.0 / self.hz
    }

    pub fn bpm(&self) -> f64 {
        self.hz * 60.0
    }

    pub fn set_hz(&mut self, hz: f64) -> Result<()> {
        *self = Self::from_hz(hz)?;
        Ok(())
    }

    pub fn set_period(&mut self, period: f64) -> Result<()> {
        *self = Self::from_period(period)?;
        Ok(())
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        *self = Self::from_bpm(bpm)?;
        Ok(())
    }

    /// Applies one of the `hz`/`period`/`bpm` parameters shared by every
    /// rate-driven entity. Returns `Ok(false)` for any other name.
    pub(crate) fn apply_parameter(&mut self, name: &str, value: &Value) -> Result<bool> {
        match name {
            "hz" => self.set_hz(parse_positive(name, value)?)?,
            "period" => self.set_period(parse_positive(name, value)?)?,
            "bpm" => self.set_bpm(parse_positive(name, value)?)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn validate_rate(view: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        let hz_ok = match view {
            "period" => (1.0 / value).is_finite(),
            _ => true,
        };
        if hz_ok {
            return Ok(value);
        }
    }
    Err(HustlerError::InvalidRate(format!(
        "{view} must be positive and finite, got {value}"
    )))
}

/// Source of wall-clock seconds.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;
}

/// Monotonic time measured from construction.
#[derive(Debug)]
pub struct MonotonicTime {
    origin: Instant,
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for MonotonicTime {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven time, used to make clock-dependent behaviour deterministic.
#[derive(Debug, Default)]
pub struct ManualTime {
    bits: AtomicU64,
}

impl ManualTime {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta: f64) {
        self.set(self.now() + delta);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// The show clock capability.
///
/// [`Clock::now`] reads live time. [`Clock::tick`] latches the current time as
/// the frame time, which every entity rendered during that frame observes
/// through [`Clock::frame_time`]. Clones share both the source and the latch.
#[derive(Clone)]
pub struct Clock {
    source: Arc<dyn TimeSource>,
    frame: Arc<AtomicU64>,
}

impl Clock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        let start = source.now();
        Self {
            source,
            frame: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    /// A clock driven by [`MonotonicTime`].
    pub fn monotonic() -> Self {
        Self::new(Arc::new(MonotonicTime::default()))
    }

    /// A clock driven by a [`ManualTime`] starting at `start`, together with
    /// the handle that moves it.
    pub fn manual(start: f64) -> (Self, Arc<ManualTime>) {
        let time = Arc::new(ManualTime::new(start));
        (Self::new(time.clone()), time)
    }

    pub fn now(&self) -> f64 {
        self.source.now()
    }

    /// Latches the current time as the frame time and returns it.
    pub fn tick(&self) -> f64 {
        let now = self.source.now();
        self.frame.store(now.to_bits(), Ordering::SeqCst);
        now
    }

    pub fn frame_time(&self) -> f64 {
        f64::from_bits(self.frame.load(Ordering::SeqCst))
    }

    pub(crate) fn read(&self, base: TimeBase) -> f64 {
        match base {
            TimeBase::Frame => self.frame_time(),
            TimeBase::Live => self.now(),
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("frame_time", &self.frame_time())
            .finish()
    }
}

/// Which reading of the [`Clock`] a trigger polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBase {
    /// The time latched at the start of the current render pass.
    Frame,
    /// Live time, used by the scheduler's own render trigger.
    Live,
}

/// Polling-based periodic scheduling primitive.
///
/// A new trigger is due immediately. Once fired it stays quiet until a full
/// period has elapsed since the firing time.
#[derive(Debug, Clone)]
pub struct Trigger {
    rate: Rate,
    clock: Clock,
    base: TimeBase,
    last_fired: f64,
    active: bool,
}

impl Trigger {
    const PARAMETERS: &'static [&'static str] = &["period", "hz", "bpm", "reset", "active"];

    /// A trigger polling the frame time of `clock`.
    pub fn new(rate: Rate, clock: Clock) -> Self {
        Self::with_time_base(rate, clock, TimeBase::Frame)
    }

    /// A trigger polling live time.
    pub fn live(rate: Rate, clock: Clock) -> Self {
        Self::with_time_base(rate, clock, TimeBase::Live)
    }

    fn with_time_base(rate: Rate, clock: Clock, base: TimeBase) -> Self {
        let last_fired = clock.read(base) - rate.period();
        Self {
            rate,
            clock,
            base,
            last_fired,
            active: true,
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn set_rate(&mut self, rate: Rate) {
        self.rate = rate;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Returns true, and restarts the period, if the trigger is due.
    pub fn trigger(&mut self) -> bool {
        if !self.active {
            return false;
        }
        let now = self.clock.read(self.base);
        if self.until(now) <= 0.0 {
            self.last_fired = now;
            return true;
        }
        false
    }

    /// Seconds until the trigger is next due; negative when overdue.
    pub fn time_until_trigger(&self) -> f64 {
        self.until(self.clock.read(self.base))
    }

    /// Restarts the period from now without firing.
    pub fn reset(&mut self) {
        self.last_fired = self.clock.read(self.base);
    }

    /// Makes the trigger due on the next poll.
    pub fn rearm(&mut self) {
        self.last_fired = self.clock.read(self.base) - self.rate.period();
    }

    fn until(&self, now: f64) -> f64 {
        self.rate.period() - (now - self.last_fired)
    }
}

impl Controllable for Trigger {
    fn kind(&self) -> &'static str {
        "trigger"
    }

    fn parameters(&self) -> &'static [&'static str] {
        Self::PARAMETERS
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        if self.rate.apply_parameter(name, value)? {
            return Ok(());
        }
        match name {
            "reset" => self.rearm(),
            "active" => self.active = parse_bool(name, value)?,
            _ => return Err(unknown_parameter(self.kind(), name)),
        }
        Ok(())
    }
}
