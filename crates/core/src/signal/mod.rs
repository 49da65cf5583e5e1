//! Pull-based control signal sources and the combinators that compose them.
//!
//! Nothing runs until [`SignalSource::get`] is called. Trees are assembled
//! once at show setup, e.g. a [`Waveform`] added to a [`ConstantList`] offset
//! through a [`Modulator`], and any node may be wrapped in
//! [`SignalSource::Named`] so it can be addressed from the control channel.

mod waveform;

pub use waveform::{Waveform, Waveshape};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    control::{parse_bool, parse_choice, parse_f64, parse_float_list, unknown_parameter, Controllable},
    HustlerError, Result,
};

/// Policy for bringing a raw value into a bounded range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constrain {
    /// Hard clamp at the bounds.
    Clip,
    /// Reflect at both bounds until in range; continuous for saturation and
    /// level.
    #[default]
    Fold,
    /// Modulo wrap; used for circular quantities such as hue.
    Wrap,
}

impl Constrain {
    pub fn apply(self, value: f64, min: f64, max: f64) -> f64 {
        let span = max - min;
        if value.is_nan() || span <= 0.0 {
            return min;
        }
        match self {
            Self::Clip => value.clamp(min, max),
            Self::Fold => {
                let offset = (value - min).rem_euclid(2.0 * span);
                if offset <= span {
                    min + offset
                } else {
                    min + 2.0 * span - offset
                }
            }
            Self::Wrap => min + (value - min).rem_euclid(span),
        }
    }
}

/// Seeded PRNG shared by the stochastic sources.
#[derive(Debug, Clone)]
pub struct Rng(oorandom::Rand64);

impl Rng {
    /// Pass the same seed to get the same stream back again.
    pub fn new_with_seed(seed: u128) -> Self {
        Self(oorandom::Rand64::new(seed))
    }

    /// Seeds from the operating system.
    pub fn from_entropy() -> Self {
        let mut bytes = [0u8; 16];
        // A failed read leaves the zero seed, which is still a valid stream.
        if let Err(err) = getrandom::getrandom(&mut bytes) {
            tracing::warn!(%err, "could not read OS entropy; using a fixed seed");
        }
        Self::new_with_seed(u128::from_be_bytes(bytes))
    }

    /// An independent stream seeded from this one.
    pub fn fork(&mut self) -> Self {
        let high = u128::from(self.0.rand_u64());
        let low = u128::from(self.0.rand_u64());
        Self::new_with_seed(high << 64 | low)
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.0.rand_float()
    }

    /// Uniform index in `0..len`; `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.0.rand_range(0..len as u64) as usize
    }

    /// Standard normal sample (Box-Muller).
    pub fn standard_normal(&mut self) -> f64 {
        let u1 = 1.0 - self.unit();
        let u2 = self.unit();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

/// Always yields `center`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub center: f64,
}

impl Constant {
    pub fn new(center: f64) -> Self {
        Self { center }
    }
}

impl Controllable for Constant {
    fn kind(&self) -> &'static str {
        "constant"
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["center"]
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "center" => self.center = parse_f64(name, value)?,
            _ => return Err(unknown_parameter(self.kind(), name)),
        }
        Ok(())
    }
}

/// Cycles through, or randomly picks from, a fixed list of values.
#[derive(Debug, Clone)]
pub struct ConstantList {
    values: Vec<f64>,
    pub random: bool,
    index: usize,
    rng: Rng,
}

impl ConstantList {
    pub fn new(values: Vec<f64>, random: bool, rng: Rng) -> Result<Self> {
        if values.is_empty() {
            return Err(HustlerError::invalid_value(
                "values",
                "must provide at least one value",
            ));
        }
        Ok(Self {
            values,
            random,
            index: 0,
            rng,
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Sequential mode advances the cursor before reading.
    pub fn get(&mut self) -> f64 {
        if self.random {
            return self.values[self.rng.index(self.values.len())];
        }
        self.index = (self.index + 1) % self.values.len();
        self.values[self.index]
    }
}

impl Controllable for ConstantList {
    fn kind(&self) -> &'static str {
        "constant_list"
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["values", "random"]
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "values" => {
                self.values = parse_float_list(name, value)?;
                self.index %= self.values.len();
            }
            "random" => self.random = parse_bool(name, value)?,
            _ => return Err(unknown_parameter(self.kind(), name)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMode {
    /// Uniform on `[center - width, center + width]`.
    Uniform,
    /// Normal with mean `center` and standard deviation `width`.
    #[default]
    Gaussian,
}

/// Random numbers about a center.
#[derive(Debug, Clone)]
pub struct Noise {
    pub mode: NoiseMode,
    pub center: f64,
    pub width: f64,
    rng: Rng,
}

impl Noise {
    pub fn new(mode: NoiseMode, center: f64, width: f64, rng: Rng) -> Self {
        Self {
            mode,
            center,
            width,
            rng,
        }
    }

    pub fn get(&mut self) -> f64 {
        match self.mode {
            NoiseMode::Uniform => self.center + self.width * (2.0 * self.rng.unit() - 1.0),
            NoiseMode::Gaussian => self.center + self.width * self.rng.standard_normal(),
        }
    }
}

impl Controllable for Noise {
    fn kind(&self) -> &'static str {
        "noise"
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["mode", "center", "width"]
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "mode" => self.mode = parse_choice(name, value)?,
            "center" => self.center = parse_f64(name, value)?,
            "width" => self.width = parse_f64(name, value)?,
            _ => return Err(unknown_parameter(self.kind(), name)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Add,
    Subtract,
    Multiply,
}

impl Operation {
    pub fn apply(self, input: f64, modulation: f64) -> f64 {
        match self {
            Self::Add => input + modulation,
            Self::Subtract => input - modulation,
            Self::Multiply => input * modulation,
        }
    }
}

/// Combines two sources with a binary [`Operation`]. Each source is pulled
/// exactly once per read.
#[derive(Debug, Clone)]
pub struct Modulator {
    source: Box<SignalSource>,
    modulation: Box<SignalSource>,
    pub operation: Operation,
}

impl Modulator {
    pub fn new(
        source: impl Into<SignalSource>,
        modulation: impl Into<SignalSource>,
        operation: Operation,
    ) -> Self {
        Self {
            source: Box::new(source.into()),
            modulation: Box::new(modulation.into()),
            operation,
        }
    }

    pub fn get(&mut self) -> f64 {
        let input = self.source.get();
        let modulation = self.modulation.get();
        self.operation.apply(input, modulation)
    }
}

impl Controllable for Modulator {
    fn kind(&self) -> &'static str {
        "modulator"
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["operation"]
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "operation" => self.operation = parse_choice(name, value)?,
            _ => return Err(unknown_parameter(self.kind(), name)),
        }
        Ok(())
    }
}

/// Brickwall limiter: constrains a source to optional bounds.
///
/// With only one bound set, every policy degrades to a one-sided clip.
#[derive(Debug, Clone)]
pub struct Limiter {
    source: Box<SignalSource>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub operation: Constrain,
}

impl Limiter {
    pub fn new(
        source: impl Into<SignalSource>,
        min: Option<f64>,
        max: Option<f64>,
        operation: Constrain,
    ) -> Self {
        Self {
            source: Box::new(source.into()),
            min,
            max,
            operation,
        }
    }

    pub fn get(&mut self) -> f64 {
        let value = self.source.get();
        match (self.min, self.max) {
            (Some(min), Some(max)) => self.operation.apply(value, min, max),
            (Some(min), None) => value.max(min),
            (None, Some(max)) => value.min(max),
            (None, None) => value,
        }
    }
}

impl Controllable for Limiter {
    fn kind(&self) -> &'static str {
        "limiter"
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["operation", "min", "max"]
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        let bound = |value: &Value| -> Result<Option<f64>> {
            match value {
                Value::Null => Ok(None),
                other => parse_f64(name, other).map(Some),
            }
        };
        match name {
            "operation" => self.operation = parse_choice(name, value)?,
            "min" => self.min = bound(value)?,
            "max" => self.max = bound(value)?,
            _ => return Err(unknown_parameter(self.kind(), name)),
        }
        Ok(())
    }
}

/// Closed set of signal sources. Combinators own their inputs, so trees of
/// any depth are plain values.
#[derive(Debug, Clone)]
pub enum SignalSource {
    Constant(Constant),
    ConstantList(ConstantList),
    Noise(Noise),
    Waveform(Waveform),
    Modulator(Modulator),
    Limiter(Limiter),
    /// A node addressable by name from the control channel.
    Named(String, Box<SignalSource>),
}

impl SignalSource {
    pub fn named(name: impl Into<String>, source: impl Into<SignalSource>) -> Self {
        Self::Named(name.into(), Box::new(source.into()))
    }

    pub fn get(&mut self) -> f64 {
        match self {
            Self::Constant(c) => c.center,
            Self::ConstantList(c) => c.get(),
            Self::Noise(n) => n.get(),
            Self::Waveform(w) => w.get(),
            Self::Modulator(m) => m.get(),
            Self::Limiter(l) => l.get(),
            Self::Named(_, inner) => inner.get(),
        }
    }

    /// Pulls the next value and brings it into `[min, max]` with `mode`.
    pub fn get_constrained(&mut self, min: f64, max: f64, mode: Constrain) -> f64 {
        let value = self.get();
        mode.apply(value, min, max)
    }

    /// The name of this node, if it is a [`SignalSource::Named`] node.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name, _) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Depth-first search for the node called `name`.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut SignalSource> {
        if self.name() == Some(name) {
            return Some(self);
        }
        match self {
            Self::Named(_, inner) => inner.find_mut(name),
            Self::Modulator(m) => match m.source.find_mut(name) {
                Some(found) => Some(found),
                None => m.modulation.find_mut(name),
            },
            Self::Limiter(l) => l.source.find_mut(name),
            _ => None,
        }
    }

    /// Every name in this tree, depth first.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut Vec<String>) {
        match self {
            Self::Named(name, inner) => {
                names.push(name.clone());
                inner.collect_names(names);
            }
            Self::Modulator(m) => {
                m.source.collect_names(names);
                m.modulation.collect_names(names);
            }
            Self::Limiter(l) => l.source.collect_names(names),
            _ => {}
        }
    }

    fn controllable(&self) -> &dyn Controllable {
        match self {
            Self::Constant(c) => c,
            Self::ConstantList(c) => c,
            Self::Noise(n) => n,
            Self::Waveform(w) => w,
            Self::Modulator(m) => m,
            Self::Limiter(l) => l,
            Self::Named(_, inner) => inner.controllable(),
        }
    }

    fn controllable_mut(&mut self) -> &mut dyn Controllable {
        match self {
            Self::Constant(c) => c,
            Self::ConstantList(c) => c,
            Self::Noise(n) => n,
            Self::Waveform(w) => w,
            Self::Modulator(m) => m,
            Self::Limiter(l) => l,
            Self::Named(_, inner) => inner.controllable_mut(),
        }
    }
}

impl Controllable for SignalSource {
    fn kind(&self) -> &'static str {
        self.controllable().kind()
    }

    fn parameters(&self) -> &'static [&'static str] {
        self.controllable().parameters()
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        self.controllable_mut().set_parameter(name, value)
    }
}

macro_rules! impl_into_source {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for SignalSource {
                fn from(value: $variant) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_into_source!(Constant, ConstantList, Noise, Waveform, Modulator, Limiter);
