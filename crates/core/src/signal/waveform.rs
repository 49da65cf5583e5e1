//! Periodic waveform source and its unit-cycle shape functions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    control::{parse_bool, parse_choice, parse_f64, parse_unit, unknown_parameter, Controllable},
    timing::{Clock, Rate},
    Result,
};

use std::f64::consts::{FRAC_PI_2, TAU};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveshape {
    #[default]
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

impl Waveshape {
    /// Evaluates the shape at `angle` (in cycles).
    ///
    /// Outside the leading `duty_cycle` fraction of the cycle the output is 0;
    /// inside it a whole cycle is compressed. Pulse mode produces the
    /// unipolar variant of each shape.
    pub fn eval(self, angle: f64, smoothing: f64, duty_cycle: f64, pulse: bool) -> f64 {
        let angle = angle.rem_euclid(1.0);
        if angle > duty_cycle || duty_cycle == 0.0 {
            return 0.0;
        }
        let angle = angle / duty_cycle;
        match self {
            Self::Sine => sine(angle, pulse),
            Self::Triangle => triangle(angle, pulse),
            Self::Square if pulse => square(angle / 2.0, smoothing),
            Self::Square => square(angle, smoothing),
            Self::Sawtooth if pulse => sawtooth(angle / 2.0, smoothing),
            Self::Sawtooth => sawtooth(angle, smoothing),
        }
    }
}

fn sine(angle: f64, pulse: bool) -> f64 {
    if pulse {
        return ((TAU * angle - FRAC_PI_2).sin() + 1.0) / 2.0;
    }
    (TAU * angle).sin()
}

fn triangle(angle: f64, pulse: bool) -> f64 {
    if pulse {
        return if angle < 0.5 {
            2.0 * angle
        } else {
            2.0 * (1.0 - angle)
        };
    }
    if angle < 0.25 {
        4.0 * angle
    } else if angle > 0.75 {
        4.0 * (angle - 1.0)
    } else {
        2.0 - 4.0 * angle
    }
}

fn square(angle: f64, smoothing: f64) -> f64 {
    if smoothing == 0.0 {
        return if angle < 0.5 { 1.0 } else { -1.0 };
    }
    if angle < smoothing {
        angle / smoothing
    } else if angle > 0.5 - smoothing && angle < 0.5 + smoothing {
        -(angle - 0.5) / smoothing
    } else if angle > 1.0 - smoothing {
        (angle - 1.0) / smoothing
    } else if angle <= 0.5 - smoothing {
        1.0
    } else {
        -1.0
    }
}

fn sawtooth(angle: f64, smoothing: f64) -> f64 {
    if smoothing == 0.0 {
        return if angle < 0.5 {
            2.0 * angle
        } else {
            2.0 * (angle - 1.0)
        };
    }
    if angle < 0.5 - smoothing {
        angle / (0.5 - smoothing)
    } else if angle > 0.5 + smoothing {
        (angle - 1.0) / (0.5 - smoothing)
    } else {
        -(angle - 0.5) / smoothing
    }
}

/// Value of a periodic function of time.
///
/// Phase lives in `[0, 1)` and advances by `elapsed * hz` whenever the frame
/// time has moved since the previous read, so the output stays correct at any
/// polling rate.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub shape: Waveshape,
    pub smoothing: f64,
    pub duty_cycle: f64,
    pub pulse: bool,
    pub amplitude: f64,
    rate: Rate,
    clock: Clock,
    phase: f64,
    last_update: f64,
}

impl Waveform {
    const PARAMETERS: &'static [&'static str] = &[
        "waveform",
        "period",
        "hz",
        "bpm",
        "reset",
        "smoothing",
        "duty_cycle",
        "pulse",
        "amplitude",
    ];

    /// A silent (amplitude 0) sine at `rate`.
    pub fn new(rate: Rate, clock: Clock) -> Self {
        let last_update = clock.frame_time();
        Self {
            shape: Waveshape::Sine,
            smoothing: 0.0,
            duty_cycle: 1.0,
            pulse: false,
            amplitude: 0.0,
            rate,
            clock,
            phase: 0.0,
            last_update,
        }
    }

    pub fn with_shape(mut self, shape: Waveshape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
    }

    pub fn get(&mut self) -> f64 {
        let now = self.clock.frame_time();
        if now != self.last_update {
            self.phase = (self.phase + (now - self.last_update) * self.rate.hz()).rem_euclid(1.0);
            self.last_update = now;
        }
        self.amplitude
            * self
                .shape
                .eval(self.phase, self.smoothing, self.duty_cycle, self.pulse)
    }
}

impl Controllable for Waveform {
    fn kind(&self) -> &'static str {
        "waveform"
    }

    fn parameters(&self) -> &'static [&'static str] {
        Self::PARAMETERS
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        if self.rate.apply_parameter(name, value)? {
            return Ok(());
        }
        match name {
            "waveform" => self.shape = parse_choice(name, value)?,
            "reset" => self.reset_phase(),
            "smoothing" => self.smoothing = parse_unit(name, value)?,
            "duty_cycle" => self.duty_cycle = parse_unit(name, value)?,
            "pulse" => self.pulse = parse_bool(name, value)?,
            "amplitude" => self.amplitude = parse_f64(name, value)?,
            _ => return Err(unknown_parameter(self.kind(), name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use serde_json::json;

    #[test]
    fn bipolar_shapes_hit_their_extremes() {
        assert!(approx_eq!(f64, Waveshape::Sine.eval(0.25, 0.0, 1.0, false), 1.0, ulps = 2));
        assert!(approx_eq!(f64, Waveshape::Triangle.eval(0.25, 0.0, 1.0, false), 1.0, ulps = 2));
        assert!(approx_eq!(f64, Waveshape::Triangle.eval(0.75, 0.0, 1.0, false), -1.0, ulps = 2));
        assert_eq!(Waveshape::Square.eval(0.1, 0.0, 1.0, false), 1.0);
        assert_eq!(Waveshape::Square.eval(0.6, 0.0, 1.0, false), -1.0);
        assert_eq!(Waveshape::Sawtooth.eval(0.25, 0.0, 1.0, false), 0.5);
        assert_eq!(Waveshape::Sawtooth.eval(0.75, 0.0, 1.0, false), -0.5);
    }

    #[test]
    fn pulse_shapes_are_unipolar() {
        for shape in [
            Waveshape::Sine,
            Waveshape::Triangle,
            Waveshape::Square,
            Waveshape::Sawtooth,
        ] {
            for step in 0..100 {
                let v = shape.eval(step as f64 / 100.0, 0.0, 1.0, true);
                assert!((-1e-12..=1.0 + 1e-12).contains(&v), "{shape:?} gave {v}");
            }
        }
        assert!(approx_eq!(f64, Waveshape::Sine.eval(0.5, 0.0, 1.0, true), 1.0, ulps = 2));
    }

    #[test]
    fn duty_cycle_silences_the_tail() {
        assert_eq!(Waveshape::Square.eval(0.75, 0.0, 0.5, false), 0.0);
        assert_eq!(Waveshape::Square.eval(0.1, 0.0, 0.5, false), 1.0);
        assert_eq!(Waveshape::Sine.eval(0.3, 0.0, 0.0, false), 0.0);
    }

    #[test]
    fn smoothing_ramps_square_edges() {
        let v = Waveshape::Square.eval(0.05, 0.1, 1.0, false);
        assert!(approx_eq!(f64, v, 0.5, ulps = 2));
        assert_eq!(Waveshape::Square.eval(0.25, 0.1, 1.0, false), 1.0);
    }

    #[test]
    fn phase_follows_frame_time() {
        let (clock, time) = Clock::manual(0.0);
        let mut waveform = Waveform::new(Rate::from_hz(1.0).unwrap(), clock.clone())
            .with_shape(Waveshape::Sawtooth)
            .with_amplitude(2.0);

        assert_eq!(waveform.get(), 0.0);
        time.advance(0.25);
        // Phase only moves when the frame clock ticks.
        assert_eq!(waveform.get(), 0.0);
        clock.tick();
        assert!(approx_eq!(f64, waveform.get(), 1.0, ulps = 2));
        time.advance(1.5);
        clock.tick();
        waveform.get();
        assert!(approx_eq!(f64, waveform.phase(), 0.75, ulps = 2));
    }

    #[test]
    fn reset_parameter_zeroes_phase() {
        let (clock, time) = Clock::manual(0.0);
        let mut waveform = Waveform::new(Rate::from_hz(1.0).unwrap(), clock.clone());
        time.advance(0.4);
        clock.tick();
        waveform.get();
        assert!(waveform.phase() > 0.0);
        waveform.set_parameter("reset", &json!(true)).unwrap();
        assert_eq!(waveform.phase(), 0.0);
    }

    #[test]
    fn parameters_are_validated() {
        let (clock, _time) = Clock::manual(0.0);
        let mut waveform = Waveform::new(Rate::from_hz(1.0).unwrap(), clock);
        waveform.set_parameter("waveform", &json!("triangle")).unwrap();
        waveform.set_parameter("duty_cycle", &json!(3.0)).unwrap();
        waveform.set_parameter("bpm", &json!(120.0)).unwrap();
        assert_eq!(waveform.shape, Waveshape::Triangle);
        assert_eq!(waveform.duty_cycle, 1.0);
        assert_eq!(waveform.rate().hz(), 2.0);

        assert!(waveform.set_parameter("waveform", &json!("noise")).is_err());
        assert_eq!(waveform.shape, Waveshape::Triangle);
    }
}
