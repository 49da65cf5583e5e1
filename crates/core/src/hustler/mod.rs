//! Drives a group of fixtures from a single signal source.
//!
//! Each time its trigger fires a [`Hustler`] pulls one value and hands it to
//! the axes picked by the next pattern of its [`Bank`]. Every axis then eases
//! toward its target at a bounded rate, so new values never arrive as jumps.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    control::{parse_choice, parse_index_patterns, parse_positive, unknown_parameter, Controllable},
    fixture::{DmxFrame, Fixture},
    signal::SignalSource,
    timing::{Clock, Trigger},
    Result,
};

/// Bounded-rate smoothing toward a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Easer {
    pub current: f64,
    pub target: f64,
}

impl Easer {
    pub fn new(initial: f64) -> Self {
        Self {
            current: initial,
            target: initial,
        }
    }

    /// Moves `current` toward `target` by at most `rate * dt` and returns it.
    ///
    /// Lands exactly on the target once it is within reach. Reach allows a
    /// few ULPs of slack so repeated steps that sum to the gap still land.
    pub fn ease(&mut self, dt: f64, rate: f64) -> f64 {
        let remaining = self.target - self.current;
        let step = (rate * dt).max(0.0);
        let slack = 4.0 * f64::EPSILON * self.target.abs().max(1.0);
        if remaining.abs() - step <= slack {
            self.current = self.target;
        } else {
            self.current += step.copysign(remaining);
        }
        self.current
    }
}

/// Built-in axis selection patterns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankName {
    /// Every axis takes each new value.
    All,
    /// Axes take new values one at a time, round robin.
    #[default]
    Single,
    /// Even axes, then odd axes.
    TwoValue,
}

/// A cycling sequence of axis index patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    patterns: Vec<Vec<usize>>,
    cursor: usize,
}

impl Bank {
    pub fn builtin(name: BankName, axes: usize) -> Self {
        let indices: Vec<usize> = (0..axes).collect();
        let patterns = match name {
            BankName::All => vec![indices],
            BankName::Single => indices.into_iter().map(|i| vec![i]).collect(),
            BankName::TwoValue => {
                let (evens, odds): (Vec<usize>, Vec<usize>) =
                    indices.into_iter().partition(|i| i % 2 == 0);
                vec![evens, odds]
            }
        };
        Self::custom(patterns)
    }

    pub fn custom(patterns: Vec<Vec<usize>>) -> Self {
        Self {
            patterns,
            cursor: 0,
        }
    }

    pub fn patterns(&self) -> &[Vec<usize>] {
        &self.patterns
    }

    /// The next pattern in the cycle; empty when the bank has none.
    pub fn next_pattern(&mut self) -> &[usize] {
        if self.patterns.is_empty() {
            return &[];
        }
        let index = self.cursor % self.patterns.len();
        self.cursor = (index + 1) % self.patterns.len();
        &self.patterns[index]
    }
}

/// Eases and renders a group of fixtures.
#[derive(Debug)]
pub struct Hustler {
    fixtures: Vec<Fixture>,
    /// `(fixture index, axis index)` for every axis, in bank index order.
    axes: Vec<(usize, usize)>,
    easers: Vec<Easer>,
    easing: f64,
    bank: Bank,
    clock: Clock,
    last_render: f64,
}

impl Hustler {
    const PARAMETERS: &'static [&'static str] = &["easing", "bank_name", "bank"];

    pub const DEFAULT_EASING: f64 = 0.1;

    /// All easers start at `initial`, normally the first value of the source.
    pub fn new(fixtures: Vec<Fixture>, initial: f64, clock: Clock) -> Self {
        let axes: Vec<(usize, usize)> = fixtures
            .iter()
            .enumerate()
            .flat_map(|(f, fixture)| (0..fixture.axis_count()).map(move |a| (f, a)))
            .collect();
        let easers = vec![Easer::new(initial); axes.len()];
        let bank = Bank::builtin(BankName::default(), axes.len());
        let last_render = clock.frame_time();
        Self {
            fixtures,
            axes,
            easers,
            easing: Self::DEFAULT_EASING,
            bank,
            clock,
            last_render,
        }
    }

    pub fn with_easing(mut self, easing: f64) -> Self {
        self.easing = easing;
        self
    }

    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    pub fn easers(&self) -> &[Easer] {
        &self.easers
    }

    pub fn easing(&self) -> f64 {
        self.easing
    }

    pub fn bank(&self) -> &Bank {
        &self.bank
    }

    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    /// The span of frame channels covered by this group.
    pub fn channels(&self) -> Option<Range<usize>> {
        let start = self.fixtures.iter().map(|f| f.channels().start).min()?;
        let end = self.fixtures.iter().map(|f| f.channels().end).max()?;
        Some(start..end)
    }

    pub fn render(&mut self, source: &mut SignalSource, trigger: &mut Trigger, frame: &mut DmxFrame) {
        let now = self.clock.frame_time();
        let dt = now - self.last_render;
        self.last_render = now;

        if trigger.trigger() {
            let value = source.get();
            for &index in self.bank.next_pattern() {
                if let Some(easer) = self.easers.get_mut(index) {
                    easer.target = value;
                }
            }
        }

        for (easer, &(f, a)) in self.easers.iter_mut().zip(&self.axes) {
            let value = easer.ease(dt, self.easing);
            self.fixtures[f].set_axis(a, value);
        }

        for fixture in &self.fixtures {
            fixture.render(frame);
        }
    }
}

impl Controllable for Hustler {
    fn kind(&self) -> &'static str {
        "hustler"
    }

    fn parameters(&self) -> &'static [&'static str] {
        Self::PARAMETERS
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "easing" => self.easing = parse_positive(name, value)?,
            "bank_name" => {
                let bank_name: BankName = parse_choice(name, value)?;
                self.bank = Bank::builtin(bank_name, self.axes.len());
            }
            "bank" => {
                self.bank = Bank::custom(parse_index_patterns(name, value, self.axes.len())?);
            }
            _ => return Err(unknown_parameter(self.kind(), name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fixture::{CalibrationCache, FixtureKind},
        signal::ConstantList,
        signal::Rng,
        timing::Rate,
        HustlerError,
    };
    use float_cmp::approx_eq;
    use serde_json::json;

    #[test]
    fn repeated_inexact_steps_land_on_target() {
        let mut easer = Easer::new(0.0);
        easer.target = 1.0;
        for _ in 0..9 {
            easer.ease(1.0, 0.1);
        }
        assert!(easer.current < 1.0);
        assert_eq!(easer.ease(1.0, 0.1), 1.0);
    }

    #[test]
    fn easer_never_moves_away_and_lands_exactly() {
        let mut easer = Easer::new(0.0);
        easer.target = 1.0;
        let mut last_gap = 1.0;
        for step in 1..=4 {
            let current = easer.ease(0.25, 1.0);
            let gap = (easer.target - current).abs();
            assert!(gap <= last_gap);
            last_gap = gap;
            if step < 4 {
                assert!(current < 1.0);
            }
        }
        assert_eq!(easer.current, 1.0);
        easer.ease(0.25, 1.0);
        assert_eq!(easer.current, 1.0);
    }

    #[test]
    fn easer_moves_down_too() {
        let mut easer = Easer::new(2.0);
        easer.target = -1.0;
        assert!(approx_eq!(f64, easer.ease(1.0, 0.5), 1.5, ulps = 2));
        assert_eq!(easer.ease(100.0, 0.5), -1.0);
    }

    #[test]
    fn builtin_banks() {
        let mut single = Bank::builtin(BankName::Single, 3);
        let seen: Vec<Vec<usize>> = (0..4).map(|_| single.next_pattern().to_vec()).collect();
        assert_eq!(seen, vec![vec![0], vec![1], vec![2], vec![0]]);

        let mut two = Bank::builtin(BankName::TwoValue, 5);
        assert_eq!(two.next_pattern(), &[0, 2, 4]);
        assert_eq!(two.next_pattern(), &[1, 3]);
        assert_eq!(two.next_pattern(), &[0, 2, 4]);

        let mut all = Bank::builtin(BankName::All, 2);
        assert_eq!(all.next_pattern(), &[0, 1]);
        assert_eq!(all.next_pattern(), &[0, 1]);

        assert!(Bank::builtin(BankName::Single, 0).next_pattern().is_empty());
    }

    fn dimmers(n: usize) -> Vec<Fixture> {
        let mut cache = CalibrationCache::new();
        (0..n)
            .map(|i| Fixture::new(FixtureKind::Dimmer, i, &mut cache).unwrap())
            .collect()
    }

    #[test]
    fn trigger_fire_sets_the_next_target_and_eases() {
        let (clock, time) = Clock::manual(0.0);
        let mut source: SignalSource =
            ConstantList::new(vec![0.0, 1.0], false, Rng::new_with_seed(1)).unwrap().into();
        let initial = source.get();
        let mut hustler = Hustler::new(dimmers(2), initial, clock.clone()).with_easing(2.0);
        let mut trigger = Trigger::new(Rate::from_hz(1.0).unwrap(), clock.clone());
        let mut frame = DmxFrame::new();

        assert_eq!(initial, 1.0);
        assert_eq!(frame.get(0), Some(0));

        // The first pass fires: axis 0 gets the next value (0.0).
        hustler.render(&mut source, &mut trigger, &mut frame);
        assert_eq!(hustler.easers()[0].target, 0.0);
        assert_eq!(hustler.easers()[1].target, 1.0);
        assert_eq!(frame.get(0), Some(255));

        time.advance(0.25);
        clock.tick();
        hustler.render(&mut source, &mut trigger, &mut frame);
        assert!(approx_eq!(f64, hustler.easers()[0].current, 0.5, ulps = 2));
        assert_eq!(frame.get(0), Some(128));
        assert_eq!(frame.get(1), Some(255));

        time.advance(0.25);
        clock.tick();
        hustler.render(&mut source, &mut trigger, &mut frame);
        assert_eq!(hustler.easers()[0].current, 0.0);
        assert_eq!(frame.get(0), Some(0));
    }

    #[test]
    fn parameters_validate_before_assigning() {
        let (clock, _time) = Clock::manual(0.0);
        let mut hustler = Hustler::new(dimmers(3), 0.0, clock);

        hustler.set_parameter("easing", &json!(0.5)).unwrap();
        assert_eq!(hustler.easing(), 0.5);
        assert!(hustler.set_parameter("easing", &json!(-1.0)).is_err());
        assert_eq!(hustler.easing(), 0.5);

        hustler.set_parameter("bank_name", &json!("two_value")).unwrap();
        assert_eq!(hustler.bank().patterns(), &[vec![0, 2], vec![1]]);

        hustler.set_parameter("bank", &json!([[2], [0, 1]])).unwrap();
        assert_eq!(hustler.bank().patterns(), &[vec![2], vec![0, 1]]);
        assert!(hustler.set_parameter("bank", &json!([[3]])).is_err());
        assert_eq!(hustler.bank().patterns(), &[vec![2], vec![0, 1]]);

        let err = hustler.set_parameter("speed", &json!(1)).unwrap_err();
        assert!(matches!(err, HustlerError::UnknownParameter { .. }));
    }

    #[test]
    fn channel_span_covers_every_fixture() {
        let (clock, _time) = Clock::manual(0.0);
        let mut cache = CalibrationCache::new();
        let fixtures = vec![
            Fixture::new(FixtureKind::GoboSpinna, 450, &mut cache).unwrap(),
            Fixture::new(FixtureKind::RotoQ, 498, &mut cache).unwrap(),
        ];
        let hustler = Hustler::new(fixtures, 0.0, clock);
        assert_eq!(hustler.axis_count(), 3);
        assert_eq!(hustler.channels(), Some(450..500));
    }
}
