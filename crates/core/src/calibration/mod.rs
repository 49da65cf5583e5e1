//! Calibration of rotator hardware: from sparse speed measurements to a dense
//! lookup table of DMX codes.
//!
//! Rotator speed is nonlinear in the DMX code, often bucketed, and for
//! bidirectional fixtures split into two directions around a stopped
//! position. A [`CalibrationTable`] is built once at show assembly and then
//! queried with [`CalibrationTable::code_for`] on every frame.

use serde::{Deserialize, Serialize};

use crate::{HustlerError, Result};

/// Rotations per second that map to a normalised speed of 1.0.
///
/// This is the maximum speed of the slowest rotator in the rig (the
/// GoboSpinna-driven DHA Varispeed, about 11.1 rpm). Faster rotators accept
/// control signals above 1.0.
pub const UNIT_RATE: f64 = 0.185;

/// Measured `(dmx_code, rotations_per_second)` for the Apollo Roto-Q DMX,
/// forward direction. 128 is the slowest forward code.
pub const ROTO_Q_MEASUREMENTS: &[(u8, f64)] = &[
    (128, 0.00479),
    (137, 0.01),
    (147, 0.0169),
    (157, 0.03),
    (167, 0.0454),
    (177, 0.063),
    (187, 0.0792),
    (197, 0.106),
    (207, 0.1425),
    (217, 0.177),
    (227, 0.242),
    (237, 0.308),
    (242, 0.345),
    (249, 0.3875),
    (255, 0.43),
];

/// Measured forward-direction speeds for the SmartMove DMX. Codes 125..=132
/// are stopped, 124 and 133 are the slowest speeds in each direction.
pub const SMART_MOVE_MEASUREMENTS: &[(u8, f64)] = &[
    (135, 0.00193),
    (145, 0.00270),
    (155, 0.00583),
    (165, 0.0102),
    (175, 0.0175),
    (176, 0.0194),
    (179, 0.0244),
    (181, 0.0306),
    (183, 0.0406),
    (184, 0.0481),
    (185, 0.0604),
    (187, 0.0794),
    (189, 0.0909),
    (191, 0.0972),
    (193, 0.107),
    (195, 0.116),
    (205, 0.141),
    (215, 0.166),
    (225, 0.191),
    (235, 0.223),
    (245, 0.27),
    (249, 0.293),
    (255, 0.344),
];

/// Measured speeds of the DHA Varispeed driven by the GoboSpinna controller.
/// Close to linear, which is why the fixture encoder uses a closed form.
pub const GOBO_SPINNA_MEASUREMENTS: &[(u8, f64)] = &[
    (15, 0.0075),
    (35, 0.0225),
    (55, 0.0377),
    (75, 0.0523),
    (95, 0.0669),
    (115, 0.0825),
    (135, 0.0963),
    (155, 0.111),
    (175, 0.127),
    (195, 0.141),
    (215, 0.156),
    (235, 0.170),
    (255, 0.185),
];

/// Which end of the reverse code range is pinned to the forward table when
/// the two directions have a different number of usable codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorAnchor {
    /// The slowest reverse code mirrors the slowest forward speed; surplus
    /// entries are dropped from the fast end.
    #[default]
    Slowest,
    /// The fastest reverse code mirrors the fastest forward speed; surplus
    /// entries are dropped from the slow end.
    Fastest,
}

/// How to synthesise the reverse direction of a bidirectional rotator from
/// its forward measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    /// Code emitted for zero speed.
    pub center: u8,
    /// Slowest usable reverse code; reverse codes count down from here.
    pub reverse_slowest: u8,
    /// Fastest usable reverse code.
    pub reverse_fastest: u8,
    /// Which end of the reverse range lines up with the forward table.
    pub anchor: MirrorAnchor,
}

/// Built-in rotator calibrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotatorProfile {
    RotoQ,
    SmartMove,
    GoboSpinna,
}

impl RotatorProfile {
    pub fn measurements(self) -> &'static [(u8, f64)] {
        match self {
            Self::RotoQ => ROTO_Q_MEASUREMENTS,
            Self::SmartMove => SMART_MOVE_MEASUREMENTS,
            Self::GoboSpinna => GOBO_SPINNA_MEASUREMENTS,
        }
    }

    pub fn mirror(self) -> Option<Mirror> {
        match self {
            // 0 stops the Roto-Q, 1 is its fastest reverse speed. It has no
            // detent inside 1..=255, so the zero-speed entry at 128 still
            // turns slowly forward.
            Self::RotoQ => Some(Mirror {
                center: 128,
                reverse_slowest: 127,
                reverse_fastest: 1,
                anchor: MirrorAnchor::Slowest,
            }),
            Self::SmartMove => Some(Mirror {
                center: 128,
                reverse_slowest: 124,
                reverse_fastest: 0,
                anchor: MirrorAnchor::Slowest,
            }),
            Self::GoboSpinna => None,
        }
    }

    pub fn build_table(self) -> Result<CalibrationTable> {
        CalibrationTable::build(self.measurements(), UNIT_RATE, self.mirror().as_ref())
    }
}

/// Immutable, sorted mapping from normalised speed to DMX code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TablePairs")]
pub struct CalibrationTable {
    signal: Vec<f64>,
    code: Vec<u8>,
}

/// Unchecked wire form; deserialised tables go through
/// [`CalibrationTable::from_pairs`].
#[derive(Deserialize)]
struct TablePairs {
    signal: Vec<f64>,
    code: Vec<u8>,
}

impl TryFrom<TablePairs> for CalibrationTable {
    type Error = HustlerError;

    fn try_from(pairs: TablePairs) -> Result<Self> {
        Self::from_pairs(pairs.signal, pairs.code)
    }
}

impl CalibrationTable {
    /// Builds a table from measured `(code, rate)` pairs sorted by code.
    ///
    /// Rates are divided by `unit_rate`, interpolated linearly for every code
    /// in the measured range and, with a [`Mirror`], reflected into the
    /// reverse direction around an explicit zero-speed entry. Entries with a
    /// repeated speed keep only their first (lowest index) occurrence.
    pub fn build(points: &[(u8, f64)], unit_rate: f64, mirror: Option<&Mirror>) -> Result<Self> {
        if points.is_empty() {
            return Err(HustlerError::CalibrationOrdering(
                "no measurements supplied".to_string(),
            ));
        }
        if !(unit_rate.is_finite() && unit_rate > 0.0) {
            return Err(HustlerError::InvalidRate(format!(
                "unit rate must be positive and finite, got {unit_rate}"
            )));
        }
        if let Some(pair) = points.windows(2).find(|pair| pair[1].0 < pair[0].0) {
            return Err(HustlerError::CalibrationOrdering(format!(
                "measurements must be sorted by code; {} follows {}",
                pair[1].0, pair[0].0
            )));
        }
        if let Some((code, rate)) = points.iter().find(|(_, rate)| !rate.is_finite()) {
            return Err(HustlerError::CalibrationOrdering(format!(
                "measured rate {rate} at code {code} is not finite"
            )));
        }

        let normalized: Vec<(u8, f64)> = points
            .iter()
            .map(|&(code, rate)| (code, rate / unit_rate))
            .collect();
        let forward = interpolate(&normalized);

        let entries = match mirror {
            Some(mirror) => mirrored(&forward, mirror),
            None => forward,
        };

        let mut signal = Vec::with_capacity(entries.len());
        let mut code = Vec::with_capacity(entries.len());
        for (s, c) in entries {
            if signal.last() == Some(&s) {
                continue;
            }
            signal.push(s);
            code.push(c);
        }
        Self::from_pairs(signal, code)
    }

    /// Wraps precomputed parallel arrays, checking that `signal` is sorted.
    pub fn from_pairs(signal: Vec<f64>, code: Vec<u8>) -> Result<Self> {
        if signal.is_empty() || signal.len() != code.len() {
            return Err(HustlerError::CalibrationOrdering(format!(
                "expected matching non-empty arrays, got {} signals and {} codes",
                signal.len(),
                code.len()
            )));
        }
        if let Some(i) = signal.windows(2).position(|pair| !(pair[0] <= pair[1])) {
            return Err(HustlerError::CalibrationOrdering(format!(
                "signal[{}] = {} is followed by {}",
                i,
                signal[i],
                signal[i + 1]
            )));
        }
        Ok(Self { signal, code })
    }

    /// The code whose table speed is nearest to `signal`.
    ///
    /// Values beyond either end of the table get the endpoint code. Ties go to
    /// the lower index. NaN is treated as zero speed.
    pub fn code_for(&self, signal: f64) -> u8 {
        let signal = if signal.is_nan() { 0.0 } else { signal };
        let last = self.signal.len() - 1;
        let index = self.signal.partition_point(|s| *s < signal);
        if index == 0 {
            return self.code[0];
        }
        if index > last {
            return self.code[last];
        }
        let below = signal - self.signal[index - 1];
        let above = self.signal[index] - signal;
        if below <= above {
            self.code[index - 1]
        } else {
            self.code[index]
        }
    }

    pub fn signals(&self) -> &[f64] {
        &self.signal
    }

    pub fn codes(&self) -> &[u8] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// `(signal, code)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, u8)> + '_ {
        self.signal.iter().copied().zip(self.code.iter().copied())
    }

    /// Largest speed in the table.
    pub fn max_signal(&self) -> f64 {
        self.signal[self.signal.len() - 1]
    }
}

/// One `(speed, code)` entry per integer code between the first and last
/// measured code, using the secant slope of the bracketing measurements.
fn interpolate(points: &[(u8, f64)]) -> Vec<(f64, u8)> {
    let first = points[0].0;
    let last = points[points.len() - 1].0;
    let mut dense = Vec::with_capacity(usize::from(last - first) + 1);
    let mut segment = 0;

    for code in first..=last {
        while segment + 1 < points.len() && points[segment + 1].0 <= code {
            segment += 1;
        }
        let (code0, rate0) = points[segment];
        let rate = match points.get(segment + 1) {
            Some(&(code1, rate1)) if code1 > code0 => {
                let slope = (rate1 - rate0) / f64::from(code1 - code0);
                rate0 + f64::from(code - code0) * slope
            }
            _ => rate0,
        };
        dense.push((rate, code));
    }
    dense
}

/// Reverse entries (negated speeds, count-down codes), the zero-speed entry,
/// then the forward entries.
fn mirrored(forward: &[(f64, u8)], mirror: &Mirror) -> Vec<(f64, u8)> {
    let n = forward.len() as i32;
    let slowest = i32::from(mirror.reverse_slowest);
    let fastest = i32::from(mirror.reverse_fastest);

    let mut reverse: Vec<(f64, u8)> = forward
        .iter()
        .enumerate()
        .filter_map(|(i, &(rate, _))| {
            let i = i as i32;
            let code = match mirror.anchor {
                MirrorAnchor::Slowest => slowest - i,
                MirrorAnchor::Fastest => fastest + (n - 1 - i),
            };
            (fastest..=slowest)
                .contains(&code)
                .then(|| (-rate, code as u8))
        })
        .collect();
    let dropped = forward.len() - reverse.len();
    if dropped > 0 {
        tracing::debug!(
            dropped,
            anchor = ?mirror.anchor,
            "reverse range is shorter than the forward table"
        );
    }
    reverse.reverse();

    let mut entries = reverse;
    entries.push((0.0, mirror.center));
    entries.extend_from_slice(forward);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn deserialised_tables_keep_the_ordering_check() {
        let table: CalibrationTable =
            serde_json::from_str(r#"{"signal":[-1.0,0.0,2.0],"code":[1,128,255]}"#).unwrap();
        assert_eq!(table.code_for(0.1), 128);

        let unsorted = serde_json::from_str::<CalibrationTable>(
            r#"{"signal":[2.0,1.0],"code":[1,2]}"#,
        );
        assert!(unsorted.is_err());
        let empty = serde_json::from_str::<CalibrationTable>(r#"{"signal":[],"code":[]}"#);
        assert!(empty.is_err());
        let ragged = serde_json::from_str::<CalibrationTable>(r#"{"signal":[0.0],"code":[]}"#);
        assert!(ragged.is_err());
    }

    fn assert_well_formed(table: &CalibrationTable) {
        assert!(!table.is_empty());
        assert!(table.signals().windows(2).all(|pair| pair[0] <= pair[1]));
        for (i, (signal, code)) in table.iter().enumerate() {
            assert_eq!(table.code_for(signal), code, "index {i}");
        }
    }

    #[test]
    fn builtin_profiles_are_well_formed() {
        for profile in [
            RotatorProfile::RotoQ,
            RotatorProfile::SmartMove,
            RotatorProfile::GoboSpinna,
        ] {
            let table = profile.build_table().unwrap();
            assert_well_formed(&table);
        }
    }

    #[test]
    fn interpolates_every_code_in_the_measured_range() {
        let table = CalibrationTable::build(ROTO_Q_MEASUREMENTS, 1.0, None).unwrap();
        assert_eq!(table.len(), 128);
        assert_eq!(table.codes()[0], 128);
        assert_eq!(table.codes()[127], 255);
        // 129 lies one ninth of the way from 128 to 137.
        assert!(approx_eq!(
            f64,
            table.signals()[1],
            0.00479 + (0.01 - 0.00479) / 9.0,
            epsilon = 1e-12
        ));
        assert!(approx_eq!(f64, table.signals()[9], 0.01, epsilon = 1e-12));
    }

    #[test]
    fn two_point_roto_q_table() {
        let mirror = RotatorProfile::RotoQ.mirror().unwrap();
        let table =
            CalibrationTable::build(&[(128, 0.00479), (255, 0.43)], UNIT_RATE, Some(&mirror)).unwrap();
        assert_well_formed(&table);

        assert_eq!(table.code_for(0.0), mirror.center);
        assert_eq!(table.code_for(0.43 / UNIT_RATE), 255);
        assert_eq!(table.code_for(table.max_signal() * 10.0), 255);

        let reverse = table.code_for(-0.5);
        assert!(reverse < mirror.center);
        assert!(reverse >= 1);
        // The fastest reverse entry never reaches the stop code.
        assert_eq!(table.code_for(-100.0), 1);
    }

    #[test]
    fn surplus_forward_entry_is_dropped_from_the_fast_end() {
        let mirror = RotatorProfile::RotoQ.mirror().unwrap();
        let table = RotatorProfile::RotoQ.build_table().unwrap();
        // 128 forward codes, 127 reverse codes and the zero entry.
        assert_eq!(table.len(), 128 + 127 + 1);
        assert_eq!(table.codes()[0], 1);
        assert_eq!(table.codes()[126], 127);
        assert_eq!(table.codes()[127], mirror.center);
        // Slowest speeds mirror each other.
        assert_eq!(table.signals()[126], -table.signals()[128]);
        assert!(!table.codes().contains(&0));
    }

    #[test]
    fn fastest_anchor_drops_from_the_slow_end() {
        let mirror = Mirror {
            anchor: MirrorAnchor::Fastest,
            ..RotatorProfile::RotoQ.mirror().unwrap()
        };
        let table = CalibrationTable::build(ROTO_Q_MEASUREMENTS, UNIT_RATE, Some(&mirror)).unwrap();
        assert_well_formed(&table);
        assert_eq!(table.codes()[0], 1);
        assert_eq!(table.signals()[0], -table.max_signal());
        assert_eq!(table.len(), 128 + 127 + 1);
    }

    #[test]
    fn repeated_speeds_keep_the_first_entry() {
        let table =
            CalibrationTable::build(&[(10, 0.5), (12, 0.5), (14, 1.0)], 1.0, None).unwrap();
        assert_eq!(table.signals(), &[0.5, 0.75, 1.0]);
        assert_eq!(table.codes(), &[10, 13, 14]);
    }

    #[test]
    fn duplicate_codes_do_not_divide_by_zero() {
        let table =
            CalibrationTable::build(&[(10, 0.1), (10, 0.2), (12, 0.4)], 1.0, None).unwrap();
        assert_well_formed(&table);
        assert_eq!(table.codes(), &[10, 11, 12]);
    }

    #[test]
    fn non_monotonic_measurements_fail_the_post_condition() {
        let err = CalibrationTable::build(&[(10, 0.5), (20, 0.2)], 1.0, None).unwrap_err();
        assert!(matches!(err, HustlerError::CalibrationOrdering(_)));
    }

    #[test]
    fn unsorted_codes_are_rejected() {
        let err = CalibrationTable::build(&[(20, 0.1), (10, 0.2)], 1.0, None).unwrap_err();
        assert!(matches!(err, HustlerError::CalibrationOrdering(_)));
        assert!(CalibrationTable::build(&[], 1.0, None).is_err());
    }

    #[test]
    fn lookup_rounds_to_nearest_with_ties_down() {
        let table = CalibrationTable::from_pairs(vec![0.0, 1.0, 2.0], vec![10, 20, 30]).unwrap();
        assert_eq!(table.code_for(-5.0), 10);
        assert_eq!(table.code_for(0.4), 10);
        assert_eq!(table.code_for(0.5), 10);
        assert_eq!(table.code_for(0.6), 20);
        assert_eq!(table.code_for(1.5), 20);
        assert_eq!(table.code_for(9.0), 30);
        assert_eq!(table.code_for(f64::NAN), 10);
    }

    #[test]
    fn from_pairs_checks_shape_and_order() {
        assert!(CalibrationTable::from_pairs(vec![0.0, 1.0], vec![1]).is_err());
        assert!(CalibrationTable::from_pairs(vec![1.0, 0.0], vec![1, 2]).is_err());
        assert!(CalibrationTable::from_pairs(vec![], vec![]).is_err());
    }
}
