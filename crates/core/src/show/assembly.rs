//! Builds the reference show from a [`ShowConfig`].

use midly::num::u4;

use crate::{
    config::ShowConfig,
    fixture::{CalibrationCache, Fixture, FixtureKind},
    organ::ColorGenerator,
    render::{DmxSink, MidiSink},
    signal::{ConstantList, Modulator, Noise, NoiseMode, Operation, Rng, SignalSource, Waveform},
    timing::{Clock, Rate, Trigger},
    Result,
};

use super::{Show, SignalId, TriggerId};

/// Assembles every organist, signal chain, trigger and hustler described by
/// `config`. Calibration and layout errors surface here, before the show runs.
pub fn assemble(
    config: &ShowConfig,
    clock: Clock,
    midi: Box<dyn MidiSink>,
    dmx: Option<Box<dyn DmxSink>>,
) -> Result<Show> {
    config.validate()?;
    let mut show = Show::new(config.framerate, clock, midi, dmx)?;
    let mut builder = Builder {
        rng: match config.seed {
            Some(seed) => Rng::new_with_seed(u128::from(seed)),
            None => Rng::from_entropy(),
        },
        show: &mut show,
        config,
    };

    for (index, channel) in config.organists.iter().enumerate() {
        let generator = ColorGenerator {
            hue: builder.chain("hue", index, 0.0)?,
            saturation: builder.chain("saturation", index, 1.0)?,
            level: builder.chain("lightness", index, 0.5)?,
        };
        let trigger = builder.trigger(index)?;
        builder
            .show
            .add_organist(u4::from_int_lossy(*channel), generator, trigger)?;
    }

    if config.has_fixtures() {
        let n = config.organists.len();
        let mut cache = CalibrationCache::new();

        let rotators = config
            .rotators
            .iter()
            .map(|r| Fixture::new(r.kind, r.address, &mut cache))
            .collect::<Result<Vec<_>>>()?;
        let source = builder.chain("rotation", n, 0.0)?;
        let trigger = builder.trigger(n)?;
        builder
            .show
            .add_hustler("gobo_hustler", rotators, source, trigger, config.easing)?;

        let dimmers = config
            .dimmers
            .iter()
            .map(|address| Fixture::new(FixtureKind::Dimmer, *address, &mut cache))
            .collect::<Result<Vec<_>>>()?;
        let source = builder.chain("level", n + 1, 1.0)?;
        let trigger = builder.trigger(n + 1)?;
        builder
            .show
            .add_hustler("dimmer_hustler", dimmers, source, trigger, config.easing)?;
    }

    tracing::info!(
        organists = config.organists.len(),
        rotators = config.rotators.len(),
        dimmers = config.dimmers.len(),
        entities = show.entity_names().count(),
        "show assembled"
    );
    Ok(show)
}

struct Builder<'a> {
    show: &'a mut Show,
    config: &'a ShowConfig,
    rng: Rng,
}

impl Builder<'_> {
    /// A zero-width gaussian source named `{axis}{index}` wrapped in the
    /// standard chain: a constant-list offset, then an additive waveform.
    fn chain(&mut self, axis: &str, index: usize, center: f64) -> Result<SignalId> {
        let label = |part: &str| format!("{axis}_{part}{index}");
        let clock = self.show.clock().clone();

        let source = SignalSource::named(
            format!("{axis}{index}"),
            Noise::new(NoiseMode::Gaussian, center, 0.0, self.rng.fork()),
        );
        let offsets = SignalSource::named(
            label("offsets"),
            ConstantList::new(vec![0.0], false, self.rng.fork())?,
        );
        let offsets_mod = SignalSource::named(
            label("offsets_mod"),
            Modulator::new(source, offsets, Operation::Add),
        );
        let waveform = SignalSource::named(
            label("waveform"),
            Waveform::new(Rate::from_hz(1.0)?, clock),
        );
        let waveform_mod = SignalSource::named(
            label("waveform_mod"),
            Modulator::new(offsets_mod, waveform, Operation::Add),
        );
        self.show.add_signal(waveform_mod)
    }

    fn trigger(&mut self, index: usize) -> Result<TriggerId> {
        let trigger = Trigger::new(
            Rate::from_bpm(self.config.trigger_bpm)?,
            self.show.clock().clone(),
        );
        self.show.add_trigger(&format!("trigger{index}"), trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        remote::{Command, Response},
        render::{RecordingDmx, RecordingMidi},
        timing::ManualTime,
    };
    use serde_json::json;
    use std::sync::Arc;

    type Harness = (Show, RecordingMidi, RecordingDmx, Arc<ManualTime>);

    fn reference_show(config: &ShowConfig) -> Harness {
        let (clock, time) = Clock::manual(0.0);
        let midi = RecordingMidi::new();
        let dmx = RecordingDmx::new();
        let show = assemble(
            config,
            clock,
            Box::new(midi.clone()),
            Some(Box::new(dmx.clone())),
        )
        .unwrap();
        (show, midi, dmx, time)
    }

    #[test]
    fn registers_the_reference_names() {
        let config = ShowConfig {
            seed: Some(1),
            ..ShowConfig::default()
        };
        let (show, _midi, _dmx, _time) = reference_show(&config);
        let names: Vec<&str> = show.entity_names().collect();
        for expected in [
            "hue0",
            "hue_offsets0",
            "hue_offsets_mod0",
            "hue_waveform0",
            "hue_waveform_mod0",
            "saturation2",
            "lightness_waveform1",
            "trigger0",
            "trigger2",
            "rotation3",
            "rotation_waveform_mod3",
            "trigger3",
            "gobo_hustler",
            "level4",
            "trigger4",
            "dimmer_hustler",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
        // Three chains and a trigger per organist; one chain, trigger and
        // hustler per fixture group.
        assert_eq!(names.len(), 3 * (3 * 5 + 1) + 2 * (5 + 1 + 1));
    }

    #[test]
    fn first_frame_is_red_at_full_saturation() {
        let config = ShowConfig {
            seed: Some(3),
            ..ShowConfig::midi_only()
        };
        let (mut show, midi, dmx, _time) = reference_show(&config);
        show.render();

        let events = midi.events();
        assert_eq!(events.len(), 9);
        let [cc, on, _off] = crate::organ::Color {
            hue: 0.0,
            saturation: 1.0,
            level: 0.5,
        }
        .to_midi();
        assert_eq!(events[0], (u4::from(0), cc));
        assert_eq!(events[1], (u4::from(0), on));
        assert_eq!(dmx.flushes(), 1);
    }

    #[test]
    fn operator_can_retune_interior_nodes() {
        let config = ShowConfig {
            seed: Some(5),
            ..ShowConfig::midi_only()
        };
        let (mut show, _midi, _dmx, _time) = reference_show(&config);

        let response = show.handle(&Command::set("hue_offsets0", "values", json!([0.25])));
        assert!(!response.is_error(), "{response:?}");
        let response = show.handle(&Command::set("hue_waveform0", "amplitude", json!(0.5)));
        assert!(!response.is_error());
        let response =
            show.handle(&Command::set("hue_waveform_mod0", "operation", json!("multiply")));
        assert!(!response.is_error());
        let response = show.handle(&Command::set("hue_waveform0", "colour", json!(1)));
        assert!(response.is_error());
        assert_eq!(
            show.handle(&Command::set("trigger1", "bpm", json!(120))),
            Response::message("Set trigger1.bpm to 120.")
        );
    }

    #[test]
    fn rotators_ease_toward_new_targets() {
        let config = ShowConfig {
            seed: Some(7),
            organists: Vec::new(),
            ..ShowConfig::default()
        };
        let (mut show, _midi, dmx, time) = reference_show(&config);
        show.handle(&Command::set("rotation0", "center", json!(1.0)));
        show.handle(&Command::set("gobo_hustler", "bank_name", json!("all")));
        show.handle(&Command::set("gobo_hustler", "easing", json!(10.0)));

        show.render();
        // Everything still at zero speed: RotoQ center code (slowest forward,
        // the Roto-Q has no in-band stop) and rotation mode 0.
        assert_eq!(dmx.last_frame().get(498), Some(128));
        assert_eq!(dmx.last_frame().get(499), Some(0));

        time.advance(0.5);
        show.render();
        let frame = dmx.last_frame();
        assert!(frame.get(498).unwrap() > 128);
        assert_eq!(frame.get(450), Some(255));
        assert_eq!(frame.get(451), Some(255));
    }

    #[test]
    fn invalid_config_fails_before_running() {
        let config = ShowConfig {
            framerate: -1.0,
            ..ShowConfig::default()
        };
        let (clock, _time) = Clock::manual(0.0);
        assert!(assemble(&config, clock, Box::new(RecordingMidi::new()), None).is_err());
    }
}
