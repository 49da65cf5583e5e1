//! Plays colors on a MIDI color organ.
//!
//! Each color becomes three messages on the organist's channel: a control
//! change carrying saturation, then a note on/off pair whose key is the hue
//! (offset by half a turn so red sits mid-keyboard) and whose velocity is
//! the level.

use midly::{
    num::{u4, u7},
    MidiMessage,
};

use crate::{
    render::MidiSink,
    show::{SignalId, TriggerId},
    signal::{Constrain, SignalSource},
    timing::Trigger,
    Result,
};

/// Controller number that carries saturation.
pub const CC_SATURATION: u8 = 11;

/// Maps `[0, 1]` onto `0..=127`; out of range input saturates.
pub fn unit_to_7bit(value: f64) -> u7 {
    let scaled = (value * 128.0).floor().clamp(0.0, 127.0);
    u7::from_int_lossy(scaled as u8)
}

/// A color in hue/saturation/value, every component in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub hue: f64,
    pub saturation: f64,
    pub level: f64,
}

impl Color {
    /// Control change, note on, note off.
    pub fn to_midi(self) -> [MidiMessage; 3] {
        let key = unit_to_7bit((self.hue + 0.5) % 1.0);
        let vel = unit_to_7bit(self.level);
        [
            MidiMessage::Controller {
                controller: u7::from_int_lossy(CC_SATURATION),
                value: unit_to_7bit(self.saturation),
            },
            MidiMessage::NoteOn { key, vel },
            MidiMessage::NoteOff { key, vel },
        ]
    }
}

/// Three signal trees read as one color. Hue wraps around the unit circle;
/// saturation and level fold back into range.
#[derive(Debug, Clone, Copy)]
pub struct ColorGenerator {
    pub hue: SignalId,
    pub saturation: SignalId,
    pub level: SignalId,
}

impl ColorGenerator {
    pub fn color(&self, signals: &mut [SignalSource]) -> Color {
        Color {
            hue: signals[self.hue.index()].get_constrained(0.0, 1.0, Constrain::Wrap),
            saturation: signals[self.saturation.index()].get_constrained(0.0, 1.0, Constrain::Fold),
            level: signals[self.level.index()].get_constrained(0.0, 1.0, Constrain::Fold),
        }
    }
}

/// Sends a color on its channel whenever its trigger fires.
#[derive(Debug, Clone)]
pub struct ColorOrganist {
    channel: u4,
    generator: ColorGenerator,
    trigger: TriggerId,
}

impl ColorOrganist {
    pub fn new(channel: u4, generator: ColorGenerator, trigger: TriggerId) -> Self {
        Self {
            channel,
            generator,
            trigger,
        }
    }

    pub fn channel(&self) -> u4 {
        self.channel
    }

    pub fn trigger(&self) -> TriggerId {
        self.trigger
    }

    /// Plays one color if the trigger is due. Returns whether it played.
    pub fn play(
        &self,
        signals: &mut [SignalSource],
        triggers: &mut [Trigger],
        sink: &mut dyn MidiSink,
    ) -> Result<bool> {
        if !triggers[self.trigger.index()].trigger() {
            return Ok(false);
        }
        let color = self.generator.color(signals);
        tracing::trace!(channel = self.channel.as_int(), ?color, "organist plays");
        for message in color.to_midi() {
            sink.send(self.channel, message)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        render::RecordingMidi,
        signal::Constant,
        timing::{Clock, Rate},
    };

    #[test]
    fn seven_bit_conversion_saturates() {
        assert_eq!(unit_to_7bit(0.0), u7::from(0));
        assert_eq!(unit_to_7bit(0.5), u7::from(64));
        assert_eq!(unit_to_7bit(0.999), u7::from(127));
        assert_eq!(unit_to_7bit(1.0), u7::from(127));
        assert_eq!(unit_to_7bit(-0.2), u7::from(0));
    }

    #[test]
    fn red_lands_mid_keyboard() {
        let [cc, on, off] = Color {
            hue: 0.0,
            saturation: 1.0,
            level: 0.5,
        }
        .to_midi();
        assert_eq!(
            cc,
            MidiMessage::Controller {
                controller: u7::from(11),
                value: u7::from(127)
            }
        );
        assert_eq!(
            on,
            MidiMessage::NoteOn {
                key: u7::from(64),
                vel: u7::from(64)
            }
        );
        assert_eq!(
            off,
            MidiMessage::NoteOff {
                key: u7::from(64),
                vel: u7::from(64)
            }
        );
    }

    #[test]
    fn generator_constrains_each_axis() {
        let mut signals: Vec<SignalSource> = vec![
            Constant::new(1.25).into(),
            Constant::new(1.25).into(),
            Constant::new(-0.25).into(),
        ];
        let generator = ColorGenerator {
            hue: SignalId::new(0),
            saturation: SignalId::new(1),
            level: SignalId::new(2),
        };
        let color = generator.color(&mut signals);
        assert_eq!(color.hue, 0.25);
        assert_eq!(color.saturation, 0.75);
        assert_eq!(color.level, 0.25);
    }

    #[test]
    fn plays_only_when_the_trigger_fires() {
        let (clock, time) = Clock::manual(0.0);
        let mut signals: Vec<SignalSource> = vec![
            Constant::new(0.0).into(),
            Constant::new(1.0).into(),
            Constant::new(1.0).into(),
        ];
        let mut triggers = vec![Trigger::new(Rate::from_hz(1.0).unwrap(), clock.clone())];
        let organist = ColorOrganist::new(
            u4::from(5),
            ColorGenerator {
                hue: SignalId::new(0),
                saturation: SignalId::new(1),
                level: SignalId::new(2),
            },
            TriggerId::new(0),
        );
        let recording = RecordingMidi::new();
        let mut sink = recording.clone();

        assert!(organist.play(&mut signals, &mut triggers, &mut sink).unwrap());
        assert!(!organist.play(&mut signals, &mut triggers, &mut sink).unwrap());
        time.advance(1.0);
        clock.tick();
        assert!(organist.play(&mut signals, &mut triggers, &mut sink).unwrap());

        let events = recording.events();
        assert_eq!(events.len(), 6);
        assert!(events.iter().all(|(channel, _)| *channel == u4::from(5)));
    }
}
