//! The show runtime: entity ownership, the command surface and the frame
//! loop.
//!
//! A [`Show`] owns every signal tree, trigger, hustler and organist, and is
//! the only thing that mutates them. [`Show::run`] interleaves render passes,
//! fired by a live-time trigger at the configured framerate, with commands
//! taken from a [`ShowEndpoint`] in whatever time is left before the next
//! frame.

mod assembly;

pub use assembly::assemble;

use std::{ops::Range, time::Duration};

use midly::num::u4;
use serde_json::Value;

use crate::{
    control::{parse_bool, Controllable, Registry},
    fixture::{check_layout, DmxFrame, Fixture},
    hustler::Hustler,
    organ::{ColorGenerator, ColorOrganist},
    remote::{Command, Poll, Request, Response, ShowEndpoint},
    render::{DmxSink, MidiSink},
    signal::SignalSource,
    timing::{Clock, Rate, Trigger},
    HustlerError, Result,
};

/// Fraction of the time left before the next frame spent waiting for a
/// command.
pub const COMMAND_WAIT_FRACTION: f64 = 0.95;

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident),*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(usize);

            impl $name {
                pub(crate) fn new(index: usize) -> Self {
                    Self(index)
                }

                pub fn index(self) -> usize {
                    self.0
                }
            }
        )*
    };
}

entity_id!(
    /// Index of a root signal tree owned by a [`Show`].
    SignalId,
    /// Index of a trigger owned by a [`Show`].
    TriggerId,
    /// Index of a hustler owned by a [`Show`].
    HustlerId
);

/// What a registered name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKey {
    /// A named node somewhere inside this root tree.
    Signal(SignalId),
    Trigger(TriggerId),
    Hustler(HustlerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug)]
struct HustlerSlot {
    name: String,
    hustler: Hustler,
    source: SignalId,
    trigger: TriggerId,
}

pub struct Show {
    state: ShowState,
    clock: Clock,
    render_trigger: Trigger,
    signals: Vec<SignalSource>,
    triggers: Vec<Trigger>,
    hustlers: Vec<HustlerSlot>,
    organists: Vec<ColorOrganist>,
    registry: Registry<EntityKey>,
    frame: DmxFrame,
    midi: Box<dyn MidiSink>,
    dmx: Option<Box<dyn DmxSink>>,
    debug: bool,
    frames_rendered: u64,
}

impl Show {
    pub fn new(
        framerate: f64,
        clock: Clock,
        midi: Box<dyn MidiSink>,
        dmx: Option<Box<dyn DmxSink>>,
    ) -> Result<Self> {
        let render_trigger = Trigger::live(Rate::from_hz(framerate)?, clock.clone());
        Ok(Self {
            state: ShowState::Idle,
            clock,
            render_trigger,
            signals: Vec::new(),
            triggers: Vec::new(),
            hustlers: Vec::new(),
            organists: Vec::new(),
            registry: Registry::new(),
            frame: DmxFrame::new(),
            midi,
            dmx,
            debug: false,
            frames_rendered: 0,
        })
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn state(&self) -> ShowState {
        self.state
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn frame(&self) -> &DmxFrame {
        &self.frame
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn framerate(&self) -> f64 {
        self.render_trigger.rate().hz()
    }

    /// Registered entity names in lexical order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.registry.names()
    }

    /// Takes ownership of a signal tree and registers every named node in
    /// it. Nothing is registered if any name is rejected.
    pub fn add_signal(&mut self, source: impl Into<SignalSource>) -> Result<SignalId> {
        let source = source.into();
        let names = source.names();
        for (i, name) in names.iter().enumerate() {
            self.registry.check_available(name)?;
            if names[..i].contains(name) {
                return Err(HustlerError::DuplicateEntity(name.clone()));
            }
        }
        let id = SignalId::new(self.signals.len());
        for name in names {
            self.registry.register(name, EntityKey::Signal(id))?;
        }
        self.signals.push(source);
        Ok(id)
    }

    pub fn add_trigger(&mut self, name: &str, trigger: Trigger) -> Result<TriggerId> {
        let id = TriggerId::new(self.triggers.len());
        self.registry.register(name, EntityKey::Trigger(id))?;
        self.triggers.push(trigger);
        Ok(id)
    }

    pub fn add_organist(
        &mut self,
        channel: u4,
        generator: ColorGenerator,
        trigger: TriggerId,
    ) -> Result<()> {
        for id in [generator.hue, generator.saturation, generator.level] {
            self.check_signal(id)?;
        }
        self.check_trigger(trigger)?;
        self.organists
            .push(ColorOrganist::new(channel, generator, trigger));
        Ok(())
    }

    /// Registers a hustler driving `fixtures` from `source`. Its easers start
    /// at the source's first value.
    pub fn add_hustler(
        &mut self,
        name: &str,
        fixtures: Vec<Fixture>,
        source: SignalId,
        trigger: TriggerId,
        easing: f64,
    ) -> Result<HustlerId> {
        self.check_signal(source)?;
        self.check_trigger(trigger)?;
        self.registry.check_available(name)?;
        check_layout(
            self.hustlers
                .iter()
                .flat_map(|slot| slot.hustler.fixtures())
                .chain(&fixtures),
        )?;

        let initial = self.signals[source.index()].get();
        let hustler = Hustler::new(fixtures, initial, self.clock.clone()).with_easing(easing);
        let id = HustlerId::new(self.hustlers.len());
        self.registry.register(name, EntityKey::Hustler(id))?;
        self.hustlers.push(HustlerSlot {
            name: name.to_string(),
            hustler,
            source,
            trigger,
        });
        Ok(id)
    }

    pub fn signal_mut(&mut self, id: SignalId) -> Option<&mut SignalSource> {
        self.signals.get_mut(id.index())
    }

    pub fn trigger_mut(&mut self, id: TriggerId) -> Option<&mut Trigger> {
        self.triggers.get_mut(id.index())
    }

    pub fn hustler(&self, id: HustlerId) -> Option<&Hustler> {
        self.hustlers.get(id.index()).map(|slot| &slot.hustler)
    }

    /// Resolves a registered name to its controllable entity.
    pub fn entity_mut(&mut self, name: &str) -> Result<&mut dyn Controllable> {
        let key = *self.registry.get(name)?;
        let entity: Option<&mut dyn Controllable> = match key {
            EntityKey::Signal(id) => self
                .signals
                .get_mut(id.index())
                .and_then(|root| root.find_mut(name))
                .map(|node| node as &mut dyn Controllable),
            EntityKey::Trigger(id) => self
                .triggers
                .get_mut(id.index())
                .map(|trigger| trigger as &mut dyn Controllable),
            EntityKey::Hustler(id) => self
                .hustlers
                .get_mut(id.index())
                .map(|slot| &mut slot.hustler as &mut dyn Controllable),
        };
        entity.ok_or_else(|| HustlerError::UnknownEntity(name.to_string()))
    }

    /// Sets one parameter of a registered entity.
    pub fn set_parameter(&mut self, entity: &str, parameter: &str, value: &Value) -> Result<()> {
        self.entity_mut(entity)?
            .set_parameter(parameter, value)
            .map_err(|err| match err {
                HustlerError::UnknownParameter { parameter, .. } => {
                    HustlerError::UnknownParameter {
                        entity: entity.to_string(),
                        parameter,
                    }
                }
                other => other,
            })
    }

    /// Applies one command and returns its response. Errors propagate.
    pub fn process_command(&mut self, command: &Command) -> Result<Response> {
        if self.debug {
            tracing::info!(?command, "handling command");
        } else {
            tracing::debug!(?command, "handling command");
        }
        match command.request()? {
            Request::Stop => {
                self.stop();
                Ok(Response::message("Show is stopping."))
            }
            Request::List => {
                let names: Vec<&str> = self.entity_names().collect();
                Ok(Response::message(format!(
                    "Show entities: {}",
                    names.join(", ")
                )))
            }
            Request::Debug(value) => {
                self.debug = parse_bool("debug", value)?;
                Ok(Response::message(format!("Debug: {}", self.debug)))
            }
            Request::Set {
                entity,
                parameter,
                value,
            } => {
                self.set_parameter(entity, parameter, value)?;
                Ok(Response::message(format!("Set {entity}.{parameter} to {value}.")))
            }
        }
    }

    /// Like [`Show::process_command`], with failures turned into `error`
    /// responses.
    pub fn handle(&mut self, command: &Command) -> Response {
        match self.process_command(command) {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(%err, command = %command.command_type, "command failed");
                Response::error(err.to_string())
            }
        }
    }

    pub fn stop(&mut self) {
        if self.state != ShowState::Stopped {
            tracing::info!(frames = self.frames_rendered, "show stopping");
        }
        self.state = ShowState::Stopped;
    }

    /// One render pass: latch the frame time, play every organist, render
    /// every hustler into the frame and flush it.
    pub fn render(&mut self) {
        self.clock.tick();

        for organist in &self.organists {
            if let Err(err) = organist.play(&mut self.signals, &mut self.triggers, self.midi.as_mut()) {
                tracing::error!(%err, channel = organist.channel().as_int(), "midi send failed");
            }
        }

        for slot in &mut self.hustlers {
            let (Some(source), Some(trigger)) = (
                self.signals.get_mut(slot.source.index()),
                self.triggers.get_mut(slot.trigger.index()),
            ) else {
                continue;
            };
            slot.hustler.render(source, trigger, &mut self.frame);
            if self.debug {
                if let Some(channels) = slot.hustler.channels() {
                    tracing::info!(
                        hustler = %slot.name,
                        start = channels.start,
                        values = ?self.frame.range(channels.clone()),
                        "dmx"
                    );
                }
            }
        }

        if let Some(dmx) = self.dmx.as_mut() {
            if let Err(err) = dmx.flush(&self.frame) {
                tracing::error!(%err, "dmx flush failed");
            }
        }

        self.frames_rendered += 1;
        tracing::trace!(frame = self.frames_rendered, "rendered");
    }

    /// Runs the frame loop until a `stop` command arrives.
    pub fn run(&mut self, endpoint: &ShowEndpoint) {
        if self.state == ShowState::Stopped {
            return;
        }
        self.state = ShowState::Running;
        tracing::info!(framerate = self.framerate(), "show running");
        self.clock.tick();

        let mut transport_closed = false;
        while self.state == ShowState::Running {
            if self.render_trigger.trigger() {
                self.render();
                continue;
            }

            let wait = self.command_wait();
            if transport_closed {
                std::thread::sleep(wait);
                continue;
            }
            match endpoint.poll(wait) {
                Poll::Command(command) => {
                    let response = self.handle(&command);
                    endpoint.respond(response);
                }
                Poll::Timeout => {}
                Poll::Closed => {
                    tracing::info!("control channel closed; rendering without commands");
                    transport_closed = true;
                }
            }
        }
    }

    /// How long to block on the command queue before the next frame is due.
    fn command_wait(&self) -> Duration {
        let remaining = self.render_trigger.time_until_trigger() * COMMAND_WAIT_FRACTION;
        if remaining.is_finite() && remaining > 0.0 {
            Duration::from_secs_f64(remaining)
        } else {
            Duration::ZERO
        }
    }

    /// The frame channels covered by each hustler.
    pub fn hustler_channels(&self) -> Vec<(&str, Range<usize>)> {
        self.hustlers
            .iter()
            .filter_map(|slot| {
                slot.hustler
                    .channels()
                    .map(|channels| (slot.name.as_str(), channels))
            })
            .collect()
    }

    fn check_signal(&self, id: SignalId) -> Result<()> {
        if id.index() < self.signals.len() {
            Ok(())
        } else {
            Err(HustlerError::msg(format!("no signal with index {}", id.index())))
        }
    }

    fn check_trigger(&self, id: TriggerId) -> Result<()> {
        if id.index() < self.triggers.len() {
            Ok(())
        } else {
            Err(HustlerError::msg(format!("no trigger with index {}", id.index())))
        }
    }
}

impl std::fmt::Debug for Show {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Show")
            .field("state", &self.state)
            .field("entities", &self.registry.len())
            .field("organists", &self.organists.len())
            .field("hustlers", &self.hustlers.len())
            .field("frames_rendered", &self.frames_rendered)
            .finish()
    }
}
