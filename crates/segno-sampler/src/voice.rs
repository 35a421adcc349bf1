//! Pad voices: lock-free control cells and the render-side playback unit.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use segno_core::{AtomicCounter, AtomicFlag, AtomicLevel, BlockCtx, StateCell};
use segno_track::transport::step_per_frame;
use segno_track::SampleBuffer;
use serde::{Deserialize, Serialize};

use crate::character::{CharacterChain, CharacterProfile};

/// Number of pads on the performance surface.
pub const PAD_COUNT: usize = 20;

/// First pad index that routes into a track strip by default.
pub const TRACK_PAD_BASE: usize = 16;

/// Fade length applied when a voice stops or restarts.
pub const DECLICK_SECS: f64 = 0.003;

/// How a pad responds to trigger and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PadMode {
    /// Trigger restarts from the top and plays to the end; release is
    /// ignored.
    #[default]
    OneShot,
    /// Trigger starts, release stops.
    Gate,
    /// Trigger alternately starts and stops; release is ignored.
    Toggle,
}

impl From<PadMode> for u8 {
    fn from(mode: PadMode) -> u8 {
        match mode {
            PadMode::OneShot => 0,
            PadMode::Gate => 1,
            PadMode::Toggle => 2,
        }
    }
}

impl From<u8> for PadMode {
    fn from(raw: u8) -> PadMode {
        match raw {
            1 => PadMode::Gate,
            2 => PadMode::Toggle,
            _ => PadMode::OneShot,
        }
    }
}

/// Pads sharing a choke group silence each other: when one triggers,
/// every other member fades out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChokeGroup(pub u8);

/// Where a voice's audio lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoiceRoute {
    /// The shared sampler bus feeding the master section.
    #[default]
    SamplerBus,
    /// A track strip's aux input, by track index.
    Track(usize),
}

pub(crate) fn encode_route(route: VoiceRoute) -> u64 {
    match route {
        VoiceRoute::SamplerBus => 0,
        VoiceRoute::Track(index) => 1 + index as u64,
    }
}

pub(crate) fn decode_route(raw: u64) -> VoiceRoute {
    match raw {
        0 => VoiceRoute::SamplerBus,
        n => VoiceRoute::Track((n - 1) as usize),
    }
}

pub(crate) fn encode_choke(group: Option<ChokeGroup>) -> u64 {
    match group {
        None => 0,
        Some(ChokeGroup(group)) => 1 + u64::from(group),
    }
}

pub(crate) fn decode_choke(raw: u64) -> Option<ChokeGroup> {
    match raw {
        0 => None,
        n => Some(ChokeGroup((n - 1) as u8)),
    }
}

/// Control-side state for one pad, shared with the renderer.
///
/// Start and stop travel as an epoch bump plus the desired state in
/// `on`, written before the bump. A renderer that observes the new
/// epoch therefore also observes the state, and when several commands
/// land within one block the last writer's intent is the one applied.
pub struct VoiceUnit {
    pub(crate) sample: ArcSwapOption<SampleBuffer>,
    pub(crate) mode: StateCell<PadMode>,
    /// 0 = no group, otherwise 1 + group number.
    pub(crate) choke: AtomicCounter,
    /// 0 = sampler bus, otherwise 1 + track index.
    pub(crate) route: AtomicCounter,
    /// 0 = no character, otherwise a [`CharacterProfile`] id.
    pub(crate) profile: AtomicCounter,
    /// Bumped on every start or stop command.
    pub(crate) epoch: AtomicCounter,
    /// Desired sounding state as of the latest epoch bump.
    pub(crate) on: AtomicFlag,
    pub(crate) gain: AtomicLevel,
    pub(crate) pitch: AtomicLevel,
    /// Velocity of the most recent trigger.
    pub(crate) velocity: AtomicLevel,
    pub(crate) looping: AtomicFlag,
    /// Control-side latch for gate and toggle pads.
    pub(crate) latched: AtomicFlag,
    /// Published by the renderer: whether the voice is audible.
    pub(crate) active: AtomicFlag,
}

impl VoiceUnit {
    pub(crate) fn new() -> Self {
        Self {
            sample: ArcSwapOption::empty(),
            mode: StateCell::new(PadMode::OneShot),
            choke: AtomicCounter::default(),
            route: AtomicCounter::default(),
            profile: AtomicCounter::default(),
            epoch: AtomicCounter::default(),
            on: AtomicFlag::default(),
            gain: AtomicLevel::new(1.0),
            pitch: AtomicLevel::new(1.0),
            velocity: AtomicLevel::new(1.0),
            looping: AtomicFlag::default(),
            latched: AtomicFlag::default(),
            active: AtomicFlag::default(),
        }
    }
}

/// Render-side playback state for one pad.
pub(crate) struct VoiceRt {
    shared: Arc<VoiceUnit>,
    /// Buffer the voice is reading. Swapped only at block boundaries;
    /// an audible voice fades on the old buffer before switching.
    held: Option<Arc<SampleBuffer>>,
    position: f64,
    sounding: bool,
    velocity: f32,
    fade_gain: f32,
    fade_step: f32,
    /// Come back from the top once the running fade reaches silence.
    pending_restart: bool,
    seen_epoch: u64,
    seen_profile: u64,
    character: Option<CharacterChain>,
}

impl VoiceRt {
    pub(crate) fn new(shared: Arc<VoiceUnit>) -> Self {
        Self {
            shared,
            held: None,
            position: 0.0,
            sounding: false,
            velocity: 1.0,
            fade_gain: 1.0,
            fade_step: 0.0,
            pending_restart: false,
            seen_epoch: 0,
            seen_profile: 0,
            character: None,
        }
    }

    pub(crate) fn route(&self) -> VoiceRoute {
        decode_route(self.shared.route.get())
    }

    fn start(&mut self, buffer: Arc<SampleBuffer>) {
        self.velocity = self.shared.velocity.get();
        self.held = Some(buffer);
        self.position = 0.0;
        self.sounding = true;
        self.fade_gain = 1.0;
        self.fade_step = 0.0;
        self.pending_restart = false;
    }

    /// Begin the declick fade. With `restart` the voice comes back from
    /// the top once the fade reaches silence; a fade already in flight
    /// keeps its slope and only the restart intent is updated.
    fn begin_fade(&mut self, sample_rate: f32, restart: bool) {
        if self.fade_step == 0.0 {
            let frames = (DECLICK_SECS * f64::from(sample_rate)).max(1.0);
            self.fade_step = self.fade_gain / frames as f32;
        }
        self.pending_restart = restart;
    }

    /// Rebuild the character chain when the selected profile changed.
    fn ensure_character(&mut self, sample_rate: f32) {
        let id = self.shared.profile.get();
        if id == self.seen_profile {
            return;
        }
        self.seen_profile = id;
        self.character =
            CharacterProfile::from_id(id).map(|profile| CharacterChain::new(profile, sample_rate));
    }

    /// Render one block, adding into `dest`. Velocity, per-voice gain
    /// and the declick ramp scale the sample; the character chain, when
    /// one is selected, colors the result.
    pub(crate) fn render_block(&mut self, ctx: &BlockCtx, dest: &mut [(f32, f32)]) {
        let Some(current) = self.shared.sample.load_full() else {
            // Pad cleared. Nothing is left to fade on, so cut.
            self.held = None;
            self.sounding = false;
            self.fade_gain = 1.0;
            self.fade_step = 0.0;
            self.pending_restart = false;
            self.seen_epoch = self.shared.epoch.get();
            self.shared.active.set(false);
            return;
        };

        // A newly assigned buffer takes over at the block boundary; an
        // audible voice finishes a fade on the old one first.
        match &self.held {
            Some(held) if Arc::ptr_eq(held, &current) => {}
            _ => {
                if self.sounding {
                    self.begin_fade(ctx.sample_rate, true);
                } else {
                    self.held = Some(Arc::clone(&current));
                }
            }
        }

        let epoch = self.shared.epoch.get();
        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;
            if self.shared.on.get() {
                if self.sounding {
                    self.begin_fade(ctx.sample_rate, true);
                } else {
                    self.start(Arc::clone(&current));
                }
            } else if self.sounding {
                self.begin_fade(ctx.sample_rate, false);
            }
        }

        self.ensure_character(ctx.sample_rate);

        if !self.sounding {
            self.shared.active.set(false);
            return;
        }

        let gain = self.shared.gain.get();
        let pitch = f64::from(self.shared.pitch.get());
        let looping = self.shared.looping.get();
        let context_rate = f64::from(ctx.sample_rate);

        let mut frame = 0;
        while frame < dest.len() && self.sounding {
            // The held buffer can change mid-block when a fade completes
            // into a restart, so read it fresh each frame.
            let (left, right, step, total) = match &self.held {
                Some(buffer) => {
                    let (left, right) = buffer.frame_lerp(self.position);
                    let step =
                        step_per_frame(pitch, f64::from(buffer.sample_rate()), context_rate);
                    (left, right, step, buffer.frames() as f64)
                }
                None => break,
            };

            let scale = self.velocity * gain * self.fade_gain;
            let (mut left, mut right) = (left * scale, right * scale);
            if let Some(chain) = &mut self.character {
                let colored = chain.process(left, right);
                left = colored.0;
                right = colored.1;
            }
            dest[frame].0 += left;
            dest[frame].1 += right;
            frame += 1;

            self.position += step;
            if self.position >= total {
                if looping {
                    self.position %= total;
                } else {
                    self.sounding = false;
                }
            }

            if self.fade_step > 0.0 {
                self.fade_gain -= self.fade_step;
                if self.fade_gain <= 0.0 {
                    self.fade_gain = 1.0;
                    self.fade_step = 0.0;
                    if self.pending_restart {
                        self.start(Arc::clone(&current));
                    } else {
                        self.sounding = false;
                    }
                }
            }
        }

        self.shared.active.set(self.sounding);
    }
}
