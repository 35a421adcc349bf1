//! The pad engine: control surface plus the block renderer.

use std::path::Path;
use std::sync::Arc;

use segno_core::{AtomicCounter, BlockCtx};
use segno_track::SampleBuffer;
use tracing::{debug, warn};

use crate::character::CharacterProfile;
use crate::error::{Error, Result};
use crate::voice::{
    decode_choke, decode_route, encode_choke, encode_route, ChokeGroup, PadMode, VoiceRoute,
    VoiceRt, VoiceUnit, PAD_COUNT, TRACK_PAD_BASE,
};

/// Per-voice gain ceiling.
pub const VOICE_GAIN_MAX: f32 = 2.0;

/// Playback rate bounds for per-voice pitch.
pub const PITCH_MIN: f32 = 0.25;
pub const PITCH_MAX: f32 = 4.0;

/// Control surface for the 20-pad sampler.
///
/// Every operation is lock-free and safe to call while the renderer is
/// running; changes land at the next block boundary.
pub struct SamplerEngine {
    voices: [Arc<VoiceUnit>; PAD_COUNT],
    track_count: AtomicCounter,
}

/// Owns the playback side of every voice; driven by the station
/// renderer once per block.
pub struct SamplerRenderer {
    voices: [VoiceRt; PAD_COUNT],
}

impl SamplerEngine {
    /// Create the engine and its renderer. `track_count` bounds the
    /// track routes pads may take.
    pub fn new(track_count: usize) -> (Self, SamplerRenderer) {
        let voices: [Arc<VoiceUnit>; PAD_COUNT] =
            std::array::from_fn(|_| Arc::new(VoiceUnit::new()));
        let renderer = SamplerRenderer {
            voices: std::array::from_fn(|pad| VoiceRt::new(Arc::clone(&voices[pad]))),
        };
        (
            Self {
                voices,
                track_count: AtomicCounter::new(track_count as u64),
            },
            renderer,
        )
    }

    fn voice(&self, pad: usize) -> Result<&VoiceUnit> {
        self.voices
            .get(pad)
            .map(Arc::as_ref)
            .ok_or(Error::NoSuchPad(pad))
    }

    /// Assign a decoded sample to a pad.
    ///
    /// The first assignment also applies the pad's defaults: pads 0..16
    /// become one-shots on the sampler bus, pads 16..20 gate into their
    /// track strip. Reassignment leaves the configuration alone; if the
    /// voice is playing, the renderer fades the old buffer out and
    /// restarts on the new one.
    pub fn assign_sample(&self, pad: usize, sample: SampleBuffer) -> Result<()> {
        let voice = self.voice(pad)?;
        let first = voice.sample.load().is_none();
        voice.sample.store(Some(Arc::new(sample)));
        if first {
            self.apply_pad_defaults(pad, voice);
        }
        Ok(())
    }

    /// Decode WAV bytes and assign them to a pad.
    pub fn assign_bytes(&self, pad: usize, bytes: &[u8]) -> Result<()> {
        let sample = SampleBuffer::decode_wav(bytes)?;
        self.assign_sample(pad, sample)
    }

    /// Load a WAV file and assign it to a pad.
    pub fn assign_file(&self, pad: usize, path: impl AsRef<Path>) -> Result<()> {
        let sample = SampleBuffer::load_wav_file(path)?;
        self.assign_sample(pad, sample)
    }

    /// Drop a pad's sample. The voice cuts at the next block.
    pub fn clear_pad(&self, pad: usize) -> Result<()> {
        let voice = self.voice(pad)?;
        voice.sample.store(None);
        voice.latched.set(false);
        voice.on.set(false);
        Ok(())
    }

    fn apply_pad_defaults(&self, pad: usize, voice: &VoiceUnit) {
        if pad >= TRACK_PAD_BASE {
            voice.mode.set(PadMode::Gate);
            let track = pad - TRACK_PAD_BASE;
            if track < self.track_count() {
                voice.route.set(encode_route(VoiceRoute::Track(track)));
            } else {
                warn!(
                    pad,
                    track, "no such track for the pad's default route, using the sampler bus"
                );
                voice.route.set(encode_route(VoiceRoute::SamplerBus));
            }
        } else {
            voice.mode.set(PadMode::OneShot);
            voice.route.set(encode_route(VoiceRoute::SamplerBus));
        }
    }

    /// Trigger a pad. What happens depends on the pad's [`PadMode`]:
    /// one-shots restart, gates start and latch, toggles flip.
    pub fn trigger_pad(&self, pad: usize, velocity: f32) -> Result<()> {
        let voice = self.voice(pad)?;
        if voice.sample.load().is_none() {
            debug!(pad, "trigger on an empty pad ignored");
            return Ok(());
        }
        let velocity = velocity.clamp(0.0, 1.0);
        match voice.mode.get() {
            PadMode::OneShot => self.fire(pad, voice, velocity),
            PadMode::Gate => {
                voice.latched.set(true);
                self.fire(pad, voice, velocity);
            }
            PadMode::Toggle => {
                if voice.latched.take() {
                    Self::halt(voice);
                } else {
                    voice.latched.set(true);
                    self.fire(pad, voice, velocity);
                }
            }
        }
        Ok(())
    }

    /// Release a pad. Only gate pads respond.
    pub fn release_pad(&self, pad: usize) -> Result<()> {
        let voice = self.voice(pad)?;
        if voice.mode.get() == PadMode::Gate && voice.latched.take() {
            Self::halt(voice);
        }
        Ok(())
    }

    /// Declick-stop every voice.
    pub fn stop_all(&self) {
        for voice in &self.voices {
            voice.latched.set(false);
            Self::halt(voice);
        }
    }

    /// Start `pad`'s voice, choking the rest of its group first.
    fn fire(&self, pad: usize, voice: &VoiceUnit, velocity: f32) {
        let group = voice.choke.get();
        if group != 0 {
            for (other_pad, other) in self.voices.iter().enumerate() {
                if other_pad != pad && other.choke.get() == group {
                    other.latched.set(false);
                    Self::halt(other);
                }
            }
        }
        voice.velocity.set(velocity);
        voice.on.set(true);
        voice.epoch.bump();
    }

    /// Ask the renderer to fade the voice out.
    fn halt(voice: &VoiceUnit) {
        voice.on.set(false);
        voice.epoch.bump();
    }

    /// Set how a pad responds to trigger and release. The voice stops
    /// and the latch clears so the new mode starts from rest.
    pub fn set_pad_mode(&self, pad: usize, mode: PadMode) -> Result<()> {
        let voice = self.voice(pad)?;
        voice.mode.set(mode);
        voice.latched.set(false);
        Self::halt(voice);
        Ok(())
    }

    pub fn set_pad_choke(&self, pad: usize, group: Option<ChokeGroup>) -> Result<()> {
        self.voice(pad)?.choke.set(encode_choke(group));
        Ok(())
    }

    /// Route a pad's audio to the sampler bus or into a track strip.
    pub fn set_pad_route(&self, pad: usize, route: VoiceRoute) -> Result<()> {
        if let VoiceRoute::Track(track) = route {
            if track >= self.track_count() {
                return Err(Error::NoSuchTrack(track));
            }
        }
        self.voice(pad)?.route.set(encode_route(route));
        Ok(())
    }

    pub fn set_pad_gain(&self, pad: usize, gain: f32) -> Result<()> {
        self.voice(pad)?.gain.set(gain.clamp(0.0, VOICE_GAIN_MAX));
        Ok(())
    }

    /// Playback rate factor for a pad, clamped to 0.25..=4.
    pub fn set_pad_pitch(&self, pad: usize, pitch: f32) -> Result<()> {
        self.voice(pad)?.pitch.set(pitch.clamp(PITCH_MIN, PITCH_MAX));
        Ok(())
    }

    pub fn set_pad_loop(&self, pad: usize, looping: bool) -> Result<()> {
        self.voice(pad)?.looping.set(looping);
        Ok(())
    }

    /// Select a color profile by name: "grit", "tape", "lofi" or
    /// "clean". Unknown names leave the pad's chain untouched.
    pub fn set_character(&self, pad: usize, name: &str) -> Result<()> {
        let voice = self.voice(pad)?;
        match CharacterProfile::from_name(name) {
            Some(profile) => voice.profile.set(profile.id()),
            None => warn!(pad, name, "unknown character profile, chain left untouched"),
        }
        Ok(())
    }

    /// Whether the pad's voice is currently audible.
    pub fn pad_active(&self, pad: usize) -> Result<bool> {
        Ok(self.voice(pad)?.active.get())
    }

    pub fn pad_has_sample(&self, pad: usize) -> Result<bool> {
        Ok(self.voice(pad)?.sample.load().is_some())
    }

    pub fn pad_mode(&self, pad: usize) -> Result<PadMode> {
        Ok(self.voice(pad)?.mode.get())
    }

    pub fn pad_route(&self, pad: usize) -> Result<VoiceRoute> {
        Ok(decode_route(self.voice(pad)?.route.get()))
    }

    pub fn pad_choke(&self, pad: usize) -> Result<Option<ChokeGroup>> {
        Ok(decode_choke(self.voice(pad)?.choke.get()))
    }

    pub fn pad_character(&self, pad: usize) -> Result<Option<CharacterProfile>> {
        Ok(CharacterProfile::from_id(self.voice(pad)?.profile.get()))
    }

    /// Number of track strips pads may route into.
    pub fn track_count(&self) -> usize {
        self.track_count.get() as usize
    }

    /// Widen or narrow the route bound when the station's track list
    /// changes. Pads already routed past the new bound keep playing;
    /// the renderer falls back to the bus for a missing strip.
    pub fn set_track_count(&self, count: usize) {
        self.track_count.set(count as u64);
    }
}

impl SamplerRenderer {
    /// Render every voice for one block.
    ///
    /// Bus-routed voices add into `bus`; track-routed voices add into
    /// the matching `track_aux` buffer, falling back to the bus when
    /// the index has no buffer. Buffers are additive; the caller zeroes
    /// them.
    pub fn process(
        &mut self,
        ctx: &BlockCtx,
        bus: &mut [(f32, f32)],
        track_aux: &mut [Vec<(f32, f32)>],
    ) {
        for voice in &mut self.voices {
            match voice.route() {
                VoiceRoute::SamplerBus => voice.render_block(ctx, bus),
                VoiceRoute::Track(track) => match track_aux.get_mut(track) {
                    Some(aux) => voice.render_block(ctx, aux),
                    None => voice.render_block(ctx, bus),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const RATE: f32 = 48_000.0;
    const BLOCK: usize = 512;
    /// Frames one declick fade spans at the test rate.
    const FADE: usize = 144;

    fn ctx() -> BlockCtx {
        BlockCtx {
            sample_rate: RATE,
            start_frame: 0,
        }
    }

    fn dc_sample(frames: usize, value: f32) -> SampleBuffer {
        SampleBuffer::from_frames(&vec![(value, value); frames], RATE as u32).unwrap()
    }

    fn ramp_sample(len: usize) -> SampleBuffer {
        let frames: Vec<(f32, f32)> = (0..len)
            .map(|i| {
                let v = i as f32 / len as f32;
                (v, v)
            })
            .collect();
        SampleBuffer::from_frames(&frames, RATE as u32).unwrap()
    }

    fn render(renderer: &mut SamplerRenderer, blocks: usize) -> Vec<(f32, f32)> {
        let mut out = Vec::new();
        for _ in 0..blocks {
            let mut bus = vec![(0.0, 0.0); BLOCK];
            renderer.process(&ctx(), &mut bus, &mut vec![]);
            out.extend_from_slice(&bus);
        }
        out
    }

    #[test]
    fn one_shot_plays_to_the_end() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(1_000, 0.5)).unwrap();
        engine.trigger_pad(0, 1.0).unwrap();

        let out = render(&mut renderer, 1);
        assert_relative_eq!(out[0].0, 0.5);
        assert!(engine.pad_active(0).unwrap());

        let out = render(&mut renderer, 2);
        assert!(!engine.pad_active(0).unwrap());
        assert!(out[BLOCK..].iter().all(|f| f.0 == 0.0));
    }

    #[test]
    fn gate_pad_stops_on_release_with_a_fade() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(48_000, 0.5)).unwrap();
        engine.set_pad_mode(0, PadMode::Gate).unwrap();
        engine.set_pad_loop(0, true).unwrap();

        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        assert!(engine.pad_active(0).unwrap());

        engine.release_pad(0).unwrap();
        let out = render(&mut renderer, 1);
        assert!(!engine.pad_active(0).unwrap());
        assert!(out[0].0 > 0.4);
        assert!(out[FADE + 2..].iter().all(|f| f.0 == 0.0));
        assert!(out[..FADE].windows(2).all(|w| w[1].0 <= w[0].0 + 1e-6));
    }

    #[test]
    fn toggle_pad_alternates() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(48_000, 0.5)).unwrap();
        engine.set_pad_mode(0, PadMode::Toggle).unwrap();
        engine.set_pad_loop(0, true).unwrap();

        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        assert!(engine.pad_active(0).unwrap());

        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        assert!(!engine.pad_active(0).unwrap());

        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        assert!(engine.pad_active(0).unwrap());
    }

    #[test]
    fn choke_group_allows_one_sounding_voice() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        for pad in 0..2 {
            engine.assign_sample(pad, dc_sample(48_000, 0.5)).unwrap();
            engine.set_pad_loop(pad, true).unwrap();
            engine.set_pad_choke(pad, Some(ChokeGroup(1))).unwrap();
        }

        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        assert!(engine.pad_active(0).unwrap());

        engine.trigger_pad(1, 1.0).unwrap();
        render(&mut renderer, 1);
        assert!(!engine.pad_active(0).unwrap());
        assert!(engine.pad_active(1).unwrap());
    }

    #[test]
    fn empty_pad_triggers_are_ignored() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.trigger_pad(3, 1.0).unwrap();
        let out = render(&mut renderer, 1);
        assert!(!engine.pad_active(3).unwrap());
        assert!(out.iter().all(|f| f.0 == 0.0 && f.1 == 0.0));
    }

    #[test]
    fn velocity_scales_and_clamps() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(48_000, 0.5)).unwrap();
        engine.set_pad_loop(0, true).unwrap();

        engine.trigger_pad(0, 0.5).unwrap();
        let out = render(&mut renderer, 1);
        assert_relative_eq!(out[10].0, 0.25);

        // Out-of-range velocity clamps to full scale; the block after
        // the retrigger fade carries the new level.
        engine.trigger_pad(0, 3.0).unwrap();
        render(&mut renderer, 1);
        let out = render(&mut renderer, 1);
        assert_relative_eq!(out[10].0, 0.5);
    }

    #[test]
    fn gain_setter_clamps_to_the_ceiling() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(48_000, 0.25)).unwrap();
        engine.set_pad_loop(0, true).unwrap();
        engine.set_pad_gain(0, 9.0).unwrap();
        engine.trigger_pad(0, 1.0).unwrap();
        let out = render(&mut renderer, 1);
        assert_relative_eq!(out[10].0, 0.25 * VOICE_GAIN_MAX);
    }

    #[test]
    fn track_pads_route_into_their_strip_aux() {
        let (engine, mut renderer) = SamplerEngine::new(4);
        engine.assign_sample(18, dc_sample(48_000, 0.5)).unwrap();
        assert_eq!(engine.pad_mode(18).unwrap(), PadMode::Gate);
        assert_eq!(engine.pad_route(18).unwrap(), VoiceRoute::Track(2));

        engine.trigger_pad(18, 1.0).unwrap();
        let mut bus = vec![(0.0, 0.0); BLOCK];
        let mut aux = vec![vec![(0.0, 0.0); BLOCK]; 4];
        renderer.process(&ctx(), &mut bus, &mut aux);

        assert!(bus.iter().all(|f| f.0 == 0.0));
        assert!(aux[0].iter().all(|f| f.0 == 0.0));
        assert_relative_eq!(aux[2][0].0, 0.5);
    }

    #[test]
    fn default_route_falls_back_when_the_track_is_missing() {
        let (engine, mut renderer) = SamplerEngine::new(2);
        engine.assign_sample(19, dc_sample(48_000, 0.5)).unwrap();
        assert_eq!(engine.pad_route(19).unwrap(), VoiceRoute::SamplerBus);

        engine.trigger_pad(19, 1.0).unwrap();
        let out = render(&mut renderer, 1);
        assert!(out[0].0 > 0.0);
    }

    #[test]
    fn explicit_routes_are_validated() {
        let (engine, _renderer) = SamplerEngine::new(2);
        engine.set_pad_route(0, VoiceRoute::Track(1)).unwrap();
        assert!(matches!(
            engine.set_pad_route(0, VoiceRoute::Track(2)),
            Err(Error::NoSuchTrack(2))
        ));
        assert!(matches!(
            engine.set_pad_route(99, VoiceRoute::SamplerBus),
            Err(Error::NoSuchPad(99))
        ));
    }

    #[test]
    fn retrigger_restarts_from_the_top() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, ramp_sample(48_000)).unwrap();
        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 10);

        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        let out = render(&mut renderer, 1);
        let max = out.iter().map(|f| f.0).fold(0.0f32, f32::max);
        assert!(max > 0.0);
        assert!(max < 0.05, "playhead did not restart: {max}");
        assert!(engine.pad_active(0).unwrap());
    }

    #[test]
    fn assigning_while_playing_swaps_with_a_declick() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(48_000, 0.5)).unwrap();
        engine.set_pad_loop(0, true).unwrap();
        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);

        engine.assign_sample(0, dc_sample(48_000, -0.25)).unwrap();
        let out = render(&mut renderer, 1);
        // Old material opens the block, the new buffer closes it.
        assert_relative_eq!(out[0].0, 0.5, epsilon = 1e-3);
        assert_relative_eq!(out[BLOCK - 1].0, -0.25, epsilon = 1e-3);
        assert!(engine.pad_active(0).unwrap());
    }

    #[test]
    fn reassignment_keeps_the_pad_configuration() {
        let (engine, _renderer) = SamplerEngine::new(4);
        engine.assign_sample(17, dc_sample(100, 0.5)).unwrap();
        engine.set_pad_mode(17, PadMode::Toggle).unwrap();
        engine.set_pad_route(17, VoiceRoute::SamplerBus).unwrap();
        engine.assign_sample(17, dc_sample(200, 0.1)).unwrap();
        assert_eq!(engine.pad_mode(17).unwrap(), PadMode::Toggle);
        assert_eq!(engine.pad_route(17).unwrap(), VoiceRoute::SamplerBus);
    }

    #[test]
    fn mode_change_stops_the_voice() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(48_000, 0.5)).unwrap();
        engine.set_pad_loop(0, true).unwrap();
        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        assert!(engine.pad_active(0).unwrap());

        engine.set_pad_mode(0, PadMode::Gate).unwrap();
        render(&mut renderer, 1);
        assert!(!engine.pad_active(0).unwrap());
    }

    #[test]
    fn stop_all_silences_every_voice() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        for pad in 0..4 {
            engine.assign_sample(pad, dc_sample(48_000, 0.2)).unwrap();
            engine.set_pad_loop(pad, true).unwrap();
            engine.trigger_pad(pad, 1.0).unwrap();
        }
        render(&mut renderer, 1);

        engine.stop_all();
        let out = render(&mut renderer, 2);
        for pad in 0..4 {
            assert!(!engine.pad_active(pad).unwrap());
        }
        assert!(out[BLOCK..].iter().all(|f| f.0 == 0.0));
    }

    #[test]
    fn pitch_doubles_playback_speed() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(960, 0.5)).unwrap();
        engine.set_pad_pitch(0, 2.0).unwrap();
        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        // 960 source frames at double speed are spent within one block.
        assert!(!engine.pad_active(0).unwrap());

        engine.set_pad_pitch(0, 1.0).unwrap();
        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);
        assert!(engine.pad_active(0).unwrap());
    }

    #[test]
    fn unknown_character_names_leave_the_chain_alone() {
        let (engine, _renderer) = SamplerEngine::new(0);
        engine.set_character(0, "grit").unwrap();
        assert_eq!(
            engine.pad_character(0).unwrap(),
            Some(CharacterProfile::Grit)
        );
        engine.set_character(0, "velvet").unwrap();
        assert_eq!(
            engine.pad_character(0).unwrap(),
            Some(CharacterProfile::Grit)
        );
    }

    #[test]
    fn clean_character_passes_the_voice_through() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(48_000, 0.5)).unwrap();
        engine.set_pad_loop(0, true).unwrap();
        engine.set_character(0, "clean").unwrap();
        engine.trigger_pad(0, 1.0).unwrap();
        let out = render(&mut renderer, 1);
        assert_relative_eq!(out[100].0, 0.5, epsilon = 1e-4);
    }

    #[test]
    fn clearing_a_pad_cuts_the_voice() {
        let (engine, mut renderer) = SamplerEngine::new(0);
        engine.assign_sample(0, dc_sample(48_000, 0.5)).unwrap();
        engine.set_pad_loop(0, true).unwrap();
        engine.trigger_pad(0, 1.0).unwrap();
        render(&mut renderer, 1);

        engine.clear_pad(0).unwrap();
        let out = render(&mut renderer, 1);
        assert!(!engine.pad_active(0).unwrap());
        assert!(!engine.pad_has_sample(0).unwrap());
        assert!(out.iter().all(|f| f.0 == 0.0));
    }
}
