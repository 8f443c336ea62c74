//! Narration track building and the final mix.
//!
//! A narration track is synthesized speech fragments concatenated with
//! caller-controlled silences (see [`crate::script::split_pronunciation`]).
//! All tracks and sound effects then mix additively into one fixed-length
//! interleaved stereo buffer which is written as raw `f32le` for muxing.

use std::path::Path;

use crate::error::{GekiError, GekiResult};
use crate::media::{AudioPcm, MIX_SAMPLE_RATE};
use crate::script::{Fragment, split_pronunciation};
use crate::speech::{SpeechSynthesizer, Voice};

/// Pause-marker handling for narration tracks.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NarrationConfig {
    /// Reserved pause-marker character in pronunciation strings.
    pub delimiter: char,
    /// Seconds of silence per delimiter character. Tuned by hand across the
    /// clip format's history (observed 0.06..0.2), so configuration rather
    /// than a constant.
    pub pause_per_delimiter_sec: f64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            delimiter: '_',
            pause_per_delimiter_sec: 0.1,
        }
    }
}

impl NarrationConfig {
    pub fn validate(&self) -> GekiResult<()> {
        if !self.pause_per_delimiter_sec.is_finite() || self.pause_per_delimiter_sec < 0.0 {
            return Err(GekiError::validation(
                "pause_per_delimiter_sec must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

/// Build one narration track from a pronunciation string.
///
/// Fragments are synthesized in order with the given voice; each delimiter
/// run of length `n` becomes `n * pause_per_delimiter_sec` seconds of
/// silence. A failed or empty synthesis fails the whole build; we never
/// silently drop a fragment and ship a shorter track. Returns `None` for an
/// empty pronunciation string (a pure delimiter run still produces a track of
/// pure silence).
pub fn build_narration_track(
    pronunciation: &str,
    voice: Voice,
    synth: &dyn SpeechSynthesizer,
    cfg: &NarrationConfig,
) -> GekiResult<Option<AudioPcm>> {
    cfg.validate()?;

    let fragments = split_pronunciation(pronunciation, cfg.delimiter);
    if fragments.is_empty() {
        return Ok(None);
    }

    let mut track = AudioPcm::empty_stereo();
    for fragment in &fragments {
        match fragment {
            Fragment::Speech(text) => {
                let pcm = synth.synthesize(text, voice)?;
                if pcm.interleaved_f32.is_empty() {
                    return Err(GekiError::synthesis(format!(
                        "synthesizer returned empty audio for fragment '{text}'"
                    )));
                }
                append_as_stereo(&mut track, &pcm)?;
            }
            Fragment::Pause(run_len) => {
                let silence_sec = *run_len as f64 * cfg.pause_per_delimiter_sec;
                let frames = secs_to_samples(silence_sec, track.sample_rate) as usize;
                track
                    .interleaved_f32
                    .extend(std::iter::repeat_n(0.0f32, frames * 2));
            }
        }
    }

    Ok(Some(track))
}

fn append_as_stereo(track: &mut AudioPcm, pcm: &AudioPcm) -> GekiResult<()> {
    if pcm.sample_rate != track.sample_rate {
        return Err(GekiError::validation(format!(
            "synthesizer must deliver {} Hz PCM, got {} Hz",
            track.sample_rate, pcm.sample_rate
        )));
    }
    match pcm.channels {
        2 => track.interleaved_f32.extend_from_slice(&pcm.interleaved_f32),
        1 => {
            track.interleaved_f32.reserve(pcm.interleaved_f32.len() * 2);
            for &s in &pcm.interleaved_f32 {
                track.interleaved_f32.push(s);
                track.interleaved_f32.push(s);
            }
        }
        n => {
            return Err(GekiError::validation(format!(
                "synthesizer must deliver mono or stereo PCM, got {n} channels"
            )));
        }
    }
    Ok(())
}

/// One scheduled audio contribution on the clip timeline.
#[derive(Clone, Debug)]
pub struct AudioCue {
    pub start_sec: f64,
    /// Linear gain applied while mixing.
    pub volume: f32,
    /// Stereo PCM at [`MIX_SAMPLE_RATE`].
    pub pcm: AudioPcm,
}

/// Mix all cues into one interleaved stereo buffer of exactly
/// `total_sec` seconds. Cues are added sample-wise, clipped to the clip
/// bounds, and the result is clamped to [-1, 1].
pub fn mix_cues(cues: &[AudioCue], total_sec: f64) -> GekiResult<Vec<f32>> {
    if !(total_sec.is_finite() && total_sec > 0.0) {
        return Err(GekiError::validation("mix length must be finite and > 0"));
    }

    let total_frames = secs_to_samples(total_sec, MIX_SAMPLE_RATE) as usize;
    let mut out = vec![0.0f32; total_frames * 2];

    for cue in cues {
        if cue.pcm.sample_rate != MIX_SAMPLE_RATE || cue.pcm.channels != 2 {
            return Err(GekiError::validation(
                "audio cues must be stereo at the mix sample rate",
            ));
        }
        if !cue.start_sec.is_finite() || cue.start_sec < 0.0 {
            return Err(GekiError::validation("cue start must be finite and >= 0"));
        }

        let start_frame = secs_to_samples(cue.start_sec, MIX_SAMPLE_RATE) as usize;
        for (i, frame) in cue.pcm.interleaved_f32.chunks_exact(2).enumerate() {
            let dst = start_frame + i;
            if dst >= total_frames {
                break;
            }
            out[dst * 2] += frame[0] * cue.volume;
            out[dst * 2 + 1] += frame[1] * cue.volume;
        }
    }

    for s in &mut out {
        *s = s.clamp(-1.0, 1.0);
    }
    Ok(out)
}

/// Convert seconds to the nearest sample index at `sample_rate`.
pub fn secs_to_samples(secs: f64, sample_rate: u32) -> u64 {
    (secs * f64::from(sample_rate)).round().max(0.0) as u64
}

/// Write interleaved `f32` PCM samples to a raw little-endian `.f32le` file.
pub fn write_mix_to_f32le_file(samples_interleaved: &[f32], out_path: &Path) -> GekiResult<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            GekiError::render(format!(
                "failed to create audio mix output directory '{}': {e}",
                parent.display()
            ))
        })?;
    }

    let mut bytes = Vec::<u8>::with_capacity(samples_interleaved.len() * 4);
    for &sample in samples_interleaved {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    std::fs::write(out_path, bytes).map_err(|e| {
        GekiError::render(format!(
            "failed to write mixed audio file '{}': {e}",
            out_path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthesizer returning a fixed-length constant-value mono tone per call.
    struct StubSynth {
        frames_per_call: usize,
        calls: std::cell::Cell<usize>,
    }

    impl StubSynth {
        fn new(frames_per_call: usize) -> Self {
            Self {
                frames_per_call,
                calls: std::cell::Cell::new(0),
            }
        }
    }

    impl SpeechSynthesizer for StubSynth {
        fn synthesize(&self, _text: &str, _voice: Voice) -> GekiResult<AudioPcm> {
            self.calls.set(self.calls.get() + 1);
            Ok(AudioPcm {
                sample_rate: MIX_SAMPLE_RATE,
                channels: 1,
                interleaved_f32: vec![0.5; self.frames_per_call],
            })
        }
    }

    #[test]
    fn no_delimiter_track_is_sum_of_fragments() {
        let synth = StubSynth::new(4800); // 0.1s per fragment
        let cfg = NarrationConfig::default();
        let track = build_narration_track("こんにちは", Voice::Prompt, &synth, &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(synth.calls.get(), 1);
        assert_eq!(track.frames(), 4800);
        assert!((track.duration_sec() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn pure_delimiter_run_is_pure_silence() {
        let synth = StubSynth::new(4800);
        let cfg = NarrationConfig::default();
        let track = build_narration_track("_____", Voice::Prompt, &synth, &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(synth.calls.get(), 0);
        // 5 delimiters * 0.1s
        assert!((track.duration_sec() - 0.5).abs() < 1e-9);
        assert!(track.interleaved_f32.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn mid_sentence_pause_inserts_expected_silence() {
        // "AIが得意なこと_は？" with k=0.1: fragment, 0.1s silence, fragment.
        let synth = StubSynth::new(9600); // 0.2s speech per fragment
        let cfg = NarrationConfig {
            delimiter: '_',
            pause_per_delimiter_sec: 0.1,
        };
        let track = build_narration_track("AIが得意なこと_は？", Voice::Prompt, &synth, &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(synth.calls.get(), 2);
        assert!((track.duration_sec() - 0.5).abs() < 1e-9);

        // The inserted span between the fragments is silent.
        let silence_start = 9600 * 2;
        let silence_end = silence_start + 4800 * 2;
        assert!(
            track.interleaved_f32[silence_start..silence_end]
                .iter()
                .all(|&s| s == 0.0)
        );
        assert_ne!(track.interleaved_f32[silence_end], 0.0);
    }

    #[test]
    fn empty_pronunciation_builds_no_track() {
        let synth = StubSynth::new(4800);
        let cfg = NarrationConfig::default();
        assert!(
            build_narration_track("", Voice::Answer, &synth, &cfg)
                .unwrap()
                .is_none()
        );
        assert_eq!(synth.calls.get(), 0);
    }

    #[test]
    fn empty_synthesis_fails_the_build() {
        struct EmptySynth;
        impl SpeechSynthesizer for EmptySynth {
            fn synthesize(&self, _: &str, _: Voice) -> GekiResult<AudioPcm> {
                Ok(AudioPcm::empty_stereo())
            }
        }
        let cfg = NarrationConfig::default();
        let err = build_narration_track("abc", Voice::Prompt, &EmptySynth, &cfg).unwrap_err();
        assert!(matches!(err, GekiError::Synthesis(_)));
    }

    #[test]
    fn wrong_sample_rate_is_rejected() {
        struct BadRateSynth;
        impl SpeechSynthesizer for BadRateSynth {
            fn synthesize(&self, _: &str, _: Voice) -> GekiResult<AudioPcm> {
                Ok(AudioPcm {
                    sample_rate: 22_050,
                    channels: 1,
                    interleaved_f32: vec![0.1; 100],
                })
            }
        }
        let cfg = NarrationConfig::default();
        let err = build_narration_track("abc", Voice::Prompt, &BadRateSynth, &cfg).unwrap_err();
        assert!(matches!(err, GekiError::Validation(_)));
    }

    #[test]
    fn track_building_is_idempotent() {
        let cfg = NarrationConfig::default();
        let a = build_narration_track("a_b__c", Voice::Prompt, &StubSynth::new(1000), &cfg)
            .unwrap()
            .unwrap();
        let b = build_narration_track("a_b__c", Voice::Prompt, &StubSynth::new(1000), &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(a.interleaved_f32.len(), b.interleaved_f32.len());
        assert_eq!(a.interleaved_f32, b.interleaved_f32);
    }

    #[test]
    fn mix_places_cue_at_offset_with_volume() {
        let cue = AudioCue {
            start_sec: 1.0,
            volume: 0.5,
            pcm: AudioPcm {
                sample_rate: MIX_SAMPLE_RATE,
                channels: 2,
                interleaved_f32: vec![1.0; 2 * 4800], // 0.1s of full-scale
            },
        };
        let out = mix_cues(std::slice::from_ref(&cue), 2.0).unwrap();
        assert_eq!(out.len(), 2 * 96_000);

        let start = 48_000 * 2;
        assert_eq!(out[start - 2], 0.0);
        assert_eq!(out[start], 0.5);
        assert_eq!(out[start + 1], 0.5);
        // After the cue ends it is silent again.
        let end = start + 4800 * 2;
        assert_eq!(out[end], 0.0);
    }

    #[test]
    fn mix_clamps_overlapping_cues() {
        let loud = AudioCue {
            start_sec: 0.0,
            volume: 1.0,
            pcm: AudioPcm {
                sample_rate: MIX_SAMPLE_RATE,
                channels: 2,
                interleaved_f32: vec![0.8; 2 * 480],
            },
        };
        let out = mix_cues(&[loud.clone(), loud], 0.1).unwrap();
        assert!(out.iter().all(|&s| s <= 1.0));
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn mix_truncates_cues_past_the_end() {
        let cue = AudioCue {
            start_sec: 0.05,
            volume: 1.0,
            pcm: AudioPcm {
                sample_rate: MIX_SAMPLE_RATE,
                channels: 2,
                interleaved_f32: vec![0.3; 2 * 48_000],
            },
        };
        let out = mix_cues(&[cue], 0.1).unwrap();
        assert_eq!(out.len(), 2 * 4800);
    }

    #[test]
    fn secs_to_samples_rounds() {
        assert_eq!(secs_to_samples(0.1, 48_000), 4800);
        assert_eq!(secs_to_samples(0.0, 48_000), 0);
        assert_eq!(secs_to_samples(1.0 / 3.0, 48_000), 16_000);
    }
}
