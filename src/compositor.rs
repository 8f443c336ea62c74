//! The timeline compositor: one call in, one rendered MP4 out.
//!
//! A render is fully serial: asset checks, overlay rasterization, narration
//! synthesis, audio mix, then a streaming composite/encode pass. Every
//! intermediate resource (synth temp files, the audio mix intermediate, child
//! processes, a partially written output) is released on every exit path; a
//! failed render leaves nothing behind that looks like a finished clip.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::audio::{
    AudioCue, NarrationConfig, build_narration_track, mix_cues, write_mix_to_f32le_file,
};
use crate::core::{Canvas, LayoutMode, Timeline};
use crate::encode::{AudioInput, ClipEncoder, EncodeConfig};
use crate::error::{GekiError, GekiResult};
use crate::media::{self, BackgroundFrames, MIX_SAMPLE_RATE};
use crate::raster::{CaptionRasterizer, CaptionStyle, Overlay};
use crate::script::{FontSizeTable, TextSpec, clean_display, strip_enumerator};
use crate::speech::{SpeechSynthesizer, Voice};

/// Fixed input assets supplied by the deployment environment.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AssetPaths {
    /// Background video; its native audio is never used.
    pub background: PathBuf,
    /// Jingle played under the prompt reveal.
    pub intro_sfx: PathBuf,
    /// Drumroll played under the answer reveal.
    pub reveal_sfx: PathBuf,
    /// Caption typeface; `None` falls back to system fonts with a warning.
    pub font: Option<PathBuf>,
}

/// Everything tunable about a clip, with the tuned defaults.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CompositorConfig {
    pub assets: AssetPaths,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub narration: NarrationConfig,
    #[serde(default)]
    pub font_sizes: FontSizeTable,
    #[serde(default)]
    pub style: CaptionStyle,
    /// Size of the small prompt caption (the large overlays pick their size
    /// from `font_sizes`).
    #[serde(default = "default_caption_px")]
    pub caption_px: f32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub overwrite: bool,
    /// Coarse whole-render deadline, checked between stages and periodically
    /// during the encode loop. The blocking subprocess calls bound each
    /// stage, so this is a backstop against a hung synthesizer or encoder,
    /// not a hard interrupt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

fn default_caption_px() -> f32 {
    48.0
}

fn default_fps() -> u32 {
    24
}

impl CompositorConfig {
    pub fn new(assets: AssetPaths) -> Self {
        Self {
            assets,
            timeline: Timeline::default(),
            narration: NarrationConfig::default(),
            font_sizes: FontSizeTable::default(),
            style: CaptionStyle::default(),
            caption_px: default_caption_px(),
            fps: default_fps(),
            overwrite: true,
            timeout: None,
        }
    }

    pub fn validate(&self) -> GekiResult<()> {
        self.timeline.validate()?;
        self.narration.validate()?;
        if self.fps == 0 {
            return Err(GekiError::validation("fps must be non-zero"));
        }
        if !self.caption_px.is_finite() || self.caption_px <= 0.0 {
            return Err(GekiError::validation("caption_px must be > 0"));
        }
        Ok(())
    }
}

/// One clip's worth of input text plus the target aspect ratio.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RenderRequest {
    pub prompt: TextSpec,
    pub answer: TextSpec,
    pub mode: LayoutMode,
}

/// Pipeline stages, in order. Failures report the stage they happened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderStage {
    AssetsChecked,
    OverlaysBuilt,
    AudioBuilt,
    Composited,
    Rendered,
}

impl std::fmt::Display for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RenderStage::AssetsChecked => "assets-checked",
            RenderStage::OverlaysBuilt => "overlays-built",
            RenderStage::AudioBuilt => "audio-built",
            RenderStage::Composited => "composited",
            RenderStage::Rendered => "rendered",
        };
        f.write_str(s)
    }
}

struct Deadline(Option<Instant>);

impl Deadline {
    fn start(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    fn check(&self, stage: RenderStage) -> GekiResult<()> {
        if let Some(at) = self.0
            && Instant::now() > at
        {
            return Err(GekiError::render(format!(
                "render deadline exceeded (last completed stage: {stage})"
            )));
        }
        Ok(())
    }
}

struct TempFileGuard(Option<PathBuf>);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Default output name for callers that do not pick one. Timestamp plus pid
/// plus a per-process counter, so renders never overwrite each other whether
/// issued from one process or several within the same second.
pub fn timestamped_output_name() -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    PathBuf::from(format!(
        "geki_{secs}_{}_{}.mp4",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}

pub struct Compositor {
    config: CompositorConfig,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Render one clip to `out_path`.
    ///
    /// Preconditions (all assets present, background long enough) are checked
    /// before any synthesis or decoding starts, so a missing asset never
    /// costs a speech-engine round trip.
    #[tracing::instrument(skip(self, req, synth))]
    pub fn render(
        &self,
        req: &RenderRequest,
        synth: &dyn SpeechSynthesizer,
        out_path: &Path,
    ) -> GekiResult<PathBuf> {
        self.config.validate()?;
        let deadline = Deadline::start(self.config.timeout);
        let timeline = &self.config.timeline;
        let duration_sec = timeline.duration_sec();

        // Stage 1: assets.
        for path in [
            &self.config.assets.background,
            &self.config.assets.intro_sfx,
            &self.config.assets.reveal_sfx,
        ] {
            if !path.exists() {
                return Err(GekiError::missing_asset(path.clone()));
            }
        }
        let bg_info = media::probe_video(&self.config.assets.background)?;
        if bg_info.duration_sec < duration_sec {
            return Err(GekiError::validation(format!(
                "background clip is {:.2}s but the timeline ends at {:.2}s",
                bg_info.duration_sec, duration_sec
            )));
        }
        tracing::debug!(stage = %RenderStage::AssetsChecked, bg = %bg_info.source_path.display());
        deadline.check(RenderStage::AssetsChecked)?;

        // Stage 2: overlays.
        let canvas = req.mode.canvas();
        let (prompt_overlay, caption_overlay, answer_overlay) = self.build_overlays(req, canvas)?;
        tracing::debug!(stage = %RenderStage::OverlaysBuilt);
        deadline.check(RenderStage::OverlaysBuilt)?;

        // Stage 3: audio.
        // Armed before the build so a partially written mix file is removed
        // even when the build itself fails.
        let mix_path = crate::speech::unique_temp_path("f32le");
        let _mix_guard = TempFileGuard(Some(mix_path.clone()));
        let audio = self.build_audio(req, synth, duration_sec, &mix_path)?;
        tracing::debug!(stage = %RenderStage::AudioBuilt, has_audio = audio.is_some());
        deadline.check(RenderStage::AudioBuilt)?;

        // Stages 4-5: composite and encode. A partially written output is
        // never left behind on failure.
        let rendered = self.composite_and_encode(
            canvas,
            duration_sec,
            &[
                (timeline.prompt_full, &prompt_overlay),
                (timeline.prompt_caption, &caption_overlay),
                (timeline.answer, &answer_overlay),
            ],
            audio,
            out_path,
            &deadline,
        )?;
        tracing::info!(stage = %RenderStage::Rendered, out = %rendered.display());
        Ok(rendered)
    }

    fn build_overlays(
        &self,
        req: &RenderRequest,
        canvas: Canvas,
    ) -> GekiResult<(Overlay, Overlay, Overlay)> {
        let delim = self.config.narration.delimiter;
        let mut raster = CaptionRasterizer::new(self.config.assets.font.as_deref());

        let prompt_text = clean_display(&req.prompt.display, delim);
        let answer_text = clean_display(strip_enumerator(&req.answer.display), delim);

        let prompt_px = self.config.font_sizes.size_for(visible_chars(&prompt_text));
        let answer_px = self.config.font_sizes.size_for(visible_chars(&answer_text));

        let prompt_overlay = raster.rasterize(
            &prompt_text,
            prompt_px,
            &self.config.style,
            req.mode.primary_anchor(),
            canvas,
        )?;
        let caption_overlay = raster.rasterize(
            &prompt_text,
            self.config.caption_px,
            &self.config.style,
            req.mode.caption_anchor(),
            canvas,
        )?;
        let answer_overlay = raster.rasterize(
            &answer_text,
            answer_px,
            &self.config.style,
            req.mode.primary_anchor(),
            canvas,
        )?;

        Ok((prompt_overlay, caption_overlay, answer_overlay))
    }

    fn build_audio(
        &self,
        req: &RenderRequest,
        synth: &dyn SpeechSynthesizer,
        duration_sec: f64,
        mix_path: &Path,
    ) -> GekiResult<Option<AudioInput>> {
        let timeline = &self.config.timeline;
        let mut cues = Vec::<AudioCue>::new();

        if let Some(pcm) = build_narration_track(
            &req.prompt.pronunciation,
            Voice::Prompt,
            synth,
            &self.config.narration,
        )? {
            cues.push(AudioCue {
                start_sec: timeline.prompt_voice_start_sec,
                volume: 1.0,
                pcm,
            });
        }
        if let Some(pcm) = build_narration_track(
            strip_enumerator(&req.answer.pronunciation),
            Voice::Answer,
            synth,
            &self.config.narration,
        )? {
            cues.push(AudioCue {
                start_sec: timeline.answer_voice_start_sec,
                volume: 1.0,
                pcm,
            });
        }

        for (path, cue) in [
            (&self.config.assets.intro_sfx, timeline.intro_sfx),
            (&self.config.assets.reveal_sfx, timeline.reveal_sfx),
        ] {
            let pcm = media::decode_audio_f32_stereo(path, MIX_SAMPLE_RATE)?;
            if pcm.interleaved_f32.is_empty() {
                continue;
            }
            cues.push(AudioCue {
                start_sec: cue.start_sec,
                volume: cue.volume,
                pcm,
            });
        }

        if cues.is_empty() {
            return Ok(None);
        }

        let mixed = mix_cues(&cues, duration_sec)?;
        write_mix_to_f32le_file(&mixed, mix_path)?;
        Ok(Some(AudioInput {
            path: mix_path.to_path_buf(),
            sample_rate: MIX_SAMPLE_RATE,
            channels: 2,
        }))
    }

    fn composite_and_encode(
        &self,
        canvas: Canvas,
        duration_sec: f64,
        overlays: &[(crate::core::TimeRange, &Overlay)],
        audio: Option<AudioInput>,
        out_path: &Path,
        deadline: &Deadline,
    ) -> GekiResult<PathBuf> {
        // Before the encoder spawns, nothing at `out_path` is ours to touch;
        // a refusal to overwrite must leave the existing file intact. Once it
        // has spawned, anything there is this render's partial output and is
        // removed on failure.
        let encoder = ClipEncoder::new(EncodeConfig {
            canvas,
            fps: self.config.fps,
            out_path: out_path.to_path_buf(),
            overwrite: self.config.overwrite,
            audio,
        })?;

        let result = self.stream_frames(encoder, canvas, duration_sec, overlays, deadline);
        if result.is_err() && out_path.exists() {
            let _ = std::fs::remove_file(out_path);
        }
        result
    }

    fn stream_frames(
        &self,
        mut encoder: ClipEncoder,
        canvas: Canvas,
        duration_sec: f64,
        overlays: &[(crate::core::TimeRange, &Overlay)],
        deadline: &Deadline,
    ) -> GekiResult<PathBuf> {
        let fps = self.config.fps;
        let mut background = BackgroundFrames::open(
            &self.config.assets.background,
            canvas,
            fps,
            duration_sec,
        )?;

        let total_frames = (duration_sec * f64::from(fps)).round() as u64;
        let mut frame = vec![0u8; canvas.rgba8_len()];
        let mut have_frame = false;

        for idx in 0..total_frames {
            // The fps filter can come up a frame or two short against the
            // rounded total; hold the last frame rather than failing.
            if background.next_frame(&mut frame)? {
                have_frame = true;
            } else if !have_frame {
                return Err(GekiError::render(
                    "background stream produced no frames at all",
                ));
            }

            let t_sec = idx as f64 / f64::from(fps);
            for (range, overlay) in overlays {
                if range.contains(t_sec) {
                    blend_premul_over_opaque(&mut frame, &overlay.rgba8_premul)?;
                }
            }

            encoder.push_frame(&frame)?;

            if idx.is_multiple_of(u64::from(fps)) {
                deadline.check(RenderStage::Composited)?;
            }
        }
        drop(background);
        tracing::debug!(stage = %RenderStage::Composited, frames = total_frames);

        encoder.finish()
    }
}

fn visible_chars(text: &str) -> usize {
    text.chars().filter(|&c| c != '\n').count()
}

/// Blend a premultiplied RGBA8 layer over an opaque RGBA8 frame in place.
fn blend_premul_over_opaque(dst: &mut [u8], src_premul: &[u8]) -> GekiResult<()> {
    if dst.len() != src_premul.len() || !dst.len().is_multiple_of(4) {
        return Err(GekiError::validation(
            "blend expects equal-length rgba8 buffers",
        ));
    }

    for (d, s) in dst.chunks_exact_mut(4).zip(src_premul.chunks_exact(4)) {
        let a = s[3] as u16;
        if a == 0 {
            continue;
        }
        if a == 255 {
            d[0] = s[0];
            d[1] = s[1];
            d[2] = s[2];
            continue;
        }

        let inv = 255u16 - a;
        d[0] = (s[0] as u16 + mul_div255(d[0] as u16, inv)).min(255) as u8;
        d[1] = (s[1] as u16 + mul_div255(d[1] as u16, inv)).min(255) as u8;
        d[2] = (s[2] as u16 + mul_div255(d[2] as u16, inv)).min(255) as u8;
    }
    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}
