//! Speech synthesis seam.
//!
//! The compositor never talks to a speech engine directly; it takes any
//! [`SpeechSynthesizer`]. The two narration roles use distinct voices so the
//! prompt and the answer have different timbres.

use std::path::PathBuf;
use std::process::Command;

use crate::error::{GekiError, GekiResult};
use crate::media::{self, AudioPcm, MIX_SAMPLE_RATE};

/// Narration role, mapped to an engine-specific voice by the implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Voice {
    Prompt,
    Answer,
}

/// Collaborator-supplied synthesis capability.
///
/// Implementations must return PCM at [`MIX_SAMPLE_RATE`], mono or stereo.
/// Returning empty audio for non-empty text is an error at the call site, not
/// something to paper over with a shorter track.
pub trait SpeechSynthesizer {
    fn synthesize(&self, text: &str, voice: Voice) -> GekiResult<AudioPcm>;
}

/// Adapter that runs an external command per voice to produce a WAV file.
///
/// The command is executed through `sh -c` with the text in `$GEKI_TEXT` and
/// the expected output file in `$GEKI_OUT` (environment variables, so no
/// shell-escaping of the joke text is needed). Example:
///
/// ```text
/// voicebox-cli --speaker 3 --text "$GEKI_TEXT" --out "$GEKI_OUT"
/// ```
///
/// Output paths are render-scoped unique temp names and are removed on every
/// exit path.
#[derive(Clone, Debug)]
pub struct CommandSynthesizer {
    prompt_cmd: String,
    answer_cmd: String,
}

impl CommandSynthesizer {
    pub fn new(prompt_cmd: impl Into<String>, answer_cmd: impl Into<String>) -> Self {
        Self {
            prompt_cmd: prompt_cmd.into(),
            answer_cmd: answer_cmd.into(),
        }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn synthesize(&self, text: &str, voice: Voice) -> GekiResult<AudioPcm> {
        let cmd = match voice {
            Voice::Prompt => &self.prompt_cmd,
            Voice::Answer => &self.answer_cmd,
        };

        let out_path = unique_temp_path("wav");
        let guard = TempWavGuard(out_path.clone());

        let status = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .env("GEKI_TEXT", text)
            .env("GEKI_OUT", &out_path)
            .status()
            .map_err(|e| GekiError::synthesis(format!("failed to run synth command: {e}")))?;
        if !status.success() {
            return Err(GekiError::synthesis(format!(
                "synth command for {voice:?} exited with status {status}"
            )));
        }
        if !out_path.exists() {
            return Err(GekiError::synthesis(format!(
                "synth command for {voice:?} produced no output file"
            )));
        }

        let pcm = media::decode_audio_f32_stereo(&out_path, MIX_SAMPLE_RATE)?;
        drop(guard);

        if pcm.interleaved_f32.is_empty() {
            return Err(GekiError::synthesis(format!(
                "synth command for {voice:?} produced empty audio"
            )));
        }
        Ok(pcm)
    }
}

/// Unique temp path under the system temp dir (pid + nanos + counter), so
/// concurrent renders never collide on fixed filenames.
pub(crate) fn unique_temp_path(ext: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);

    std::env::temp_dir().join(format!(
        "geki_{}_{}_{}.{ext}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}

struct TempWavGuard(PathBuf);

impl Drop for TempWavGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
