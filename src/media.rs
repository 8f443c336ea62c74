//! Media probing and decoding through the system `ffmpeg`/`ffprobe` binaries.
//!
//! We intentionally shell out rather than link native FFmpeg libraries, which
//! keeps the build free of dev header/lib requirements.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::core::Canvas;
use crate::error::{GekiError, GekiResult};

/// Sample rate every track is decoded and mixed at.
pub const MIX_SAMPLE_RATE: u32 = 48_000;

#[derive(Clone, Debug)]
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub duration_sec: f64,
    pub has_audio: bool,
}

/// Interleaved PCM audio.
#[derive(Clone, Debug, Default)]
pub struct AudioPcm {
    pub sample_rate: u32,
    pub channels: u16,
    pub interleaved_f32: Vec<f32>,
}

impl AudioPcm {
    /// Empty stereo PCM at the mix rate.
    pub fn empty_stereo() -> Self {
        Self {
            sample_rate: MIX_SAMPLE_RATE,
            channels: 2,
            interleaved_f32: Vec::new(),
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.interleaved_f32.len() / usize::from(self.channels)
        }
    }

    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / f64::from(self.sample_rate)
        }
    }
}

/// Return `true` when both `ffmpeg` and `ffprobe` can be invoked from PATH.
pub fn ffmpeg_tools_available() -> bool {
    let ok = |bin: &str| {
        Command::new(bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    };
    ok("ffmpeg") && ok("ffprobe")
}

pub fn probe_video(source_path: &Path) -> GekiResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        r_frame_rate: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| GekiError::render(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(GekiError::render(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| GekiError::render(format!("ffprobe json parse failed: {e}")))?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| GekiError::render("no video stream found"))?;
    let width = video_stream
        .width
        .ok_or_else(|| GekiError::render("missing video width from ffprobe"))?;
    let height = video_stream
        .height
        .ok_or_else(|| GekiError::render("missing video height from ffprobe"))?;

    let (fps_num, fps_den) = parse_ff_ratio(video_stream.r_frame_rate.as_deref().unwrap_or("0/1"))
        .ok_or_else(|| GekiError::render("invalid video r_frame_rate"))?;
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        fps_num,
        fps_den,
        duration_sec,
        has_audio,
    })
}

/// Decode any audio file to interleaved stereo f32 at `sample_rate`.
pub fn decode_audio_f32_stereo(path: &Path, sample_rate: u32) -> GekiResult<AudioPcm> {
    let out = Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .args([
            "-vn",
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ac",
            "2",
            "-ar",
            &sample_rate.to_string(),
            "pipe:1",
        ])
        .output()
        .map_err(|e| GekiError::render(format!("failed to run ffmpeg for audio decode: {e}")))?;

    if !out.status.success() {
        let msg = String::from_utf8_lossy(&out.stderr);
        // ffmpeg reports the absence of an audio stream as an error. Treat it
        // as empty PCM.
        if msg.contains("Stream specifier")
            || msg.contains("matches no streams")
            || msg.contains("Output file #0 does not contain any stream")
        {
            return Ok(AudioPcm {
                sample_rate,
                channels: 2,
                interleaved_f32: Vec::new(),
            });
        }
        return Err(GekiError::render(format!(
            "ffmpeg audio decode failed for '{}': {}",
            path.display(),
            msg.trim()
        )));
    }

    if !out.stdout.len().is_multiple_of(4) {
        return Err(GekiError::render(
            "decoded audio byte length is not aligned to f32 samples",
        ));
    }
    let mut pcm = Vec::<f32>::with_capacity(out.stdout.len() / 4);
    for chunk in out.stdout.chunks_exact(4) {
        pcm.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    Ok(AudioPcm {
        sample_rate,
        channels: 2,
        interleaved_f32: pcm,
    })
}

/// Streaming RGBA frame reader for the background video.
///
/// Spawns one `ffmpeg` that drops the background's native audio, scales to
/// the output canvas, resamples to the output frame rate, and emits raw RGBA
/// frames on stdout. Frames are read one at a time so a full clip never sits
/// in memory. The child is reaped on drop even if the caller bails early.
pub struct BackgroundFrames {
    child: Child,
    stdout: Option<ChildStdout>,
    frame_len: usize,
}

impl BackgroundFrames {
    pub fn open(source: &Path, canvas: Canvas, fps: u32, duration_sec: f64) -> GekiResult<Self> {
        if fps == 0 {
            return Err(GekiError::validation("background fps must be non-zero"));
        }
        if !(duration_sec.is_finite() && duration_sec > 0.0) {
            return Err(GekiError::validation(
                "background duration must be finite and > 0",
            ));
        }

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(source)
            .args([
                "-t",
                &format!("{duration_sec:.6}"),
                "-an",
                "-vf",
                &format!(
                    "scale={}:{}:force_original_aspect_ratio=increase,crop={}:{},fps={}",
                    canvas.width, canvas.height, canvas.width, canvas.height, fps
                ),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| GekiError::render(format!("failed to spawn ffmpeg for decode: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GekiError::render("failed to open ffmpeg stdout (unexpected)"))?;

        Ok(Self {
            child,
            stdout: Some(stdout),
            frame_len: canvas.rgba8_len(),
        })
    }

    /// Read the next frame into `buf`; `false` once the stream is exhausted.
    pub fn next_frame(&mut self, buf: &mut [u8]) -> GekiResult<bool> {
        if buf.len() != self.frame_len {
            return Err(GekiError::validation(
                "frame buffer size mismatch with canvas",
            ));
        }
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(false);
        };

        let mut filled = 0usize;
        while filled < buf.len() {
            let n = stdout
                .read(&mut buf[filled..])
                .map_err(|e| GekiError::render(format!("background frame read failed: {e}")))?;
            if n == 0 {
                if filled == 0 {
                    self.stdout = None;
                    return Ok(false);
                }
                return Err(GekiError::render(
                    "background stream ended mid-frame (truncated source?)",
                ));
            }
            filled += n;
        }
        Ok(true)
    }
}

impl Drop for BackgroundFrames {
    fn drop(&mut self) {
        // Dropping stdout closes the pipe; kill in case ffmpeg is still
        // producing, then reap.
        self.stdout = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('/');
    let a = parts.next()?.parse::<u32>().ok()?;
    let b = parts.next()?.parse::<u32>().ok()?;
    if b == 0 {
        return None;
    }
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_duration_accounts_for_channels() {
        let pcm = AudioPcm {
            sample_rate: 48_000,
            channels: 2,
            interleaved_f32: vec![0.0; 96_000],
        };
        assert_eq!(pcm.frames(), 48_000);
        assert!((pcm.duration_sec() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ratio_parsing_rejects_zero_den() {
        assert_eq!(parse_ff_ratio("30/1"), Some((30, 1)));
        assert_eq!(parse_ff_ratio("30000/1001"), Some((30_000, 1001)));
        assert_eq!(parse_ff_ratio("30/0"), None);
        assert_eq!(parse_ff_ratio("junk"), None);
    }
}
