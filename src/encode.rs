//! MP4 encoding through the system `ffmpeg` binary.
//!
//! Raw RGBA frames stream over stdin; the mixed audio arrives as a raw
//! `f32le` file input and is muxed as AAC alongside libx264 video.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::core::Canvas;
use crate::error::{GekiError, GekiResult};

/// Raw PCM audio input for the muxer.
#[derive(Clone, Debug)]
pub struct AudioInput {
    /// Path to interleaved `f32le` PCM data.
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub canvas: Canvas,
    pub fps: u32,
    pub out_path: PathBuf,
    pub overwrite: bool,
    pub audio: Option<AudioInput>,
}

impl EncodeConfig {
    pub fn validate(&self) -> GekiResult<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(GekiError::validation(
                "encode width/height must be non-zero",
            ));
        }
        if self.fps == 0 {
            return Err(GekiError::validation("encode fps must be non-zero"));
        }
        if !self.canvas.width.is_multiple_of(2) || !self.canvas.height.is_multiple_of(2) {
            // Default settings target yuv420p output for maximum compatibility.
            return Err(GekiError::validation(
                "encode width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        if let Some(audio) = &self.audio {
            if audio.sample_rate == 0 || audio.channels == 0 {
                return Err(GekiError::validation(
                    "audio sample_rate/channels must be non-zero",
                ));
            }
        }
        Ok(())
    }
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> GekiResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Streaming MP4 encoder; opaque RGBA frames in, finished file on `finish`.
pub struct ClipEncoder {
    cfg: EncodeConfig,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    frame_len: usize,
}

impl ClipEncoder {
    pub fn new(cfg: EncodeConfig) -> GekiResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !cfg.overwrite && cfg.out_path.exists() {
            return Err(GekiError::validation(format!(
                "output file '{}' already exists",
                cfg.out_path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(GekiError::render(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if cfg.overwrite {
            cmd.arg("-y");
        } else {
            cmd.arg("-n");
        }

        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.canvas.width, cfg.canvas.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
        ]);

        if let Some(audio) = cfg.audio.as_ref() {
            cmd.args([
                "-f",
                "f32le",
                "-ar",
                &audio.sample_rate.to_string(),
                "-ac",
                &audio.channels.to_string(),
                "-i",
            ])
            .arg(&audio.path)
            .args([
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-shortest",
                "-movflags",
                "+faststart",
            ]);
        } else {
            cmd.args([
                "-an",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ]);
        }
        cmd.arg(&cfg.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            GekiError::render(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GekiError::render("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| GekiError::render("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        Ok(Self {
            frame_len: cfg.canvas.rgba8_len(),
            cfg,
            child,
            stdin: Some(stdin),
            stderr_drain: Some(stderr_drain),
        })
    }

    /// Push one opaque RGBA frame in timeline order.
    pub fn push_frame(&mut self, rgba: &[u8]) -> GekiResult<()> {
        if rgba.len() != self.frame_len {
            return Err(GekiError::validation(
                "frame size mismatch with width*height*4",
            ));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(GekiError::render("encoder is already finalized"));
        };

        use std::io::Write as _;
        stdin
            .write_all(rgba)
            .map_err(|e| GekiError::render(format!("failed to write frame to ffmpeg stdin: {e}")))
    }

    /// Close the stream and wait for ffmpeg to finish the file.
    pub fn finish(mut self) -> GekiResult<PathBuf> {
        drop(self.stdin.take());

        let status = self
            .child
            .wait()
            .map_err(|e| GekiError::render(format!("failed to wait for ffmpeg to finish: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| GekiError::render("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| GekiError::render(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(GekiError::render(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        Ok(self.cfg.out_path.clone())
    }
}

impl Drop for ClipEncoder {
    fn drop(&mut self) {
        // Normal completion goes through `finish`; this path only runs when a
        // render bails early, so reap the child instead of leaking it.
        if self.stdin.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
            if let Some(handle) = self.stderr_drain.take() {
                let _ = handle.join();
            }
        }
    }
}
