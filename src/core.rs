use crate::error::{GekiError, GekiResult};

pub use kurbo::Point;

/// Output canvas dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Canvas {
    /// Byte length of one tightly packed RGBA8 frame at this size.
    pub fn rgba8_len(self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Target aspect ratio of the rendered clip.
///
/// The mode fixes the output canvas and the overlay anchor positions; nothing
/// else about the timeline depends on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Short-form 1080x1920 output.
    Vertical,
    /// 1920x1080 output.
    Horizontal,
}

impl LayoutMode {
    pub fn canvas(self) -> Canvas {
        match self {
            LayoutMode::Vertical => Canvas {
                width: 1080,
                height: 1920,
            },
            LayoutMode::Horizontal => Canvas {
                width: 1920,
                height: 1080,
            },
        }
    }

    /// Anchor for the prompt-full and answer overlays.
    pub fn primary_anchor(self) -> Point {
        match self {
            LayoutMode::Vertical => Point::new(540.0, 840.0),
            LayoutMode::Horizontal => Point::new(960.0, 530.0),
        }
    }

    /// Anchor for the small prompt caption shown during the monitor framing.
    pub fn caption_anchor(self) -> Point {
        match self {
            LayoutMode::Vertical => Point::new(540.0, 1700.0),
            LayoutMode::Horizontal => Point::new(960.0, 980.0),
        }
    }
}

/// Half-open interval `[start_sec, end_sec)` on the clip timeline.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeRange {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl TimeRange {
    pub fn new(start_sec: f64, end_sec: f64) -> GekiResult<Self> {
        let r = Self { start_sec, end_sec };
        r.validate()?;
        Ok(r)
    }

    pub fn validate(&self) -> GekiResult<()> {
        if !self.start_sec.is_finite() || !self.end_sec.is_finite() {
            return Err(GekiError::validation("time range bounds must be finite"));
        }
        if self.start_sec < 0.0 {
            return Err(GekiError::validation("time range start must be >= 0"));
        }
        if self.start_sec > self.end_sec {
            return Err(GekiError::validation("time range start must be <= end"));
        }
        Ok(())
    }

    pub fn contains(&self, t_sec: f64) -> bool {
        self.start_sec <= t_sec && t_sec < self.end_sec
    }
}

/// A fixed sound effect scheduled at an attenuated volume.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SfxCue {
    pub start_sec: f64,
    /// Linear gain; sound effects sit under narration, so this is well below 1.
    pub volume: f32,
}

/// Named overlay intervals and audio offsets of one clip.
///
/// All values are configuration rather than literals; they moved around
/// constantly while the clip format was being tuned. The defaults describe a
/// 15-second clip.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Timeline {
    /// Large prompt text over the opening framing.
    pub prompt_full: TimeRange,
    /// Small prompt caption shown while the monitor framing is on screen.
    pub prompt_caption: TimeRange,
    /// Large answer text.
    pub answer: TimeRange,
    /// When the prompt narration starts.
    pub prompt_voice_start_sec: f64,
    /// When the answer narration starts.
    ///
    /// This is strictly after `answer.start_sec`: the answer text appears
    /// first and the voice lands after a beat, which is the clip's drumroll
    /// pause. It is deliberate comedic timing, not slack in the schedule.
    pub answer_voice_start_sec: f64,
    /// Jingle under the prompt reveal.
    pub intro_sfx: SfxCue,
    /// Drumroll under the answer reveal.
    pub reveal_sfx: SfxCue,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            prompt_full: TimeRange {
                start_sec: 0.0,
                end_sec: 4.5,
            },
            prompt_caption: TimeRange {
                start_sec: 4.5,
                end_sec: 11.0,
            },
            answer: TimeRange {
                start_sec: 11.0,
                end_sec: 15.0,
            },
            prompt_voice_start_sec: 0.3,
            answer_voice_start_sec: 12.2,
            intro_sfx: SfxCue {
                start_sec: 0.0,
                volume: 0.25,
            },
            reveal_sfx: SfxCue {
                start_sec: 11.0,
                volume: 0.2,
            },
        }
    }
}

impl Timeline {
    /// Timeline length: the last overlay interval's end.
    pub fn duration_sec(&self) -> f64 {
        self.prompt_full
            .end_sec
            .max(self.prompt_caption.end_sec)
            .max(self.answer.end_sec)
    }

    pub fn validate(&self) -> GekiResult<()> {
        self.prompt_full.validate()?;
        self.prompt_caption.validate()?;
        self.answer.validate()?;

        let dur = self.duration_sec();
        if dur <= 0.0 {
            return Err(GekiError::validation("timeline duration must be > 0"));
        }

        for (name, t) in [
            ("prompt_voice_start_sec", self.prompt_voice_start_sec),
            ("answer_voice_start_sec", self.answer_voice_start_sec),
            ("intro_sfx.start_sec", self.intro_sfx.start_sec),
            ("reveal_sfx.start_sec", self.reveal_sfx.start_sec),
        ] {
            if !t.is_finite() || t < 0.0 {
                return Err(GekiError::validation(format!(
                    "{name} must be finite and >= 0"
                )));
            }
            if t >= dur {
                return Err(GekiError::validation(format!(
                    "{name} must start before the timeline ends"
                )));
            }
        }

        if self.answer_voice_start_sec <= self.answer.start_sec {
            return Err(GekiError::validation(
                "answer narration must start strictly after the answer overlay appears",
            ));
        }

        for vol in [self.intro_sfx.volume, self.reveal_sfx.volume] {
            if !vol.is_finite() || vol < 0.0 {
                return Err(GekiError::validation("sfx volume must be finite and >= 0"));
            }
        }

        Ok(())
    }
}
