//! Gekiclip stitches one short comedy clip out of a fixed background video,
//! three time-boxed caption overlays, two synthesized narration tracks, and
//! two sound effects, muxed to MP4 through the system `ffmpeg`.
//!
//! The public API is one call deep:
//!
//! - Describe the clip with a [`RenderRequest`] (prompt text, answer text,
//!   [`LayoutMode`]).
//! - Configure assets and timing with a [`CompositorConfig`].
//! - Hand [`Compositor::render`] any [`SpeechSynthesizer`] and an output
//!   path.
//!
//! Where the prompt or answer comes from (an LLM, a human, a JSON file) is
//! explicitly not this crate's business.
#![forbid(unsafe_code)]

pub mod audio;
pub mod compositor;
pub mod core;
pub mod encode;
pub mod error;
pub mod media;
pub mod raster;
pub mod script;
pub mod speech;

pub use compositor::{
    AssetPaths, Compositor, CompositorConfig, RenderRequest, RenderStage, timestamped_output_name,
};
pub use core::{Canvas, LayoutMode, SfxCue, TimeRange, Timeline};
pub use error::{GekiError, GekiResult};
pub use media::{AudioPcm, MIX_SAMPLE_RATE};
pub use raster::{CaptionRasterizer, CaptionStyle, Overlay};
pub use script::{FontSizeTable, Fragment, TextSpec};
pub use speech::{CommandSynthesizer, SpeechSynthesizer, Voice};
