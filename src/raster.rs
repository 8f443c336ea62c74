//! Caption rasterization onto a transparent full-canvas layer.
//!
//! Layout policy: manual line breaks only. Each line is measured
//! independently, the block is vertically centered on the anchor's y, and
//! every line is horizontally centered on the anchor's x on its own (lines of
//! different widths each center individually; this is not block alignment).

use std::borrow::Cow;
use std::path::Path;

use crate::core::{Canvas, Point};
use crate::error::{GekiError, GekiResult};

/// Fill styling for captions.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CaptionStyle {
    /// Straight-alpha RGBA fill color.
    pub color: [u8; 4],
    /// Extra pixels between wrapped lines.
    pub line_spacing_px: f32,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            color: [255, 255, 255, 255],
            line_spacing_px: 18.0,
        }
    }
}

/// One rasterized caption layer: premultiplied RGBA8 at exactly the output
/// canvas size.
#[derive(Clone, Debug)]
pub struct Overlay {
    pub canvas: Canvas,
    pub rgba8_premul: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct BrushRgba8 {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

/// Top-left line origins for a block of measured lines centered on `anchor`.
///
/// `line_sizes` are `(width, height)` pairs. The block height is the sum of
/// line heights plus `(lines - 1) * spacing`; its vertical center lands on
/// `anchor.y`, and each line centers on `anchor.x` independently.
pub fn line_origins(line_sizes: &[(f32, f32)], anchor: Point, spacing: f32) -> Vec<(f32, f32)> {
    if line_sizes.is_empty() {
        return Vec::new();
    }

    let total_h: f32 = line_sizes.iter().map(|&(_, h)| h).sum::<f32>()
        + spacing * (line_sizes.len() - 1) as f32;
    let mut y = anchor.y as f32 - total_h / 2.0;

    let mut out = Vec::with_capacity(line_sizes.len());
    for &(w, h) in line_sizes {
        out.push((anchor.x as f32 - w / 2.0, y));
        y += h + spacing;
    }
    out
}

struct LoadedFont {
    family: String,
    data: vello_cpu::peniko::FontData,
}

/// Stateful caption rasterizer holding Parley contexts and the resolved font.
///
/// Font resolution is fallback-with-warning: a configured font file that is
/// missing or unreadable logs a warning and falls back to a scan of the
/// system font directories; if no usable font exists at all, captions render
/// blank (with a warning) rather than failing the whole clip.
pub struct CaptionRasterizer {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<BrushRgba8>,
    font: Option<LoadedFont>,
}

impl CaptionRasterizer {
    pub fn new(font_path: Option<&Path>) -> Self {
        let bytes = resolve_font_bytes(font_path);
        let mut raster = Self {
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
            font: None,
        };
        if let Some(bytes) = bytes {
            match raster.register_font(bytes) {
                Ok(font) => raster.font = Some(font),
                Err(e) => tracing::warn!("font registration failed, captions will be blank: {e}"),
            }
        }
        raster
    }

    fn register_font(&mut self, bytes: Vec<u8>) -> GekiResult<LoadedFont> {
        let families = self
            .font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(bytes.clone()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or_else(|| GekiError::font_load("no font families registered from font bytes"))?;
        let family = self
            .font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| GekiError::font_load("registered font family has no name"))?
            .to_string();

        // Glyph rendering needs its own handle to the raw font bytes; the
        // parley-registered blob cannot cross the crate boundary.
        let data = vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(bytes), 0);
        Ok(LoadedFont { family, data })
    }

    /// Rasterize `text` (already cleaned, `\n`-separated lines) centered on
    /// `anchor` into a transparent layer of exactly `canvas` size.
    pub fn rasterize(
        &mut self,
        text: &str,
        size_px: f32,
        style: &CaptionStyle,
        anchor: Point,
        canvas: Canvas,
    ) -> GekiResult<Overlay> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(GekiError::validation("caption size_px must be > 0"));
        }
        let (width_u16, height_u16) = canvas_u16(canvas)?;

        let mut pixmap = vello_cpu::Pixmap::new(width_u16, height_u16);

        let lines: Vec<&str> = text.split('\n').filter(|l| !l.is_empty()).collect();
        if lines.is_empty() || self.font.is_none() {
            if self.font.is_none() && !lines.is_empty() {
                tracing::warn!("no usable caption font; rendering blank overlay");
            }
            return Ok(Overlay {
                canvas,
                rgba8_premul: pixmap.data_as_u8_slice().to_vec(),
            });
        }

        let brush = BrushRgba8 {
            r: style.color[0],
            g: style.color[1],
            b: style.color[2],
            a: style.color[3],
        };
        let mut layouts = Vec::with_capacity(lines.len());
        for line in &lines {
            layouts.push(self.layout_line(line, size_px, brush)?);
        }

        let sizes: Vec<(f32, f32)> = layouts.iter().map(|l| (l.width(), l.height())).collect();
        let origins = line_origins(&sizes, anchor, style.line_spacing_px);

        let font = self.font.as_ref().expect("checked above");
        let mut ctx = vello_cpu::RenderContext::new(width_u16, height_u16);
        for (layout, &(x, y)) in layouts.iter().zip(origins.iter()) {
            ctx.set_transform(vello_cpu::kurbo::Affine::translate((
                f64::from(x),
                f64::from(y),
            )));
            for line in layout.lines() {
                for item in line.items() {
                    let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                        continue;
                    };

                    let b = run.style().brush;
                    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(b.r, b.g, b.b, b.a));

                    let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                        id: g.id,
                        x: g.x,
                        y: g.y,
                    });
                    ctx.glyph_run(&font.data)
                        .font_size(run.run().font_size())
                        .fill_glyphs(glyphs);
                }
            }
        }
        ctx.flush();
        ctx.render_to_pixmap(&mut pixmap);

        Ok(Overlay {
            canvas,
            rgba8_premul: pixmap.data_as_u8_slice().to_vec(),
        })
    }

    fn layout_line(
        &mut self,
        line: &str,
        size_px: f32,
        brush: BrushRgba8,
    ) -> GekiResult<parley::Layout<BrushRgba8>> {
        let family = self
            .font
            .as_ref()
            .map(|f| f.family.clone())
            .ok_or_else(|| GekiError::font_load("no caption font loaded"))?;

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, line, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(Cow::Owned(family)),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<BrushRgba8> = builder.build(line);
        layout.break_all_lines(None);
        Ok(layout)
    }
}

fn canvas_u16(canvas: Canvas) -> GekiResult<(u16, u16)> {
    let w = u16::try_from(canvas.width)
        .map_err(|_| GekiError::validation("canvas width exceeds rasterizer limit"))?;
    let h = u16::try_from(canvas.height)
        .map_err(|_| GekiError::validation("canvas height exceeds rasterizer limit"))?;
    if w == 0 || h == 0 {
        return Err(GekiError::validation("canvas must be non-empty"));
    }
    Ok((w, h))
}

fn resolve_font_bytes(font_path: Option<&Path>) -> Option<Vec<u8>> {
    if let Some(path) = font_path {
        match std::fs::read(path) {
            Ok(bytes) => return Some(bytes),
            Err(e) => {
                tracing::warn!(
                    "configured font '{}' is unreadable ({e}); falling back to system fonts",
                    path.display()
                );
            }
        }
    }

    let found = find_system_font();
    if let Some(path) = &found {
        tracing::debug!("using system font '{}'", path.display());
    }
    found.and_then(|p| std::fs::read(p).ok())
}

/// Pick a system font file, preferring faces likely to cover Japanese text.
fn find_system_font() -> Option<std::path::PathBuf> {
    const ROOTS: &[&str] = &[
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/System/Library/Fonts",
        "C:\\Windows\\Fonts",
    ];
    const CJK_HINTS: &[&str] = &["cjk", "jp", "gothic", "mincho", "noto", "droid", "ipa"];

    let mut candidates = Vec::new();
    for root in ROOTS {
        collect_font_files(Path::new(root), 0, &mut candidates);
    }
    if let Some(home) = std::env::var_os("HOME") {
        collect_font_files(&Path::new(&home).join(".fonts"), 0, &mut candidates);
    }

    candidates
        .iter()
        .find(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let lower = name.to_ascii_lowercase();
            CJK_HINTS.iter().any(|h| lower.contains(h))
        })
        .or_else(|| candidates.first())
        .cloned()
}

fn collect_font_files(dir: &Path, depth: usize, out: &mut Vec<std::path::PathBuf>) {
    if depth > 4 || out.len() > 256 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_font_files(&path, depth + 1, out);
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc") {
                out.push(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_centers_on_anchor() {
        let origins = line_origins(&[(200.0, 50.0)], Point::new(960.0, 530.0), 18.0);
        assert_eq!(origins, vec![(860.0, 505.0)]);
    }

    #[test]
    fn lines_center_horizontally_independently() {
        let origins = line_origins(
            &[(300.0, 50.0), (100.0, 50.0)],
            Point::new(960.0, 530.0),
            20.0,
        );
        // Block height 120, top at 470.
        assert_eq!(origins[0], (810.0, 470.0));
        assert_eq!(origins[1], (910.0, 540.0));
        // Vertical center of the block sits on the anchor.
        let top = origins[0].1;
        let bottom = origins[1].1 + 50.0;
        assert_eq!((top + bottom) / 2.0, 530.0);
    }

    #[test]
    fn empty_block_has_no_origins() {
        assert!(line_origins(&[], Point::new(0.0, 0.0), 10.0).is_empty());
    }

    #[test]
    fn overlay_matches_canvas_size_exactly() {
        let mut raster = CaptionRasterizer::new(None);
        for (canvas, label) in [
            (crate::core::LayoutMode::Vertical.canvas(), "vertical"),
            (crate::core::LayoutMode::Horizontal.canvas(), "horizontal"),
        ] {
            let overlay = raster
                .rasterize(
                    "テスト",
                    96.0,
                    &CaptionStyle::default(),
                    Point::new(100.0, 100.0),
                    canvas,
                )
                .unwrap();
            assert_eq!(overlay.canvas, canvas, "{label}");
            assert_eq!(overlay.rgba8_premul.len(), canvas.rgba8_len(), "{label}");
        }
    }

    #[test]
    fn cleaned_delimiter_text_rasterizes_identically() {
        // The delimiter is stripped before rasterization, so "AB_C" and "ABC"
        // must produce the same pixels.
        let mut raster = CaptionRasterizer::new(None);
        let canvas = Canvas {
            width: 640,
            height: 360,
        };
        let style = CaptionStyle::default();
        let anchor = Point::new(320.0, 180.0);

        let cleaned = crate::script::clean_display("AB_C", '_');
        let a = raster
            .rasterize(&cleaned, 64.0, &style, anchor, canvas)
            .unwrap();
        let b = raster.rasterize("ABC", 64.0, &style, anchor, canvas).unwrap();
        assert_eq!(a.rgba8_premul, b.rgba8_premul);
    }

    #[test]
    fn blank_text_renders_transparent_overlay() {
        let mut raster = CaptionRasterizer::new(None);
        let canvas = Canvas {
            width: 64,
            height: 64,
        };
        let overlay = raster
            .rasterize(
                "",
                64.0,
                &CaptionStyle::default(),
                Point::new(32.0, 32.0),
                canvas,
            )
            .unwrap();
        assert!(overlay.rgba8_premul.iter().all(|&b| b == 0));
    }
}
