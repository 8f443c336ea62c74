use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "geki", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one clip to MP4 (requires `ffmpeg`/`ffprobe` on PATH).
    Render(RenderArgs),
    /// Rasterize a single caption layer as a PNG, for layout debugging.
    Caption(CaptionArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Prompt display text. Spaces mark manual line breaks.
    #[arg(long)]
    prompt: String,

    /// Prompt pronunciation; defaults to the display text. `_` runs insert
    /// pauses.
    #[arg(long)]
    prompt_read: Option<String>,

    /// Answer display text.
    #[arg(long)]
    answer: String,

    /// Answer pronunciation; defaults to the display text.
    #[arg(long)]
    answer_read: Option<String>,

    /// Output aspect ratio.
    #[arg(long, value_enum, default_value_t = ModeChoice::Vertical)]
    mode: ModeChoice,

    /// Background video (its own audio is discarded).
    #[arg(long)]
    background: PathBuf,

    /// Jingle under the prompt reveal.
    #[arg(long)]
    intro_sfx: PathBuf,

    /// Drumroll under the answer reveal.
    #[arg(long)]
    reveal_sfx: PathBuf,

    /// Caption typeface; falls back to system fonts when omitted.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Synthesis command for the prompt voice. Runs via `sh -c` with
    /// `$GEKI_TEXT` and `$GEKI_OUT` set; must write a WAV to `$GEKI_OUT`.
    #[arg(long)]
    prompt_voice_cmd: String,

    /// Synthesis command for the answer voice (same contract).
    #[arg(long)]
    answer_voice_cmd: String,

    /// Output MP4 path; a timestamp-based name is generated when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Whole-render timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Parser, Debug)]
struct CaptionArgs {
    /// Caption text. Spaces mark manual line breaks.
    #[arg(long)]
    text: String,

    /// Output aspect ratio (fixes canvas and anchor).
    #[arg(long, value_enum, default_value_t = ModeChoice::Vertical)]
    mode: ModeChoice,

    /// Caption typeface; falls back to system fonts when omitted.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeChoice {
    Vertical,
    Horizontal,
}

impl From<ModeChoice> for gekiclip::LayoutMode {
    fn from(m: ModeChoice) -> Self {
        match m {
            ModeChoice::Vertical => gekiclip::LayoutMode::Vertical,
            ModeChoice::Horizontal => gekiclip::LayoutMode::Horizontal,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Caption(args) => cmd_caption(args),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut config = gekiclip::CompositorConfig::new(gekiclip::AssetPaths {
        background: args.background,
        intro_sfx: args.intro_sfx,
        reveal_sfx: args.reveal_sfx,
        font: args.font,
    });
    config.timeout = args.timeout_secs.map(std::time::Duration::from_secs);

    let req = gekiclip::RenderRequest {
        prompt: gekiclip::TextSpec {
            pronunciation: args.prompt_read.unwrap_or_else(|| args.prompt.clone()),
            display: args.prompt,
        },
        answer: gekiclip::TextSpec {
            pronunciation: args.answer_read.unwrap_or_else(|| args.answer.clone()),
            display: args.answer,
        },
        mode: args.mode.into(),
    };

    let synth = gekiclip::CommandSynthesizer::new(args.prompt_voice_cmd, args.answer_voice_cmd);
    let out = args.out.unwrap_or_else(gekiclip::timestamped_output_name);

    let rendered = gekiclip::Compositor::new(config)
        .render(&req, &synth, &out)
        .with_context(|| format!("render clip '{}'", out.display()))?;

    eprintln!("wrote {}", rendered.display());
    Ok(())
}

fn cmd_caption(args: CaptionArgs) -> anyhow::Result<()> {
    let mode: gekiclip::LayoutMode = args.mode.into();
    let canvas = mode.canvas();
    let sizes = gekiclip::FontSizeTable::default();

    let text = gekiclip::script::clean_display(&args.text, '_');
    let px = sizes.size_for(text.chars().filter(|&c| c != '\n').count());

    let mut raster = gekiclip::CaptionRasterizer::new(args.font.as_deref());
    let overlay = raster.rasterize(
        &text,
        px,
        &gekiclip::CaptionStyle::default(),
        mode.primary_anchor(),
        canvas,
    )?;

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }

    image::save_buffer_with_format(
        &args.out,
        &overlay.rgba8_premul,
        canvas.width,
        canvas.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}
