use clap::Parser;
use std::path::{Path, PathBuf};
use tilemark::{Color, WatermarkError, WatermarkSpec, Watermarker, status};

/// Stamp a tiled, rotated, semi-transparent text watermark onto every page of a PDF.
#[derive(Parser, Debug)]
#[command(name = "tilemark")]
#[command(version, about, long_about = None)]
struct Args {
    /// PDF to watermark
    input: PathBuf,

    /// Output PDF (default: <input stem>_watermarked.pdf next to the input)
    output: Option<PathBuf>,

    /// TrueType or OpenType font used for the watermark text
    #[arg(long)]
    font: PathBuf,

    /// Literal watermark text
    #[arg(long, conflicts_with_all = ["author", "date"])]
    text: Option<String>,

    /// Author name for the "author:<name>, date:<date> internal review" template
    #[arg(long, requires = "date")]
    author: Option<String>,

    /// Date string for the author template
    #[arg(long, requires = "author")]
    date: Option<String>,

    /// Font size in points
    #[arg(long, default_value_t = 26.0)]
    size: f32,

    /// Fill alpha, 0 to 1
    #[arg(long, default_value_t = 0.1)]
    opacity: f32,

    /// Counter-clockwise rotation in degrees
    #[arg(long, default_value_t = 60.0, allow_negative_numbers = true)]
    angle: f32,

    /// Fill color as r,g,b components in 0..1
    #[arg(long, value_parser = parse_color)]
    color: Option<Color>,

    /// Horizontal gap between copies, in points
    #[arg(long)]
    gap: Option<f32>,

    /// Row pitch as a multiple of the font size
    #[arg(long)]
    line_factor: Option<f32>,

    /// Grid half-extent as a multiple of the larger page side
    #[arg(long)]
    overscan: Option<f32>,

    /// Draw pages on a single thread
    #[arg(long)]
    no_parallel: bool,

    /// Skip tiles that cannot reach the visible page
    #[arg(long)]
    cull: bool,

    /// Ignore the page /Rotate when orienting the text
    #[arg(long)]
    no_rotate_compensation: bool,

    /// JSONL debug event log
    #[arg(long)]
    debug_log: Option<PathBuf>,

    /// JSONL timing log
    #[arg(long)]
    perf_log: Option<PathBuf>,
}

fn parse_color(value: &str) -> Result<Color, String> {
    let parts: Vec<f32> = value
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|err| format!("invalid color component: {err}"))?;
    match parts.as_slice() {
        [r, g, b] => Ok(Color::rgb(*r, *g, *b)),
        [level] => Ok(Color::gray(*level)),
        _ => Err(format!("expected r,g,b, got '{value}'")),
    }
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{stem}_watermarked.pdf"))
}

fn run(args: Args) -> Result<(PathBuf, tilemark::WatermarkReport), WatermarkError> {
    let mut spec = match (&args.text, &args.author, &args.date) {
        (Some(text), _, _) => WatermarkSpec::text(text.clone()),
        (None, Some(author), Some(date)) => WatermarkSpec::for_author(author, date),
        _ => {
            return Err(WatermarkError::InvalidWatermarkSpec(
                "pass --text, or --author together with --date".to_string(),
            ));
        }
    };
    spec = spec
        .with_font_size(args.size)
        .with_opacity(args.opacity)
        .with_angle(args.angle);
    if let Some(color) = args.color {
        spec = spec.with_color(color);
    }

    let mut builder = Watermarker::builder()
        .parallel(!args.no_parallel)
        .cull_offpage_tiles(args.cull)
        .compensate_page_rotation(!args.no_rotate_compensation);
    if let Some(gap) = args.gap {
        builder = builder.gap(gap);
    }
    if let Some(factor) = args.line_factor {
        builder = builder.line_factor(factor);
    }
    if let Some(overscan) = args.overscan {
        builder = builder.overscan(overscan);
    }
    if let Some(path) = args.debug_log {
        builder = builder.debug_log(path);
    }
    if let Some(path) = args.perf_log {
        builder = builder.perf_log(path);
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.input));
    let report = builder
        .build()?
        .watermark(&args.input, &output, &args.font, &spec)?;
    Ok((output, report))
}

fn main() {
    let args = Args::parse();
    let code = match run(args) {
        Ok((output, report)) => {
            eprintln!(
                "tilemark: {} pages, {} tiles, font {} -> {} bytes, {:.1} ms -> {}",
                report.page_count(),
                report.total_tiles(),
                report.source_font_bytes,
                report.subset_font_bytes,
                report.total_ms,
                output.display()
            );
            status::OK
        }
        Err(err) => {
            eprintln!("tilemark: {err}");
            err.status_code()
        }
    };
    std::process::exit(code);
}
