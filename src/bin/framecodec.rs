use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use framecodec::{
    EncodeOptions, ExtractOptions, FfmpegBackend, FfmpegLogLevel, FrameEncoder, FrameExtractor, MediaBackend,
    MediaSource, PixelLayout, ProgressEvent, ProgressSink, StillFormat,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  framecodec probe input.mp4 --json\n  framecodec extract input.mp4 --out frames --at 0.5 --at 1.0 --at 0:01.5 --progress\n  framecodec encode frames output.mp4 --fps 24 --bit-rate 8000000\n  framecodec completions zsh > _framecodec";

#[derive(Debug, Parser)]
#[command(
    name = "framecodec",
    version,
    about = "Extract exact stills from video and encode still sequences back into video",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional output, including FFmpeg's own info messages.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting an existing output video.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the tracks of a media file.
    #[command(
        about = "Print the tracks of a media file",
        visible_alias = "info",
        after_help = "Examples:\n  framecodec probe input.mp4\n  framecodec probe input.mp4 --json"
    )]
    Probe {
        /// Input media path.
        input: PathBuf,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Save the frames at the given times as images.
    #[command(
        about = "Extract frames at exact timestamps",
        after_help = "Examples:\n  framecodec extract input.mp4 --out frames --at 1 --at 2.5\n  framecodec extract input.mp4 --out frames --at 00:01:02.5 --png"
    )]
    Extract {
        /// Input media path.
        input: PathBuf,
        /// Output directory for the stills.
        #[arg(long)]
        out: PathBuf,
        /// Timestamp to extract (seconds, MM:SS, or HH:MM:SS). Repeatable.
        #[arg(long = "at", required = true)]
        at: Vec<String>,
        /// Write PNG instead of JPEG.
        #[arg(long)]
        png: bool,
        /// JPEG quality (1-100).
        #[arg(long, default_value_t = 100)]
        quality: u8,
        /// File name prefix.
        #[arg(long, default_value = "image_")]
        prefix: String,
        /// Output the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Encode every image in a directory into a video.
    #[command(
        about = "Encode an image directory into a video",
        after_help = "Examples:\n  framecodec encode frames output.mp4\n  framecodec encode frames output.webm --mime video/x-vnd.on2.vp9 --fps 25"
    )]
    Encode {
        /// Directory of images, encoded in file-name order.
        frames: PathBuf,
        /// Output video path; the container is picked from the extension.
        output: PathBuf,
        /// Output mime type.
        #[arg(long, default_value = "video/avc")]
        mime: String,
        /// Frames per second.
        #[arg(long, default_value_t = 30)]
        fps: u32,
        /// Bit rate in bits per second.
        #[arg(long, default_value_t = 16_000_000)]
        bit_rate: u32,
        /// Seconds between key frames.
        #[arg(long, default_value_t = 1)]
        i_frame_interval: u32,
        /// Encoder input layout (yuv420p, nv12).
        #[arg(long, default_value = "yuv420p")]
        layout: String,
        /// Delete the frame directory after a successful encode.
        #[arg(long)]
        delete_frames: bool,
        /// Output the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions.
    #[command(
        about = "Generate shell completion scripts",
        after_help = "Examples:\n  framecodec completions bash > framecodec.bash\n  framecodec completions zsh > _framecodec"
    )]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_timecode(value: &str) -> Result<f64, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("time value cannot be empty".into());
    }

    if let Ok(seconds) = trimmed.parse::<f64>() {
        return Ok(seconds);
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid time format: {trimmed}").into());
    }

    let (hours, minutes, seconds_str) = if parts.len() == 3 {
        (parts[0].parse::<u64>()?, parts[1].parse::<u64>()?, parts[2])
    } else {
        (0_u64, parts[0].parse::<u64>()?, parts[1])
    };

    let seconds = seconds_str.parse::<f64>()?;
    Ok((hours as f64 * 3600.0) + (minutes as f64 * 60.0) + seconds)
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn parse_layout(value: &str) -> Option<PixelLayout> {
    match value.to_ascii_lowercase().as_str() {
        "yuv420p" | "i420" | "planar" => Some(PixelLayout::Yuv420p),
        "nv12" | "semi-planar" => Some(PixelLayout::Nv12),
        _ => None,
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        framecodec::set_ffmpeg_log_level(parsed);
    } else if global.verbose {
        framecodec::set_ffmpeg_log_level(FfmpegLogLevel::Info);
    } else {
        framecodec::set_ffmpeg_log_level(FfmpegLogLevel::Error);
    }
    Ok(())
}

fn progress_bar(enabled: bool) -> Result<Option<ProgressBar>, Box<dyn std::error::Error>> {
    if !enabled {
        return Ok(None);
    }
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos:>3}% {msg}")?;
    bar.set_style(style.progress_chars("##-"));
    Ok(Some(bar))
}

/// Mirrors progress events onto a terminal progress bar.
struct TerminalProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressSink for TerminalProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.bar.set_position(u64::from(event.percent));
        if let Some(location) = &event.location {
            let name = location.file_name().unwrap_or(location.as_os_str()).to_string_lossy();
            if self.verbose {
                self.bar.println(format!("{} {}", "wrote".green(), location.display()));
            }
            self.bar.set_message(name.into_owned());
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;
    let backend = FfmpegBackend::new();

    match cli.command {
        Commands::Probe { input, json } => {
            let source = backend.open_source(&input)?;
            let tracks = source.tracks();
            if json {
                let payload = json!({
                    "path": input.display().to_string(),
                    "tracks": tracks.iter().enumerate().map(|(index, track)| json!({
                        "index": index,
                        "mime": track.mime,
                        "width": track.width,
                        "height": track.height,
                        "frame_rate": track.frame_rate,
                        "duration_seconds": track.duration_us as f64 / 1_000_000.0,
                        "frames": track.total_frames(),
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("{} {}", "source".cyan().bold(), input.display());
                for (index, track) in tracks.iter().enumerate() {
                    if track.is_video() {
                        println!(
                            "  #{index} {} {}x{} @ {:.3} fps, {} frames",
                            track.mime.bold(),
                            track.width,
                            track.height,
                            track.frame_rate,
                            track.total_frames()
                        );
                    } else {
                        println!("  #{index} {}", track.mime);
                    }
                }
            }
        }
        Commands::Extract {
            input,
            out,
            at,
            png,
            quality,
            prefix,
            json,
        } => {
            let timestamps = at
                .iter()
                .map(|value| parse_timecode(value))
                .collect::<Result<Vec<f64>, _>>()?;

            let still_format = if png {
                StillFormat::Png
            } else {
                StillFormat::Jpeg { quality: quality.clamp(1, 100) }
            };
            let mut options = ExtractOptions::new()
                .with_still_format(still_format)
                .with_file_prefix(prefix);

            let bar = progress_bar(cli.global.progress)?;
            if let Some(bar) = &bar {
                options = options.with_progress(Arc::new(TerminalProgress {
                    bar: bar.clone(),
                    verbose: cli.global.verbose,
                }));
            }

            let summary = FrameExtractor::new(backend).extract(&input, &timestamps, &out, &options)?;
            if let Some(bar) = &bar {
                bar.finish_with_message("done");
            }

            if json {
                let payload = json!({
                    "output_dir": summary.output_dir.display().to_string(),
                    "files": summary.files.iter().map(|file| file.display().to_string()).collect::<Vec<_>>(),
                    "decoded_frames": summary.decoded_frames,
                    "total_frames": summary.total_frames,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} {} of {} requested frames to {}",
                    "saved".green().bold(),
                    summary.files.len(),
                    timestamps.len(),
                    summary.output_dir.display()
                );
            }
        }
        Commands::Encode {
            frames,
            output,
            mime,
            fps,
            bit_rate,
            i_frame_interval,
            layout,
            delete_frames,
            json,
        } => {
            ensure_writable_path(&output, cli.global.overwrite)?;
            let layout = parse_layout(&layout).ok_or(format!("unsupported --layout: {layout}"))?;

            let mut options = EncodeOptions::new()
                .with_mime_type(mime)
                .with_frame_rate(fps)
                .with_bit_rate(bit_rate)
                .with_i_frame_interval(i_frame_interval)
                .with_input_layout(layout)
                .with_delete_frames_on_complete(delete_frames);

            let bar = progress_bar(cli.global.progress)?;
            if let Some(bar) = &bar {
                options = options.with_progress(Arc::new(TerminalProgress {
                    bar: bar.clone(),
                    verbose: cli.global.verbose,
                }));
            }

            let summary = FrameEncoder::new(backend).encode_directory(&frames, &output, &options)?;
            if let Some(bar) = &bar {
                bar.finish_with_message("done");
            }

            if json {
                let payload = json!({
                    "output": summary.output.display().to_string(),
                    "frames": summary.frames,
                    "samples": summary.samples_written,
                    "width": summary.width,
                    "height": summary.height,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} {} frames ({}x{}) to {}",
                    "encoded".green().bold(),
                    summary.frames,
                    summary.width,
                    summary.height,
                    summary.output.display()
                );
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framecodec", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_layout, parse_log_level, parse_timecode};
    use framecodec::{FfmpegLogLevel, PixelLayout};

    #[test]
    fn parse_timecode_formats() {
        assert_eq!(parse_timecode("1.5").unwrap(), 1.5);
        assert_eq!(parse_timecode("01:15").unwrap(), 75.0);
        assert_eq!(parse_timecode("00:01:15.5").unwrap(), 75.5);
        assert!(parse_timecode("").is_err());
        assert!(parse_timecode("1:2:3:4").is_err());
    }

    #[test]
    fn negative_seconds_reach_the_library() {
        // Rejected later as an invalid timestamp.
        assert_eq!(parse_timecode("-1").unwrap(), -1.0);
    }

    #[test]
    fn parse_log_level_aliases() {
        assert_eq!(parse_log_level("WARN"), Some(FfmpegLogLevel::Warning));
        assert_eq!(parse_log_level("quiet"), Some(FfmpegLogLevel::Quiet));
        assert_eq!(parse_log_level("loud"), None);
    }

    #[test]
    fn parse_layout_aliases() {
        assert_eq!(parse_layout("NV12"), Some(PixelLayout::Nv12));
        assert_eq!(parse_layout("i420"), Some(PixelLayout::Yuv420p));
        assert_eq!(parse_layout("rgb"), None);
    }
}
