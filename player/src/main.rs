use anyhow::{Context, Result};
use clap::Parser;
use common::{PlaybackReport, PlaybackState};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use videotex::config::{self, Config, UploadPath};
use videotex::gpu::{self, GpuContext, GpuTextureSink};
use videotex::video::GstDecoder;
use videotex::VideoTexture;

type Player = VideoTexture<GstDecoder, GpuTextureSink>;

#[derive(Parser)]
#[command(name = "vtplay")]
#[command(about = "Play a video file into a GPU texture", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the video file
    file: PathBuf,

    /// Playback speed multiplier (defaults to playback.speed from the config)
    #[arg(short, long)]
    speed: Option<f64>,

    /// Render ticks per second
    #[arg(short, long, default_value = "60")]
    render_fps: u32,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Seconds of video to skip right after starting
    #[arg(long)]
    skip: Option<f64>,

    /// Replay the video whenever it finishes
    #[arg(short, long = "loop")]
    looping: bool,

    /// Speed multiplier used for replays
    #[arg(long, default_value = "2.0")]
    loop_speed: f64,

    /// Texture upload path (auto, direct, staged)
    #[arg(short, long)]
    upload_path: Option<String>,

    /// Write the last displayed frame to this PNG file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the playback report as JSON
    #[arg(long)]
    json: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "VIDEOTEX_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.general.log_level.as_str()),
    )
    .init();

    log::info!("Starting vtplay v{}", env!("CARGO_PKG_VERSION"));

    let speed = cli.speed.unwrap_or(config.playback.speed);
    config::validate_speed(speed)?;
    config::validate_speed(cli.loop_speed).context("Invalid --loop-speed")?;
    if cli.render_fps == 0 {
        anyhow::bail!("--render-fps must be at least 1");
    }
    let deadline = cli
        .duration
        .map(|secs| Duration::try_from_secs_f64(secs).context("Invalid --duration"))
        .transpose()?
        .map(|duration| Instant::now() + duration);

    let upload_path = match &cli.upload_path {
        Some(name) => UploadPath::parse(name)
            .with_context(|| format!("Unknown upload path: {}", name))?,
        None => config.gpu.upload_path(),
    };

    let context = Arc::new(GpuContext::new().await?);
    context.capabilities().log_info();

    let sink = gpu::create_sink(Arc::clone(&context), upload_path);
    log::info!("Uploading frames through the {} path", sink.upload_path().name());
    let decoder = GstDecoder::from_config(&config.decoder);
    let mut player = VideoTexture::new(decoder, sink);
    player.set_stats_interval(config.stats_interval());

    play_file(&mut player, &cli.file, speed)?;
    if let Some(seconds) = cli.skip {
        player.skip(seconds);
    }

    let result = run(&mut player, &cli, deadline).await;

    if let Some(path) = &cli.snapshot {
        if let Err(e) = write_snapshot(&player, &context, path) {
            log::error!("Failed to write snapshot: {:#}", e);
        }
    }

    let report = player.report();
    player.release();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    result
}

/// Open `path` and start playing it
fn play_file(player: &mut Player, path: &Path, speed: f64) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    player
        .play(BufReader::new(file), speed)
        .with_context(|| format!("Failed to play {}", path.display()))?;
    Ok(())
}

/// Drive the player from a fixed render tick until it is time to stop
async fn run(player: &mut Player, cli: &Cli, deadline: Option<Instant>) -> Result<()> {
    let mut ticker =
        tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(cli.render_fps)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Received Ctrl-C, stopping playback");
                return Ok(());
            }
            _ = ticker.tick() => {
                player.update();

                match player.state() {
                    PlaybackState::Finished if cli.looping => {
                        log::info!("Video finished, replaying at {}x", cli.loop_speed);
                        play_file(player, &cli.file, cli.loop_speed)?;
                    }
                    PlaybackState::Finished => {
                        log::info!("Video finished");
                        return Ok(());
                    }
                    PlaybackState::Idle => {
                        anyhow::bail!("Playback aborted by a decode error");
                    }
                    PlaybackState::Playing => {}
                }

                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    log::info!("Duration elapsed, stopping playback");
                    return Ok(());
                }
            }
        }
    }
}

/// Read the texture back and save it as a PNG
fn write_snapshot(player: &Player, context: &GpuContext, path: &Path) -> Result<()> {
    let texture = player
        .sink()
        .texture()
        .context("No frame was displayed")?;

    let rgba = texture.read_rgba(context)?;
    let image = image::RgbaImage::from_raw(texture.width, texture.height, rgba)
        .context("Texture readback has the wrong size")?;
    image
        .save(path)
        .with_context(|| format!("Failed to save {}", path.display()))?;

    log::info!("Saved {}x{} snapshot to {}", texture.width, texture.height, path.display());
    Ok(())
}

fn print_report(report: &PlaybackReport) {
    println!("Playback Report:");
    println!("  State: {}", report.state.name());
    println!(
        "  Texture: {} ({}x{})",
        report.texture_handle, report.width, report.height
    );
    println!("  Effective FPS: {:.2}", report.effective_fps);
    println!("  Frame index: {}", report.frame_index);
    println!("  Frames:");
    println!("    - displayed: {}", report.frames_displayed);
    println!(
        "    - dropped: {} ({:.1}% drop rate)",
        report.frames_dropped, report.drop_rate
    );
    println!("    - skipped: {}", report.frames_skipped);
    println!("    - ignored: {}", report.frames_ignored);
    println!("    - rejected: {}", report.frames_rejected);
    println!("  Texture reallocations: {}", report.texture_reallocations);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["vtplay", "clip.mp4"]).unwrap();
        assert_eq!(cli.file, PathBuf::from("clip.mp4"));
        assert_eq!(cli.render_fps, 60);
        assert_eq!(cli.loop_speed, 2.0);
        assert!(cli.speed.is_none());
        assert!(!cli.looping);
        assert!(!cli.json);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "vtplay",
            "clip.mp4",
            "--speed",
            "1.5",
            "--loop",
            "--upload-path",
            "staged",
            "--skip",
            "2",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.speed, Some(1.5));
        assert!(cli.looping);
        assert_eq!(cli.upload_path.as_deref(), Some("staged"));
        assert_eq!(cli.skip, Some(2.0));
        assert!(cli.json);
    }
}
