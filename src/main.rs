use anyhow::{Context, Result};
use async_playbin::config::{Config, PlaybackConfig};
use async_playbin::{Engine, EventLoop, GstEngine, Playbin, PlaybinEvent, Tracks};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "async-playbin")]
#[command(about = "Play a media file or URI, controlled from stdin")]
struct Cli {
    /// Local path or URI to play
    media: String,

    /// External subtitle file
    #[arg(short, long)]
    subtitles: Option<PathBuf>,

    /// Initial volume, 0.0 to 1.0
    #[arg(short, long)]
    volume: Option<f64>,

    /// Config file to use instead of the user config
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// One line typed on stdin.
#[derive(Debug, PartialEq)]
enum Input {
    Pause,
    Resume,
    Seek(Duration),
    Forward(Option<Duration>),
    Rewind(Option<Duration>),
    Tracks,
    Subtitle(Option<usize>),
    Audio(Option<usize>),
    Volume(f64),
    Info,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  p, pause            pause playback
  r, resume           resume playback
  s, seek <secs>      seek to an absolute position
  f, forward [secs]   skip ahead
  b, rewind [secs]    skip back
  t, tracks           list audio and subtitle tracks
  sub <n|off>         select a subtitle track
  audio <n|off>       select an audio track
  v, volume <0-1>     set the volume
  i, info             show position and state
  q, quit             stop and exit";

fn parse_secs(arg: &str) -> Result<Duration, String> {
    arg.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| format!("not a number of seconds: {arg}"))
}

fn parse_track(arg: Option<&str>) -> Result<Option<usize>, String> {
    match arg {
        Some("off") | Some("none") => Ok(None),
        Some(n) => n
            .parse()
            .map(Some)
            .map_err(|_| format!("not a track number: {n}")),
        None => Err("expected a track number or 'off'".to_string()),
    }
}

fn parse_input(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Err(String::new());
    };
    let arg = words.next();

    match cmd {
        "p" | "pause" => Ok(Input::Pause),
        "r" | "resume" | "play" => Ok(Input::Resume),
        "s" | "seek" => match arg {
            Some(arg) => parse_secs(arg).map(Input::Seek),
            None => Err("seek needs a position".to_string()),
        },
        "f" | "forward" => arg.map(parse_secs).transpose().map(Input::Forward),
        "b" | "rewind" => arg.map(parse_secs).transpose().map(Input::Rewind),
        "t" | "tracks" => Ok(Input::Tracks),
        "sub" => parse_track(arg).map(Input::Subtitle),
        "audio" => parse_track(arg).map(Input::Audio),
        "v" | "volume" => arg
            .and_then(|v| v.parse().ok())
            .map(Input::Volume)
            .ok_or_else(|| "volume needs a value between 0.0 and 1.0".to_string()),
        "i" | "info" => Ok(Input::Info),
        "h" | "help" | "?" => Ok(Input::Help),
        "q" | "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command: {other}")),
    }
}

fn print_tracks(title: &str, tracks: Tracks, current: Option<usize>) {
    println!("{} ({}):", title, tracks.len());
    for track in tracks {
        let marker = if Some(track.index) == current { '*' } else { ' ' };
        println!(" {} {}: {}", marker, track.index, track.label());
    }
}

fn print_info(playbin: &Playbin) {
    let position = playbin.position().ok();
    let duration = playbin.duration().ok();
    println!(
        "{:?} {} / {} volume {:.2}",
        playbin.state(),
        format_time(position),
        format_time(duration),
        playbin.volume()
    );
    if let Some(path) = playbin.subtitle_file() {
        println!("subtitles: {}", path.display());
    }
}

fn format_time(time: Option<Duration>) -> String {
    match time {
        Some(time) => {
            let secs = time.as_secs();
            format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
        }
        None => "--:--:--".to_string(),
    }
}

/// Runs one command. Returns `false` when the user asked to quit.
async fn execute(playbin: &Playbin, input: Input, step: Duration) -> bool {
    let result = match input {
        Input::Pause => playbin.pause().await,
        Input::Resume => playbin.play().await,
        Input::Seek(position) => playbin.seek(position).await,
        Input::Forward(delta) => playbin.forward(delta.unwrap_or(step)).await,
        Input::Rewind(delta) => playbin.rewind(delta.unwrap_or(step)).await,
        Input::Tracks => {
            print_tracks("audio", playbin.audio_tracks(), playbin.audio_track());
            print_tracks(
                "subtitles",
                playbin.subtitle_tracks(),
                playbin.subtitle_track(),
            );
            Ok(())
        }
        Input::Subtitle(index) => playbin.set_subtitle_track(index).await,
        Input::Audio(index) => playbin.set_audio_track(index).await,
        Input::Volume(level) => playbin.set_volume(level).await,
        Input::Info => {
            print_info(playbin);
            Ok(())
        }
        Input::Help => {
            println!("{HELP}");
            Ok(())
        }
        Input::Quit => return false,
    };

    if let Err(e) = result {
        println!("error: {e}");
    }
    true
}

/// Reads commands until quit, Ctrl-C or end of stream.
async fn run(playbin: &Playbin, playback: &PlaybackConfig) -> Result<()> {
    let mut events = playbin.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let step = playback.seek_step();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(PlaybinEvent::EndOfStream) => {
                    println!("end of stream");
                    return Ok(());
                }
                Ok(PlaybinEvent::AsyncError(e)) => {
                    playbin.take_async_error();
                    println!("playback error: {e}");
                    return Err(e.into());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} playback events", skipped),
                Err(RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    return Ok(());
                };
                match parse_input(&line) {
                    Ok(input) => {
                        if !execute(playbin, input, step).await {
                            return Ok(());
                        }
                    }
                    Err(e) if e.is_empty() => {}
                    Err(e) => println!("{e} (type 'help' for commands)"),
                }
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("async_playbin=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let engine = Arc::new(GstEngine::new(&config.engine)?);
    let playbin = Playbin::new(engine.clone(), &config.playback)?;
    let mut event_loop = {
        let pump = engine.pump();
        let engine_config = config.engine.clone();
        let sink = playbin.bus_sink();
        // start() waits on the loop thread; keep it off the runtime's only worker
        tokio::task::spawn_blocking(move || -> async_playbin::Result<EventLoop> {
            let mut event_loop = EventLoop::from_config(pump, &engine_config);
            event_loop.start(sink)?;
            Ok(event_loop)
        })
        .await
        .context("Event loop startup task failed")??
    };

    if let Some(path) = &cli.subtitles {
        playbin.set_subtitle_file(path).await?;
    }
    if let Some(level) = cli.volume {
        playbin.set_volume(level).await?;
    }

    playbin
        .play_source(&cli.media)
        .await
        .with_context(|| format!("Failed to play {}", cli.media))?;
    print_info(&playbin);

    let result = run(&playbin, &config.playback).await;

    if let Err(e) = playbin.stop().await {
        warn!("Failed to stop playback: {}", e);
    }
    if let Err(e) = tokio::task::spawn_blocking(move || event_loop.stop()).await {
        warn!("Failed to stop event loop: {}", e);
    }
    result
}
