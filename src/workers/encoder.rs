use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::modules::transcode::model::derivative_filename;

// Fixed encode policy: H.264, constant quality, fast preset.
const VIDEO_CODEC: &str = "libx264";
const PRESET: &str = "fast";
const CRF: &str = "23";

const STDERR_TAIL_LINES: usize = 12;
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub format: String,
    pub resolution: u32,
}

impl EncodeRequest {
    /// `<output_dir>/<input stem>_<resolution>p.<format>`
    pub fn output_path(&self) -> PathBuf {
        let input_name = self
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.output_dir.join(derivative_filename(
            &input_name,
            &self.resolution.to_string(),
            &self.format,
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodeEvent {
    Started { command: String },
    Progress { percent: f64 },
    Completed { output: PathBuf },
    Failed { reason: String },
}

impl EncodeEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EncodeEvent::Completed { .. } | EncodeEvent::Failed { .. })
    }
}

/// Finite, lazily produced event sequence. At most one terminal event;
/// dropping the stream stops the underlying engine.
pub type EncodeEvents = BoxStream<'static, EncodeEvent>;

pub trait Encoder: Send + Sync {
    fn run(&self, request: EncodeRequest) -> EncodeEvents;
}

/// Turns a channel into an [`EncodeEvents`] stream that ends after the first
/// terminal event.
pub fn events_from_channel(rx: mpsc::Receiver<EncodeEvent>) -> EncodeEvents {
    stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        let event = rx.recv().await?;
        let done = event.is_terminal();
        Some((event, (rx, done)))
    })
    .boxed()
}

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: String,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn build_args(request: &EncodeRequest, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            request.input.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            VIDEO_CODEC.to_string(),
            "-vf".to_string(),
            // Width follows the aspect ratio, rounded to an even value.
            format!("scale=-2:{}", request.resolution),
            "-preset".to_string(),
            PRESET.to_string(),
            "-crf".to_string(),
            CRF.to_string(),
            "-progress".to_string(),
            "pipe:2".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

impl Encoder for FfmpegEncoder {
    fn run(&self, request: EncodeRequest) -> EncodeEvents {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let ffmpeg_path = self.ffmpeg_path.clone();

        tokio::spawn(async move {
            let output = request.output_path();
            let event = drive_ffmpeg(&ffmpeg_path, &request, &output, &tx).await;

            if let Some(event) = event {
                if !matches!(event, EncodeEvent::Completed { .. }) {
                    remove_partial_output(&output).await;
                }
                let _ = tx.send(event).await;
            } else {
                // Receiver went away: the caller gave up on this encode.
                remove_partial_output(&output).await;
            }
        });

        events_from_channel(rx)
    }
}

/// Runs one ffmpeg process to completion. Returns the terminal event, or
/// `None` if the consumer dropped the stream and the process was killed.
async fn drive_ffmpeg(
    ffmpeg_path: &str,
    request: &EncodeRequest,
    output: &Path,
    tx: &mpsc::Sender<EncodeEvent>,
) -> Option<EncodeEvent> {
    let args = FfmpegEncoder::build_args(request, output);
    let command = format!("{} {}", ffmpeg_path, args.join(" "));

    let mut child = match Command::new(ffmpeg_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return Some(EncodeEvent::Failed {
                reason: format!("failed to spawn {}: {}", ffmpeg_path, e),
            });
        }
    };

    info!("FFmpeg process started with command: {}", command);
    tx.send(EncodeEvent::Started { command }).await.ok()?;

    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        let mut duration: Option<f64> = None;

        loop {
            tokio::select! {
                _ = tx.closed() => {
                    kill(&mut child).await;
                    return None;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if duration.is_none() {
                            duration = parse_duration(&line);
                        }
                        if let Some(percent) = duration.and_then(|d| progress_percent(&line, d)) {
                            if tx.send(EncodeEvent::Progress { percent }).await.is_err() {
                                kill(&mut child).await;
                                return None;
                            }
                        } else if !is_progress_key(&line) {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read ffmpeg stderr: {}", e);
                        break;
                    }
                }
            }
        }
    }

    let status = tokio::select! {
        _ = tx.closed() => {
            kill(&mut child).await;
            return None;
        }
        status = child.wait() => status,
    };

    Some(match status {
        Ok(status) if status.success() => match tokio::fs::metadata(output).await {
            Ok(_) => EncodeEvent::Completed {
                output: output.to_path_buf(),
            },
            Err(_) => EncodeEvent::Failed {
                reason: "ffmpeg exited successfully but produced no output".to_string(),
            },
        },
        Ok(status) => EncodeEvent::Failed {
            reason: format!(
                "ffmpeg exited with {}: {}",
                status,
                tail.into_iter().collect::<Vec<_>>().join("\n")
            ),
        },
        Err(e) => EncodeEvent::Failed {
            reason: format!("failed to wait for ffmpeg: {}", e),
        },
    })
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill ffmpeg: {}", e);
    } else {
        debug!("FFmpeg process killed");
    }
}

async fn remove_partial_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!(path = %output.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %output.display(), "Failed to remove partial output: {}", e),
    }
}

fn is_progress_key(line: &str) -> bool {
    matches!(
        line.split_once('=').map(|(k, _)| k),
        Some(
            "frame" | "fps" | "stream_0_0_q" | "bitrate" | "total_size" | "out_time_us"
                | "out_time_ms" | "out_time" | "dup_frames" | "drop_frames" | "speed"
                | "progress"
        )
    )
}

/// `Duration: 00:01:02.50, start: ...` from the input banner.
pub fn parse_duration(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let value = rest.split(',').next()?.trim();
    parse_timestamp(value).filter(|d| *d > 0.0)
}

/// `out_time_us=41360000` from `-progress` output, as a percent of `total`.
pub fn progress_percent(line: &str, total_secs: f64) -> Option<f64> {
    let micros = line.strip_prefix("out_time_us=")?.trim().parse::<f64>().ok()?;
    if total_secs <= 0.0 {
        return None;
    }
    Some((micros / 1_000_000.0 / total_secs * 100.0).clamp(0.0, 100.0))
}

/// `HH:MM:SS.ss`
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours = parts.next()?.parse::<f64>().ok()?;
    let minutes = parts.next()?.parse::<f64>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
