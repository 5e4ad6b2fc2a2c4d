//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use estudio_models::OutputSettings;

use crate::error::{MediaError, MediaResult};
use crate::progress::EncodeProgress;

/// One input to an FFmpeg invocation, with its pre-`-i` arguments.
#[derive(Debug, Clone)]
struct Input {
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg commands.
///
/// The worker's compositions mix looped slide images, audio tracks and
/// concat lists, so multiple inputs are first-class.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add a plain file input.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(Input {
            args: Vec::new(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    /// Add a still image looped for `duration_secs`.
    pub fn image_loop(mut self, path: impl AsRef<Path>, duration_secs: f64) -> Self {
        self.inputs.push(Input {
            args: vec![
                "-loop".into(),
                "1".into(),
                "-t".into(),
                format!("{duration_secs:.3}"),
            ],
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    /// Add a concat-demuxer list input.
    pub fn concat_list(mut self, list_path: impl AsRef<Path>) -> Self {
        self.inputs.push(Input {
            args: vec!["-f".into(), "concat".into(), "-safe".into(), "0".into()],
            path: list_path.as_ref().to_path_buf(),
        });
        self
    }

    /// Add an output argument (after all inputs).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Limit the output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{seconds:.3}"))
    }

    /// Stream-copy both codecs (concat without re-encode).
    pub fn copy_codecs(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Apply the spec's output settings: codecs, bitrates, frame rate and
    /// frame size.
    pub fn apply_output(self, settings: &OutputSettings) -> Self {
        let (width, height) = settings.resolution.dimensions();
        self.output_arg("-c:v")
            .output_arg(settings.format.video_codec())
            .output_arg("-b:v")
            .output_arg(settings.quality.video_bitrate())
            .output_arg("-c:a")
            .output_arg(settings.format.audio_codec())
            .output_arg("-b:a")
            .output_arg(settings.quality.audio_bitrate())
            .output_arg("-r")
            .output_arg(settings.fps.to_string())
            .output_arg("-s")
            .output_arg(format!("{width}x{height}"))
            .output_arg("-pix_fmt")
            .output_arg("yuv420p")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.clone());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            cancel_rx: None,
            timeout_secs: None,
        }
    }

    /// Set cancellation signal. The child is killed when it flips to true.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(EncodeProgress) + Send + 'static,
    {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr).lines();

        // Parse progress blocks off stderr while the encode runs.
        let progress_handle = tokio::spawn(async move {
            let mut current = EncodeProgress::default();
            let mut tail: Vec<String> = Vec::new();

            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(snapshot) = current.apply_line(&line) {
                    progress_callback(snapshot);
                } else if !line.contains('=') {
                    // Non-progress stderr output; keep a short tail for errors.
                    if tail.len() >= 20 {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
            }

            tail.join("\n")
        });

        let result = self.wait_for_completion(&mut child).await;
        let stderr_tail = progress_handle.await.unwrap_or_default();

        match result {
            Err(MediaError::FfmpegFailed {
                message,
                exit_code,
                ..
            }) => Err(MediaError::ffmpeg_failed(
                message,
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                exit_code,
            )),
            other => other,
        }
    }

    /// Wait for the child with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let timeout = self
            .timeout_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or(std::time::Duration::from_secs(u64::MAX / 2));

        let status = if let Some(mut cancel_rx) = self.cancel_rx.clone() {
            tokio::select! {
                status = child.wait() => status?,
                _ = tokio::time::sleep(timeout) => {
                    warn!("FFmpeg timed out after {}s, killing process", timeout.as_secs());
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(timeout.as_secs()));
                }
                changed = cancel_rx.changed() => {
                    if changed.is_ok() && *cancel_rx.borrow() {
                        info!("FFmpeg cancelled, killing process");
                        let _ = child.kill().await;
                        return Err(MediaError::Cancelled);
                    }
                    child.wait().await?
                }
            }
        } else {
            tokio::select! {
                status = child.wait() => status?,
                _ = tokio::time::sleep(timeout) => {
                    warn!("FFmpeg timed out after {}s, killing process", timeout.as_secs());
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(timeout.as_secs()));
                }
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
