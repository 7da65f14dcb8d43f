//! Frame delivery: the render loop, the encoder pipe and the optional PNG
//! dump worker.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, info, warn};

use crate::{
    grid::BeatGrid,
    render::FrameRenderer,
    timeline::{frame_count, frame_time},
    AnimationConfig, BeatSyncError, RenderSettings, Result,
};

/// Consumer of raw rgb24 frames, fed strictly in generation order.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<()>;

    /// Called instead of `finish` when the run fails; discards partial output.
    fn abort(&mut self);
}

/// Collects frames in memory.
impl FrameSink for Vec<Vec<u8>> {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.push(frame.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(&mut self) {
        self.clear();
    }
}

/// How to launch the external encoder.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u32,
    /// Muxed in as the soundtrack when set.
    pub audio: Option<PathBuf>,
    pub output: PathBuf,
}

impl EncoderSettings {
    pub fn from_render(settings: &RenderSettings, audio: Option<PathBuf>, output: PathBuf) -> Self {
        Self {
            program: settings.encoder.clone(),
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            crf: settings.crf,
            audio,
            output,
        }
    }

    /// Full argument list passed to the encoder.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("{}x{}", self.width, self.height));
        args.push("-r".into());
        args.push(self.fps.to_string());
        args.push("-i".into());
        args.push("-".into());
        if let Some(audio) = &self.audio {
            args.push("-i".into());
            args.push(audio.display().to_string());
        }
        args.extend(
            ["-c:v", "libx264", "-pix_fmt", "yuv420p", "-crf"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.crf.to_string());
        if self.audio.is_some() {
            args.extend(["-c:a", "aac", "-shortest"].iter().map(|s| s.to_string()));
        }
        args.push(self.output.display().to_string());
        args
    }
}

/// Pipes frames into an encoder child process over stdin.
#[derive(Debug)]
pub struct EncoderSink {
    child: Child,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    frame_len: usize,
    frames: u64,
    done: bool,
}

impl EncoderSink {
    pub fn spawn(settings: &EncoderSettings) -> Result<Self> {
        let mut child = Command::new(&settings.program)
            .args(settings.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => {
                    BeatSyncError::Encoder(format!("`{}` not found on PATH", settings.program))
                }
                _ => BeatSyncError::Encoder(format!("failed to start `{}`: {err}", settings.program)),
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BeatSyncError::Encoder("encoder stdin unavailable".into()))?;
        info!(program = %settings.program, output = %settings.output.display(), "encoder started");
        Ok(Self {
            child,
            stdin: Some(stdin),
            output: settings.output.clone(),
            frame_len: settings.width as usize * settings.height as usize * 3,
            frames: 0,
            done: false,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    fn discard_output(&self) {
        if self.output.exists() {
            if let Err(err) = fs::remove_file(&self.output) {
                warn!(path = %self.output.display(), %err, "could not remove partial output");
            }
        }
    }
}

impl FrameSink for EncoderSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() != self.frame_len {
            return Err(BeatSyncError::InvalidInput("frame size does not match the encoder"));
        }
        let stdin = self.stdin.as_mut().ok_or(BeatSyncError::BrokenPipe)?;
        stdin.write_all(frame).map_err(|err| match err.kind() {
            io::ErrorKind::BrokenPipe => BeatSyncError::BrokenPipe,
            _ => BeatSyncError::Io(err),
        })?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.done = true;
        drop(self.stdin.take());
        let status = self.child.wait()?;
        if !status.success() {
            self.discard_output();
            return Err(BeatSyncError::Encoder(format!("encoder exited with {status}")));
        }
        info!(frames = self.frames, output = %self.output.display(), "encoder finished");
        Ok(())
    }

    fn abort(&mut self) {
        self.done = true;
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.discard_output();
        error!(frames = self.frames, "encoder aborted");
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        if !self.done {
            self.abort();
        }
    }
}

/// Writes frames to numbered PNG files on a worker thread.
///
/// The queue between producer and worker is bounded: `push` blocks once it
/// is full. `finish` closes the queue, and the worker writes every frame
/// still queued before it exits.
#[derive(Debug)]
pub struct FrameDumper {
    tx: Option<Sender<(u64, Vec<u8>)>>,
    worker: Option<JoinHandle<Result<u64>>>,
}

impl FrameDumper {
    pub fn start(dir: &Path, width: u32, height: u32, depth: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let (tx, rx) = bounded::<(u64, Vec<u8>)>(depth.max(1));
        let dir = dir.to_path_buf();
        let worker = thread::Builder::new()
            .name("frame-dumper".to_string())
            .spawn(move || -> Result<u64> {
                let mut written = 0u64;
                for (index, pixels) in rx.iter() {
                    let image = image::RgbImage::from_raw(width, height, pixels).ok_or(
                        BeatSyncError::InvalidInput("frame size does not match the dump size"),
                    )?;
                    image.save(dir.join(format!("frame_{index:06}.png")))?;
                    written += 1;
                }
                debug!(written, "frame dumper drained");
                Ok(written)
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queues one frame, blocking while the queue is full.
    pub fn push(&self, index: u64, frame: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(BeatSyncError::WorkerClosed)?;
        tx.send((index, frame.to_vec()))
            .map_err(|_| BeatSyncError::WorkerClosed)
    }

    /// Closes the queue and waits for the worker to write what is left.
    /// Returns the number of frames written.
    pub fn finish(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        drop(self.tx.take());
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| BeatSyncError::WorkerClosed)?,
            None => Ok(0),
        }
    }
}

impl Drop for FrameDumper {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "frame dumper stopped with an error");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderReport {
    pub frames: u64,
    pub dumped: u64,
}

/// Single-threaded render loop: evaluate, draw, write, in frame order.
pub struct Recorder {
    renderer: FrameRenderer,
    fps: u32,
    dumper: Option<FrameDumper>,
}

impl Recorder {
    pub fn new(settings: &RenderSettings, animation: AnimationConfig) -> Result<Self> {
        if settings.fps == 0 || settings.width == 0 || settings.height == 0 {
            return Err(BeatSyncError::InvalidInput("fps and frame size must be non-zero"));
        }
        let dumper = match &settings.frame_dump_dir {
            Some(dir) => Some(FrameDumper::start(
                dir,
                settings.width,
                settings.height,
                settings.frame_queue_depth,
            )?),
            None => None,
        };
        Ok(Self {
            renderer: FrameRenderer::new(settings, animation),
            fps: settings.fps,
            dumper,
        })
    }

    /// Renders frames `0..ceil(duration * fps)` into `sink`. On the first
    /// error the producer stops, the dump worker drains, the sink is aborted
    /// and the error is returned.
    pub fn render(mut self, grid: &BeatGrid, sink: &mut dyn FrameSink) -> Result<RenderReport> {
        let total = frame_count(grid.duration(), self.fps);
        info!(frames = total, fps = self.fps, "render started");

        let dumper = self.dumper.take();
        let produced = produce(&mut self.renderer, dumper.as_ref(), grid, sink, self.fps, total);
        let dumped = match dumper {
            Some(dumper) => dumper.finish(),
            None => Ok(0),
        };

        let outcome = match (produced, dumped) {
            (Ok(frames), Ok(dumped)) => Ok(RenderReport { frames, dumped }),
            // A closed queue only means the worker died; its own error says why.
            (Err(BeatSyncError::WorkerClosed), Err(worker)) => Err(worker),
            (Err(err), _) | (Ok(_), Err(err)) => Err(err),
        };
        match outcome {
            Ok(report) => {
                sink.finish()?;
                info!(frames = report.frames, dumped = report.dumped, "render finished");
                Ok(report)
            }
            Err(err) => {
                error!(%err, "render failed");
                sink.abort();
                Err(err)
            }
        }
    }
}

fn produce(
    renderer: &mut FrameRenderer,
    dumper: Option<&FrameDumper>,
    grid: &BeatGrid,
    sink: &mut dyn FrameSink,
    fps: u32,
    total: u64,
) -> Result<u64> {
    let progress_step = (fps as u64 * 10).max(1);
    for index in 0..total {
        let frame = renderer.render(grid, frame_time(index, fps));
        sink.write_frame(frame)?;
        if let Some(dumper) = dumper {
            dumper.push(index, frame)?;
        }
        if index % progress_step == 0 {
            debug!(frame = index, total, "rendering");
        }
    }
    Ok(total)
}
