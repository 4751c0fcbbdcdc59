//! Background decode + downsample of contact sheets.
//!
//! Flow:
//!   1. ViewerState sends a `PrepareJob` to the pool
//!   2. A worker decodes the file and resizes it to fit the job's target box
//!   3. The result (image or failure message) goes out on the load queue
//!
//! Workers only do CPU and file work. Texture uploads happen on the UI thread.

use std::fs;
use std::io::Cursor;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use fast_image_resize::images::Image as FastImage;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};

use crate::error::SortError;
use crate::queue::{LoadResult, LoadSender};

const JOB_POLL: Duration = Duration::from_millis(100);

/// Box an image must fit into, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width: width.max(1), height: height.max(1) }
    }
}

/// Decoded RGBA8 pixels, already scaled for display.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
    /// Box this image was prepared for.
    pub target: TargetSize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrepareJob {
    pub identity: PathBuf,
    pub source: PathBuf,
    pub target: TargetSize,
}

/// Largest size with the source aspect ratio that fits in `target`.
/// Never upscales; each side is at least 1.
pub fn fit_within(src_w: u32, src_h: u32, target: TargetSize) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (src_w.max(1), src_h.max(1));
    }
    let scale = (target.width as f64 / src_w as f64)
        .min(target.height as f64 / src_h as f64)
        .min(1.0);
    // Epsilon keeps exact fits (e.g. 3 * (1/3)) from flooring one pixel short.
    let w = ((src_w as f64 * scale + 1e-9).floor() as u32).clamp(1, src_w);
    let h = ((src_h as f64 * scale + 1e-9).floor() as u32).clamp(1, src_h);
    (w, h)
}

/// Decode `path` and downsample it to fit `target`.
pub fn prepare_image(path: &Path, target: TargetSize) -> Result<PreparedImage, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;

    let mut reader = image::ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .unwrap_or_else(|_| image::ImageReader::new(Cursor::new(&bytes)));
    if reader.format().is_none()
        && let Ok(fmt) = image::ImageFormat::from_path(path)
    {
        reader.set_format(fmt);
    }

    let decoded = reader.decode().map_err(|e| e.to_string())?;
    let rgba = decoded.into_rgba8();
    let (w, h) = rgba.dimensions();
    let (new_w, new_h) = fit_within(w, h, target);

    let pixels = if (new_w, new_h) == (w, h) {
        rgba.into_raw()
    } else {
        resize_rgba(rgba.into_raw(), (w, h), (new_w, new_h))?
    };

    Ok(PreparedImage {
        source_path: path.to_path_buf(),
        width: new_w,
        height: new_h,
        pixels: pixels.into(),
        target,
    })
}

fn resize_rgba(raw: Vec<u8>, from: (u32, u32), to: (u32, u32)) -> Result<Vec<u8>, String> {
    let src = FastImage::from_vec_u8(from.0, from.1, raw, PixelType::U8x4).map_err(|e| e.to_string())?;
    let mut dst = FastImage::new(to.0, to.1, PixelType::U8x4);

    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
    Resizer::new().resize(&src, &mut dst, &options).map_err(|e| e.to_string())?;
    Ok(dst.into_vec())
}

/// Fixed set of decode threads fed from an unbounded job channel.
pub struct PreparePool {
    job_tx: Sender<PrepareJob>,
    quit: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl PreparePool {
    /// Spawn `workers` threads publishing to `results`. Raising `quit` stops
    /// them, including any blocked on a full queue.
    pub fn start(workers: usize, results: LoadSender, quit: Arc<AtomicBool>) -> std::io::Result<Self> {
        let (job_tx, job_rx) = unbounded::<PrepareJob>();
        let mut handles = Vec::new();

        for worker_id in 0..workers.max(1) {
            let rx = job_rx.clone();
            let results = results.clone();
            let quit = quit.clone();
            let h = thread::Builder::new()
                .name(format!("prepare-{}", worker_id))
                .spawn(move || worker_loop(rx, results, quit))?;
            handles.push(h);
        }

        log::debug!("Started {} prepare workers", handles.len());
        Ok(Self { job_tx, quit, handles })
    }

    pub fn sender(&self) -> Sender<PrepareJob> {
        self.job_tx.clone()
    }

    pub fn shutdown(&mut self) {
        self.quit.store(true, Ordering::Release);
        for h in self.handles.drain(..) {
            h.join().ok();
        }
    }
}

impl Drop for PreparePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<PrepareJob>, results: LoadSender, quit: Arc<AtomicBool>) {
    loop {
        if quit.load(Ordering::Relaxed) {
            break;
        }
        let job = match rx.recv_timeout(JOB_POLL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let outcome = panic::catch_unwind(|| prepare_image(&job.source, job.target))
            .unwrap_or_else(|_| Err("decoder panicked".to_string()));

        if let Err(reason) = &outcome {
            let err = SortError::DecodeFailure { path: job.source.clone(), reason: reason.clone() };
            log::warn!("{}", err);
        }

        let result = LoadResult { identity: job.identity, target: job.target, outcome };
        if results.send(result).is_err() {
            break;
        }
    }
}
