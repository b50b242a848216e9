use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use model::BufferParams;
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use scheduler::{
    Progress, SampleLimit, SchedulerState, SharedTileManager, TileAssignment, TileBuffer,
    TileBufferError, TileKinds, TileManager, TileWork,
};
use serde::Serialize;
use tiles::CENTER_NEIGHBOR;

use crate::image::OutputImage;
use crate::renderer::TileRenderer;

const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Worker threads per step. Worker `n` pulls tiles as device `n`.
    pub workers: usize,
    pub event_capacity: usize,
    pub progress_capacity: usize,
    /// Sleep between polls while the step still has tiles but none is ready.
    pub idle_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            event_capacity: 64,
            progress_capacity: 256,
            idle_backoff: IDLE_SLEEP_DURATION,
        }
    }
}

/// Cooperative stop flag shared by the controlling thread, the workers and the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Cancels the session when a worker unwinds, so idle workers stop waiting for its tile.
struct CancelOnPanic<'a>(&'a CancelToken);

impl Drop for CancelOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel();
        }
    }
}

/// A tile a worker finished and the controlling thread has to write.
#[derive(Debug)]
pub struct TileEvent {
    pub task: TileAssignment,
    pub buffer: TileBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSample {
    pub step: u32,
    pub sample: i64,
    pub resolution_divider: u32,
    pub tiles_written: u64,
    pub progress: Progress,
}

/// Consumer end of the progress ring.
pub struct ProgressReceiver {
    consumer: Consumer<ProgressSample>,
}

impl ProgressReceiver {
    pub fn try_recv(&mut self) -> Option<ProgressSample> {
        self.consumer.pop().ok()
    }

    pub fn drain(&mut self) -> Vec<ProgressSample> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    TileBuffer(TileBufferError),
    WorkerPanicked { worker: usize },
    WorkerSpawn { worker: usize },
}

impl fmt::Display for SessionError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TileBuffer(error) => write!(formatter, "tile buffer error: {error}"),
            Self::WorkerPanicked { worker } => write!(formatter, "tile worker {worker} panicked"),
            Self::WorkerSpawn { worker } => {
                write!(formatter, "failed to spawn tile worker {worker}")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TileBuffer(error) => Some(error),
            Self::WorkerPanicked { .. } | Self::WorkerSpawn { .. } => None,
        }
    }
}

impl From<TileBufferError> for SessionError {
    fn from(error: TileBufferError) -> Self {
        Self::TileBuffer(error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub steps: u32,
    pub tiles_written: u64,
    pub tiles_denoised: u64,
    pub dropped_progress_samples: u64,
    pub progress: Progress,
    pub cancelled: bool,
    #[serde(skip)]
    pub image: OutputImage,
}

#[derive(Debug, Default)]
struct Tally {
    steps: u32,
    tiles_written: u64,
    tiles_denoised: u64,
    dropped_progress_samples: u64,
}

/// Runs sessions of a [`TileManager`] on worker threads.
pub struct RenderSession<R> {
    manager: SharedTileManager,
    renderer: R,
    config: SessionConfig,
    cancel: CancelToken,
    progress: Producer<ProgressSample>,
}

impl<R: TileRenderer> RenderSession<R> {
    pub fn new(
        manager: TileManager,
        renderer: R,
        config: SessionConfig,
    ) -> (Self, ProgressReceiver) {
        assert!(config.workers > 0, "render session needs at least one worker");
        assert!(
            config.event_capacity > 0,
            "tile event capacity must be greater than zero"
        );
        assert!(
            config.progress_capacity > 0,
            "progress ring capacity must be greater than zero"
        );

        let scheduler = manager.config();
        assert!(
            !scheduler.preserve_tile_device || config.workers >= scheduler.num_devices,
            "preserving tile devices needs a worker for each of the {} devices",
            scheduler.num_devices
        );

        let (producer, consumer) = RingBuffer::new(config.progress_capacity);
        let session = Self {
            manager: SharedTileManager::new(manager),
            renderer,
            config,
            cancel: CancelToken::default(),
            progress: producer,
        };
        (session, ProgressReceiver { consumer })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn manager(&self) -> &SharedTileManager {
        &self.manager
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Renders `params` until the manager is done or the session is cancelled.
    ///
    /// The image of the summary holds the last step's resolution. A worker failure cancels the
    /// session and is returned once every worker has stopped.
    pub fn run(
        &mut self,
        params: BufferParams,
        samples: SampleLimit,
    ) -> Result<SessionSummary, SessionError> {
        self.manager.lock().reset(params, samples);
        let channels = self.renderer.pass_stride();
        let mut tally = Tally::default();
        let mut image = OutputImage::default();

        while !self.cancel.is_cancelled() {
            let state = {
                let mut manager = self.manager.lock();
                if !manager.next() {
                    break;
                }
                manager.state()
            };
            tally.steps += 1;

            if (image.width(), image.height()) != (state.buffer.width, state.buffer.height) {
                image = OutputImage::new(state.buffer.width, state.buffer.height, channels);
            }
            self.run_step(&state, &mut image, &mut tally)?;
        }

        let summary = SessionSummary {
            steps: tally.steps,
            tiles_written: tally.tiles_written,
            tiles_denoised: tally.tiles_denoised,
            dropped_progress_samples: tally.dropped_progress_samples,
            progress: self.manager.progress(),
            cancelled: self.cancel.is_cancelled(),
            image,
        };
        tracing::debug!(
            steps = summary.steps,
            tiles_written = summary.tiles_written,
            cancelled = summary.cancelled,
            "render session finished"
        );
        Ok(summary)
    }

    fn run_step(
        &mut self,
        state: &SchedulerState,
        image: &mut OutputImage,
        tally: &mut Tally,
    ) -> Result<(), SessionError> {
        let manager = &self.manager;
        let renderer = &self.renderer;
        let cancel = &self.cancel;
        let progress = &mut self.progress;
        let config = self.config;

        thread::scope(|scope| {
            let (sender, receiver) = bounded::<TileEvent>(config.event_capacity);
            let mut handles = Vec::with_capacity(config.workers);
            for worker in 0..config.workers {
                let events = sender.clone();
                let spawned = thread::Builder::new()
                    .name(format!("tile-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        run_worker(
                            worker,
                            manager,
                            renderer,
                            cancel,
                            &events,
                            config.idle_backoff,
                        )
                    });
                match spawned {
                    Ok(handle) => handles.push((worker, handle)),
                    Err(error) => {
                        tracing::warn!(worker, %error, "failed to spawn tile worker");
                        cancel.cancel();
                        return Err(SessionError::WorkerSpawn { worker });
                    }
                }
            }
            drop(sender);

            for event in receiver.iter() {
                image.write_tile(event.task.rect, &event.buffer);
                tally.tiles_written += 1;
                if event.task.work == TileWork::Denoise {
                    tally.tiles_denoised += 1;
                }

                let sample = ProgressSample {
                    step: tally.steps,
                    sample: state.sample,
                    resolution_divider: state.resolution_divider,
                    tiles_written: tally.tiles_written,
                    progress: manager.progress(),
                };
                if let Err(PushError::Full(_)) = progress.push(sample) {
                    if tally.dropped_progress_samples == 0 {
                        tracing::warn!("progress ring full, dropping progress samples");
                    }
                    tally.dropped_progress_samples += 1;
                }
            }

            let mut failure = None;
            for (worker, handle) in handles {
                let result = handle.join().unwrap_or_else(|_| {
                    tracing::warn!(worker, "tile worker panicked");
                    Err(SessionError::WorkerPanicked { worker })
                });
                if let Err(error) = result {
                    failure.get_or_insert(error);
                }
            }
            match failure {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }
}

fn run_worker<R: TileRenderer>(
    worker: usize,
    manager: &SharedTileManager,
    renderer: &R,
    cancel: &CancelToken,
    events: &Sender<TileEvent>,
    idle_backoff: Duration,
) -> Result<(), SessionError> {
    let _cancel_on_panic = CancelOnPanic(cancel);
    let kinds = TileKinds::RENDER | TileKinds::DENOISE;

    while !cancel.is_cancelled() {
        let Some(task) = manager.next_tile(worker, kinds) else {
            if !manager.has_tiles() {
                break;
            }
            thread::sleep(idle_backoff);
            continue;
        };

        let need_denoise = match task.work {
            TileWork::Render => {
                let mut buffer = match manager.acquire_buffer(task.index, renderer.pass_stride())
                {
                    Ok(buffer) => buffer,
                    Err(error) => {
                        tracing::warn!(worker, index = task.index, %error, "tile buffer unavailable");
                        cancel.cancel();
                        return Err(error.into());
                    }
                };
                renderer.render(&task, &mut buffer);
                buffer.add_samples(task.num_samples);
                manager.release_buffer(task.index, buffer);
                renderer.needs_denoise(&task)
            }
            TileWork::Denoise => {
                denoise_tile(manager, renderer, &task);
                false
            }
        };

        let finished = manager.finish_tile(task.index, need_denoise);
        tracing::trace!(
            worker,
            index = task.index,
            work = ?task.work,
            write = finished.finish.write,
            "tile finished"
        );
        if let Some(buffer) = finished.buffer {
            if events.send(TileEvent { task, buffer }).is_err() {
                break;
            }
        }
    }
    Ok(())
}

fn denoise_tile<R: TileRenderer>(
    manager: &SharedTileManager,
    renderer: &R,
    task: &TileAssignment,
) {
    let neighborhood = manager.neighborhood_buffers(task.index);
    let Some(center) = &neighborhood[CENTER_NEIGHBOR] else {
        panic!("denoise task for tile {} without a stored buffer", task.index);
    };
    let mut output = center.buffer.averaged();
    renderer.denoise(task, &neighborhood, &mut output);
    manager.store_denoised(task.index, output);
}
