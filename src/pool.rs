//! Pooled rendering backed by dedicated worker threads.
//!
//! Each worker thread owns one `PoolWorker` (for CDP, a warm browser) and
//! pulls jobs from a shared channel. A job is "checked out" to whichever
//! worker receives it and "checked in" when the worker replies on the job's
//! reply channel. Every job carries a deadline: callers stop waiting once it
//! passes, and workers skip jobs that expired while queued. Dropping the pool
//! closes the channel; workers drain, exit and drop their engines.

use crate::cdp::BrowserSession;
use crate::{ConversionRequest, Error, RenderSettings, RenderedImage, Renderer, Result};
use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Idle limit handed to `headless_chrome` for pooled browsers
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Browsers idle for longer than this are relaunched before the next job
const POOL_RECYCLE_AFTER: Duration = Duration::from_secs(300);

/// Upper bound for the CPU-derived default pool size
const MAX_DEFAULT_POOL_SIZE: usize = 4;

/// Default number of workers: one per CPU, capped
pub fn default_pool_size() -> usize {
    num_cpus::get().clamp(1, MAX_DEFAULT_POOL_SIZE)
}

/// A renderer instance owned by a single worker thread.
///
/// Workers are built on their own thread and never leave it.
pub trait PoolWorker: 'static {
    fn render(&mut self, request: &ConversionRequest) -> Result<RenderedImage>;
}

struct Job {
    request: ConversionRequest,
    deadline: Instant,
    budget_ms: u64,
    reply: SyncSender<Result<RenderedImage>>,
}

impl Job {
    fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// A fixed-size pool of renderer workers
pub struct RenderPool {
    cmd_tx: Sender<Job>,
    size: usize,
    job_timeout: Duration,
}

impl RenderPool {
    /// Spawn `size` worker threads; `factory` builds each worker on its own thread.
    ///
    /// A job not finished within `job_timeout` of being submitted fails with
    /// `Error::Timeout`, and is dropped unrendered if no worker has started it.
    pub fn new<W, F>(size: usize, job_timeout: Duration, factory: F) -> Result<Self>
    where
        W: PoolWorker,
        F: Fn(usize) -> W + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(Error::ConfigError("pool size must be at least 1".into()));
        }
        if job_timeout.is_zero() {
            return Err(Error::ConfigError("pool job timeout must be non-zero".into()));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel::<Job>();
        let jobs = Arc::new(Mutex::new(cmd_rx));
        let factory = Arc::new(factory);

        for id in 0..size {
            let jobs = Arc::clone(&jobs);
            let factory = Arc::clone(&factory);
            thread::Builder::new()
                .name(format!("htmlsnap-render-{}", id))
                .spawn(move || {
                    let worker = factory(id);
                    worker_loop(id, worker, jobs);
                })
                .map_err(|e| Error::InitializationError(format!("Failed to spawn render worker: {}", e)))?;
        }

        info!("Render pool started with {} workers", size);
        Ok(Self {
            cmd_tx,
            size,
            job_timeout,
        })
    }

    /// Pool of headless Chrome workers; browsers launch lazily on first use
    pub fn cdp(size: usize, settings: RenderSettings) -> Result<Self> {
        settings.validate()?;
        let job_timeout = settings.render_timeout();
        Self::new(size, job_timeout, move |_| CdpWorker::new(settings.clone()))
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Renderer for RenderPool {
    fn render(&self, request: &ConversionRequest) -> Result<RenderedImage> {
        let budget_ms = self.job_timeout.as_millis() as u64;
        let (tx, rx) = mpsc::sync_channel(1);
        self.cmd_tx
            .send(Job {
                request: request.clone(),
                deadline: Instant::now() + self.job_timeout,
                budget_ms,
                reply: tx,
            })
            .map_err(|_| Error::Other("Render pool is shut down".into()))?;

        match rx.recv_timeout(self.job_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(budget_ms)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Other("Render canceled: worker exited".into())),
        }
    }
}

fn worker_loop<W: PoolWorker>(id: usize, mut worker: W, jobs: Arc<Mutex<Receiver<Job>>>) {
    loop {
        // Only the idle worker holding the lock waits on the channel
        let next = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(poisoned) => poisoned.into_inner().recv(),
        };
        let Ok(job) = next else {
            break;
        };

        if job.expired(Instant::now()) {
            debug!("Worker {} skipping a job that expired in the queue", id);
            let _ = job.reply.try_send(Err(Error::Timeout(job.budget_ms)));
            continue;
        }

        debug!("Worker {} checked out a {} job", id, job.request.format());
        let result = worker.render(&job.request);
        if job.reply.try_send(result).is_err() {
            debug!("Worker {} finished a job nobody is waiting for", id);
        }
    }
    debug!("Worker {} shutting down", id);
}

/// Pool worker holding one reusable browser.
///
/// The browser is launched on first use and replaced after any failed render
/// or after sitting idle too long.
pub struct CdpWorker {
    settings: RenderSettings,
    session: Option<BrowserSession>,
    last_used: Instant,
}

impl CdpWorker {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            session: None,
            last_used: Instant::now(),
        }
    }

    fn checkout(&mut self) -> Result<BrowserSession> {
        match self.session.take() {
            Some(session) if self.last_used.elapsed() < POOL_RECYCLE_AFTER => Ok(session),
            stale => {
                if stale.is_some() {
                    debug!("Recycling idle browser");
                }
                drop(stale);
                BrowserSession::launch_with_idle_timeout(self.settings.clone(), POOL_IDLE_TIMEOUT)
            }
        }
    }
}

impl PoolWorker for CdpWorker {
    fn render(&mut self, request: &ConversionRequest) -> Result<RenderedImage> {
        let session = self.checkout()?;
        let result = session.capture(request);
        self.last_used = Instant::now();
        match result {
            Ok(image) => {
                self.session = Some(session);
                Ok(image)
            }
            Err(e) => {
                warn!("Discarding browser after failed render: {}", e);
                drop(session);
                Err(e)
            }
        }
    }
}
