//! In-order streams and completion events.
//!
//! A [`Stream`] is a FIFO queue of jobs executed by one worker thread. Jobs
//! on the same stream run in enqueue order; jobs on different streams run
//! concurrently and are ordered only through [`Event`]s:
//!
//! - [`Stream::record`] enqueues a marker that signals the returned event
//!   once every job enqueued before it has finished.
//! - [`Stream::wait_event`] makes all later jobs on the stream wait for an
//!   event recorded on any stream.
//!
//! Workers live inside a `std::thread::scope`, so jobs may borrow the
//! caller's matrices and device regions without `'static` bounds.
//!
//! A failing job does not stop its stream: the error is kept as the
//! stream's sticky fault and returned by the next [`Stream::synchronize`].
//! Later jobs still run so that every recorded event is eventually signaled.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Scope;

use crate::error::{ConvError, ConvResult};

type Job<'scope> = Box<dyn FnOnce() -> ConvResult<()> + Send + 'scope>;

/// One-shot completion flag shared between streams.
#[derive(Clone, Default)]
pub struct Event {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Event {
    /// Creates an unsignaled event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the event complete and wakes all waiters.
    pub fn signal(&self) {
        let (flag, cvar) = &*self.inner;
        let mut done = flag.lock().unwrap_or_else(|e| e.into_inner());
        *done = true;
        cvar.notify_all();
    }

    /// Blocks the calling thread until the event is signaled.
    pub fn wait(&self) {
        let (flag, cvar) = &*self.inner;
        let mut done = flag.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            done = cvar.wait(done).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Returns `true` once the event has been signaled.
    pub fn is_complete(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Two handles refer to the same event.
    pub fn same_as(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// An in-order job queue served by one scoped worker thread.
pub struct Stream<'scope> {
    id: usize,
    sender: Sender<Job<'scope>>,
    fault: Arc<Mutex<Option<ConvError>>>,
}

impl<'scope> Stream<'scope> {
    /// Spawns the worker for a new stream on `scope`.
    pub fn spawn<'env>(scope: &'scope Scope<'scope, 'env>, id: usize) -> Self {
        let (sender, receiver) = channel::<Job<'scope>>();
        let fault: Arc<Mutex<Option<ConvError>>> = Arc::new(Mutex::new(None));
        let sticky = Arc::clone(&fault);

        scope.spawn(move || {
            for job in receiver {
                let outcome = match catch_unwind(AssertUnwindSafe(job)) {
                    Ok(result) => result,
                    Err(_) => Err(ConvError::stream_fault(format!("job on stream {} panicked", id))),
                };
                if let Err(err) = outcome {
                    log::warn!("stream {}: {}", id, err);
                    let mut slot = sticky.lock().unwrap_or_else(|e| e.into_inner());
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            }
            log::trace!("stream {} worker exiting", id);
        });

        Self { id, sender, fault }
    }

    /// Stream index within its set.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Enqueues a job. It runs after every job previously enqueued here.
    pub fn enqueue<F>(&self, job: F) -> ConvResult<()>
    where
        F: FnOnce() -> ConvResult<()> + Send + 'scope,
    {
        self.sender
            .send(Box::new(job))
            .map_err(|_| ConvError::stream_fault(format!("stream {} worker has exited", self.id)))
    }

    /// Records an event that completes when all prior work on this stream has.
    pub fn record(&self) -> ConvResult<Event> {
        let event = Event::new();
        let marker = event.clone();
        self.enqueue(move || {
            marker.signal();
            Ok(())
        })?;
        Ok(event)
    }

    /// Makes all later work on this stream wait for `event`.
    pub fn wait_event(&self, event: &Event) -> ConvResult<()> {
        let event = event.clone();
        self.enqueue(move || {
            event.wait();
            Ok(())
        })
    }

    /// Blocks until all enqueued work has finished, then reports the sticky
    /// fault, if any.
    pub fn synchronize(&self) -> ConvResult<()> {
        self.record()?.wait();
        match self.fault.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Stream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("id", &self.id).finish()
    }
}

/// A fixed set of streams sharing one thread scope.
///
/// Dropping the set closes every queue; workers finish the jobs already
/// enqueued and exit, and the enclosing scope joins them.
#[derive(Debug)]
pub struct StreamSet<'scope> {
    streams: Vec<Stream<'scope>>,
}

impl<'scope> StreamSet<'scope> {
    /// Spawns `count` streams.
    pub fn spawn<'env>(scope: &'scope Scope<'scope, 'env>, count: usize) -> Self {
        let streams = (0..count).map(|id| Stream::spawn(scope, id)).collect();
        log::trace!("spawned {} streams", count);
        Self { streams }
    }

    /// Number of streams.
    #[inline]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns `true` when the set holds no streams.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Stream `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::StreamFault`] if `index` is out of range.
    pub fn get(&self, index: usize) -> ConvResult<&Stream<'scope>> {
        self.streams
            .get(index)
            .ok_or_else(|| ConvError::stream_fault(format!("no stream {}", index)))
    }

    /// Full barrier: waits for every stream and returns the first fault.
    pub fn barrier(&self) -> ConvResult<()> {
        let mut first = None;
        for stream in &self.streams {
            if let Err(err) = stream.synchronize() {
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
