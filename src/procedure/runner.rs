// Perform loop and detached worker thread

use super::{BlockReport, CancellationToken, Procedure, Progress, Step, REPORT_QUEUE_CAPACITY};
use crate::{SalvageError, SalvageResult};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RunOutcome {
    /// The procedure ran out of work
    Completed,
    /// The procedure refused to continue
    Aborted,
    /// Stopped from outside: cancellation, callback or perform limit
    Interrupted,
}

impl RunOutcome {
    /// Process exit status for the command line
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Aborted => 2,
            RunOutcome::Interrupted => 130,
        }
    }
}

/// Drive `procedure` until it completes, aborts, fails or is stopped.
///
/// The token is checked before every block, never during one. `limit` caps
/// the number of perform calls.
pub fn perform_loop<P, F>(
    procedure: &mut P,
    token: &CancellationToken,
    limit: Option<u64>,
    mut callback: F,
) -> SalvageResult<RunOutcome>
where
    P: Procedure + ?Sized,
    F: FnMut(&BlockReport, Progress) -> ControlFlow<()>,
{
    let mut performed = 0u64;
    loop {
        if token.is_cancelled() {
            tracing::info!(procedure = procedure.name(), performed, "Interrupted");
            return Ok(RunOutcome::Interrupted);
        }
        if limit.is_some_and(|max| performed >= max) {
            return Ok(RunOutcome::Interrupted);
        }

        let step = procedure.perform()?;
        performed += 1;
        match step {
            Step::Continue(report) => {
                if callback(&report, procedure.progress()).is_break() {
                    return Ok(RunOutcome::Interrupted);
                }
            }
            Step::Abort(report) => {
                let _ = callback(&report, procedure.progress());
                tracing::warn!(
                    procedure = procedure.name(),
                    lba = report.lba,
                    status = %report.status,
                    "Procedure aborted"
                );
                return Ok(RunOutcome::Aborted);
            }
            Step::Complete => return Ok(RunOutcome::Completed),
        }
    }
}

/// Report published by a detached worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub report: BlockReport,
    pub progress: Progress,
}

/// Procedure handed back by a finished worker
pub struct Joined<P> {
    pub procedure: P,
    pub outcome: SalvageResult<RunOutcome>,
}

/// Worker thread running a perform loop
pub struct DetachedRun<P> {
    handle: JoinHandle<Joined<P>>,
    events: Receiver<Event>,
    finished: Arc<AtomicBool>,
    token: CancellationToken,
}

impl<P> DetachedRun<P> {
    /// Reports in production order. The channel disconnects once the worker
    /// has stopped.
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the worker. Reports still queued are dropped, so drain
    /// `events()` first if they matter.
    pub fn join(self) -> SalvageResult<Joined<P>> {
        let DetachedRun { handle, events, .. } = self;
        // Unblocks a worker waiting on a full queue
        drop(events);
        handle
            .join()
            .map_err(|_| SalvageError::Io(std::io::Error::other("worker thread panicked")))
    }
}

/// Run `procedure` on its own thread. With `realtime` the worker asks for
/// SCHED_FIFO; refusal is logged and ignored.
pub fn spawn_detached<P>(
    procedure: P,
    token: CancellationToken,
    realtime: bool,
) -> SalvageResult<DetachedRun<P>>
where
    P: Procedure + 'static,
{
    let (tx, rx) = bounded(REPORT_QUEUE_CAPACITY);
    let finished = Arc::new(AtomicBool::new(false));
    let worker_finished = Arc::clone(&finished);
    let worker_token = token.clone();
    let name = format!("salvage-{}", procedure.name());

    let handle = thread::Builder::new().name(name).spawn(move || {
        if realtime {
            raise_priority();
        }
        let mut procedure = procedure;
        let outcome = perform_loop(&mut procedure, &worker_token, None, |report, progress| {
            publish(&tx, Event {
                report: *report,
                progress,
            });
            ControlFlow::Continue(())
        });
        worker_finished.store(true, Ordering::SeqCst);
        drop(tx);
        Joined { procedure, outcome }
    })?;

    Ok(DetachedRun {
        handle,
        events: rx,
        finished,
        token,
    })
}

/// Hand an event to the consumer, yielding while the queue is full
fn publish(tx: &Sender<Event>, mut event: Event) {
    loop {
        match tx.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(back)) => {
                event = back;
                thread::yield_now();
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

fn raise_priority() {
    let priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        tracing::warn!(
            error = %std::io::Error::from_raw_os_error(rc),
            "Could not raise worker priority"
        );
    }
}
