use crate::transport::{FetchError, Request, Transport};
use crossbeam_channel::{after, bounded, select, unbounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Body of a successful read, stamped with when the request was issued.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub body: String,
    pub requested_at: OffsetDateTime,
}

pub type Outcome = Result<RawPage, FetchError>;

/// Completion message posted by a session.
#[derive(Debug)]
pub struct SessionDone {
    pub id: u64,
    pub outcome: Outcome,
}

/// One in-flight round trip with a deadline and a cancellation handle.
///
/// The transport call runs on its own thread; a supervisor thread races it
/// against the deadline and the cancel signal and posts exactly one
/// `SessionDone`. Cancelling never interrupts the socket, it only makes
/// the result `Aborted`. Dropping the session cancels it.
pub struct FetchSession {
    id: u64,
    cancelled: Arc<AtomicBool>,
    cancel_tx: Option<Sender<()>>,
}

impl FetchSession {
    pub fn start(
        id: u64,
        transport: Arc<dyn Transport>,
        request: Request,
        timeout: Duration,
        notify: Sender<SessionDone>,
    ) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let requested_at = OffsetDateTime::now_utc();

        let flag = cancelled.clone();
        thread::spawn(move || {
            let (result_tx, result_rx) = bounded(1);
            let url = request.url.clone();
            thread::spawn(move || {
                let _ = result_tx.send(transport.execute(&request));
            });

            let outcome = select! {
                recv(result_rx) -> msg => match msg {
                    Ok(Ok(resp)) => Ok(RawPage { body: resp.body, requested_at }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(FetchError::Network("transport worker exited".to_string())),
                },
                recv(cancel_rx) -> _ => Err(FetchError::Aborted),
                recv(after(timeout)) -> _ => Err(FetchError::Timeout(timeout)),
            };

            // A late answer loses to an earlier cancel.
            let outcome = if flag.load(Ordering::SeqCst) {
                Err(FetchError::Aborted)
            } else {
                outcome
            };

            debug!(session = id, %url, ok = outcome.is_ok(), "session finished");
            let _ = notify.send(SessionDone { id, outcome });
        });

        FetchSession {
            id,
            cancelled,
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Blocking form for one-shot calls.
    pub fn run(transport: Arc<dyn Transport>, request: Request, timeout: Duration) -> Outcome {
        let (tx, rx) = unbounded();
        let _session = FetchSession::start(0, transport, request, timeout, tx);
        match rx.recv() {
            Ok(done) => done.outcome,
            Err(_) => Err(FetchError::Network("session ended without a result".to_string())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Disconnecting wakes the supervisor's select.
        self.cancel_tx.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for FetchSession {
    fn drop(&mut self) {
        self.cancel();
    }
}
