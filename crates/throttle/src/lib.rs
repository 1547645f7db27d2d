//! Line batching between a byte stream and a delivery sink.
//!
//! Reads an input stream line by line on a background task, accumulating the
//! lines in a shared buffer, while a scheduler loop drains the buffer to a
//! [`Sink`] on every interval tick. On cancellation or end of input the
//! remaining content is delivered through [`Sink::finalize`] exactly once and
//! the loop stops.
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio::sync::watch;
//! use throttle::{Sink, Throttle};
//!
//! async fn pipe(sink: &dyn Sink) -> Result<(), throttle::RunError> {
//!     let (_cancel_tx, cancel_rx) = watch::channel(false);
//!     Throttle::new(tokio::io::stdin())
//!         .run(Duration::from_secs(1), cancel_rx, sink)
//!         .await
//! }
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

mod buffer;

pub use buffer::LineBuffer;

/// Receiver of batched output.
///
/// `flush` is called on every interval tick with whatever accumulated since
/// the previous take (possibly the empty string). `finalize` is called exactly
/// once, with the remaining content, when the input ends or the run is
/// cancelled. Errors from either are logged by the scheduler and do not stop
/// it; retry policy belongs to the implementor.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Periodic delivery of a batch.
    async fn flush(&self, text: &str) -> anyhow::Result<()>;

    /// Terminal delivery of the remaining content.
    async fn finalize(&self, text: &str) -> anyhow::Result<()>;
}

/// Failure of a [`Throttle::run`] call.
///
/// End of stream, closed pipes and cancellation are normal terminations and
/// never surface here.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to read input: {0}")]
    Read(io::Error),
    #[error("input reader task panicked")]
    ReaderPanic(#[source] JoinError),
}

/// Batches a line stream into interval-sized flushes.
pub struct Throttle<R, W = tokio::io::Sink> {
    input: R,
    echo: Option<W>,
}

impl<R> Throttle<R, tokio::io::Sink>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(input: R) -> Self {
        Self { input, echo: None }
    }
}

impl<R, W> Throttle<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Like [`Throttle::new`], but every consumed line is also copied to
    /// `echo`, tee-style. Write errors on the echo stream are ignored.
    pub fn with_echo(input: R, echo: W) -> Self {
        Self {
            input,
            echo: Some(echo),
        }
    }

    /// Runs the flush loop until the input ends or `cancel` fires.
    ///
    /// Waits on three events: the interval tick (flush the buffer), the
    /// cancellation channel flipping to `true` (final flush, stop) and the
    /// reader task finishing (final flush, stop). Whichever terminal event is
    /// observed first wins; the final delivery happens exactly once. The first
    /// tick fires one full `period` after the call, so nothing is delivered
    /// before that.
    ///
    /// A cancelled run still joins the reader before returning; the reader
    /// watches the same channel, so a read parked on a silent stream cannot
    /// keep the run alive.
    pub async fn run(
        self,
        period: Duration,
        mut cancel: watch::Receiver<bool>,
        sink: &dyn Sink,
    ) -> Result<(), RunError> {
        let buffer = Arc::new(LineBuffer::new());
        let mut reader = spawn_reader(self.input, self.echo, Arc::clone(&buffer), cancel.clone());

        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let text = buffer.take_and_reset();
                    if let Err(err) = sink.flush(&text).await {
                        warn!(error = %err, "flush failed; continuing");
                    }
                }

                _ = cancelled(&mut cancel) => {
                    let text = buffer.take_and_reset();
                    if let Err(err) = sink.finalize(&text).await {
                        warn!(error = %err, "final flush failed");
                    }
                    debug!("cancelled; joining input reader");
                    return finish(reader.await);
                }

                res = &mut reader => {
                    let text = buffer.take_and_reset();
                    if let Err(err) = sink.finalize(&text).await {
                        warn!(error = %err, "final flush failed");
                    }
                    debug!("input closed");
                    return finish(res);
                }
            }
        }
    }
}

/// Resolves when the channel flips to `true`. If the sender is gone,
/// cancellation can never fire anymore, so this pends forever.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn finish(joined: Result<io::Result<()>, JoinError>) -> Result<(), RunError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(RunError::Read(err)),
        Err(err) => Err(RunError::ReaderPanic(err)),
    }
}

fn spawn_reader<R, W>(
    input: R,
    mut echo: Option<W>,
    buffer: Arc<LineBuffer>,
    mut cancel: watch::Receiver<bool>,
) -> JoinHandle<io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(input);
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                _ = cancelled(&mut cancel) => {
                    debug!("input reader unblocked by cancellation");
                    return Ok(());
                }
                res = reader.read_line(&mut line) => res,
            };

            match read {
                // EOF
                Ok(0) => return Ok(()),
                Ok(_) => {
                    buffer.append(line.trim_end_matches(['\r', '\n']));
                    if let Some(echo) = echo.as_mut() {
                        let _ = echo.write_all(line.as_bytes()).await;
                    }
                }
                Err(err) if is_expected_close(&err) => {
                    debug!(error = %err, "input closed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    })
}

/// Read errors that mean the source went away, not that something broke.
fn is_expected_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::UnexpectedEof
    )
}
