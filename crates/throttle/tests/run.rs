#![allow(clippy::unwrap_used)]

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::sync::watch;
use tokio::time::sleep;

use throttle::{RunError, Sink, Throttle};

const PERIOD: Duration = Duration::from_secs(1);

/// Sink that records every delivery for later assertions.
#[derive(Default)]
struct RecordingSink {
    flushes: Mutex<Vec<String>>,
    finals: Mutex<Vec<String>>,
    fail_flushes: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail_flushes: true,
            ..Self::default()
        }
    }

    fn flushes(&self) -> Vec<String> {
        self.flushes.lock().unwrap().clone()
    }

    fn finals(&self) -> Vec<String> {
        self.finals.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn flush(&self, text: &str) -> anyhow::Result<()> {
        self.flushes.lock().unwrap().push(text.to_string());
        if self.fail_flushes {
            anyhow::bail!("delivery refused");
        }
        Ok(())
    }

    async fn finalize(&self, text: &str) -> anyhow::Result<()> {
        self.finals.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct Harness {
    sink: Arc<RecordingSink>,
    cancel: watch::Sender<bool>,
    input: tokio::io::DuplexStream,
    run: tokio::task::JoinHandle<Result<(), RunError>>,
}

/// Spawns a throttle over one end of a duplex pipe; the test keeps the other.
fn start(sink: RecordingSink) -> Harness {
    let (input, output) = tokio::io::duplex(4096);
    let sink = Arc::new(sink);
    let (cancel, cancel_rx) = watch::channel(false);

    let task_sink = Arc::clone(&sink);
    let run = tokio::spawn(async move {
        Throttle::new(output)
            .run(PERIOD, cancel_rx, &*task_sink)
            .await
    });

    Harness {
        sink,
        cancel,
        input,
        run,
    }
}

#[tokio::test(start_paused = true)]
async fn lines_written_before_a_tick_arrive_as_one_batch() {
    let mut h = start(RecordingSink::default());

    h.input.write_all(b"abcd\nefgh\n").await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(h.sink.flushes().is_empty(), "nothing delivered before a tick");

    sleep(PERIOD).await;
    assert_eq!(h.sink.flushes(), vec!["abcd\nefgh\n".to_string()]);
    assert!(h.sink.finals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn quiet_interval_flushes_the_empty_string() {
    let mut h = start(RecordingSink::default());

    h.input.write_all(b"abcd\n").await.unwrap();
    sleep(PERIOD + Duration::from_millis(10)).await;
    sleep(PERIOD).await;

    assert_eq!(
        h.sink.flushes(),
        vec!["abcd\n".to_string(), String::new()]
    );
}

#[tokio::test(start_paused = true)]
async fn closing_the_input_triggers_exactly_one_final_flush() {
    let mut h = start(RecordingSink::default());

    h.input.write_all(b"ijk\nlmn\n").await.unwrap();
    sleep(Duration::from_millis(10)).await;
    drop(h.input);

    h.run.await.unwrap().unwrap();
    assert_eq!(h.sink.finals(), vec!["ijk\nlmn\n".to_string()]);
    assert!(h.sink.flushes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_triggers_exactly_one_final_flush() {
    let mut h = start(RecordingSink::default());

    h.input.write_all(b"ijk\nlmn\n").await.unwrap();
    sleep(Duration::from_millis(10)).await;
    h.cancel.send(true).unwrap();

    h.run.await.unwrap().unwrap();
    assert_eq!(h.sink.finals(), vec!["ijk\nlmn\n".to_string()]);

    // EOF after cancellation must not produce a second final.
    drop(h.input);
    sleep(PERIOD).await;
    assert_eq!(h.sink.finals().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_with_empty_buffer_finalizes_empty_string() {
    let h = start(RecordingSink::default());

    h.cancel.send(true).unwrap();
    h.run.await.unwrap().unwrap();

    assert_eq!(h.sink.finals(), vec![String::new()]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_unblocks_a_reader_with_no_input() {
    // The duplex stays open and silent, so the reader is parked on a read
    // that will never complete; cancelling must still end the run promptly.
    let h = start(RecordingSink::default());

    sleep(Duration::from_millis(10)).await;
    h.cancel.send(true).unwrap();

    let res = tokio::time::timeout(Duration::from_secs(5), h.run).await;
    res.unwrap().unwrap().unwrap();
    assert_eq!(h.sink.finals().len(), 1);
    drop(h.input);
}

#[tokio::test(start_paused = true)]
async fn failed_flush_does_not_stop_the_loop() {
    let mut h = start(RecordingSink::failing());

    h.input.write_all(b"first\n").await.unwrap();
    sleep(PERIOD + Duration::from_millis(10)).await;
    h.input.write_all(b"second\n").await.unwrap();
    sleep(PERIOD).await;
    drop(h.input);

    h.run.await.unwrap().unwrap();
    assert_eq!(
        h.sink.flushes(),
        vec!["first\n".to_string(), "second\n".to_string()]
    );
    assert_eq!(h.sink.finals().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn line_without_trailing_newline_gets_one_appended() {
    let mut h = start(RecordingSink::default());

    h.input.write_all(b"no newline").await.unwrap();
    drop(h.input);

    h.run.await.unwrap().unwrap();
    assert_eq!(h.sink.finals(), vec!["no newline\n".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn echo_copies_consumed_lines() {
    let (mut input, output) = tokio::io::duplex(4096);
    let (mut echo_read, echo_write) = tokio::io::duplex(4096);
    let sink = Arc::new(RecordingSink::default());
    let (_cancel, cancel_rx) = watch::channel(false);

    let task_sink = Arc::clone(&sink);
    let run = tokio::spawn(async move {
        Throttle::with_echo(output, echo_write)
            .run(PERIOD, cancel_rx, &*task_sink)
            .await
    });

    input.write_all(b"hello\nworld\n").await.unwrap();
    drop(input);
    run.await.unwrap().unwrap();

    let mut echoed = String::new();
    echo_read.read_to_string(&mut echoed).await.unwrap();
    assert_eq!(echoed, "hello\nworld\n");
    assert_eq!(sink.finals(), vec!["hello\nworld\n".to_string()]);
}

/// Reader that fails with a non-termination error on first read.
struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("device fault")))
    }
}

/// Reader whose failure mode counts as a normal close.
struct ClosedPipeReader;

impl AsyncRead for ClosedPipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")))
    }
}

#[tokio::test(start_paused = true)]
async fn unexpected_read_error_is_fatal_but_still_finalizes() {
    let sink = RecordingSink::default();
    let (_cancel, cancel_rx) = watch::channel(false);

    let res = Throttle::new(FailingReader)
        .run(PERIOD, cancel_rx, &sink)
        .await;

    assert!(matches!(res, Err(RunError::Read(_))));
    assert_eq!(sink.finals().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn broken_pipe_counts_as_normal_termination() {
    let sink = RecordingSink::default();
    let (_cancel, cancel_rx) = watch::channel(false);

    Throttle::new(ClosedPipeReader)
        .run(PERIOD, cancel_rx, &sink)
        .await
        .unwrap();

    assert_eq!(sink.finals(), vec![String::new()]);
}
