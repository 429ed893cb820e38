//! Event streams for background pipelines.
//!
//! [`spawn_extraction`] and [`spawn_encoding`] run a pipeline on a dedicated
//! worker thread and hand back an [`EventStream`]. The stream yields
//! [`PipelineEvent::Progress`] events in order, followed by exactly one
//! terminal event: [`PipelineEvent::Completed`] or [`PipelineEvent::Failed`].
//! A cancelled pipeline sends no terminal event; the stream simply ends.
//!
//! Events travel over an unbounded Tokio channel, so the stream can be
//! consumed both from blocking code (it is an [`Iterator`]) and from async
//! code ([`EventStream::next_event`], or `tokio_stream::Stream` with the
//! `async` feature).
//!
//! # Example
//!
//! ```no_run
//! use framecodec::{ExtractOptions, FfmpegBackend, PipelineEvent, stream};
//!
//! let events = stream::spawn_extraction(
//!     FfmpegBackend::new(),
//!     "input.mp4",
//!     vec![0.5, 1.0, 1.5],
//!     "frames",
//!     ExtractOptions::new(),
//! )?;
//!
//! for event in events {
//!     match event {
//!         PipelineEvent::Progress(progress) => println!("{}%", progress.percent),
//!         PipelineEvent::Completed(done) => println!("done: {:?}", done.location),
//!         PipelineEvent::Failed(error) => eprintln!("failed: {error}"),
//!     }
//! }
//! # Ok::<(), framecodec::FrameCodecError>(())
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[cfg(feature = "async")]
use std::pin::Pin;
#[cfg(feature = "async")]
use std::task::{Context, Poll};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
#[cfg(feature = "async")]
use tokio_stream::Stream;

use crate::codec::MediaBackend;
use crate::configuration::{EncodeOptions, ExtractOptions};
use crate::encode::FrameEncoder;
use crate::error::FrameCodecError;
use crate::extract::FrameExtractor;
use crate::progress::{CancellationToken, ProgressEvent, ProgressSink};

/// One item of an [`EventStream`].
#[derive(Debug)]
pub enum PipelineEvent {
    /// An intermediate progress snapshot.
    Progress(ProgressEvent),
    /// The pipeline finished. Always 100%.
    Completed(ProgressEvent),
    /// The pipeline failed. Carries the cause.
    Failed(FrameCodecError),
}

impl PipelineEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineEvent::Progress(_))
    }
}

/// Forwards progress events into the channel.
struct ChannelSink {
    sender: UnboundedSender<PipelineEvent>,
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, event: &ProgressEvent) {
        // A dropped receiver cancels the token; the loop notices next pass.
        let _ = self.sender.send(PipelineEvent::Progress(event.clone()));
    }
}

/// Receiving end of a background pipeline.
///
/// Dropping the stream cancels the pipeline.
pub struct EventStream {
    receiver: UnboundedReceiver<PipelineEvent>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Request cancellation. The stream ends without a terminal event once
    /// the worker notices.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The token shared with the worker.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait for the next event from blocking code.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_next(&mut self) -> Option<PipelineEvent> {
        self.receiver.blocking_recv()
    }

    /// Wait for the next event from async code.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.receiver.recv().await
    }

    /// Block until the worker thread has exited.
    ///
    /// Every codec, surface, and file handle of the pipeline is released by
    /// then.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Pipeline worker panicked");
            }
        }
    }
}

impl Iterator for EventStream {
    type Item = PipelineEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.blocking_next()
    }
}

#[cfg(feature = "async")]
impl Stream for EventStream {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Run [`FrameExtractor::extract`] on a worker thread.
///
/// The options' progress sink is replaced by the stream. If the options carry
/// a cancellation token it is shared with the stream, otherwise a new one is
/// created.
///
/// # Errors
///
/// [`FrameCodecError::Io`] if the worker thread cannot be spawned. Every
/// pipeline error arrives as [`PipelineEvent::Failed`].
pub fn spawn_extraction<B>(
    backend: B,
    source: impl Into<PathBuf>,
    timestamps: Vec<f64>,
    output_dir: impl Into<PathBuf>,
    options: ExtractOptions,
) -> Result<EventStream, FrameCodecError>
where
    B: MediaBackend + 'static,
{
    let source = source.into();
    let output_dir = output_dir.into();
    let token = options.cancellation.clone().unwrap_or_default();
    let (sender, receiver) = unbounded_channel();

    let options = options
        .with_cancellation(token.clone())
        .with_progress(Arc::new(ChannelSink { sender: sender.clone() }));

    let handle = thread::Builder::new()
        .name("framecodec-extract".to_string())
        .spawn(move || {
            let result = FrameExtractor::new(backend).extract(&source, &timestamps, &output_dir, &options);
            drop(options);
            send_terminal(&sender, result.map(|summary| summary.completion));
        })?;

    Ok(EventStream {
        receiver,
        token,
        handle: Some(handle),
    })
}

/// Run [`FrameEncoder::encode_directory`] on a worker thread.
///
/// Same channel and cancellation rules as [`spawn_extraction`].
pub fn spawn_encoding<B>(
    backend: B,
    frames_dir: impl Into<PathBuf>,
    output: impl Into<PathBuf>,
    options: EncodeOptions,
) -> Result<EventStream, FrameCodecError>
where
    B: MediaBackend + 'static,
{
    let frames_dir = frames_dir.into();
    let output = output.into();
    let token = options.cancellation.clone().unwrap_or_default();
    let (sender, receiver) = unbounded_channel();

    let options = options
        .with_cancellation(token.clone())
        .with_progress(Arc::new(ChannelSink { sender: sender.clone() }));

    let handle = thread::Builder::new()
        .name("framecodec-encode".to_string())
        .spawn(move || {
            let result = FrameEncoder::new(backend).encode_directory(&frames_dir, &output, &options);
            drop(options);
            send_terminal(&sender, result.map(|summary| summary.completion));
        })?;

    Ok(EventStream {
        receiver,
        token,
        handle: Some(handle),
    })
}

fn send_terminal(sender: &UnboundedSender<PipelineEvent>, result: Result<ProgressEvent, FrameCodecError>) {
    let event = match result {
        Ok(completion) => PipelineEvent::Completed(completion),
        Err(FrameCodecError::Cancelled) => {
            log::debug!("Pipeline cancelled; closing the stream without a terminal event");
            return;
        }
        Err(error) => PipelineEvent::Failed(error),
    };
    let _ = sender.send(event);
}
