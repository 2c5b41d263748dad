//! Chunked, acknowledged delivery of a payload to the worker.
//!
//! The engine is strictly half-duplex: one frame goes out, its response is
//! resolved (acked, retried or fatal), and only then does the next frame go
//! out. The sequence counter lives on the stack of a single [`DeliveryEngine::send`]
//! call and restarts at zero for every payload.

use std::fmt;
use std::io::{self, Read, Write};
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use super::chunker::{chunk, chunk_count, checked_chunk_size, serialize_lines};
use crate::protocol::{
    self, AckCode, DEFAULT_ADDRESS, DEFAULT_RESPONSE_TIMEOUT, FrameScanner, MAX_FRAME_SIZE,
    NoFrameReason, ReadOutcome, discard_pending, encode_into,
};

/// Attempts per chunk when the caller does not pick a number.
pub const DEFAULT_RETRIES: u32 = 3;

/// Pause after a recoverable failure before resending.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Pause between an acknowledged chunk and the next one.
pub const DEFAULT_INTER_CHUNK_DELAY: Duration = Duration::from_millis(5);

/// Delivery parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeliveryConfig {
    /// Maximum payload bytes per frame (1..=250).
    pub chunk_size: usize,
    /// Attempts per chunk, including the first.
    pub retries: u32,
    /// Receiver address written into every frame.
    pub address: u8,
    /// Byte written into the ACK field of outbound frames.
    pub frame_ack: u8,
    /// Deadline for locating a response frame.
    pub response_timeout: Duration,
    /// Pause before resending after a recoverable failure.
    pub retry_backoff: Duration,
    /// Pause between consecutive chunks.
    pub inter_chunk_delay: Duration,
    /// Treat a response whose SQN differs from the request's as lost.
    ///
    /// Pending input is discarded before every write, so late replies are
    /// already dropped when this is off; it guards against a worker that
    /// answers the wrong request.
    pub check_response_sequence: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: protocol::MAX_PAYLOAD_SIZE,
            retries: DEFAULT_RETRIES,
            address: DEFAULT_ADDRESS,
            frame_ack: AckCode::Ok.as_u8(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            inter_chunk_delay: DEFAULT_INTER_CHUNK_DELAY,
            check_response_sequence: false,
        }
    }
}

impl DeliveryConfig {
    /// Check the configuration before anything is transmitted.
    ///
    /// Returns the validated chunk size.
    pub fn validate(&self) -> protocol::Result<NonZeroUsize> {
        if self.retries == 0 {
            return Err(protocol::Error::ZeroRetries);
        }
        checked_chunk_size(self.chunk_size)
    }
}

/// Lifecycle of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Not yet transmitted.
    Pending,
    /// Frame written, awaiting response.
    Sent,
    /// Worker answered OK.
    Acked,
    /// Recoverable failure; the same frame will be resent.
    Retry,
    /// Fatal response or retries exhausted.
    Aborted,
}

/// Lifecycle of one `send` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// No send has started.
    Idle,
    /// Chunks are being delivered.
    InProgress,
    /// Every chunk was acknowledged.
    Completed,
    /// The last send stopped early.
    Failed,
}

/// Failure that warrants resending the same frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverable {
    /// No usable response arrived.
    NoResponse(NoFrameReason),
    /// A response arrived but failed its own checksum.
    CorruptResponse,
    /// The worker reported a checksum failure on our frame.
    WorkerChecksum,
    /// The ack byte is not a known code.
    UnknownAck(u8),
    /// The response answers a different request.
    SequenceMismatch {
        /// SQN of the frame we sent.
        expected: u8,
        /// SQN carried by the response.
        found: u8,
    },
}

impl fmt::Display for Recoverable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse(NoFrameReason::Timeout) => write!(f, "no response"),
            Self::NoResponse(NoFrameReason::Truncated) => write!(f, "truncated response"),
            Self::NoResponse(NoFrameReason::InvalidLength(len)) => {
                write!(f, "response with invalid length {len}")
            }
            Self::CorruptResponse => write!(f, "response checksum mismatch"),
            Self::WorkerChecksum => write!(f, "worker reported {}", AckCode::BadChecksum),
            Self::UnknownAck(ack) => write!(f, "unknown ack code {ack:#04x}"),
            Self::SequenceMismatch { expected, found } => {
                write!(f, "response sqn {found} for request sqn {expected}")
            }
        }
    }
}

/// Classification of one attempt's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Chunk delivered.
    Acked,
    /// Resend the same frame.
    Recoverable(Recoverable),
    /// Abort the whole operation.
    Fatal(AckCode),
}

impl ResponseOutcome {
    /// Classify a scanned response to a frame sent with `sequence`.
    #[must_use]
    pub fn classify(outcome: &ReadOutcome, sequence: u8, check_sequence: bool) -> Self {
        let frame = match outcome {
            ReadOutcome::Frame(frame) => frame,
            ReadOutcome::BadChecksum { .. } => {
                return Self::Recoverable(Recoverable::CorruptResponse);
            }
            ReadOutcome::NoFrame(reason) => {
                return Self::Recoverable(Recoverable::NoResponse(*reason));
            }
        };

        if check_sequence && frame.sequence() != sequence {
            return Self::Recoverable(Recoverable::SequenceMismatch {
                expected: sequence,
                found: frame.sequence(),
            });
        }

        match frame.ack_code() {
            Some(AckCode::Ok) => Self::Acked,
            Some(AckCode::BadChecksum) => Self::Recoverable(Recoverable::WorkerChecksum),
            Some(code) => Self::Fatal(code),
            None => Self::Recoverable(Recoverable::UnknownAck(frame.ack())),
        }
    }
}

/// Error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Port could not be opened, written or read.
    Transport,
    /// No sync or a truncated response, retried until exhausted.
    Framing,
    /// Checksum failures, retried until exhausted.
    Integrity,
    /// Worker rejected the request.
    Rejection,
    /// Payload or configuration cannot be framed.
    Capacity,
    /// The caller tore the link down.
    Cancelled,
}

/// Why a delivery failed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Request could not be framed; nothing was transmitted.
    #[error("invalid delivery request: {0}")]
    Capacity(#[from] protocol::Error),

    /// Link failure.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// Worker answered with a fatal ack code.
    #[error("chunk {chunk} (sqn {sequence}) rejected by worker: {ack}")]
    Rejected {
        /// Zero-based chunk index.
        chunk: usize,
        /// SQN of the rejected frame.
        sequence: u8,
        /// Fatal code returned.
        ack: AckCode,
    },

    /// Every attempt for one chunk failed recoverably.
    #[error("chunk {chunk} (sqn {sequence}) not acknowledged after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Zero-based chunk index.
        chunk: usize,
        /// SQN of the frame.
        sequence: u8,
        /// Attempts made.
        attempts: u32,
        /// Failure seen on the final attempt.
        last: Recoverable,
    },

    /// The link was torn down by the caller.
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Which class of failure this is.
    #[must_use]
    pub fn classification(&self) -> ErrorClass {
        match self {
            Self::Capacity(_) => ErrorClass::Capacity,
            Self::Transport(_) => ErrorClass::Transport,
            Self::Rejected { .. } => ErrorClass::Rejection,
            Self::RetriesExhausted { last, .. } => match last {
                Recoverable::CorruptResponse | Recoverable::WorkerChecksum => {
                    ErrorClass::Integrity
                }
                Recoverable::NoResponse(_)
                | Recoverable::UnknownAck(_)
                | Recoverable::SequenceMismatch { .. } => ErrorClass::Framing,
            },
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }
}

/// Summary of a successful delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Chunks delivered.
    pub chunks: usize,
    /// Frames written, including resends.
    pub frames_sent: usize,
    /// Resends after recoverable failures.
    pub retries: usize,
    /// Payload bytes delivered.
    pub bytes: usize,
}

/// Progress notification emitted on every chunk state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Zero-based chunk index.
    pub chunk: usize,
    /// Chunks in the payload.
    pub total_chunks: usize,
    /// SQN of the chunk's frame.
    pub sequence: u8,
    /// One-based attempt number; zero while pending.
    pub attempt: u32,
    /// New state of the chunk.
    pub state: ChunkState,
}

type Observer = Box<dyn FnMut(&Progress) + Send>;

/// Drives per-chunk send, await-ack, retry and advance over an owned link.
pub struct DeliveryEngine<L> {
    link: L,
    config: DeliveryConfig,
    scanner: FrameScanner,
    state: OperationState,
    frame: Vec<u8>,
    observer: Option<Observer>,
}

impl<L: Read + Write> DeliveryEngine<L> {
    /// Create an engine that owns `link` for its lifetime.
    pub fn new(link: L, config: DeliveryConfig) -> Self {
        let scanner = FrameScanner::new(config.response_timeout);
        Self {
            link,
            config,
            scanner,
            state: OperationState::Idle,
            frame: Vec::with_capacity(MAX_FRAME_SIZE),
            observer: None,
        }
    }

    /// Receive a [`Progress`] callback on every chunk state change.
    #[must_use]
    pub fn with_observer(mut self, observer: impl FnMut(&Progress) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Current operation state.
    #[must_use]
    pub const fn state(&self) -> OperationState {
        self.state
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Borrow the link.
    pub const fn link(&self) -> &L {
        &self.link
    }

    /// Release the link.
    pub fn into_inner(self) -> L {
        self.link
    }

    /// Serialize `lines` and deliver them.
    pub fn send_lines<I, S>(&mut self, lines: I) -> Result<DeliveryReport, DeliveryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let payload = serialize_lines(lines)?;
        self.send(&payload)
    }

    /// Deliver `payload` chunk by chunk, in order.
    ///
    /// Stops at the first fatal response or exhausted chunk; no further
    /// chunks are transmitted after a failure.
    #[instrument(level = "debug", skip(self, payload), fields(len = payload.len()))]
    pub fn send(&mut self, payload: &[u8]) -> Result<DeliveryReport, DeliveryError> {
        let chunk_size = match self.config.validate() {
            Ok(size) => size,
            Err(err) => {
                self.state = OperationState::Failed;
                return Err(err.into());
            }
        };

        self.state = OperationState::InProgress;
        let result = self.deliver_all(payload, chunk_size);
        self.state = match &result {
            Ok(report) => {
                info!(
                    chunks = report.chunks,
                    frames = report.frames_sent,
                    retries = report.retries,
                    "delivery completed"
                );
                OperationState::Completed
            }
            Err(err) => {
                warn!(error = %err, "delivery failed");
                OperationState::Failed
            }
        };
        result
    }

    fn deliver_all(
        &mut self,
        payload: &[u8],
        chunk_size: NonZeroUsize,
    ) -> Result<DeliveryReport, DeliveryError> {
        let total_chunks = chunk_count(payload.len(), chunk_size);
        let mut report = DeliveryReport {
            bytes: payload.len(),
            ..DeliveryReport::default()
        };
        let mut sequence: u8 = 0;

        for (index, piece) in chunk(payload, chunk_size).enumerate() {
            let mut progress = Progress {
                chunk: index,
                total_chunks,
                sequence,
                attempt: 0,
                state: ChunkState::Pending,
            };
            self.notify(&progress);
            self.deliver_chunk(&mut progress, piece, &mut report)?;

            report.chunks += 1;
            sequence = sequence.wrapping_add(1);
            if index + 1 < total_chunks {
                pause(self.config.inter_chunk_delay);
            }
        }

        Ok(report)
    }

    fn deliver_chunk(
        &mut self,
        progress: &mut Progress,
        piece: &[u8],
        report: &mut DeliveryReport,
    ) -> Result<(), DeliveryError> {
        let sequence = progress.sequence;
        self.frame.clear();
        encode_into(
            &mut self.frame,
            sequence,
            piece,
            self.config.address,
            self.config.frame_ack,
        )?;

        let mut last = Recoverable::NoResponse(NoFrameReason::Timeout);
        for attempt in 1..=self.config.retries {
            progress.attempt = attempt;

            discard_pending(&mut self.link).map_err(DeliveryError::Transport)?;
            self.link
                .write_all(&self.frame)
                .and_then(|()| self.link.flush())
                .map_err(DeliveryError::Transport)?;
            report.frames_sent += 1;
            if attempt > 1 {
                report.retries += 1;
            }
            trace!(sequence, attempt, len = self.frame.len(), "frame sent");
            self.transition(progress, ChunkState::Sent);

            let response = self
                .scanner
                .scan(&mut self.link)
                .map_err(DeliveryError::Transport)?;

            match ResponseOutcome::classify(
                &response,
                sequence,
                self.config.check_response_sequence,
            ) {
                ResponseOutcome::Acked => {
                    self.transition(progress, ChunkState::Acked);
                    return Ok(());
                }
                ResponseOutcome::Fatal(ack) => {
                    self.transition(progress, ChunkState::Aborted);
                    return Err(DeliveryError::Rejected {
                        chunk: progress.chunk,
                        sequence,
                        ack,
                    });
                }
                ResponseOutcome::Recoverable(reason) => {
                    debug!(sequence, attempt, %reason, "recoverable failure");
                    self.transition(progress, ChunkState::Retry);
                    last = reason;
                    if attempt < self.config.retries {
                        pause(self.config.retry_backoff);
                    }
                }
            }
        }

        self.transition(progress, ChunkState::Aborted);
        Err(DeliveryError::RetriesExhausted {
            chunk: progress.chunk,
            sequence,
            attempts: self.config.retries,
            last,
        })
    }

    fn transition(&mut self, progress: &mut Progress, state: ChunkState) {
        progress.state = state;
        self.notify(progress);
    }

    fn notify(&mut self, progress: &Progress) {
        if let Some(observer) = self.observer.as_mut() {
            observer(progress);
        }
    }
}

impl<L> fmt::Debug for DeliveryEngine<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
