//! Worker-side endpoint.
//!
//! Validates request frames the way the worker firmware does and answers
//! with ack frames that echo the request's SQN. Used for bench testing
//! without hardware and as the loopback target of the CLI.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use tracing::{debug, trace};

use crate::protocol::{self, AckCode, Frame, FrameScanner, NoFrameReason, ReadOutcome};

/// Decides whether a correctly framed payload is acceptable.
pub trait PayloadHandler {
    /// Return `false` to answer [`AckCode::BadParameter`].
    fn accept(&mut self, sequence: u8, payload: &[u8]) -> bool;
}

/// Accepts every payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl PayloadHandler for AcceptAll {
    fn accept(&mut self, _sequence: u8, _payload: &[u8]) -> bool {
        true
    }
}

/// Accepts every payload and keeps a copy, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct Collector {
    data: Vec<u8>,
    frames: usize,
}

impl Collector {
    /// Concatenated payloads received so far.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of payloads accepted.
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.frames
    }
}

impl PayloadHandler for Collector {
    fn accept(&mut self, _sequence: u8, payload: &[u8]) -> bool {
        self.data.extend_from_slice(payload);
        self.frames += 1;
        true
    }
}

impl<F> PayloadHandler for F
where
    F: FnMut(u8, &[u8]) -> bool,
{
    fn accept(&mut self, sequence: u8, payload: &[u8]) -> bool {
        self(sequence, payload)
    }
}

/// Worker endpoint answering request frames with ack frames.
#[derive(Debug)]
pub struct Responder<H = AcceptAll> {
    address: u8,
    handler: H,
    last_sequence: Option<u8>,
}

impl Responder<AcceptAll> {
    /// Responder for `address` that accepts every payload.
    #[must_use]
    pub fn new(address: u8) -> Self {
        Self::with_handler(address, AcceptAll)
    }
}

impl<H: PayloadHandler> Responder<H> {
    /// Responder for `address` delegating payload checks to `handler`.
    pub fn with_handler(address: u8, handler: H) -> Self {
        Self {
            address,
            handler,
            last_sequence: None,
        }
    }

    /// Address this responder answers to.
    #[must_use]
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Borrow the payload handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Release the payload handler.
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Build the reply to a scanned request, or `None` if nothing arrived.
    pub fn respond(&mut self, request: &ReadOutcome) -> Option<Frame> {
        let (sequence, ack) = match request {
            ReadOutcome::NoFrame(_) => return None,
            ReadOutcome::BadChecksum { .. } => {
                // SQN of a corrupt frame is untrusted; answer with the one we expect.
                let expected = self.last_sequence.map_or(0, |sqn| sqn.wrapping_add(1));
                (expected, AckCode::BadChecksum)
            }
            ReadOutcome::Frame(frame) if frame.address() != self.address => {
                (frame.sequence(), AckCode::BadAddress)
            }
            ReadOutcome::Frame(frame) => {
                if self.handler.accept(frame.sequence(), frame.payload()) {
                    self.last_sequence = Some(frame.sequence());
                    (frame.sequence(), AckCode::Ok)
                } else {
                    (frame.sequence(), AckCode::BadParameter)
                }
            }
        };
        debug!(sequence, %ack, "answering request");
        Some(Frame::from_parts(sequence, self.address, ack.as_u8(), Vec::new()))
    }

    /// Wait for one request on `link` and answer it.
    ///
    /// Returns the ack code sent, or `None` when no request arrived.
    pub fn serve_one<L: Read + Write + ?Sized>(
        &mut self,
        link: &mut L,
        scanner: &mut FrameScanner,
    ) -> io::Result<Option<AckCode>> {
        let request = scanner.scan(link)?;
        let Some(reply) = self.respond(&request) else {
            return Ok(None);
        };
        let bytes = reply.encode().map_err(io::Error::other)?;
        link.write_all(&bytes)?;
        link.flush()?;
        Ok(reply.ack_code())
    }
}

/// In-memory link with a [`Responder`] on the far end.
///
/// Every flush hands the bytes written since the previous flush to the
/// responder as one request; its reply becomes readable immediately.
#[derive(Debug)]
pub struct LoopbackLink<H = AcceptAll> {
    responder: Responder<H>,
    outbound: Vec<u8>,
    inbound: VecDeque<u8>,
    drop_replies: usize,
}

impl<H: PayloadHandler> LoopbackLink<H> {
    /// Connect to `responder`.
    pub fn new(responder: Responder<H>) -> Self {
        Self {
            responder,
            outbound: Vec::new(),
            inbound: VecDeque::new(),
            drop_replies: 0,
        }
    }

    /// Discard the next `count` replies, as if lost on the line.
    pub fn drop_replies(&mut self, count: usize) {
        self.drop_replies = count;
    }

    /// Borrow the far-end responder.
    pub const fn responder(&self) -> &Responder<H> {
        &self.responder
    }

    /// Release the far-end responder.
    pub fn into_responder(self) -> Responder<H> {
        self.responder
    }
}

impl<H> Read for LoopbackLink<H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl<H: PayloadHandler> Write for LoopbackLink<H> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        let request = match protocol::decode(&self.outbound) {
            Ok((frame, _)) => ReadOutcome::Frame(frame),
            Err(protocol::Error::ChecksumMismatch { expected, found }) => {
                ReadOutcome::BadChecksum { expected, found }
            }
            Err(_) => ReadOutcome::NoFrame(NoFrameReason::Truncated),
        };
        self.outbound.clear();

        let Some(reply) = self.responder.respond(&request) else {
            return Ok(());
        };
        if self.drop_replies > 0 {
            self.drop_replies -= 1;
            trace!(sequence = reply.sequence(), "loopback reply dropped");
            return Ok(());
        }
        let bytes = reply.encode().map_err(io::Error::other)?;
        self.inbound.extend(bytes);
        Ok(())
    }
}
