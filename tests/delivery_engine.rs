use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use cnclink::protocol::{self, AckCode, DEFAULT_ADDRESS, Frame};
use cnclink::transport::{
    ChunkState, Collector, DeliveryConfig, DeliveryEngine, DeliveryError, DeliveryEvent,
    ErrorClass, LoopbackLink, OperationState, PayloadHandler, Recoverable, Responder,
    spawn_delivery_on,
};

/// Wraps a link and keeps every byte written to it.
struct Recording<L> {
    inner: L,
    written: Vec<u8>,
}

impl<L> Recording<L> {
    fn new(inner: L) -> Self {
        Self {
            inner,
            written: Vec::new(),
        }
    }

    fn frames(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = &self.written[..];
        while !rest.is_empty() {
            let (frame, used) = protocol::decode(rest).expect("engine wrote a valid frame");
            frames.push(frame);
            rest = &rest[used..];
        }
        frames
    }
}

impl<L: Read> Read for Recording<L> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<L: Write> Write for Recording<L> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Rejects the payload arriving with one particular SQN.
struct RejectSequence(u8);

impl PayloadHandler for RejectSequence {
    fn accept(&mut self, sequence: u8, _payload: &[u8]) -> bool {
        sequence != self.0
    }
}

/// Worker that answers every frame with the same ack code.
struct FixedAck {
    ack: AckCode,
    inbound: VecDeque<u8>,
}

impl FixedAck {
    fn new(ack: AckCode) -> Self {
        Self {
            ack,
            inbound: VecDeque::new(),
        }
    }
}

impl Read for FixedAck {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FixedAck {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let reply = protocol::encode(0, b"", DEFAULT_ADDRESS, self.ack.as_u8())
            .map_err(io::Error::other)?;
        self.inbound.extend(reply);
        Ok(())
    }
}

fn fast_config(chunk_size: usize) -> DeliveryConfig {
    DeliveryConfig {
        chunk_size,
        response_timeout: Duration::from_millis(5),
        retry_backoff: Duration::ZERO,
        inter_chunk_delay: Duration::ZERO,
        ..DeliveryConfig::default()
    }
}

#[test]
fn single_line_goes_out_as_one_frame() {
    let link = Recording::new(LoopbackLink::new(Responder::with_handler(
        DEFAULT_ADDRESS,
        Collector::default(),
    )));
    let mut engine = DeliveryEngine::new(link, fast_config(250));

    let report = engine.send_lines(["G01 X10 Y20"]).unwrap();
    assert_eq!(report.chunks, 1);
    assert_eq!(report.frames_sent, 1);
    assert_eq!(engine.state(), OperationState::Completed);

    let link = engine.into_inner();
    let frames = link.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].sequence(), 0);
    assert_eq!(frames[0].address(), DEFAULT_ADDRESS);
    assert_eq!(frames[0].payload().as_ref(), b"G01 X10 Y20\n");

    let collector = link.inner.into_responder().into_handler();
    assert_eq!(collector.data(), b"G01 X10 Y20\n");
}

#[test]
fn chunks_arrive_in_order_with_increasing_sequence() {
    let program: Vec<String> = (0..40).map(|i| format!("G01 X{i} Y{}", i * 2)).collect();
    let expected = cnclink::transport::serialize_lines(&program).unwrap();

    let link = Recording::new(LoopbackLink::new(Responder::with_handler(
        DEFAULT_ADDRESS,
        Collector::default(),
    )));
    let mut engine = DeliveryEngine::new(link, fast_config(64));
    let report = engine.send_lines(&program).unwrap();
    assert_eq!(report.chunks, expected.len().div_ceil(64));
    assert_eq!(report.retries, 0);

    let link = engine.into_inner();
    let sequences: Vec<u8> = link.frames().iter().map(Frame::sequence).collect();
    let wanted: Vec<u8> = (0..report.chunks).map(|i| i as u8).collect();
    assert_eq!(sequences, wanted);
    assert!(link.frames().iter().all(|frame| frame.payload().len() <= 64));

    let collector = link.inner.into_responder().into_handler();
    assert_eq!(collector.data(), expected.as_slice());
}

#[test]
fn wrong_address_aborts_on_first_chunk() {
    // Worker listens on 0x07; every frame is addressed to 0x01.
    let link = Recording::new(LoopbackLink::new(Responder::new(0x07)));
    let mut engine = DeliveryEngine::new(link, fast_config(4));

    let err = engine.send(b"G90\nG91\nM2\n\n").unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::Rejected {
            chunk: 0,
            sequence: 0,
            ack: AckCode::BadAddress
        }
    ));
    assert_eq!(err.classification(), ErrorClass::Rejection);
    assert_eq!(engine.state(), OperationState::Failed);

    // Chunks 2 and 3 are never transmitted.
    assert_eq!(engine.link().frames().len(), 1);
}

#[test]
fn bad_parameter_stops_remaining_chunks() {
    let link = Recording::new(LoopbackLink::new(Responder::with_handler(
        DEFAULT_ADDRESS,
        RejectSequence(1),
    )));
    let mut engine = DeliveryEngine::new(link, fast_config(4));

    let err = engine.send(b"G90\nG91\nM2\n\n").unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::Rejected {
            chunk: 1,
            ack: AckCode::BadParameter,
            ..
        }
    ));
    let sequences: Vec<u8> = engine.link().frames().iter().map(Frame::sequence).collect();
    assert_eq!(sequences, vec![0, 1]);
}

#[test]
fn silent_worker_exhausts_retries() {
    let mut loopback = LoopbackLink::new(Responder::new(DEFAULT_ADDRESS));
    loopback.drop_replies(usize::MAX);
    let config = DeliveryConfig {
        retries: 3,
        ..fast_config(250)
    };
    let mut engine = DeliveryEngine::new(Recording::new(loopback), config);

    let err = engine.send_lines(["G28"]).unwrap_err();
    match err {
        DeliveryError::RetriesExhausted {
            chunk,
            sequence,
            attempts,
            last,
        } => {
            assert_eq!(chunk, 0);
            assert_eq!(sequence, 0);
            assert_eq!(attempts, 3);
            assert!(matches!(last, Recoverable::NoResponse(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Exactly three identical frames.
    let frames = engine.link().frames();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|frame| frame == &frames[0]));
}

#[test]
fn worker_checksum_failures_exhaust_retries() {
    let config = DeliveryConfig {
        retries: 3,
        ..fast_config(4)
    };
    let link = Recording::new(FixedAck::new(AckCode::BadChecksum));
    let mut engine = DeliveryEngine::new(link, config);

    let err = engine.send(b"G90\nG91\nM2\n\n").unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::RetriesExhausted {
            chunk: 0,
            sequence: 0,
            attempts: 3,
            last: Recoverable::WorkerChecksum,
        }
    ));
    assert_eq!(err.classification(), ErrorClass::Integrity);
    assert_eq!(engine.state(), OperationState::Failed);

    // Three attempts at chunk 0; chunk 1 never goes out.
    let frames = engine.link().frames();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|frame| frame.sequence() == 0));
}

#[test]
fn lost_replies_are_retried() {
    let mut loopback = LoopbackLink::new(Responder::with_handler(
        DEFAULT_ADDRESS,
        Collector::default(),
    ));
    loopback.drop_replies(2);
    let mut engine = DeliveryEngine::new(loopback, fast_config(250));

    let report = engine.send_lines(["G90", "G01 X1"]).unwrap();
    assert_eq!(report.frames_sent, 3);
    assert_eq!(report.retries, 2);
}

#[test]
fn oversized_payload_fails_before_transmission() {
    let payload = [b'X'; 251];
    assert!(matches!(
        protocol::encode(0, &payload, DEFAULT_ADDRESS, 1),
        Err(protocol::Error::PayloadTooLarge { size: 251, max: 250 })
    ));

    let link = Recording::new(LoopbackLink::new(Responder::new(DEFAULT_ADDRESS)));
    let mut engine = DeliveryEngine::new(link, fast_config(251));
    let err = engine.send(&payload).unwrap_err();
    assert_eq!(err.classification(), ErrorClass::Capacity);
    assert!(engine.link().written.is_empty());
}

#[test]
fn non_ascii_program_is_rejected() {
    let link = Recording::new(LoopbackLink::new(Responder::new(DEFAULT_ADDRESS)));
    let mut engine = DeliveryEngine::new(link, fast_config(250));
    let err = engine.send_lines(["G01 X10", "; déjà vu"]).unwrap_err();
    assert_eq!(err.classification(), ErrorClass::Capacity);
    assert!(engine.link().written.is_empty());
}

#[test]
fn background_delivery_can_be_cancelled() {
    let mut loopback = LoopbackLink::new(Responder::new(DEFAULT_ADDRESS));
    loopback.drop_replies(usize::MAX);
    let config = DeliveryConfig {
        retries: u32::MAX,
        response_timeout: Duration::from_millis(20),
        ..fast_config(250)
    };
    let handle = spawn_delivery_on(loopback, b"G28\n".to_vec(), config);

    // Wait until the first frame is on the wire.
    for event in handle.events() {
        if matches!(event, DeliveryEvent::Progress(p) if p.state == ChunkState::Sent) {
            break;
        }
    }
    handle.cancel();

    let err = handle.join().unwrap_err();
    assert!(matches!(err, DeliveryError::Cancelled));
    assert_eq!(err.classification(), ErrorClass::Cancelled);
}
