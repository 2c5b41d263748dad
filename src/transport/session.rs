//! Boundary operations used by the GUI, the CLI and other callers.
//!
//! Each operation owns the serial port for its whole duration: the port is
//! opened at the start and dropped on every exit path.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use tracing::{error, instrument, warn};

use super::chunker::serialize_lines;
use super::delivery::{
    DeliveryConfig, DeliveryEngine, DeliveryError, DeliveryReport, ErrorClass, Progress,
};
use super::link::{LinkKiller, SerialConfig, SerialLink, SharedLink};
use super::raw::{RawInput, write_raw};

/// Deliver `lines` to the worker on `port`.
///
/// `chunk_size` and `retries` fall back to 250 and 3. Returns `false` on any
/// failure; failures are logged, never propagated.
pub fn send_command_lines<I, S>(
    port: &str,
    baud_rate: u32,
    lines: I,
    chunk_size: Option<usize>,
    retries: Option<u32>,
) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let defaults = DeliveryConfig::default();
    let config = DeliveryConfig {
        chunk_size: chunk_size.unwrap_or(defaults.chunk_size),
        retries: retries.unwrap_or(defaults.retries),
        ..defaults
    };
    match try_send_command_lines(&SerialConfig::new(port, baud_rate), lines, &config) {
        Ok(_) => true,
        Err(err) => {
            error!(port, class = ?err.classification(), error = %err, "command delivery failed");
            false
        }
    }
}

/// Write `input` to `port` without framing or acknowledgement.
///
/// Returns `false` if the input is not valid hex or the port fails.
pub fn send_raw(port: &str, baud_rate: u32, input: RawInput<'_>) -> bool {
    let bytes = match input.to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(port, error = %err, "raw input rejected");
            return false;
        }
    };
    match try_send_raw(&SerialConfig::new(port, baud_rate), &bytes) {
        Ok(()) => true,
        Err(err) => {
            error!(port, error = %err, "raw send failed");
            false
        }
    }
}

/// Deliver `lines`, reporting exactly why a failure happened.
///
/// The request is validated before the port is opened, so capacity errors
/// never touch the line.
#[instrument(level = "info", skip(serial, lines, config), fields(port = %serial.port))]
pub fn try_send_command_lines<I, S>(
    serial: &SerialConfig,
    lines: I,
    config: &DeliveryConfig,
) -> Result<DeliveryReport, DeliveryError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    config.validate()?;
    let payload = serialize_lines(lines)?;
    let link = SerialLink::open(serial).map_err(DeliveryError::Transport)?;
    DeliveryEngine::new(link, config.clone()).send(&payload)
}

/// Write raw bytes to the port described by `serial`.
#[instrument(level = "info", skip(serial, bytes), fields(port = %serial.port, len = bytes.len()))]
pub fn try_send_raw(serial: &SerialConfig, bytes: &[u8]) -> io::Result<()> {
    let mut link = SerialLink::open(serial)?;
    write_raw(&mut link, bytes)
}

/// Event streamed from a background delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// A chunk changed state.
    Progress(Progress),
    /// The delivery ended; `None` means success.
    Finished(Option<ErrorClass>),
}

/// Handle to a delivery running on its own thread.
#[derive(Debug)]
pub struct DeliveryHandle<L> {
    events: Receiver<DeliveryEvent>,
    killer: LinkKiller<L>,
    thread: JoinHandle<Result<DeliveryReport, DeliveryError>>,
}

impl<L> DeliveryHandle<L> {
    /// Progress and completion events, in order.
    pub const fn events(&self) -> &Receiver<DeliveryEvent> {
        &self.events
    }

    /// Tear down the link. The delivery fails with
    /// [`DeliveryError::Cancelled`] at its next read or write.
    pub fn cancel(&self) {
        self.killer.kill();
    }

    /// Wait for the delivery to finish.
    pub fn join(self) -> Result<DeliveryReport, DeliveryError> {
        self.thread.join().unwrap_or_else(|_| {
            Err(DeliveryError::Transport(io::Error::other(
                "delivery thread panicked",
            )))
        })
    }
}

/// Open `serial` and deliver `lines` on a background thread.
///
/// The calling thread never blocks on the link; watch
/// [`DeliveryHandle::events`] for progress.
pub fn spawn_delivery(
    serial: &SerialConfig,
    lines: Vec<String>,
    config: DeliveryConfig,
) -> Result<DeliveryHandle<SerialLink>, DeliveryError> {
    config.validate()?;
    let payload = serialize_lines(&lines)?;
    let link = SerialLink::open(serial).map_err(DeliveryError::Transport)?;
    Ok(spawn_delivery_on(link, payload, config))
}

/// Deliver `payload` over `link` on a background thread.
pub fn spawn_delivery_on<L>(link: L, payload: Vec<u8>, config: DeliveryConfig) -> DeliveryHandle<L>
where
    L: Read + Write + Send + 'static,
{
    let (shared, killer) = SharedLink::new(link);
    let (tx, events) = mpsc::channel();
    let watcher = killer.clone();

    let progress_tx = tx.clone();
    let thread = thread::spawn(move || {
        let mut engine = DeliveryEngine::new(shared, config).with_observer(move |progress| {
            // Receiver gone means nobody is watching; keep delivering.
            let _ = progress_tx.send(DeliveryEvent::Progress(*progress));
        });
        let result = match engine.send(&payload) {
            Err(DeliveryError::Transport(_)) if watcher.is_killed() => {
                warn!("delivery cancelled by caller");
                Err(DeliveryError::Cancelled)
            }
            other => other,
        };
        let _ = tx.send(DeliveryEvent::Finished(
            result.as_ref().err().map(DeliveryError::classification),
        ));
        result
    });

    DeliveryHandle {
        events,
        killer,
        thread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_ADDRESS;
    use crate::transport::delivery::ChunkState;
    use crate::transport::responder::{Collector, LoopbackLink, Responder};
    use std::time::Duration;

    #[test]
    fn test_missing_port_reports_failure() {
        assert!(!send_command_lines(
            "/dev/cnclink-does-not-exist",
            115_200,
            ["G90"],
            None,
            None
        ));
        assert!(!send_raw(
            "/dev/cnclink-does-not-exist",
            115_200,
            RawInput::Hex("AC53")
        ));
    }

    #[test]
    fn test_bad_request_fails_before_opening_port() {
        let serial = SerialConfig::new("/dev/cnclink-does-not-exist", 9600);
        let config = DeliveryConfig {
            chunk_size: 251,
            ..DeliveryConfig::default()
        };
        let err = try_send_command_lines(&serial, ["G90"], &config).unwrap_err();
        assert_eq!(err.classification(), ErrorClass::Capacity);

        assert!(!send_raw("/dev/cnclink-does-not-exist", 9600, RawInput::Hex("xyz")));
    }

    #[test]
    fn test_background_delivery_streams_events() {
        let link = LoopbackLink::new(Responder::with_handler(
            DEFAULT_ADDRESS,
            Collector::default(),
        ));
        let config = DeliveryConfig {
            chunk_size: 8,
            inter_chunk_delay: Duration::ZERO,
            ..DeliveryConfig::default()
        };
        let handle = spawn_delivery_on(link, b"G90\nG01 X1 Y1\nM2\n".to_vec(), config);
        let events: Vec<DeliveryEvent> = handle.events().iter().collect();
        let report = handle.join().unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(events.last(), Some(&DeliveryEvent::Finished(None)));
        let acked = events
            .iter()
            .filter(|event| {
                matches!(event, DeliveryEvent::Progress(p) if p.state == ChunkState::Acked)
            })
            .count();
        assert_eq!(acked, 3);
    }
}
