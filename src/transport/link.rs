//! Serial link ownership: opening the port and tearing it down.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, instrument};

/// Per-read timeout applied to the port; the frame scanner enforces the
/// overall response deadline on top of it.
pub const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial port parameters supplied by the caller.
///
/// Framing is always 8 data bits, no parity, 1 stop bit, no flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Line speed in baud.
    pub baud_rate: u32,
    /// Timeout for a single blocking read or write.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Configuration for `port` at `baud_rate` with the default timeout.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout: DEFAULT_PORT_TIMEOUT,
        }
    }
}

/// An open serial port. The port closes when this value is dropped.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open the port described by `config`.
    #[instrument(level = "debug", skip(config), fields(port = %config.port, baud = config.baud_rate))]
    pub fn open(config: &SerialConfig) -> io::Result<Self> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()?;
        debug!("serial port opened");
        Ok(Self { port })
    }

    /// Port name as reported by the driver.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port.name())
            .finish_non_exhaustive()
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        debug!(port = ?self.port.name(), "serial port closed");
    }
}

/// A link that another thread can tear down.
///
/// After [`LinkKiller::kill`] the wrapped link is dropped and every further
/// read, write or flush fails with [`ErrorKind::NotConnected`].
#[derive(Debug)]
pub struct SharedLink<L> {
    inner: Arc<Mutex<Option<L>>>,
}

/// Handle that closes a [`SharedLink`] from outside.
#[derive(Debug)]
pub struct LinkKiller<L> {
    inner: Arc<Mutex<Option<L>>>,
}

impl<L> SharedLink<L> {
    /// Wrap `link`, returning it together with its kill switch.
    pub fn new(link: L) -> (Self, LinkKiller<L>) {
        let inner = Arc::new(Mutex::new(Some(link)));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            LinkKiller { inner },
        )
    }

    fn with_link<T>(&self, op: impl FnOnce(&mut L) -> io::Result<T>) -> io::Result<T> {
        let mut guard = lock(&self.inner)?;
        match guard.as_mut() {
            Some(link) => op(link),
            None => Err(io::Error::new(ErrorKind::NotConnected, "link torn down")),
        }
    }
}

impl<L> LinkKiller<L> {
    /// Drop the underlying link. Idempotent.
    pub fn kill(&self) {
        // A poisoned lock still holds the link; take it regardless.
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.take().is_some() {
            debug!("link torn down on request");
        }
    }

    /// Whether [`kill`](Self::kill) has run.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        match self.inner.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }
}

impl<L> Clone for LinkKiller<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<L>(inner: &Mutex<Option<L>>) -> io::Result<MutexGuard<'_, Option<L>>> {
    inner
        .lock()
        .map_err(|_| io::Error::other("link lock poisoned"))
}

impl<L: Read> Read for SharedLink<L> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_link(|link| link.read(buf))
    }
}

impl<L: Write> Write for SharedLink<L> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_link(|link| link.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_link(Write::flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0", 115_200);
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, DEFAULT_PORT_TIMEOUT);
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/cnclink-does-not-exist", 9600);
        assert!(SerialLink::open(&config).is_err());
    }

    #[test]
    fn test_shared_link_passes_through() {
        let (mut link, killer) = SharedLink::new(Cursor::new(vec![1u8, 2, 3]));
        let mut buf = [0u8; 2];
        assert_eq!(link.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert!(!killer.is_killed());
    }

    #[test]
    fn test_killed_link_fails_io() {
        let (mut link, killer) = SharedLink::new(Cursor::new(Vec::<u8>::new()));
        killer.kill();
        killer.kill();
        assert!(killer.is_killed());
        assert_eq!(
            link.write(b"G90\n").unwrap_err().kind(),
            ErrorKind::NotConnected
        );
        assert_eq!(
            link.read(&mut [0u8; 1]).unwrap_err().kind(),
            ErrorKind::NotConnected
        );
        assert_eq!(link.flush().unwrap_err().kind(), ErrorKind::NotConnected);
    }
}
