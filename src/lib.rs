//! cnclink - reliable framed transport from a CNC controller to its worker
//!
//! G-code lines travel over an unreliable serial link in CRC-8 protected
//! frames. Each frame is acknowledged by the worker with a one-byte status
//! code; lost or corrupt exchanges are retried, rejections abort.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cnclink::send_command_lines;
//!
//! let lines = ["G90", "G01 X10 Y20 F300", "M2"];
//! if !send_command_lines("/dev/ttyUSB0", 115_200, lines, None, None) {
//!     eprintln!("worker did not accept the program");
//! }
//! ```
//!
//! For richer error reporting use [`transport::try_send_command_lines`], and
//! to keep an interactive thread responsive use [`transport::spawn_delivery`].
//!
//! # Wire Format
//!
//! ```text
//! SYNC1(0xAC) SYNC2(0x53) LEN SQN ADDR ACK DATA(0..250) CRC8
//! ```
//!
//! `LEN = 3 + len(DATA)`; CRC-8 (poly 0x31, init 0) covers `LEN` through `DATA`.
//! Payloads are not escaped, so a `0xAC 0x53` pair inside command text can be
//! mistaken for a frame start by the receiver.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod protocol;
pub mod transport;

pub use protocol::{
    AckCode, DEFAULT_ADDRESS, Error, Frame, MAX_PAYLOAD_SIZE, Result, SYNC1, SYNC2, crc8,
};
pub use transport::{
    DeliveryConfig, DeliveryEngine, DeliveryError, DeliveryReport, RawInput, SerialConfig,
    send_command_lines, send_raw,
};

/// Default line speed used by the CLI
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
