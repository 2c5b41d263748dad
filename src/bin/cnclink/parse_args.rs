use std::ffi::OsString;
use std::time::Duration;

use cnclink::{DEFAULT_ADDRESS, DEFAULT_BAUD_RATE, DeliveryConfig};

const HELP: &str = "\
cnclink - deliver G-code to a CNC worker over a serial link

USAGE:
  cnclink send [OPTIONS] <FILE|->
  cnclink raw [OPTIONS] <HEX>...

OPTIONS:
  -h, --help              Prints help information
  -p, --port <name>       Serial port, e.g. /dev/ttyUSB0 or COM3
  -b, --baud <rate>       Baud rate (default: 115200)
  --chunk-size <n>        Payload bytes per frame, 1-250 (default: 250)
  --retries <n>           Attempts per chunk (default: 3)
  --address <n>           Receiver address, decimal or 0x-prefixed (default: 0x01)
  --timeout-ms <n>        Response deadline in milliseconds (default: 50)
  --check-sqn             Treat responses carrying another SQN as lost
  --loopback              Deliver to an in-process worker instead of a port (send only)
  -v, --verbose           Show delivery progress
  -vv, --debug            Show retries and protocol events
  -vvv, --trace           Show every frame
";

/// Verbosity level for log output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Warnings and errors only
    #[default]
    Quiet = 0,
    /// Delivery progress
    Verbose = 1,
    /// Retries and protocol events
    Debug = 2,
    /// Every frame
    Trace = 3,
}

#[derive(Debug)]
pub enum Command {
    Send { input: String },
    Raw { hex: String },
}

#[derive(Debug)]
pub struct AppArgs {
    pub command: Command,
    pub port: Option<String>,
    pub baud_rate: u32,
    pub delivery: DeliveryConfig,
    pub loopback: bool,
    pub verbosity: Verbosity,
}

fn parse_u8(s: &str) -> Result<u8, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    let verbosity = if pargs.contains("--trace") || pargs.contains("-vvv") {
        Verbosity::Trace
    } else if pargs.contains("--debug") || pargs.contains("-vv") {
        Verbosity::Debug
    } else if pargs.contains(["-v", "--verbose"]) {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };

    let defaults = DeliveryConfig::default();
    let delivery = DeliveryConfig {
        chunk_size: pargs
            .opt_value_from_str("--chunk-size")?
            .unwrap_or(defaults.chunk_size),
        retries: pargs
            .opt_value_from_str("--retries")?
            .unwrap_or(defaults.retries),
        address: pargs
            .opt_value_from_fn("--address", parse_u8)?
            .unwrap_or(DEFAULT_ADDRESS),
        response_timeout: pargs
            .opt_value_from_str("--timeout-ms")?
            .map_or(defaults.response_timeout, Duration::from_millis),
        check_response_sequence: pargs.contains("--check-sqn"),
        ..defaults
    };

    let port = pargs.opt_value_from_str(["-p", "--port"])?;
    let baud_rate = pargs
        .opt_value_from_str(["-b", "--baud"])?
        .unwrap_or(DEFAULT_BAUD_RATE);
    let loopback = pargs.contains("--loopback");

    let command = match pargs.subcommand()?.as_deref() {
        Some("send") => Command::Send {
            input: pargs.free_from_str()?,
        },
        Some("raw") => {
            let words: Vec<OsString> = pargs.finish();
            if words.is_empty() {
                return Err(pico_args::Error::MissingArgument);
            }
            let hex = words
                .iter()
                .map(|word| word.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            return Ok(AppArgs {
                command: Command::Raw { hex },
                port,
                baud_rate,
                delivery,
                loopback,
                verbosity,
            });
        }
        Some(other) => {
            return Err(pico_args::Error::ArgumentParsingFailed {
                cause: format!("unknown command '{other}'"),
            });
        }
        None => return Err(pico_args::Error::MissingArgument),
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(AppArgs {
        command,
        port,
        baud_rate,
        delivery,
        loopback,
        verbosity,
    })
}
