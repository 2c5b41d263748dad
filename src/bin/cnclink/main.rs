mod parse_args;

use std::io::Read;
use std::process::ExitCode;

use cnclink::transport::{
    ChunkState, Collector, DeliveryEvent, DeliveryHandle, LoopbackLink, Responder, SerialConfig,
    SerialLink, parse_hex, serialize_lines, spawn_delivery_on, try_send_raw,
};
use cnclink::{DeliveryError, DeliveryReport};
use parse_args::{AppArgs, Command, Verbosity};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

fn init_logging(verbosity: Verbosity) {
    let level = match verbosity {
        Verbosity::Quiet => LevelFilter::WARN,
        Verbosity::Verbose => LevelFilter::INFO,
        Verbosity::Debug => LevelFilter::DEBUG,
        Verbosity::Trace => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_program(input: &str) -> std::io::Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        std::fs::read_to_string(input)
    }
}

/// Follow a background delivery to completion, logging each acknowledged chunk.
fn follow<L>(handle: DeliveryHandle<L>) -> Result<DeliveryReport, DeliveryError> {
    for event in handle.events() {
        match event {
            DeliveryEvent::Progress(progress) => {
                if progress.state == ChunkState::Acked {
                    info!(
                        chunk = progress.chunk + 1,
                        total = progress.total_chunks,
                        sqn = progress.sequence,
                        attempt = progress.attempt,
                        "chunk acknowledged"
                    );
                }
            }
            DeliveryEvent::Finished(_) => break,
        }
    }
    handle.join()
}

fn run_send(args: &AppArgs, input: &str) -> ExitCode {
    let text = match read_program(input) {
        Ok(text) => text,
        Err(err) => {
            error!(input, error = %err, "cannot read program");
            return ExitCode::from(2);
        }
    };

    let payload = match args
        .delivery
        .validate()
        .and_then(|_| serialize_lines(text.lines()))
    {
        Ok(payload) => payload,
        Err(err) => {
            error!(error = %err, "program cannot be framed");
            return ExitCode::from(2);
        }
    };

    let result = if args.loopback {
        let responder = Responder::with_handler(args.delivery.address, Collector::default());
        follow(spawn_delivery_on(
            LoopbackLink::new(responder),
            payload,
            args.delivery.clone(),
        ))
    } else {
        let Some(port) = args.port.as_deref() else {
            eprintln!("Error: --port is required (or use --loopback)");
            return ExitCode::from(2);
        };
        match SerialLink::open(&SerialConfig::new(port, args.baud_rate)) {
            Ok(link) => follow(spawn_delivery_on(link, payload, args.delivery.clone())),
            Err(err) => Err(DeliveryError::Transport(err)),
        }
    };

    match result {
        Ok(report) => {
            println!(
                "delivered {} bytes in {} chunks ({} frames, {} retries)",
                report.bytes, report.chunks, report.frames_sent, report.retries
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_raw(args: &AppArgs, hex: &str) -> ExitCode {
    let bytes = match parse_hex(hex) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::from(2);
        }
    };
    let Some(port) = args.port.as_deref() else {
        eprintln!("Error: --port is required");
        return ExitCode::from(2);
    };

    match try_send_raw(&SerialConfig::new(port, args.baud_rate), &bytes) {
        Ok(()) => {
            println!("wrote {} raw bytes", bytes.len());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args = match parse_args::parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("Error: {err}. Try --help.");
            return ExitCode::from(2);
        }
    };

    init_logging(args.verbosity);

    match &args.command {
        Command::Send { input } => run_send(&args, input),
        Command::Raw { hex } => run_raw(&args, hex),
    }
}
