//! Serial transport: chunking, acknowledged delivery and raw passthrough

pub mod chunker;
mod delivery;
mod link;
mod raw;
mod responder;
mod session;

pub use chunker::{DEFAULT_CHUNK_SIZE, checked_chunk_size, chunk, chunk_count, serialize_lines};
pub use delivery::{
    ChunkState, DEFAULT_INTER_CHUNK_DELAY, DEFAULT_RETRIES, DEFAULT_RETRY_BACKOFF, DeliveryConfig,
    DeliveryEngine, DeliveryError, DeliveryReport, ErrorClass, OperationState, Progress,
    Recoverable, ResponseOutcome,
};
pub use link::{DEFAULT_PORT_TIMEOUT, LinkKiller, SerialConfig, SerialLink, SharedLink};
pub use raw::{RAW_SETTLE_DELAY, RawInput, parse_hex, write_raw};
pub use responder::{AcceptAll, Collector, LoopbackLink, PayloadHandler, Responder};
pub use session::{
    DeliveryEvent, DeliveryHandle, send_command_lines, send_raw, spawn_delivery,
    spawn_delivery_on, try_send_command_lines, try_send_raw,
};
