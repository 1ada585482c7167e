// src/error.rs
use thiserror::Error;

/// Error taxonomy for the execution stack.
///
/// Connectivity problems are handled inside the stream client by the
/// reconnect supervisor and only surface once the client has been stopped.
/// Everything else is fatal to the single call that produced it.
#[derive(Debug, Error)]
pub enum ChaserError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("orderbook checksum mismatch for {market}: computed {computed}, server {expected}")]
    ProtocolIntegrity {
        market: String,
        computed: u32,
        expected: u32,
    },

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("size too small for {market}: {size} base units < min {min_size}")]
    SizeTooSmall {
        market: String,
        size: rust_decimal::Decimal,
        min_size: rust_decimal::Decimal,
    },

    #[error("no fills for {market}: session ended with full target unfilled")]
    NoFill { market: String },

    #[error("exchange rejected request: {0}")]
    Exchange(String),

    #[error("unknown market symbol format: {0}")]
    Symbol(String),

    #[error("malformed upstream message: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ChaserError>;
