// src/connectors/mod.rs
pub mod ftx;
pub mod messages;
pub mod stream;
pub mod traits;
