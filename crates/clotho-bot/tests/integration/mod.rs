//! Integration tests for clotho-bot.
//!
//! The engine runs against `MockExchange` and an in-process realtime server:
//! - startup cleanup and session handshake
//! - trade ticks driving ladder rebuilds
//! - position frames driving the risk manager
//! - supervisor fail-safe and graceful shutdown

pub mod common;
