//! Exchange access for the Clotho engine.
//!
//! - `signer`: HMAC-SHA256 request and WebSocket challenge signing
//! - `nonce`: strictly increasing millisecond nonces shared by REST and WS auth
//! - `wire`: exchange DTOs and the order-placement field derivation
//! - `client`: signed REST client (`RestClient`)
//! - `api`: the `ExchangeApi` seam consumed by the strategy, plus `MockExchange`

pub mod api;
pub mod client;
pub mod error;
pub mod nonce;
pub mod signer;
pub mod wire;

pub use api::{
    BoxFuture, DynExchangeApi, ExchangeApi, MockExchange, OpenOrder, OrderRef, PlacedCall,
};
pub use client::{RestClient, API_PREFIX, ORDER_PAGE_SIZE};
pub use error::{ApiError, ApiResult};
pub use nonce::{Clock, NonceManager, SystemClock};
pub use signer::{Credentials, SignedHeaders, Signer};
pub use wire::OrderForm;
