//! Push gateway client boundary.
//!
//! Defines the [`PushGateway`] trait the dispatch engine sends through, the
//! structured [`GatewayError`] it classifies, and the production FCM-style
//! HTTP client implementation.

pub mod fcm;
pub mod gateway;

pub use fcm::{FcmClient, FcmConfig};
pub use gateway::{GatewayError, PushGateway};
