//! Единый слой коннекторов к REST API социальных и контент-платформ

pub mod api;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod oauth;
pub mod ratelimit;
pub mod wait;

pub use api::{create_connector, Connector};
pub use config::{ConnectorSettings, Platform};
pub use error::{ConnectorError, ConnectorResult};
pub use models::{
    MediaItem, Options, Outcome, PostContent, Profile, TokenEnvelope, Unsupported, WriteResult,
};
pub use ratelimit::RateLimitState;
