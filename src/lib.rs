//! # ai-service-client
//!
//! HTTP transport for an AI service REST API: authenticated requests, retry
//! with exponential backoff, uniform error classification, and incremental
//! consumption of server-sent-event streams.
//!
//! Resource-specific builders (chat, images, audio, embeddings, account, ...)
//! sit on top of the four primitives exposed by [`HttpClient`]: `get`, `post`,
//! `stream` and the raw `request`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_service_client::{Config, HttpClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ai_service_client::Error> {
//!     let client = HttpClient::new(Config::new("https://api.example.com/v1", "sk-...")?)?;
//!
//!     let models = client.get("models").await?.json_value()?;
//!     println!("{models}");
//!
//!     let reply = client
//!         .post("chat/completions", json!({"model": "m", "messages": []}))
//!         .await?;
//!     println!("{}", reply.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```rust,no_run
//! use ai_service_client::{HttpClient, data_payload};
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ai_service_client::Error> {
//!     let client = HttpClient::from_env()?;
//!     let mut events = client
//!         .stream("chat/completions", json!({"model": "m", "stream": true}))
//!         .await?;
//!     while let Some(event) = events.next().await {
//!         println!("{}", data_payload(&event?));
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod error;

pub use client::{
    Config, ConfigBuilder, EventStream, HttpClient, LineOutcome, NetworkConfig, PoolConfig,
    ProxyConfig, RawResponse, RequestOptions, RetryDecision, RetryPolicy, TransportCache,
    data_payload, decode_line,
};
pub use error::{CHARACTER_NOT_FOUND, Error, ErrorBody, ErrorKind, MODEL_NOT_FOUND, classify};

pub type Result<T> = std::result::Result<T, Error>;
