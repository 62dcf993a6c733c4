//! # tracewatch-core
//!
//! Core library for tracewatch - a live diagnostic console for request and
//! task tracing.
//!
//! This library provides:
//! - Domain types for traces, tasks and filters
//! - A reconnecting, heartbeated duplex channel over WebSocket
//! - Stream reconstruction of flat trace batches into a call tree
//! - Category/text filtering with duration-scale computation
//! - Sampling-session lifecycle and live task reconciliation
//!
//! ## Architecture
//!
//! One [`SessionController`] owns one duplex channel and the trace tree
//! accumulated over it. Batches arrive flat and possibly out of structural
//! order; the reconstructor attaches records by identity lookup, so a parent
//! already committed to the tree picks up children from later batches. The
//! view layer polls [`SessionController::next_update`] and renders from the
//! returned snapshots; rendering itself lives outside this crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tracewatch_core::{Config, SessionController, WsConnector};
//!
//! # async fn run() -> tracewatch_core::Result<()> {
//! let config = Config::load()?;
//! let connector = WsConnector::new(config.server.sampling_url()?)
//!     .with_subprotocol(config.server.subprotocol.clone());
//! let mut session = SessionController::new(connector, config.channel.timing());
//! session.start()?;
//! while let Some(_update) = session.next_update().await {
//!     // re-render from session.roots() / session.filtered(...)
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use channel::{ChannelEvent, ChannelTiming, Connection, Connector, DuplexChannel, Incoming};
pub use config::Config;
pub use error::{Error, Result};
pub use filter::{duration_scale, filter_roots, FilterResult, FilterSpec, TraceCategory};
pub use protocol::{ClientMessage, ServerMessage};
pub use rate::{RequestMonitor, RequestRateWindow};
pub use reconstruct::TraceStore;
pub use session::{BatchOutcome, SamplingState, SessionController, SessionUpdate};
pub use task::TaskTracker;
pub use types::*;
pub use ws::WsConnector;

// Public modules
pub mod channel;
pub mod config;
pub mod error;
pub mod filter;
pub mod format;
pub mod logging;
pub mod protocol;
pub mod rate;
pub mod reconstruct;
pub mod session;
pub mod task;
pub mod types;
pub mod ws;
