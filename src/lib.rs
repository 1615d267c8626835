// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # leolani
//!
//! Event-driven coordination core of the Leolani conversational agent.
//!
//! ## Architecture
//!
//! - **Bus** (`bus`): topic publish/subscribe with per-component workers,
//!   scheduled ticks, and intention gating
//! - **Intentions** (`bdi`): belief-desire-intention state machine over a
//!   configurable transition table
//! - **Context** (`context`): the active scenario, its speaker, persons, and
//!   objects, plus geolocation at scenario start
//! - **Identity** (`friends`, `idresolution`): face id to friend registry and
//!   `owl:sameAs` reconciliation
//! - **Conversation** (`intentions`, `keyword`, `reply`): greeting handshake,
//!   chat start, goodbye detection, and replies
//! - **Perception** (`objectloc`): reports objects seen in recent images
//! - **Monitoring** (`monitoring`): latest text and image, optionally over HTTP
//!
//! ## Library usage
//!
//! ```no_run
//! use leolani::app::Application;
//! use leolani::config::LeolaniConfig;
//!
//! # async fn run() -> leolani::error::LeolaniResult<()> {
//! let app = Application::start(LeolaniConfig::default()).await?;
//! // ... publish perception events on app.bus() ...
//! app.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod bdi;
pub mod bus;
pub mod capsule;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod friends;
pub mod idresolution;
pub mod intentions;
pub mod keyword;
pub mod monitoring;
pub mod objectloc;
pub mod paths;
pub mod reply;
pub mod sentences;
