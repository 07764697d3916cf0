//! # relay-engine
//!
//! The running lap counter: tasks and the channels between them.
//!
//! ## Architecture
//!
//! ```text
//! sensor ──ws /laps──► ingest task ─┐
//! sensor ──ws /laps──► ingest task ─┼─► intake (mpsc) ─► LapProcessor ─► NotificationHub ─► queue ─► notify task ──ws /notify──► display
//!                                   │                      │   │  ▲                          └──► queue ─► notify task ──ws /notify──► display
//!                                   │                      │   │  └── hour (watch) ◄── HourTicker
//!                                   │                      │   └────► Journal (file)
//!                                   │                      └──► standings (watch) ─► standings task ──ws /standings──► display
//! ```
//!
//! - [`processor`]: the single writer of the registry and journal
//! - [`hub`]: subscriber set and fan-out with per-subscriber queues
//! - [`ticker`]: event hour source
//! - [`gateway`]: websocket ingest / notify / standings adapters
//! - [`roster`]: CSV roster import
//! - [`service`]: wiring, startup and ordered shutdown

pub mod gateway;
pub mod hub;
pub mod processor;
pub mod roster;
pub mod service;
pub mod ticker;

use tokio::sync::watch;

/// Shutdown signal shared by every task. `true` means stop.
pub type ShutdownReceiver = watch::Receiver<bool>;
