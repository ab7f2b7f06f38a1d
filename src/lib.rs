//! Motion Alert Relay Library
//!
//! Consumes motion-detection alerts from a detection backend and keeps a
//! live/history view of them for a monitoring dashboard.
//!
//! ## Architecture
//!
//! 1. MotionAlert - Event channel, alert store, cooldown dismissal
//! 2. ControlClient - Detection control API adapter
//! 3. RealtimeHub - Dashboard WebSocket distribution
//! 4. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - One pipeline context per process, shared by handle
//! - Channel outages never surface as caller errors

pub mod control_client;
pub mod error;
pub mod models;
pub mod motion_alert;
pub mod realtime_hub;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use motion_alert::MotionAlertService;
pub use state::AppState;
