//! # sara-client
//!
//! Async clients for the SARA instrument servers.
//!
//! This crate provides:
//! - Endpoint resolution from site aliases and instrument roles
//! - A synchronous request/reply engine with echo and CRC checks
//! - Typed clients for the camera, LasGo stage (struct and text
//!   protocols), spectrometer and focus module
//! - Device sessions that sequence multi-call workflows

pub mod address;
pub mod camera;
pub mod connection;
pub mod error;
pub mod focus;
pub mod lasgo;
pub mod lasgo_text;
pub mod rpc;
pub mod session;
pub mod spectrometer;

#[cfg(test)]
mod testing;

pub use address::{Endpoint, Role, DEFAULT_ALIAS};
pub use camera::{AppliedTrigger, CameraClient, DEFAULT_CAMERA_ID};
pub use connection::{Connection, ConnectionConfig, Transport};
pub use error::{ClientError, DeviceError};
pub use focus::FocusClient;
pub use lasgo::{LasgoClient, OriginRef};
pub use lasgo_text::{LasgoTextClient, TextOrigin};
pub use rpc::{Reply, Request, RpcEngine};
pub use session::{FixedRecovery, Recovery, RecoveryAction};
pub use spectrometer::SpectrometerClient;
