//! # DDL Ground Library
//!
//! Ground-station ingestion core for a flight computer's serial telemetry
//! downlink.
//!
//! This library frames and decodes comma-separated telemetry lines, accounts
//! packet loss from the remote counter, writes a CSV flight log plus a raw
//! line archive, fans events out to subscribers, and encodes uplink commands.
//! A dummy generator can stand in for the live link.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod persistence;
pub mod pipeline;
pub mod serial;
pub mod telemetry;
pub mod uplink;
