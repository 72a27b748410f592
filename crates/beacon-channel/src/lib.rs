// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Beacon telemetry SDK.
//!
//! [`Channel`] batches logs per group and hands them to ingestion,
//! [`SessionDecorator`] adds session correlation on top, and
//! [`Beacon::start`] wires everything from a [`BeaconConfig`].
//!
//! ```no_run
//! # async fn run() -> beacon_channel::Result<()> {
//! use beacon_channel::{Beacon, BeaconConfig};
//! use beacon_core::Properties;
//!
//! let beacon = Beacon::start(BeaconConfig::from_env()?).await?;
//! beacon
//! 	.track_event("app_opened", Properties::new().insert("cold", true))
//! 	.await?;
//! beacon.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod crash;
pub mod error;
pub mod listener;
pub mod logging;
pub mod sdk;
pub mod session;

pub use channel::Channel;
pub use config::{BeaconConfig, ConfigError, GroupSection};
pub use crash::{install_panic_hook, process_pending, CrashRecord};
pub use error::{ChannelError, Result};
pub use listener::{ChannelListener, GroupListener};
pub use sdk::{Beacon, BeaconHandle};
pub use session::{SessionDecorator, DEFAULT_SESSION_TIMEOUT};
