// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Socket-facing glue between `cf-engine`'s pure state machines and real
//! infrastructure: TCP listeners, the `LocalFleetProvider`/`LocalObjectStore`
//! adapters, and process-wide tracing setup. `cf-cli` is the thin binary
//! entry point that picks a role and wires one of these up.

pub mod dispatcher;
pub mod fc;
pub mod logging;
pub mod transport;
pub mod worker;

pub use dispatcher::DispatcherDaemon;
pub use fc::FleetControllerDaemon;
pub use logging::init_logging;
pub use worker::WorkerDaemon;
