//! Client library for the Orbit telemetry UI: one live WebSocket channel to
//! the backend, loosely-typed JSON events decoded into a closed set of typed
//! variants, and fan-out to registered observers with fixed-delay reconnect.

pub mod client;
pub mod history;
pub mod observer;
pub mod profiles;
pub mod protocol;
pub mod state;

pub use client::{ClientConfig, ClientError, TelemetryClient};
pub use observer::{SubscriptionId, TelemetryObserver};
pub use protocol::{InboundEvent, OutboundCommand};
pub use state::{ConnectionState, TelemetrySnapshot};
