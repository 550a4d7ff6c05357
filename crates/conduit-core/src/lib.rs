//! Core traits and types for conduit connectors.
//!
//! This crate defines the boundary between a host application and the
//! connectors it loads:
//!
//! ```text
//! Host                      conduit-core                    Connector
//! ┌──────────────┐  config  ┌─────────────────────┐  impl   ┌──────────────┐
//! │  Registry    │─────────▶│  TriggerFactory     │◀────────│  MQTT        │
//! │  Handlers    │◀─────────│  Trigger / Handler  │         │  trigger     │
//! │  Flow engine │─────────▶│  Activity           │◀────────│  activity    │
//! │  Pool        │─────────▶│  ConnectionManager  │         │              │
//! └──────────────┘          └─────────────────────┘         └──────────────┘
//! ```

pub mod activity;
pub mod coerce;
pub mod connection;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod registry;
pub mod trigger;

pub use activity::{Activity, ActivityConfig, ActivityContext, ActivityFactory};
pub use coerce::Attrs;
pub use connection::{ConnectionManager, PooledConnection, SharedConnection};
pub use error::{ActivityError, CoerceError, HandlerError, TriggerError};
pub use metadata::{DataType, Field, Metadata};
pub use registry::{ConnectorRegistry, RegistryError};
pub use trigger::{
    DynHandler, FnHandler, Handler, HandlerConfig, Trigger, TriggerConfig, TriggerFactory,
    TriggerState,
};
