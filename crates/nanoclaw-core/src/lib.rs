//! # NanoClaw Core
//!
//! Core types, configuration and the upload strategy trait for the NanoClaw
//! L2 regional gateway.
//!
//! The gateway sits between many small edge nodes and one downstream
//! coordinator:
//!
//! ```text
//! ┌───────────┐     ┌─────────────────────────────┐     ┌─────────────┐
//! │ Edge nodes│────►│  NanoClaw gateway           │────►│ Coordinator │
//! │ (L0 / L1) │     │  buffer → batch → uploader  │     │    (L3)     │
//! └───────────┘     │            │       ▲        │     └─────────────┘
//!                   │            ▼       │        │
//!                   │       offline queue ┘       │
//!                   └─────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod reading;
pub mod uploader;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::metrics::*;
pub use crate::reading::*;
pub use crate::uploader::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{GatewayConfig, OverflowPolicy};
    pub use crate::error::{GatewayError, Result};
    pub use crate::reading::{Batch, Reading, ReadingInput};
    pub use crate::uploader::Uploader;
}
