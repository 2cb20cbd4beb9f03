//! Autopilot - Autonomous Outreach Decision Engine
//!
//! Decides, per contact, whether and what automated action to take in a
//! messaging CRM:
//!
//! - **Compliance guard**: opt-in and 24h session window, re-checked at send time
//! - **Decision table**: analysis + hour of day to an outreach action
//! - **Retry scheduler**: cooldown and error backoff per contact
//! - **Conversion ledger**: revenue attribution deduplicated by order id
//! - **Smart time**: best hour and weekday from inbound history
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      AutopilotEngine                        │
//! │                                                             │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌────────────┐  │
//! │  │ Classify │──│  Decide  │──│ Comply   │──│  Dispatch  │  │
//! │  └──────────┘  └──────────┘  └──────────┘  └─────┬──────┘  │
//! │                                                   │         │
//! │  ┌──────────┐  ┌────────────┐             ┌──────▼──────┐  │
//! │  │  Retry   │  │ Conversion │────────────►│ EventLedger │  │
//! │  └──────────┘  └────────────┘             └─────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!        │ CrmStore / LedgerStore      │ JobQueue      │ Clock
//! ```

pub mod advice;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod conversion;
pub mod cycle;
pub mod decision;
pub mod dispatcher;
pub mod engine;
pub mod ledger;
pub mod queue;
pub mod retry;
pub mod smart_time;
pub mod store;
pub mod types;

// Re-export main types
pub use config::{RetryPolicy, RuntimeConfig};
pub use engine::{AutopilotBuilder, AutopilotEngine};
pub use types::*;
