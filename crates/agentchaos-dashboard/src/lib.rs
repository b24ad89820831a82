//! Real-time dashboard event stream
//!
//! In-process event broadcasting with best-effort WebSocket delivery, plus
//! HTTP endpoints that rebuild run summaries from persisted proxy logs.

pub mod broadcaster;
pub mod events;
pub mod history;
pub mod server;

pub use broadcaster::EventBroadcaster;
pub use events::DashboardEvent;
pub use history::{list_runs, run_events, run_summary, RunInfo, RunSummary};
pub use server::DashboardServer;
