// Library Crate Root
//
// FIX 4.4 quote ingestion, tick storage and websocket distribution.
// main.rs wires these together; tests and tools use them through this crate root.
pub mod api;
pub mod config;
pub mod error;
pub mod fix;
pub mod hub;
pub mod pipeline;
pub mod tickstore;

pub use api::{create_router, AppState};
pub use config::AppConfig;
pub use error::{HubError, SessionError, StoreError};
pub use fix::{SessionManager, SessionState};
pub use hub::{Hub, StaticTokenValidator};
pub use pipeline::Pipeline;
pub use tickstore::{Tick, TickStore};
