pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod providers;
pub mod server;
pub mod translate;
pub mod transport;

pub use config::RelayConfig;
pub use dispatch::{Relay, RelayContext};
pub use error::{RelayError, Result};
pub use jobs::{JobTracker, TrackerOptions};
pub use logging::SharedLogger;
pub use server::{build_router, AppState};
