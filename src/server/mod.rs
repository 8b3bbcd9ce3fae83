//! Client-facing HTTP endpoints
//!
//! - `GET /signallingserver` - allocation query (JSON)
//! - `GET /` and `GET /custom_html/{file}` - redirect to an idle render node
//! - `GET /health`, `GET /status`

pub mod handlers;
pub mod https;
pub mod state;

pub use handlers::{create_router, SignallingServerResponse, NO_SERVERS_AVAILABLE};
pub use state::AppState;
