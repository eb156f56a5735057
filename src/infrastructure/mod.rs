//! Infrastructure module - browser, persistence and runtime support
//!
//! Everything that touches the outside world: the Chromium session
//! manager, the Supabase persistence gateway, configuration loading,
//! logging setup and the bounded polling combinator.

pub mod config;
pub mod errors;
pub mod logging;
pub mod persistence;
pub mod retry;
pub mod session;

pub use config::AppConfig;
pub use errors::{HandlerResult, ScrapeError};
pub use persistence::PersistenceGateway;
pub use session::SessionManager;
