//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Init logging → ConfigService::bootstrap → watcher + token renewal tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal or fatal task error → Shutdown::trigger → tasks leave their loops
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
