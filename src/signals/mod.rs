/*!
 * Signals Module
 * Signal numbers and process-directed routing
 */

pub mod router;
pub mod types;

// Re-export public API
pub use router::SignalRouter;
pub use types::Signal;
