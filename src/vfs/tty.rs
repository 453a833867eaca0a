/*!
 * Controlling Terminal
 * Terminal endpoint object referenced by processes and descriptor slots
 */

use parking_lot::Mutex;
use std::sync::Arc;

/// A terminal endpoint.
///
/// The lifecycle core holds terminals only by reference: a process's
/// controlling-terminal field and any descriptor slots bound to the device.
/// Releasing the process-level reference early in `die()` is what lets a
/// paired pseudo-terminal master observe end-of-file instead of waiting on a
/// half-dead session leader.
#[derive(Debug)]
pub struct Terminal {
    name: String,
    output: Mutex<Vec<u8>>,
}

impl Terminal {
    pub fn new(name: impl Into<String>) -> Arc<Terminal> {
        Arc::new(Terminal {
            name: name.into(),
            output: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collect bytes written through a descriptor bound to this terminal.
    pub(crate) fn push_output(&self, buf: &[u8]) {
        self.output.lock().extend_from_slice(buf);
    }

    /// Drain collected output (test observation point).
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *self.output.lock())
    }
}
