// cancel.rs - Cooperative cancellation shared by the dispatcher, workers and their children

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{Result, SqmError};

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    /// Registration id -> pid of a running child (leader of its own process group)
    children: Mutex<HashMap<u64, u32>>,
}

/// Cancellation flag plus the set of child processes to terminate when it trips.
///
/// Cloning is cheap; all clones observe the same state. Once cancelled a token
/// stays cancelled.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Trip the token and terminate every registered child process group.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let children = self.children();
        debug!(n = children.len(), "cancelling running children");
        for &pid in children.values() {
            terminate_group(pid);
        }
    }

    /// Track a freshly spawned child until the returned guard is dropped.
    ///
    /// The flag is checked under the registry lock, so a child registered
    /// concurrently with `cancel` is always terminated by one side or the other.
    pub fn register_child(&self, pid: u32) -> ChildRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut children = self.children();
        if self.is_cancelled() {
            terminate_group(pid);
        }
        children.insert(id, pid);
        ChildRegistration { token: self.clone(), id }
    }

    /// `Err(Cancelled)` once the token has tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SqmError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn children(&self) -> MutexGuard<'_, HashMap<u64, u32>> {
        self.inner.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a child from the cancel registry on drop.
#[must_use]
pub struct ChildRegistration {
    token: CancelToken,
    id: u64,
}

impl Drop for ChildRegistration {
    fn drop(&mut self) {
        self.token.children().remove(&self.id);
    }
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    // Children are spawned with process_group(0), so their pgid equals their pid.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid, "killpg failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn terminate_group(pid: u32) {
    warn!(pid, "process-group termination is not supported on this platform");
}

static INTERRUPT: Mutex<Option<CancelToken>> = Mutex::new(None);

/// Route SIGINT/SIGTERM to a process-wide token and return it.
///
/// Idempotent: later calls return the token installed by the first one.
pub fn install_interrupt_handler() -> Result<CancelToken> {
    let mut slot = INTERRUPT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(token) = slot.as_ref() {
        return Ok(token.clone());
    }
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, stopping child processes");
        handler_token.cancel();
    })
    .map_err(|e| SqmError::Runtime(format!("cannot install interrupt handler: {e}")))?;
    *slot = Some(token.clone());
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(a.check().is_ok());
        b.cancel();
        assert!(a.is_cancelled());
        assert!(matches!(a.check(), Err(SqmError::Cancelled)));
    }

    #[test]
    fn registrations_are_dropped() {
        let token = CancelToken::new();
        {
            let _r = token.register_child(u32::MAX);
            assert_eq!(token.children().len(), 1);
        }
        assert!(token.children().is_empty());
    }
}
