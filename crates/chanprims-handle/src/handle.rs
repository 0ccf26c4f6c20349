use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chanprims_transport::{ConnectionToken, DuplexChannel};
use tracing::{debug, trace, warn};

use crate::error::{HandleError, InvalidReason, Result};

const ACTIVE: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

/// Callback run once, at first disposal, with the channel still open.
///
/// Context the callback needs is captured by the closure.
pub type DisposalHook = Box<dyn FnOnce(&DuplexChannel) + Send + 'static>;

/// Lifecycle state of a [`Handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// The channel is open and usable.
    Active,
    /// A disposal is running its hook.
    Disposing,
    /// The channel has been released. Terminal.
    Disposed,
}

impl HandleState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            ACTIVE => HandleState::Active,
            DISPOSING => HandleState::Disposing,
            _ => HandleState::Disposed,
        }
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleState::Active => "active",
            HandleState::Disposing => "disposing",
            HandleState::Disposed => "disposed",
        })
    }
}

/// Owning wrapper around one channel end.
///
/// The handle's storage outlives disposal: after [`Handle::dispose`] the state
/// stays queryable, while every channel accessor reports
/// [`HandleError::InvalidHandle`]. Dropping the handle disposes it first if
/// nobody else has.
///
/// Accessors run against a shared reference to the channel taken out of the
/// slot, so the slot lock is never held across caller code. An operation
/// already in flight when the handle is disposed keeps the descriptor open
/// until it returns.
pub struct Handle {
    state: AtomicU8,
    channel: Mutex<Option<Arc<DuplexChannel>>>,
    hook: Mutex<Option<DisposalHook>>,
}

impl Handle {
    /// Wrap a channel in a new active handle with no hook.
    pub fn new(channel: DuplexChannel) -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
            channel: Mutex::new(Some(Arc::new(channel))),
            hook: Mutex::new(None),
        }
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == HandleState::Active
    }

    /// Register the disposal hook, replacing any previous one unrun.
    ///
    /// Returns `false` (and logs a warning) if the handle is no longer active.
    pub fn register_disposal_hook(&self, hook: DisposalHook) -> bool {
        let mut slot = lock(&self.hook);
        let state = self.state();
        if state != HandleState::Active {
            warn!(%state, "cannot set disposal hook on a channel handle that is not active");
            return false;
        }
        let previous = slot.replace(hook);
        drop(slot);
        if previous.is_some() {
            debug!("replaced pending disposal hook");
        }
        true
    }

    /// Tear the handle down. Safe to call any number of times from any thread.
    ///
    /// Only the call that wins `Active -> Disposing` does work: it runs the hook
    /// with the channel still open, marks the handle disposed, then releases the
    /// channel. Never waits for operations running in [`Handle::with_channel`].
    /// Returns whether this call was that winner.
    pub fn dispose(&self) -> bool {
        if self
            .state
            .compare_exchange(ACTIVE, DISPOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("channel handle already disposed");
            return false;
        }

        let channel = lock(&self.channel).take();
        let hook = lock(&self.hook).take();
        // Declared after `channel`, so it runs first: disposed is published before
        // the channel closes, and still published if the hook panics.
        let _mark = MarkDisposed(&self.state);

        if let Some(channel) = &channel {
            if let Some(hook) = hook {
                hook(&**channel);
            }
            debug!(name = channel.name(), token = %channel.token(), "disposed channel handle");
        }
        true
    }

    /// Run `f` against the channel while the handle is active.
    ///
    /// `f` runs without any handle lock held, so it may block or call back into
    /// the handle. A disposal that lands meanwhile does not wait for `f`; the
    /// descriptor is closed once `f` returns.
    pub fn with_channel<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&DuplexChannel) -> T,
    ) -> Result<T> {
        let channel = lock(&self.channel).clone();
        match channel {
            Some(channel) if self.is_active() => Ok(f(&*channel)),
            _ => Err(HandleError::invalid(
                operation,
                InvalidReason::State(self.state()),
            )),
        }
    }

    /// The channel name.
    pub fn name(&self) -> Result<String> {
        self.with_channel("get-name", |channel| channel.name().to_string())
    }

    /// The connection token; equal for both ends of a pair and for duplicates.
    pub fn connection_token(&self) -> Result<ConnectionToken> {
        self.with_channel("get-identity-token", DuplexChannel::token)
    }

    /// `(uid, gid, pid)` of the peer process, where the platform reports it.
    pub fn peer_credentials(&self) -> Result<Option<(u32, u32, u32)>> {
        self.with_channel("get-peer-credentials", DuplexChannel::peer_credentials)
    }

    /// A new active handle on a duplicated descriptor. Hooks are not copied.
    pub fn duplicate(&self) -> Result<Handle> {
        let channel = self
            .with_channel("duplicate", DuplexChannel::dup)?
            .map_err(HandleError::Duplication)?;
        Ok(Handle::new(channel))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_hook = lock(&self.hook).is_some();
        f.debug_struct("Handle")
            .field("state", &self.state())
            .field("has_hook", &has_hook)
            .finish()
    }
}

struct MarkDisposed<'a>(&'a AtomicU8);

impl Drop for MarkDisposed<'_> {
    fn drop(&mut self) {
        self.0.store(DISPOSED, Ordering::Release);
    }
}

/// Lock ignoring poisoning; the guarded slots hold no invariants a panic can break.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
