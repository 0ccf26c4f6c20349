use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chanprims_parcel::Parcel;
use chanprims_transport::{ChannelConfig, ConnectionToken};
use tracing::{debug, trace, warn};

use crate::codec::{read_handle, write_handle};
use crate::error::{HandleError, InvalidReason, Result};
use crate::handle::{lock, DisposalHook, Handle};
use crate::pair::open_pair_with_config;

/// Opaque reference to a handle in a [`HandleTable`].
///
/// `0` is reserved for "no handle" and is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HandleId(u64);

impl HandleId {
    pub const ABSENT: Self = Self(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn is_absent(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena of live handles addressed by [`HandleId`].
///
/// Lookups hand out `Arc<Handle>`, so a handle stays usable by a caller that
/// already resolved it even while another thread finalizes its id. Hooks and
/// channel teardown always run outside the table lock.
pub struct HandleTable {
    entries: Mutex<HashMap<HandleId, Arc<Handle>>>,
    next_id: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Take ownership of `handle` and issue a reference for it.
    pub fn insert(&self, handle: Handle) -> HandleId {
        let id = self.issue_id();
        lock(&self.entries).insert(id, Arc::new(handle));
        id
    }

    /// Resolve a reference. Absent and unknown references resolve to `None`.
    pub fn get(&self, id: HandleId) -> Option<Arc<Handle>> {
        if id.is_absent() {
            return None;
        }
        lock(&self.entries).get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a channel pair and register both ends.
    pub fn open_pair(&self, name: &str, config: &ChannelConfig) -> Result<(HandleId, HandleId)> {
        let (server, client) = open_pair_with_config(name, config)?;
        let server_id = self.issue_id();
        let client_id = self.issue_id();
        {
            let mut entries = lock(&self.entries);
            entries.insert(server_id, Arc::new(server));
            entries.insert(client_id, Arc::new(client));
        }
        debug!(%name, %server_id, %client_id, "registered channel pair");
        Ok((server_id, client_id))
    }

    /// Dispose the referenced handle. Absent, unknown and already disposed
    /// references are no-ops. Returns whether this call performed the teardown.
    pub fn dispose(&self, id: HandleId) -> bool {
        match self.get(id) {
            Some(handle) => handle.dispose(),
            None => {
                trace!(%id, "dispose of absent or unknown channel handle ignored");
                false
            }
        }
    }

    /// Dispose (if still active) and free the referenced handle's storage.
    ///
    /// Returns whether the reference was live. The id is never reissued.
    pub fn finalize(&self, id: HandleId) -> bool {
        if id.is_absent() {
            return false;
        }
        let removed = lock(&self.entries).remove(&id);
        match removed {
            Some(handle) => {
                handle.dispose();
                trace!(%id, "finalized channel handle");
                true
            }
            None => false,
        }
    }

    /// Serialize the referenced handle; `HandleId::ABSENT` writes the absent flag.
    pub fn write_to_parcel(&self, parcel: &mut Parcel, id: HandleId) -> Result<()> {
        if id.is_absent() {
            return write_handle(parcel, None);
        }
        let handle = self.resolve(id, "serialize")?;
        write_handle(parcel, Some(handle.as_ref()))
    }

    /// Deserialize a handle and register it. An absent field yields `HandleId::ABSENT`.
    pub fn read_from_parcel(&self, parcel: &mut Parcel) -> Result<HandleId> {
        match read_handle(parcel)? {
            Some(handle) => Ok(self.insert(handle)),
            None => Ok(HandleId::ABSENT),
        }
    }

    /// Channel name, or `None` for the absent reference.
    pub fn name(&self, id: HandleId) -> Result<Option<String>> {
        if id.is_absent() {
            return Ok(None);
        }
        self.resolve(id, "get-name")?.name().map(Some)
    }

    /// Connection token, or `None` for the absent reference.
    pub fn connection_token(&self, id: HandleId) -> Result<Option<ConnectionToken>> {
        if id.is_absent() {
            return Ok(None);
        }
        self.resolve(id, "get-identity-token")?
            .connection_token()
            .map(Some)
    }

    /// Duplicate the referenced handle and register the copy.
    pub fn duplicate(&self, id: HandleId) -> Result<HandleId> {
        let copy = self.resolve(id, "duplicate")?.duplicate()?;
        Ok(self.insert(copy))
    }

    /// Register a disposal hook on the referenced handle.
    ///
    /// Absent or unknown references are a logged no-op returning `false`.
    pub fn register_disposal_hook(&self, id: HandleId, hook: DisposalHook) -> bool {
        match self.get(id) {
            Some(handle) => handle.register_disposal_hook(hook),
            None => {
                warn!(%id, "cannot set disposal hook because channel handle has not been initialized");
                false
            }
        }
    }

    fn resolve(&self, id: HandleId, operation: &'static str) -> Result<Arc<Handle>> {
        if id.is_absent() {
            return Err(HandleError::invalid(operation, InvalidReason::Absent));
        }
        self.get(id)
            .ok_or_else(|| HandleError::invalid(operation, InvalidReason::Unknown(id.as_raw())))
    }

    fn issue_id(&self) -> HandleId {
        HandleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.len())
            .finish()
    }
}
