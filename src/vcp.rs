//! Volume Control Profile engine ([VCP]).
//!
//! A [`Context`] owns the database bindings, the active sessions, and the
//! attach/detach observers. Each accessory [`Db`] registered with the context
//! gets a [`Binding`] exposing the Volume Control Service ([VCS]) and an
//! included Volume Offset Control Service ([VOCS]). Sessions tie a connection
//! to the accessory binding it is served by and, optionally, to a peer
//! database whose volume services are discovered and observed.
//!
//! [VCP]: https://www.bluetooth.com/specifications/specs/volume-control-profile-1-0/
//! [VCS]: https://www.bluetooth.com/specifications/specs/volume-control-service-1-0/
//! [VOCS]: https://www.bluetooth.com/specifications/specs/volume-offset-control-service-1-0/

use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

pub use {
    binding::*, consts::*, remote::RemoteState, session::*, vcs::VolumeState,
    vocs::VolumeOffsetState,
};

use crate::att::Bearer;
use crate::gatt::Db;
use crate::{name_of, SyncMutex};

mod binding;
mod consts;
mod cp;
mod pending;
mod remote;
mod session;
mod vcs;
mod vocs;

#[cfg(test)]
mod tests;

/// Error type returned by session operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("session already has a client")]
    AlreadyAttached,
    #[error("failed to clone client")]
    ClientClone,
    #[error("session has no remote database")]
    NoRemoteDb,
    #[error("volume control context closed")]
    ContextClosed,
}

/// Common VCP result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Attach/detach observer registration identifier.
pub type CallbackId = NonZeroU32;

/// Session observer callback.
pub type SessionFn = Arc<dyn Fn(&Session) + Send + Sync>;

/// Accessory configuration applied to every new [`Binding`].
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    /// Relative volume step size.
    pub step: u8,
    /// Initial volume setting.
    pub volume: u8,
    /// Initial mute state.
    pub mute: bool,
    /// Initial volume flag.
    pub flag: VolumeFlag,
    /// Audio location of the output.
    pub location: AudioLocation,
    /// Audio output description.
    pub description: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            step: 1,
            volume: 0,
            mute: false,
            flag: VolumeFlag::UserSet,
            location: AudioLocation::FRONT_LEFT,
            description: "Left Speaker".to_owned(),
        }
    }
}

/// Implements `with_<x>` methods for [`Config`] fields.
macro_rules! with {
    ($($(#[$doc:meta])* $f:ident: $t:ty),*$(,)?) => {$(::paste::paste! {
        $(#[$doc])*
        #[inline(always)]
        #[must_use]
        pub fn [<with_ $f>](mut self, v: $t) -> Self {
            self.$f = v;
            self
        }
    })*}
}

impl Config {
    /// Creates the default accessory configuration.
    #[inline(always)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    with! {
        /// Sets relative volume step size.
        step: u8,
        /// Sets initial volume setting.
        volume: u8,
        /// Sets initial mute state.
        mute: bool,
        /// Sets initial volume flag.
        flag: VolumeFlag,
        /// Sets audio location.
        location: AudioLocation,
    }

    /// Sets audio output description.
    #[inline(always)]
    #[must_use]
    pub fn with_description(mut self, v: impl AsRef<str>) -> Self {
        self.description = v.as_ref().to_owned();
        self
    }

    /// Parses a JSON configuration. Missing fields keep their defaults.
    #[cfg(feature = "json")]
    #[inline]
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Volume control context. Owns the accessory database bindings, the
/// registry of active sessions, and the attach/detach observers.
#[derive(Clone)]
#[repr(transparent)]
pub struct Context(Arc<CtxInner>);

pub(crate) struct CtxInner {
    cfg: Config,
    dbs: SyncMutex<Vec<Arc<Binding>>>,
    sessions: SyncMutex<Vec<Arc<session::Inner>>>,
    cbs: SyncMutex<Vec<Callbacks>>,
    next_cb: AtomicU32,
}

struct Callbacks {
    id: CallbackId,
    attached: Option<SessionFn>,
    detached: Option<SessionFn>,
}

impl Context {
    /// Creates a new context.
    #[must_use]
    pub fn new(cfg: Config) -> Self {
        Self(Arc::new(CtxInner {
            cfg,
            dbs: SyncMutex::default(),
            sessions: SyncMutex::default(),
            cbs: SyncMutex::default(),
            next_cb: AtomicU32::new(0),
        }))
    }

    /// Returns the context configuration.
    #[inline(always)]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.0.cfg
    }

    /// Registers an accessory database, defining the volume services on it.
    /// Returns the existing binding if `db` is already registered.
    pub fn add_db(&self, db: &Arc<Db>) -> Arc<Binding> {
        let mut dbs = self.0.dbs.lock();
        if let Some(b) = dbs.iter().find(|b| Arc::ptr_eq(b.db(), db)) {
            return Arc::clone(b);
        }
        let b = Binding::new(db, &Arc::downgrade(&self.0), &self.0.cfg);
        dbs.push(Arc::clone(&b));
        b
    }

    /// Returns the binding of a registered accessory database.
    #[must_use]
    pub fn binding(&self, db: &Arc<Db>) -> Option<Arc<Binding>> {
        let dbs = self.0.dbs.lock();
        dbs.iter().find(|b| Arc::ptr_eq(b.db(), db)).map(Arc::clone)
    }

    /// Unregisters an accessory database and drops its volume state. Returns
    /// whether the database was registered.
    pub fn remove_db(&self, db: &Arc<Db>) -> bool {
        let b = {
            let mut dbs = self.0.dbs.lock();
            let Some(i) = dbs.iter().position(|b| Arc::ptr_eq(b.db(), db)) else {
                return false;
            };
            dbs.remove(i)
        };
        b.clear();
        true
    }

    /// Creates a new session served by the accessory database `ldb` and,
    /// optionally, observing the peer database `rdb`. The session is not
    /// registered until it is attached.
    #[must_use]
    pub fn session(&self, ldb: &Arc<Db>, rdb: Option<&Arc<Db>>) -> Session {
        Session::new(&self.0, self.add_db(ldb), rdb.map(Arc::clone))
    }

    /// Registers session attach and detach observers. Returns [`None`] if
    /// both are absent.
    pub fn register(
        &self,
        attached: Option<SessionFn>,
        detached: Option<SessionFn>,
    ) -> Option<CallbackId> {
        if attached.is_none() && detached.is_none() {
            return None;
        }
        let id = crate::next_id(&self.0.next_cb);
        self.0.cbs.lock().push(Callbacks {
            id,
            attached,
            detached,
        });
        Some(id)
    }

    /// Removes session observers. Returns whether `id` was registered.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut cbs = self.0.cbs.lock();
        let Some(i) = cbs.iter().position(|cb| cb.id == id) else {
            return false;
        };
        cbs.remove(i);
        true
    }

    /// Returns all registered sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        let ss = self.0.sessions.lock();
        ss.iter().filter_map(Session::upgrade).collect()
    }

    /// Returns the session of the connection that issued a request against
    /// the accessory binding `b`, creating and attaching one if necessary.
    pub(crate) fn resolve(&self, br: &Arc<Bearer>, b: &Arc<Binding>) -> Session {
        let found = {
            let ss = self.0.sessions.lock();
            (ss.iter())
                .filter(|s| s.conn_id() == Some(br.id()))
                .find_map(Session::upgrade)
        };
        if let Some(s) = found {
            return s;
        }
        let s = Session::new(&self.0, Arc::clone(b), None);
        s.bind(br);
        if let Err(e) = s.attach(None) {
            warn!("Failed to attach {s:?}: {e}");
        }
        s
    }

    /// Returns a context handle from a weak reference.
    #[inline]
    pub(crate) fn upgrade(w: &Weak<CtxInner>) -> Option<Self> {
        w.upgrade().map(Self)
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(name_of!(Context))
            .field("dbs", &self.0.dbs.lock().len())
            .field("sessions", &self.0.sessions.lock().len())
            .field("cbs", &self.0.cbs.lock().len())
            .finish_non_exhaustive()
    }
}

impl CtxInner {
    /// Adds a session to the registry. Returns whether it was newly added.
    fn insert_session(&self, s: &Arc<session::Inner>) -> bool {
        let mut ss = self.sessions.lock();
        if ss.iter().any(|v| Arc::ptr_eq(v, s)) {
            return false;
        }
        ss.push(Arc::clone(s));
        true
    }

    /// Removes a session from the registry. Returns whether it was present.
    fn remove_session(&self, s: &Arc<session::Inner>) -> bool {
        let mut ss = self.sessions.lock();
        let Some(i) = ss.iter().position(|v| Arc::ptr_eq(v, s)) else {
            return false;
        };
        ss.remove(i);
        true
    }

    /// Calls every attached or detached observer with `s`.
    fn notify(&self, s: &Session, attached: bool) {
        let fns: Vec<SessionFn> = (self.cbs.lock().iter())
            .filter_map(|cb| {
                if attached {
                    cb.attached.clone()
                } else {
                    cb.detached.clone()
                }
            })
            .collect();
        debug!(
            "{s:?} {} ({} observers)",
            if attached { "attached" } else { "detached" },
            fns.len()
        );
        for f in fns {
            f(s);
        }
    }
}
