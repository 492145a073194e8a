use std::any::Any;
use std::fmt::{Arguments, Debug, Formatter};
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::{debug, error};

use burble_const::Characteristic;

use crate::att::{Bearer, ConnId, ErrorCode, Handle};
use crate::gatt::{Client, Db};
use crate::{name_of, SyncMutex};

use super::pending::{NotifyFn, ReadFn, Tracker};
use super::remote::{Bound, RemoteState};
use super::{Binding, Context, CtxInner, Error, Result};

/// Session debug message sink.
pub type DebugFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Application data attached to a session.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Volume control session. A session is served by an accessory [`Binding`]
/// and may observe the volume services of a peer database through a GATT
/// [`Client`].
///
/// Session handles are reference counted. The registry of attached sessions
/// does not keep a session alive: when the last handle is dropped, the session
/// is detached and its remote operations are released. Sessions created for
/// an inbound connection are kept alive by the disconnect callback of that
/// connection.
#[repr(transparent)]
pub struct Session(Arc<Inner>);

pub(crate) struct Inner {
    id: u64,
    refs: AtomicUsize,
    ctx: Weak<CtxInner>,
    local: Arc<Binding>,
    remote: Option<Arc<Db>>,
    st: SyncMutex<State>,
    remote_tx: watch::Sender<RemoteState>,
    debug: SyncMutex<Option<DebugFn>>,
    user_data: SyncMutex<Option<UserData>>,
}

#[derive(Debug, Default)]
struct State {
    br: Option<Arc<Bearer>>,
    client: Option<Arc<dyn Client>>,
    ops: Tracker,
    bound: Bound,
}

impl Session {
    /// Creates a new unregistered session.
    pub(super) fn new(ctx: &Arc<CtxInner>, local: Arc<Binding>, remote: Option<Arc<Db>>) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let s = Self(Arc::new(Inner {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            refs: AtomicUsize::new(1),
            ctx: Arc::downgrade(ctx),
            local,
            remote,
            st: SyncMutex::default(),
            remote_tx: watch::channel(RemoteState::default()).0,
            debug: SyncMutex::default(),
            user_data: SyncMutex::default(),
        }));
        debug!("{s:?} created");
        s
    }

    /// Returns a new handle to a session that has not been dropped.
    pub(super) fn upgrade(inner: &Arc<Inner>) -> Option<Self> {
        let mut n = inner.refs.load(Ordering::Relaxed);
        loop {
            if n == 0 {
                return None;
            }
            match (inner.refs).compare_exchange_weak(n, n + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return Some(Self(Arc::clone(inner))),
                Err(v) => n = v,
            }
        }
    }

    /// Registers the session and, if a client is provided, discovers the
    /// volume services of the remote database. Observers are notified when
    /// the session is first registered. A session that fails to attach its
    /// client remains registered.
    pub fn attach(&self, client: Option<&Arc<dyn Client>>) -> Result<()> {
        let ctx = Context::upgrade(&self.0.ctx).ok_or(Error::ContextClosed)?;
        if ctx.0.insert_session(&self.0) {
            ctx.0.notify(self, true);
        }
        let Some(client) = client else {
            return Ok(());
        };
        if self.0.remote.is_none() {
            return Err(Error::NoRemoteDb);
        }
        if self.0.st.lock().client.is_some() {
            return Err(Error::AlreadyAttached);
        }
        let Some(client) = client.try_clone() else {
            self.log(format_args!("Failed to clone client"));
            return Err(Error::ClientClone);
        };
        {
            let mut st = self.0.st.lock();
            if st.client.is_some() {
                return Err(Error::AlreadyAttached);
            }
            st.client = Some(client);
        }
        self.discover();
        Ok(())
    }

    /// Unregisters the session, releases its client, and notifies observers.
    /// Does nothing if the session is not registered.
    pub fn detach(&self) {
        let Some(ctx) = Context::upgrade(&self.0.ctx) else {
            return;
        };
        if !ctx.0.remove_session(&self.0) {
            return;
        }
        self.release();
        ctx.0.notify(self, false);
    }

    /// Returns whether the session is registered.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        Context::upgrade(&self.0.ctx).map_or(false, |ctx| {
            (ctx.0.sessions.lock().iter()).any(|s| Arc::ptr_eq(s, &self.0))
        })
    }

    /// Returns the bearer of the connection that the session is bound to or,
    /// if there isn't one, the bearer of its client.
    #[must_use]
    pub fn bearer(&self) -> Option<Arc<Bearer>> {
        self.0.bearer()
    }

    /// Returns the accessory binding that serves the session.
    #[inline(always)]
    #[must_use]
    pub fn local(&self) -> &Arc<Binding> {
        &self.0.local
    }

    /// Returns the remote database.
    #[inline(always)]
    #[must_use]
    pub fn remote_db(&self) -> Option<&Arc<Db>> {
        self.0.remote.as_ref()
    }

    /// Returns a receiver of the volume state observed on the remote database.
    #[must_use]
    pub fn remote_state(&self) -> watch::Receiver<RemoteState> {
        self.0.remote_tx.subscribe()
    }

    /// Sets or removes the debug message sink.
    pub fn set_debug(&self, f: Option<DebugFn>) {
        *self.0.debug.lock() = f;
    }

    /// Sets or removes application data.
    pub fn set_user_data(&self, v: Option<UserData>) {
        *self.0.user_data.lock() = v;
    }

    /// Returns application data.
    #[must_use]
    pub fn user_data(&self) -> Option<UserData> {
        self.0.user_data.lock().as_ref().map(Arc::clone)
    }

    /// Returns whether two handles refer to the same session.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Binds the session to a connection. The session is detached when the
    /// connection is closed.
    pub(super) fn bind(&self, br: &Arc<Bearer>) {
        let s = self.clone();
        if br
            .on_disconnect(move || {
                s.log(format_args!("Disconnected"));
                s.detach();
            })
            .is_none()
        {
            self.log(format_args!("Bound to a closed connection"));
        }
        self.0.st.lock().br = Some(Arc::clone(br));
    }

    /// Reads a remote characteristic value, calling `func` on completion.
    pub(super) fn read_value(&self, vhdl: Handle, chr: Characteristic, func: ReadFn) {
        let Some(client) = self.client() else { return };
        let id = self.0.st.lock().ops.add_read(vhdl, chr, func);
        let w = Arc::downgrade(&self.0);
        let req = client.read_value(
            vhdl,
            Box::new(move |r: std::result::Result<&[u8], ErrorCode>| {
                let Some(s) = w.upgrade().as_ref().and_then(Self::upgrade) else {
                    return;
                };
                let op = s.0.st.lock().ops.take_read(id);
                if let Some(op) = op {
                    (op.func)(&s, op.chr, r);
                }
            }),
        );
        let mut st = self.0.st.lock();
        if let Some(req) = req {
            st.ops.set_read_req(id, req);
        } else {
            st.ops.take_read(id);
            drop(st);
            self.log(format_args!("Failed to read {chr} at {vhdl}"));
        }
    }

    /// Enables notifications of a remote characteristic value, calling
    /// `func` for each one received.
    pub(super) fn register_notify(&self, vhdl: Handle, chr: Characteristic, func: NotifyFn) {
        let Some(client) = self.client() else { return };
        let id = self.0.st.lock().ops.add_notify(vhdl, chr, func);
        let w = Arc::downgrade(&self.0);
        let req = client.register_notify(
            vhdl,
            Arc::new(move |_: Handle, v: &[u8]| {
                let Some(s) = w.upgrade().as_ref().and_then(Self::upgrade) else {
                    return;
                };
                let f = s.0.st.lock().ops.notify_fn(id);
                if let Some((chr, f)) = f {
                    f(&s, chr, v);
                }
            }),
        );
        let mut st = self.0.st.lock();
        if let Some(req) = req {
            st.ops.set_notify_req(id, req);
        } else {
            st.ops.take_notify(id);
            drop(st);
            self.log(format_args!("Failed to register notifications for {chr}"));
        }
    }

    /// Updates the remote volume state.
    pub(super) fn publish(&self, f: impl FnOnce(&mut RemoteState)) {
        self.0.remote_tx.send_modify(f);
    }

    /// Calls `f` with the remote discovery state.
    pub(super) fn with_bound<T>(&self, f: impl FnOnce(&mut Bound) -> T) -> T {
        f(&mut self.0.st.lock().bound)
    }

    /// Logs a debug message.
    pub(super) fn log(&self, args: Arguments) {
        debug!("{self:?}: {args}");
        self.sink(args);
    }

    /// Logs an internal error.
    pub(super) fn error(&self, args: Arguments) {
        error!("{self:?}: {args}");
        self.sink(args);
    }

    fn sink(&self, args: Arguments) {
        let f = self.0.debug.lock().as_ref().map(Arc::clone);
        if let Some(f) = f {
            f(&args.to_string());
        }
    }

    fn client(&self) -> Option<Arc<dyn Client>> {
        self.0.st.lock().client.as_ref().map(Arc::clone)
    }

    /// Releases the client and all remote operations.
    fn release(&self) {
        let (client, rel) = {
            let mut st = self.0.st.lock();
            st.bound = Bound::default();
            (st.client.take(), st.ops.drain())
        };
        let Some(client) = client else { return };
        for req in rel.reads {
            client.cancel(req);
        }
        for req in rel.ntf {
            client.unregister_notify(req);
        }
        self.log(format_args!("Released {client:?}"));
    }

    /// Detaches and releases the session when the last handle is dropped.
    /// Detached observers may take new handles, in which case dropping the
    /// last of those repeats the teardown.
    fn teardown(&self) {
        self.detach();
        self.release();
        self.0.st.lock().br = None;
    }
}

impl Clone for Session {
    #[inline]
    fn clone(&self) -> Self {
        self.0.refs.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(&self.0))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let refs = &self.0.refs;
        let mut n = refs.load(Ordering::Relaxed);
        while n > 1 {
            match refs.compare_exchange_weak(n, n - 1, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return,
                Err(v) => n = v,
            }
        }
        // The count stays at 1 during teardown, so observer handles remain
        // valid and upgrades succeed until it completes.
        fence(Ordering::Acquire);
        self.teardown();
        if refs.fetch_sub(1, Ordering::Release) == 1 {
            debug!("{self:?} freed");
        }
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple(name_of!(Session)).field(&self.0.id).finish()
    }
}

impl Inner {
    /// Returns the bearer of the session connection or client.
    fn bearer(&self) -> Option<Arc<Bearer>> {
        let st = self.st.lock();
        (st.br.as_ref())
            .or_else(|| st.client.as_ref().map(|c| c.bearer()))
            .map(Arc::clone)
    }

    /// Returns the identifier of the session connection.
    pub(super) fn conn_id(&self) -> Option<ConnId> {
        self.bearer().map(|br| br.id())
    }
}
