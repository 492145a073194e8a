use std::fmt::{Debug, Formatter};
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{name_of, SyncMutex};

use super::*;

/// Receiver of Handle Value Notifications sent over a bearer.
pub type NotifyRx = mpsc::UnboundedReceiver<Notification>;

/// Process-unique connection identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ConnId(NonZeroU64);

impl ConnId {
    /// Allocates a new connection identifier.
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        match NonZeroU64::new(NEXT.fetch_add(1, Ordering::Relaxed)) {
            Some(id) => Self(id),
            None => Self::next(),
        }
    }
}

/// Disconnect callback registration identifier.
pub type DisconnectId = NonZeroU32;

type DisconnectFn = Box<dyn FnOnce() + Send>;

/// Handle Value Notification ([Vol 3] Part F, Section 3.4.7.1).
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct Notification {
    pub hdl: Handle,
    pub val: SmallVec<[u8; 16]>,
}

/// ATT bearer ([Vol 3] Part F, Section 3.2.11). One bearer exists per
/// connection and all requests from that connection are serialized through
/// it.
pub struct Bearer {
    id: ConnId,
    ct: CancellationToken,
    tx: mpsc::UnboundedSender<Notification>,
    next_cb: AtomicU32,
    on_disconnect: SyncMutex<Vec<(DisconnectId, DisconnectFn)>>,
}

impl Bearer {
    /// Creates a new connected bearer and returns the receiver of its outbound
    /// notifications.
    #[must_use]
    pub fn new() -> (Arc<Self>, NotifyRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let br = Arc::new(Self {
            id: ConnId::next(),
            ct: CancellationToken::new(),
            tx,
            next_cb: AtomicU32::new(0),
            on_disconnect: SyncMutex::default(),
        });
        debug!("New bearer {:?}", br.id);
        (br, rx)
    }

    /// Returns the connection identifier.
    #[inline(always)]
    #[must_use]
    pub const fn id(&self) -> ConnId {
        self.id
    }

    /// Registers a callback that will be run once when the connection is
    /// closed. Returns `None` if the connection is already closed.
    pub fn on_disconnect(&self, f: impl FnOnce() + Send + 'static) -> Option<DisconnectId> {
        let mut cbs = self.on_disconnect.lock();
        // Checked under the lock to avoid racing with disconnect()
        if self.ct.is_cancelled() {
            return None;
        }
        let id = crate::next_id(&self.next_cb);
        cbs.push((id, Box::new(f)));
        Some(id)
    }

    /// Removes a disconnect callback.
    pub fn unregister_disconnect(&self, id: DisconnectId) -> bool {
        let mut cbs = self.on_disconnect.lock();
        let n = cbs.len();
        cbs.retain(|&(i, _)| i != id);
        n != cbs.len()
    }

    /// Closes the connection and runs all disconnect callbacks. Subsequent
    /// calls have no effect.
    pub fn disconnect(&self) {
        let cbs = {
            let mut cbs = self.on_disconnect.lock();
            if self.ct.is_cancelled() {
                return;
            }
            self.ct.cancel();
            std::mem::take(&mut *cbs)
        };
        debug!("Bearer {:?} disconnected ({} callbacks)", self.id, cbs.len());
        for (_, f) in cbs {
            f();
        }
    }

    /// Returns whether the connection is closed.
    #[inline(always)]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.ct.is_cancelled()
    }

    /// Returns when the connection is closed. This method is cancel safe.
    #[inline(always)]
    pub async fn closed(&self) {
        self.ct.cancelled().await;
    }

    /// Sends a Handle Value Notification. Returns `false` if the connection is
    /// closed.
    pub fn notify(&self, hdl: Handle, val: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        trace!("Notify {hdl} {val:02X?} on {:?}", self.id);
        let ntf = Notification {
            hdl,
            val: SmallVec::from_slice(val),
        };
        self.tx.send(ntf).is_ok()
    }
}

impl Debug for Bearer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(name_of!(Bearer))
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
