use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::{name_of, SyncMutex};

use super::*;

/// In-process GATT client connected to a peer [`Db`].
///
/// Requests are executed against the peer database over a dedicated bearer.
/// Reads are queued and, together with notifications sent by the peer, are
/// delivered by [`Loopback::process`].
#[derive(Clone)]
pub struct Loopback(Arc<Inner>);

struct Inner {
    br: Arc<Bearer>,
    db: Arc<Db>,
    rx: SyncMutex<NotifyRx>,
    next_id: AtomicU32,
    st: SyncMutex<State>,
}

#[derive(Default)]
struct State {
    reads: VecDeque<(ReqId, Handle, ReadCb)>,
    ntf: Vec<(ReqId, Handle, NotifyCb)>,
}

impl Loopback {
    /// Opens a new connection to `db`.
    #[must_use]
    pub fn connect(db: &Arc<Db>) -> Self {
        let (br, rx) = Bearer::new();
        Self(Arc::new(Inner {
            br,
            db: Arc::clone(db),
            rx: SyncMutex::new(rx),
            next_id: AtomicU32::new(0),
            st: SyncMutex::default(),
        }))
    }

    /// Returns the peer database.
    #[inline(always)]
    #[must_use]
    pub fn db(&self) -> &Arc<Db> {
        &self.0.db
    }

    /// Writes a characteristic value using a Write Request
    /// ([Vol 3] Part G, Section 4.9.3).
    #[inline]
    pub fn write(&self, vhdl: Handle, val: &[u8]) -> IoResult {
        (self.0.db).write(&self.0.br, Opcode::WriteReq, vhdl, 0, val)
    }

    /// Closes the connection.
    #[inline]
    pub fn disconnect(&self) {
        self.0.br.disconnect();
    }

    /// Returns the number of queued reads.
    #[must_use]
    pub fn pending_reads(&self) -> usize {
        self.0.st.lock().reads.len()
    }

    /// Returns the number of notification registrations.
    #[must_use]
    pub fn notify_registrations(&self) -> usize {
        self.0.st.lock().ntf.len()
    }

    /// Completes all queued reads and delivers received notifications. Returns
    /// the number of callbacks invoked.
    pub fn process(&self) -> usize {
        let mut n = 0;
        loop {
            let Some((id, vhdl, f)) = self.0.st.lock().reads.pop_front() else { break };
            debug!("Read {vhdl} ({id})");
            match self.0.db.read(&self.0.br, vhdl, 0) {
                Ok(v) => f(Ok(v.as_ref())),
                Err(e) => f(Err(e)),
            }
            n += 1;
        }
        loop {
            let Ok(ntf) = self.0.rx.lock().try_recv() else { break };
            let cbs: SmallVec<[NotifyCb; 2]> = (self.0.st.lock().ntf.iter())
                .filter(|&&(_, hdl, _)| hdl == ntf.hdl)
                .map(|(_, _, f)| Arc::clone(f))
                .collect();
            for f in cbs {
                f(ntf.hdl, &ntf.val);
                n += 1;
            }
        }
        n
    }

    /// Writes the CCC descriptor of `vhdl`.
    fn configure(&self, vhdl: Handle, cfg: Cccd) -> Option<()> {
        let cccd = self.0.db.cccd(vhdl)?;
        let v = cfg.bits().to_le_bytes();
        match (self.0.db).write(&self.0.br, Opcode::WriteReq, cccd, 0, &v) {
            Ok(()) => Some(()),
            Err(e) => {
                warn!("Failed to configure {cccd}: {e}");
                None
            }
        }
    }
}

impl Client for Loopback {
    #[inline(always)]
    fn bearer(&self) -> &Arc<Bearer> {
        &self.0.br
    }

    fn try_clone(&self) -> Option<Arc<dyn Client>> {
        if self.0.br.is_closed() {
            return None;
        }
        Some(Arc::new(self.clone()))
    }

    fn read_value(&self, vhdl: Handle, f: ReadCb) -> Option<ReqId> {
        if self.0.br.is_closed() {
            return None;
        }
        let id = crate::next_id(&self.0.next_id);
        self.0.st.lock().reads.push_back((id, vhdl, f));
        Some(id)
    }

    fn cancel(&self, id: ReqId) -> bool {
        let mut st = self.0.st.lock();
        let n = st.reads.len();
        st.reads.retain(|&(i, _, _)| i != id);
        n != st.reads.len()
    }

    fn register_notify(&self, vhdl: Handle, f: NotifyCb) -> Option<ReqId> {
        if self.0.br.is_closed() {
            return None;
        }
        self.configure(vhdl, Cccd::NOTIFY)?;
        let id = crate::next_id(&self.0.next_id);
        self.0.st.lock().ntf.push((id, vhdl, f));
        Some(id)
    }

    fn unregister_notify(&self, id: ReqId) -> bool {
        let vhdl = {
            let mut st = self.0.st.lock();
            let Some(i) = st.ntf.iter().position(|&(i, _, _)| i == id) else {
                return false;
            };
            let (_, vhdl, _) = st.ntf.remove(i);
            if st.ntf.iter().any(|&(_, h, _)| h == vhdl) {
                return true;
            }
            vhdl
        };
        if !self.0.br.is_closed() {
            let _ = self.configure(vhdl, Cccd::empty());
        }
        true
    }
}

impl Debug for Loopback {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let st = self.0.st.lock();
        f.debug_struct(name_of!(Loopback))
            .field("br", &self.0.br)
            .field("reads", &st.reads.len())
            .field("ntf", &st.ntf.len())
            .finish_non_exhaustive()
    }
}
