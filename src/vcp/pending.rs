//! Pending remote operation tracking.

use std::fmt::{Debug, Formatter};

use burble_const::Characteristic;

use crate::att::{ErrorCode, Handle};
use crate::gatt::ReqId;
use crate::name_of;

use super::Session;

/// Session-local operation identifier, assigned before the client request is
/// issued so that completion callbacks can locate their entry.
pub(super) type OpId = u32;

/// Read completion handler.
pub(super) type ReadFn = fn(&Session, Characteristic, Result<&[u8], ErrorCode>);

/// Notification handler.
pub(super) type NotifyFn = fn(&Session, Characteristic, &[u8]);

/// Outstanding read of a remote characteristic value.
pub(super) struct PendingRead {
    id: OpId,
    req: Option<ReqId>,
    pub vhdl: Handle,
    pub chr: Characteristic,
    pub func: ReadFn,
}

/// Notification registration for a remote characteristic value.
pub(super) struct NotifyReg {
    id: OpId,
    req: Option<ReqId>,
    pub vhdl: Handle,
    pub chr: Characteristic,
    pub func: NotifyFn,
}

/// Operations issued by a session against its remote client.
#[derive(Default)]
pub(super) struct Tracker {
    next: OpId,
    reads: Vec<PendingRead>,
    ntf: Vec<NotifyReg>,
}

/// Client requests released by [`Tracker::drain`].
#[derive(Debug, Default)]
pub(super) struct Released {
    pub reads: Vec<ReqId>,
    pub ntf: Vec<ReqId>,
}

impl Tracker {
    /// Tracks a new read.
    pub fn add_read(&mut self, vhdl: Handle, chr: Characteristic, func: ReadFn) -> OpId {
        let id = self.next_id();
        self.reads.push(PendingRead {
            id,
            req: None,
            vhdl,
            chr,
            func,
        });
        id
    }

    /// Tracks a new notification registration.
    pub fn add_notify(&mut self, vhdl: Handle, chr: Characteristic, func: NotifyFn) -> OpId {
        let id = self.next_id();
        self.ntf.push(NotifyReg {
            id,
            req: None,
            vhdl,
            chr,
            func,
        });
        id
    }

    /// Associates a tracked read with its client request. Returns `false` if
    /// the read already completed.
    pub fn set_read_req(&mut self, id: OpId, req: ReqId) -> bool {
        (self.reads.iter_mut().find(|op| op.id == id)).map_or(false, |op| {
            op.req = Some(req);
            true
        })
    }

    /// Associates a tracked notification registration with its client
    /// request. Returns `false` if the registration was removed.
    pub fn set_notify_req(&mut self, id: OpId, req: ReqId) -> bool {
        (self.ntf.iter_mut().find(|op| op.id == id)).map_or(false, |op| {
            op.req = Some(req);
            true
        })
    }

    /// Removes a completed read.
    pub fn take_read(&mut self, id: OpId) -> Option<PendingRead> {
        let i = self.reads.iter().position(|op| op.id == id)?;
        Some(self.reads.remove(i))
    }

    /// Removes a notification registration.
    pub fn take_notify(&mut self, id: OpId) -> Option<NotifyReg> {
        let i = self.ntf.iter().position(|op| op.id == id)?;
        Some(self.ntf.remove(i))
    }

    /// Returns the handler of a notification registration.
    pub fn notify_fn(&self, id: OpId) -> Option<(Characteristic, NotifyFn)> {
        (self.ntf.iter())
            .find(|op| op.id == id)
            .map(|op| (op.chr, op.func))
    }

    /// Returns the number of pending reads and notification registrations.
    pub fn counts(&self) -> (usize, usize) {
        (self.reads.len(), self.ntf.len())
    }

    /// Removes all operations, returning the client requests that must be
    /// cancelled or unregistered.
    pub fn drain(&mut self) -> Released {
        Released {
            reads: self.reads.drain(..).filter_map(|op| op.req).collect(),
            ntf: self.ntf.drain(..).filter_map(|op| op.req).collect(),
        }
    }

    fn next_id(&mut self) -> OpId {
        self.next = self.next.wrapping_add(1);
        self.next
    }
}

impl Debug for Tracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(name_of!(Tracker))
            .field("reads", &self.reads.len())
            .field("ntf", &self.ntf.len())
            .finish_non_exhaustive()
    }
}
