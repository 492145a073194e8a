use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::ops::RangeBounds;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use smallvec::SmallVec;
use structbuf::{StructBuf, Unpack};
use tracing::{debug, info};

use burble_const::{Declaration, Uuid};

use crate::SyncMutex;

pub use builder::*;

use super::*;

mod builder;

/// GATT server database. Services are added at runtime using the builder
/// methods and become visible to clients once activated.
#[derive(Debug, Default)]
pub struct Db(RwLock<DbInner>);

#[derive(Debug, Default)]
struct DbInner {
    attr: Vec<Attr>,
    svc: Vec<Svc>,
    chars: BTreeMap<Handle, CharDef>,
    ccc: Arc<SyncMutex<CccTable>>,
}

/// Client Characteristic Configuration values of open connections. Entries
/// of a connection are removed when it is closed.
#[derive(Debug, Default)]
struct CccTable {
    cfg: BTreeMap<(ConnId, Handle), Cccd>,
    conns: BTreeSet<ConnId>,
}

/// Attribute entry.
#[derive(Debug)]
struct Attr {
    hdl: Handle,
    typ: Uuid,
    perms: Access,
    val: Val,
}

/// Attribute value storage.
#[derive(Debug)]
enum Val {
    /// Value stored in the database.
    Data(SmallVec<[u8; 20]>),
    /// Value provided by an I/O callback.
    Io(Io),
    /// Per-connection Client Characteristic Configuration value.
    Cccd,
}

/// Service group.
#[derive(Debug)]
struct Svc {
    range: HandleRange,
    uuid: Uuid,
    primary: bool,
    active: bool,
    claimed: bool,
}

/// Characteristic definition indexed by value handle.
#[derive(Clone, Copy, Debug)]
struct CharDef {
    props: Prop,
    cccd: Option<Handle>,
}

/// Service information returned by discovery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct ServiceInfo {
    pub range: HandleRange,
    pub uuid: Uuid,
    pub primary: bool,
}

impl ServiceInfo {
    /// Returns the service declaration handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.range.start()
    }
}

/// Characteristic information returned by discovery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct CharInfo {
    pub decl: Handle,
    pub vhdl: Handle,
    pub uuid: Uuid,
    pub props: Prop,
}

impl Db {
    /// Creates an empty database.
    #[inline]
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Defines a primary service ([Vol 3] Part G, Section 3.1). The service
    /// remains inactive until [`Db::set_active`] is called.
    #[inline]
    pub fn primary_service<T>(
        &self,
        uuid: impl Into<Uuid>,
        include: impl AsRef<[Handle]>,
        chars: impl FnOnce(&mut Builder<ServiceDef>) -> T,
    ) -> (Handle, T) {
        self.service(true, uuid.into(), include.as_ref(), chars)
    }

    /// Defines a secondary service ([Vol 3] Part G, Section 3.1). The service
    /// remains inactive until [`Db::set_active`] is called.
    #[inline]
    pub fn secondary_service<T>(
        &self,
        uuid: impl Into<Uuid>,
        include: impl AsRef<[Handle]>,
        chars: impl FnOnce(&mut Builder<ServiceDef>) -> T,
    ) -> (Handle, T) {
        self.service(false, uuid.into(), include.as_ref(), chars)
    }

    fn service<T>(
        &self,
        primary: bool,
        uuid: Uuid,
        include: &[Handle],
        chars: impl FnOnce(&mut Builder<ServiceDef>) -> T,
    ) -> (Handle, T) {
        let mut db = self.0.write();
        let mut b = Builder::new(&mut db);
        let hdl = b.service(primary, uuid, include);
        let v = chars(&mut b);
        let end = b.last_handle();
        db.svc.push(Svc {
            range: HandleRange::new(hdl, end),
            uuid,
            primary,
            active: false,
            claimed: false,
        });
        (hdl, v)
    }

    /// Activates or deactivates a service. Attributes of inactive services
    /// are not visible to clients.
    pub fn set_active(&self, svc: Handle, active: bool) -> bool {
        let mut db = self.0.write();
        let Some(s) = db.svc_mut(svc) else { return false };
        if s.active != active {
            debug!("Service {} {svc} active={active}", s.uuid);
            s.active = active;
        }
        true
    }

    /// Marks a service as claimed by a profile.
    pub fn set_claimed(&self, svc: Handle, claimed: bool) -> bool {
        let mut db = self.0.write();
        let Some(s) = db.svc_mut(svc) else { return false };
        s.claimed = claimed;
        true
    }

    /// Returns whether a service is claimed by a profile.
    #[must_use]
    pub fn is_claimed(&self, svc: Handle) -> bool {
        let db = self.0.read();
        db.svc.iter().any(|s| s.range.start() == svc && s.claimed)
    }

    /// Returns all active services with the specified UUID in handle order.
    #[must_use]
    pub fn services(&self, uuid: impl Into<Uuid>) -> Vec<ServiceInfo> {
        let uuid = uuid.into();
        let db = self.0.read();
        (db.svc.iter())
            .filter(|s| s.active && s.uuid == uuid)
            .map(Svc::info)
            .collect()
    }

    /// Returns services included by the specified service
    /// ([Vol 3] Part G, Section 3.2).
    #[must_use]
    pub fn includes(&self, svc: &ServiceInfo) -> Vec<ServiceInfo> {
        let db = self.0.read();
        (db.attrs(svc.range))
            .filter(|at| at.typ == Declaration::Include)
            .filter_map(|at| match at.val {
                Val::Data(ref v) => Handle::new(v.as_slice().unpack().u16()),
                _ => None,
            })
            .filter_map(|start| db.svc.iter().find(|s| s.range.start() == start))
            .map(Svc::info)
            .collect()
    }

    /// Returns all characteristics of the specified service.
    #[must_use]
    pub fn characteristics(&self, svc: &ServiceInfo) -> Vec<CharInfo> {
        let db = self.0.read();
        (db.attrs(svc.range))
            .filter(|at| at.typ == Declaration::Characteristic)
            .filter_map(|at| {
                let Val::Data(ref v) = at.val else { return None };
                let v = v.as_slice();
                let mut p = v.unpack();
                let props = Prop::from_bits_retain(p.u8());
                let vhdl = Handle::new(p.u16())?;
                let uuid = Uuid::try_from(p.as_ref()).ok()?;
                p.is_ok().then_some(CharInfo {
                    decl: at.hdl,
                    vhdl,
                    uuid,
                    props,
                })
            })
            .collect()
    }

    /// Returns the Client Characteristic Configuration descriptor handle of
    /// the characteristic with value handle `vhdl`.
    #[must_use]
    pub fn cccd(&self, vhdl: Handle) -> Option<Handle> {
        self.0.read().chars.get(&vhdl).and_then(|c| c.cccd)
    }

    /// Reads an attribute value on behalf of the client connected via `br`.
    pub fn read(&self, br: &Bearer, hdl: Handle, off: u16) -> Result<StructBuf, ErrorCode> {
        let (io, mut req) = {
            let db = self.0.read();
            let at = db.visible(hdl)?;
            at.perms.test(Access::READ)?;
            let mut req = ReadReq::new(hdl, at.typ, off);
            match at.val {
                Val::Data(ref v) => {
                    req.complete(v)?;
                    return Ok(req.into_value());
                }
                Val::Cccd => {
                    let v = db.ccc.lock().cfg.get(&(br.id(), hdl)).copied();
                    let v = v.unwrap_or_default();
                    req.complete(v.bits().to_le_bytes())?;
                    return Ok(req.into_value());
                }
                Val::Io(ref io) => (io.clone(), req),
            }
        };
        io.exec(IoReq::Read(&mut req))?;
        Ok(req.into_value())
    }

    /// Writes an attribute value on behalf of the client connected via `br`.
    pub fn write(
        &self,
        br: &Arc<Bearer>,
        op: Opcode,
        hdl: Handle,
        off: u16,
        val: &[u8],
    ) -> IoResult {
        let (io, uuid) = {
            let db = self.0.read();
            let at = db.visible(hdl)?;
            at.perms.test(Access::WRITE)?;
            let io = match at.val {
                Val::Data(_) => return Err(ErrorCode::WriteNotPermitted),
                Val::Io(ref io) => Some((io.clone(), at.typ)),
                Val::Cccd => None,
            };
            match io {
                Some(io) => io,
                None => return db.write_cccd(br, hdl, off, val),
            }
        };
        io.exec(IoReq::Write(&WriteReq {
            br,
            op,
            hdl,
            uuid,
            off,
            val,
        }))
    }

    /// Sends a notification of characteristic value `vhdl` to the client
    /// connected via `br` if that client enabled notifications. Returns
    /// whether the notification was sent.
    pub fn notify(&self, vhdl: Handle, val: &[u8], br: &Bearer) -> bool {
        let enabled = {
            let db = self.0.read();
            let cfg = (db.chars.get(&vhdl))
                .filter(|c| c.props.contains(Prop::NOTIFY))
                .and_then(|c| c.cccd)
                .and_then(|cccd| db.ccc.lock().cfg.get(&(br.id(), cccd)).copied());
            cfg.map_or(false, |c| c.contains(Cccd::NOTIFY))
        };
        if !enabled {
            debug!("Notifications for {vhdl} not enabled by {:?}", br.id());
            return false;
        }
        br.notify(vhdl, val)
    }

    /// Logs the contents of the database.
    pub fn dump(&self) {
        let db = self.0.read();
        for s in &db.svc {
            let kind = if s.primary { "Primary" } else { "Secondary" };
            info!(
                "{kind} service {} {:?} (active={}, claimed={})",
                s.uuid, s.range, s.active, s.claimed
            );
            for at in db.attrs(s.range).skip(1) {
                match at.val {
                    Val::Data(ref v) => info!("  {} {} {v:02X?}", at.hdl, at.typ),
                    Val::Io(_) => info!("  {} {} <io>", at.hdl, at.typ),
                    Val::Cccd => info!("  {} {} <cccd>", at.hdl, at.typ),
                }
            }
        }
    }
}

impl DbInner {
    /// Returns the attribute with the specified handle.
    fn attr(&self, hdl: Handle) -> Option<&Attr> {
        (self.attr.binary_search_by_key(&hdl, |at| at.hdl).ok()).and_then(|i| self.attr.get(i))
    }

    /// Returns the attribute with the specified handle if it belongs to an
    /// active service.
    fn visible(&self, hdl: Handle) -> Result<&Attr, ErrorCode> {
        let active = (self.svc.iter()).any(|s| s.active && s.range.contains(&hdl));
        (self.attr(hdl).filter(|_| active)).ok_or(ErrorCode::InvalidHandle)
    }

    /// Returns all attributes in the specified range.
    fn attrs(&self, r: HandleRange) -> impl Iterator<Item = &Attr> {
        (self.attr.iter()).filter(move |at| r.contains(&at.hdl))
    }

    /// Returns the service with the specified declaration handle.
    fn svc_mut(&mut self, hdl: Handle) -> Option<&mut Svc> {
        self.svc.iter_mut().find(|s| s.range.start() == hdl)
    }

    /// Updates the client configuration of a CCC descriptor.
    fn write_cccd(&self, br: &Arc<Bearer>, hdl: Handle, off: u16, val: &[u8]) -> IoResult {
        if off != 0 {
            return Err(ErrorCode::InvalidOffset);
        }
        if val.len() != 2 {
            return Err(ErrorCode::InvalidAttributeValueLength);
        }
        let (conn, cfg) = (br.id(), Cccd::from_bits_truncate(val.unpack().u16()));
        debug!("CCCD {hdl} for {conn:?}: {cfg:?}");
        let mut t = self.ccc.lock();
        if cfg.is_empty() {
            t.cfg.remove(&(conn, hdl));
            return Ok(());
        }
        if !t.conns.contains(&conn) {
            let w = Arc::downgrade(&self.ccc);
            if br.on_disconnect(move || CccTable::close(&w, conn)).is_none() {
                debug!("Ignoring CCCD {hdl} for closed {conn:?}");
                return Ok(());
            }
            t.conns.insert(conn);
        }
        t.cfg.insert((conn, hdl), cfg);
        Ok(())
    }
}

impl CccTable {
    /// Removes all entries of a closed connection.
    fn close(this: &Weak<SyncMutex<Self>>, conn: ConnId) {
        let Some(this) = this.upgrade() else { return };
        let mut t = this.lock();
        t.conns.remove(&conn);
        t.cfg.retain(|&(c, _), _| c != conn);
    }
}

impl Svc {
    #[inline]
    const fn info(&self) -> ServiceInfo {
        ServiceInfo {
            range: self.range,
            uuid: self.uuid,
            primary: self.primary,
        }
    }
}
