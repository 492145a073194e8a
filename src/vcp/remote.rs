//! Discovery and observation of the volume services of a peer.

use std::collections::BTreeMap;

use structbuf::Unpack;
use tracing::warn;

use burble_const::{Characteristic, Service};

use crate::att::{ErrorCode, Handle};
use crate::gatt::CharInfo;

use super::{AudioLocation, Session, VolumeFlag, VolumeOffsetState, VolumeState};

/// Volume state observed on a peer. Fields are updated by value reads issued
/// during discovery and by notifications.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct RemoteState {
    pub volume: Option<VolumeState>,
    pub flag: Option<VolumeFlag>,
    pub offset: Option<VolumeOffsetState>,
    pub location: Option<AudioLocation>,
    pub description: Option<String>,
}

/// Remote services and characteristics bound by discovery.
#[derive(Debug, Default)]
pub(super) struct Bound {
    svc: BTreeMap<Handle, Service>,
    chars: BTreeMap<Characteristic, Handle>,
}

impl Session {
    /// Discovers the Volume Control and Volume Offset Control services on the
    /// remote database. Each characteristic is bound at most once, so
    /// repeated discovery does not issue duplicate reads or registrations.
    pub(super) fn discover(&self) {
        let Some(rdb) = self.remote_db() else { return };
        for uuid in [Service::VolumeControl, Service::VolumeOffsetControl] {
            for svc in rdb.services(uuid) {
                let hdl = svc.handle();
                let new = self.with_bound(|b| b.svc.insert(hdl, uuid).is_none());
                if new {
                    self.log(format_args!("Found {uuid} at {hdl}"));
                }
                rdb.set_claimed(hdl, true);
                for c in rdb.characteristics(&svc) {
                    self.bind_char(uuid, &c);
                }
            }
        }
    }

    /// Binds a remote characteristic, reading its value and enabling
    /// notifications unless it is a control point.
    fn bind_char(&self, svc: Service, c: &CharInfo) {
        let chr = c.uuid.as_uuid16().and_then(|u| Characteristic::try_from(u).ok());
        let Some(chr) = chr.filter(|&chr| service_of(chr) == Some(svc)) else {
            return;
        };
        let new = self.with_bound(|b| {
            if b.chars.contains_key(&chr) {
                return false;
            }
            b.chars.insert(chr, c.vhdl);
            true
        });
        if !new {
            return;
        }
        self.log(format_args!("Bound {chr} at {}", c.vhdl));
        if !matches!(
            chr,
            Characteristic::VolumeControlPoint | Characteristic::VolumeOffsetControlPoint
        ) {
            self.read_value(c.vhdl, chr, on_read);
            self.register_notify(c.vhdl, chr, on_notify);
        }
    }

    /// Returns the value handle of a bound remote characteristic.
    #[must_use]
    pub fn remote_handle(&self, chr: Characteristic) -> Option<Handle> {
        self.with_bound(|b| b.chars.get(&chr).copied())
    }

    /// Parses and publishes a remote characteristic value.
    fn update(&self, chr: Characteristic, v: &[u8]) {
        let ok = match chr {
            Characteristic::VolumeState => VolumeState::from_bytes(v)
                .map(|st| self.publish(|r| r.volume = Some(st)))
                .is_some(),
            Characteristic::VolumeFlags => (v.first().copied())
                .and_then(|f| VolumeFlag::try_from(f).ok())
                .map(|f| self.publish(|r| r.flag = Some(f)))
                .is_some(),
            Characteristic::VolumeOffsetState => VolumeOffsetState::from_bytes(v)
                .map(|st| self.publish(|r| r.offset = Some(st)))
                .is_some(),
            Characteristic::AudioLocation => {
                let mut p = v.unpack();
                let loc = AudioLocation::from_bits_retain(p.u32());
                if p.is_ok() {
                    self.publish(|r| r.location = Some(loc));
                }
                p.is_ok()
            }
            Characteristic::AudioOutputDescription => {
                let desc = String::from_utf8_lossy(v).into_owned();
                self.publish(|r| r.description = Some(desc));
                true
            }
            _ => false,
        };
        if ok {
            self.log(format_args!("{chr} {v:02X?}"));
        } else {
            warn!("{self:?}: Invalid {chr} value {v:02X?}");
        }
    }
}

/// Returns the service that contains a volume characteristic.
const fn service_of(c: Characteristic) -> Option<Service> {
    match c {
        Characteristic::VolumeState
        | Characteristic::VolumeControlPoint
        | Characteristic::VolumeFlags => Some(Service::VolumeControl),
        Characteristic::VolumeOffsetState
        | Characteristic::AudioLocation
        | Characteristic::VolumeOffsetControlPoint
        | Characteristic::AudioOutputDescription => Some(Service::VolumeOffsetControl),
        _ => None,
    }
}

fn on_read(s: &Session, chr: Characteristic, r: Result<&[u8], ErrorCode>) {
    match r {
        Ok(v) => s.update(chr, v),
        Err(e) => warn!("{s:?}: Failed to read {chr}: {e}"),
    }
}

fn on_notify(s: &Session, chr: Characteristic, v: &[u8]) {
    s.update(chr, v);
}
