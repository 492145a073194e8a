use std::sync::Weak;

use structbuf::Unpack;
use tracing::debug;

use burble_const::{Characteristic, Service};

use crate::att::{Access, Bearer, ErrorCode, Handle};
use crate::gatt::{Db, Io, IoReq, IoResult, Prop};

use super::cp::{self, ControlPoint};
use super::{AudioLocation, Binding, Config, CtxInner, Session, VocsOp, OFFSET_MAX, OFFSET_MIN};

/// Volume Offset State characteristic value ([VOCS] Section 3.1).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct VolumeOffsetState {
    pub offset: i16,
    pub counter: u8,
}

impl VolumeOffsetState {
    /// Returns the encoded characteristic value.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 3] {
        let [lo, hi] = self.offset.to_le_bytes();
        [lo, hi, self.counter]
    }

    /// Decodes a characteristic value. Returns [`None`] if the value is too
    /// short.
    #[must_use]
    pub fn from_bytes(v: &[u8]) -> Option<Self> {
        let mut p = v.unpack();
        let st = Self {
            offset: p.i16(),
            counter: p.u8(),
        };
        p.is_ok().then_some(st)
    }
}

/// Accessory-side Volume Offset Control Service instance.
#[derive(Debug)]
pub(super) struct Vocs {
    pub svc: Handle,
    pub state_hdl: Handle,
    pub loc_hdl: Handle,
    pub cp_hdl: Handle,
    pub desc_hdl: Handle,
    pub state: VolumeOffsetState,
    pub location: AudioLocation,
    pub desc: String,
}

impl Vocs {
    /// Defines the service as a secondary service to be included by the
    /// Volume Control Service.
    pub fn define(db: &Db, this: &Weak<Binding>, ctx: &Weak<CtxInner>, cfg: &Config) -> Self {
        let ro = Prop::READ | Prop::NOTIFY;
        let (svc, (state_hdl, loc_hdl, cp_hdl, desc_hdl)) =
            db.secondary_service(Service::VolumeOffsetControl, [], |s| {
                let (state, _) = s.characteristic(
                    Characteristic::VolumeOffsetState,
                    ro,
                    Access::READ,
                    Io::weak(this, read_state),
                    |c| c.cccd(Access::READ_WRITE),
                );
                let (loc, _) = s.characteristic(
                    Characteristic::AudioLocation,
                    ro,
                    Access::READ,
                    Io::weak(this, read_location),
                    |c| c.cccd(Access::READ_WRITE),
                );
                let (cp, ()) = s.characteristic(
                    Characteristic::VolumeOffsetControlPoint,
                    Prop::WRITE,
                    Access::WRITE,
                    cp::io::<VocsOp>(ctx, this),
                    |_| (),
                );
                let (desc, _) = s.characteristic(
                    Characteristic::AudioOutputDescription,
                    ro,
                    Access::READ,
                    Io::weak(this, read_description),
                    |c| c.cccd(Access::READ_WRITE),
                );
                (state, loc, cp, desc)
            });
        Self {
            svc,
            state_hdl,
            loc_hdl,
            cp_hdl,
            desc_hdl,
            state: VolumeOffsetState::default(),
            location: cfg.location,
            desc: cfg.description.clone(),
        }
    }

    /// Executes Set Volume Offset. The offset is stored before it is
    /// validated, so a rejected value remains in the state without a change
    /// counter update.
    pub fn set_offset(&mut self, counter: u8, offset: i16) -> Result<VolumeOffsetState, ErrorCode> {
        if counter != self.state.counter {
            debug!(
                "Change counter mismatch: {counter} != {}",
                self.state.counter
            );
            return Err(ErrorCode::InvalidChangeCounter);
        }
        self.state.offset = offset;
        if !(OFFSET_MIN..=OFFSET_MAX).contains(&offset) {
            debug!("Volume offset {offset} out of range");
            return Err(ErrorCode::ValueOutOfRange);
        }
        self.state.counter = self.state.counter.wrapping_add(1);
        Ok(self.state)
    }
}

impl ControlPoint for VocsOp {
    const SERVICE: &'static str = "VOCS";

    #[inline(always)]
    fn name(self) -> &'static str {
        VocsOp::name(self)
    }

    #[inline(always)]
    fn param_len(self) -> usize {
        VocsOp::param_len(self)
    }

    fn exec(self, s: &Session, br: &Bearer, p: &[u8]) -> IoResult {
        let mut p = p.unpack();
        let (counter, offset) = (p.u8(), p.i16());
        let b = s.local();
        let r = (b.lock().vocs.as_mut())
            .map(|vocs| (vocs.state_hdl, vocs.set_offset(counter, offset)));
        let Some((hdl, r)) = r else {
            s.error(format_args!("No volume offset state for {}", self.name()));
            return Ok(());
        };
        let v = r?;
        s.log(format_args!("Volume offset state {v:?}"));
        b.db().notify(hdl, &v.to_bytes(), br);
        Ok(())
    }
}

fn read_state(b: &Binding, req: IoReq) -> IoResult {
    let IoReq::Read(r) = req else {
        return Err(ErrorCode::RequestNotSupported);
    };
    let v = b.lock().vocs.as_ref().map(|vocs| vocs.state.to_bytes());
    r.complete(v.ok_or(ErrorCode::UnlikelyError)?)
}

fn read_location(b: &Binding, req: IoReq) -> IoResult {
    let IoReq::Read(r) = req else {
        return Err(ErrorCode::RequestNotSupported);
    };
    let v = b.lock().vocs.as_ref().map(|vocs| vocs.location.bits());
    r.complete(v.ok_or(ErrorCode::UnlikelyError)?.to_le_bytes())
}

fn read_description(b: &Binding, req: IoReq) -> IoResult {
    let IoReq::Read(r) = req else {
        return Err(ErrorCode::RequestNotSupported);
    };
    let st = b.lock();
    let vocs = st.vocs.as_ref().ok_or(ErrorCode::UnlikelyError)?;
    r.complete(vocs.desc.as_bytes())
}
