use std::sync::Weak;

use structbuf::Unpack;
use tracing::debug;

use burble_const::{Characteristic, Service};

use crate::att::{Access, Bearer, ErrorCode, Handle};
use crate::gatt::{Db, Io, IoReq, IoResult, Prop};

use super::cp::{self, ControlPoint};
use super::{Binding, Config, CtxInner, Session, VcsOp, VolumeFlag};

/// Volume State characteristic value ([VCS] Section 3.1).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct VolumeState {
    pub volume: u8,
    pub mute: bool,
    pub counter: u8,
}

impl VolumeState {
    /// Creates a volume state with a zero change counter.
    #[inline(always)]
    #[must_use]
    pub const fn new(volume: u8, mute: bool) -> Self {
        Self {
            volume,
            mute,
            counter: 0,
        }
    }

    /// Returns the encoded characteristic value.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 3] {
        [self.volume, self.mute as u8, self.counter]
    }

    /// Decodes a characteristic value. Returns [`None`] if the value is too
    /// short.
    #[must_use]
    pub fn from_bytes(v: &[u8]) -> Option<Self> {
        let mut p = v.unpack();
        let st = Self {
            volume: p.u8(),
            mute: p.u8() != 0,
            counter: p.u8(),
        };
        p.is_ok().then_some(st)
    }
}

/// Accessory-side Volume Control Service instance.
#[derive(Debug)]
pub(super) struct Vcs {
    pub svc: Handle,
    pub state_hdl: Handle,
    pub flag_hdl: Handle,
    pub cp_hdl: Handle,
    pub state: VolumeState,
    pub flag: VolumeFlag,
    step: u8,
}

impl Vcs {
    /// Defines the service, including the Volume Offset Control Service
    /// `vocs`.
    pub fn define(
        db: &Db,
        this: &Weak<Binding>,
        ctx: &Weak<CtxInner>,
        cfg: &Config,
        vocs: Handle,
    ) -> Self {
        let (svc, (state_hdl, cp_hdl, flag_hdl)) =
            db.primary_service(Service::VolumeControl, [vocs], |s| {
                let (state, _) = s.characteristic(
                    Characteristic::VolumeState,
                    Prop::READ | Prop::NOTIFY,
                    Access::READ,
                    Io::weak(this, read_state),
                    |c| c.cccd(Access::READ_WRITE),
                );
                let (cp, ()) = s.characteristic(
                    Characteristic::VolumeControlPoint,
                    Prop::WRITE,
                    Access::WRITE,
                    cp::io::<VcsOp>(ctx, this),
                    |_| (),
                );
                let (flag, _) = s.characteristic(
                    Characteristic::VolumeFlags,
                    Prop::READ | Prop::NOTIFY,
                    Access::READ,
                    Io::weak(this, read_flag),
                    |c| c.cccd(Access::READ_WRITE),
                );
                (state, cp, flag)
            });
        Self {
            svc,
            state_hdl,
            flag_hdl,
            cp_hdl,
            state: VolumeState::new(cfg.volume, cfg.mute),
            flag: cfg.flag,
            step: cfg.step,
        }
    }

    /// Executes a control point operation. Returns the new state if it should
    /// be notified.
    pub fn apply(
        &mut self,
        op: VcsOp,
        counter: u8,
        volume: u8,
    ) -> Result<Option<VolumeState>, ErrorCode> {
        use VcsOp::*;
        if counter != self.state.counter {
            debug!(
                "Change counter mismatch: {counter} != {}",
                self.state.counter
            );
            return Err(ErrorCode::InvalidChangeCounter);
        }
        let (st, step) = (&mut self.state, self.step);
        match op {
            RelativeVolumeDown => st.volume = st.volume.saturating_sub(step),
            RelativeVolumeUp => st.volume = st.volume.saturating_add(step),
            UnmuteRelativeVolumeDown => {
                st.mute = false;
                st.volume = st.volume.saturating_sub(step);
            }
            UnmuteRelativeVolumeUp => {
                st.mute = false;
                st.volume = st.volume.saturating_add(step);
            }
            SetAbsoluteVolume => st.volume = volume,
            Unmute => st.mute = false,
            Mute => st.mute = true,
        }
        st.counter = st.counter.wrapping_add(1);
        Ok((op != Mute).then_some(*st))
    }
}

impl ControlPoint for VcsOp {
    const SERVICE: &'static str = "VCS";

    #[inline(always)]
    fn name(self) -> &'static str {
        VcsOp::name(self)
    }

    #[inline(always)]
    fn param_len(self) -> usize {
        VcsOp::param_len(self)
    }

    fn exec(self, s: &Session, br: &Bearer, p: &[u8]) -> IoResult {
        let mut p = p.unpack();
        let counter = p.u8();
        let volume = if self == Self::SetAbsoluteVolume {
            p.u8()
        } else {
            0
        };
        let b = s.local();
        let r = (b.lock().vcs.as_mut())
            .map(|vcs| (vcs.state_hdl, vcs.apply(self, counter, volume)));
        let Some((hdl, r)) = r else {
            s.error(format_args!("No volume state for {}", self.name()));
            return Ok(());
        };
        if let Some(v) = r? {
            s.log(format_args!("Volume state {v:?}"));
            b.db().notify(hdl, &v.to_bytes(), br);
        }
        Ok(())
    }
}

fn read_state(b: &Binding, req: IoReq) -> IoResult {
    let IoReq::Read(r) = req else {
        return Err(ErrorCode::RequestNotSupported);
    };
    let v = b.lock().vcs.as_ref().map(|vcs| vcs.state.to_bytes());
    r.complete(v.ok_or(ErrorCode::UnlikelyError)?)
}

fn read_flag(b: &Binding, req: IoReq) -> IoResult {
    let IoReq::Read(r) = req else {
        return Err(ErrorCode::RequestNotSupported);
    };
    let v = b.lock().vcs.as_ref().map(|vcs| u8::from(vcs.flag));
    r.complete([v.ok_or(ErrorCode::UnlikelyError)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vcs(volume: u8, step: u8) -> Vcs {
        Vcs {
            svc: Handle::MIN,
            state_hdl: Handle::MIN,
            flag_hdl: Handle::MIN,
            cp_hdl: Handle::MIN,
            state: VolumeState::new(volume, false),
            flag: VolumeFlag::UserSet,
            step,
        }
    }

    #[test]
    fn clamp() {
        let mut v = vcs(0, 1);
        assert_eq!(v.apply(VcsOp::RelativeVolumeDown, 0, 0).unwrap().unwrap().volume, 0);
        let mut v = vcs(255, 1);
        assert_eq!(v.apply(VcsOp::RelativeVolumeUp, 0, 0).unwrap().unwrap().volume, 255);
        let mut v = vcs(250, 10);
        let st = v.apply(VcsOp::UnmuteRelativeVolumeUp, 0, 0).unwrap().unwrap();
        assert_eq!((st.volume, st.counter), (255, 1));
        let st = v.apply(VcsOp::UnmuteRelativeVolumeDown, 1, 0).unwrap().unwrap();
        assert_eq!((st.volume, st.counter), (245, 2));
    }

    #[test]
    fn counter() {
        let mut v = vcs(10, 1);
        v.state.counter = 255;
        assert_eq!(
            v.apply(VcsOp::Unmute, 254, 0),
            Err(ErrorCode::InvalidChangeCounter)
        );
        assert_eq!(v.state, VolumeState { volume: 10, mute: false, counter: 255 });
        let st = v.apply(VcsOp::SetAbsoluteVolume, 255, 42).unwrap().unwrap();
        assert_eq!(st.to_bytes(), [42, 0, 0]);
    }

    #[test]
    fn mute() {
        let mut v = vcs(10, 1);
        assert_eq!(v.apply(VcsOp::Mute, 0, 0), Ok(None));
        assert_eq!(v.state, VolumeState { volume: 10, mute: true, counter: 1 });
        let st = v.apply(VcsOp::UnmuteRelativeVolumeUp, 1, 0).unwrap();
        assert_eq!(st, Some(VolumeState { volume: 11, mute: false, counter: 2 }));
    }

    #[test]
    fn state_codec() {
        let st = VolumeState { volume: 7, mute: true, counter: 9 };
        assert_eq!(st.to_bytes(), [7, 1, 9]);
        assert_eq!(VolumeState::from_bytes(&[7, 2, 9]), Some(st));
        assert_eq!(VolumeState::from_bytes(&[7, 1]), None);
    }
}
