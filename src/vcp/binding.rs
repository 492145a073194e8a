use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

use parking_lot::MutexGuard;

use burble_const::Characteristic;

use crate::att::Handle;
use crate::gatt::Db;
use crate::{name_of, SyncMutex};

use super::vcs::Vcs;
use super::vocs::Vocs;
use super::{AudioLocation, Config, CtxInner, VolumeFlag, VolumeOffsetState, VolumeState};

/// Accessory database binding. Holds the volume state exposed by the Volume
/// Control and Volume Offset Control services defined on a [`Db`]. The state
/// is shared by all sessions served by that database.
pub struct Binding {
    db: Arc<Db>,
    st: SyncMutex<State>,
}

#[derive(Debug, Default)]
pub(super) struct State {
    pub vcs: Option<Vcs>,
    pub vocs: Option<Vocs>,
}

impl Binding {
    /// Defines and activates the volume services on `db`.
    pub(super) fn new(db: &Arc<Db>, ctx: &Weak<CtxInner>, cfg: &Config) -> Arc<Self> {
        Arc::new_cyclic(|this| {
            let vocs = Vocs::define(db, this, ctx, cfg);
            let vcs = Vcs::define(db, this, ctx, cfg, vocs.svc);
            db.set_active(vocs.svc, true);
            db.set_active(vcs.svc, true);
            Self {
                db: Arc::clone(db),
                st: SyncMutex::new(State {
                    vcs: Some(vcs),
                    vocs: Some(vocs),
                }),
            }
        })
    }

    /// Returns the accessory database.
    #[inline(always)]
    #[must_use]
    pub const fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// Returns the current volume state.
    #[must_use]
    pub fn volume_state(&self) -> Option<VolumeState> {
        self.lock().vcs.as_ref().map(|vcs| vcs.state)
    }

    /// Returns the current volume flag.
    #[must_use]
    pub fn volume_flag(&self) -> Option<VolumeFlag> {
        self.lock().vcs.as_ref().map(|vcs| vcs.flag)
    }

    /// Returns the current volume offset state.
    #[must_use]
    pub fn offset_state(&self) -> Option<VolumeOffsetState> {
        self.lock().vocs.as_ref().map(|vocs| vocs.state)
    }

    /// Returns the audio location.
    #[must_use]
    pub fn audio_location(&self) -> Option<AudioLocation> {
        self.lock().vocs.as_ref().map(|vocs| vocs.location)
    }

    /// Returns the audio output description.
    #[must_use]
    pub fn description(&self) -> Option<String> {
        self.lock().vocs.as_ref().map(|vocs| vocs.desc.clone())
    }

    /// Returns the value handle of a volume service characteristic.
    #[must_use]
    pub fn handle(&self, c: Characteristic) -> Option<Handle> {
        let st = self.lock();
        match c {
            Characteristic::VolumeState => st.vcs.as_ref().map(|v| v.state_hdl),
            Characteristic::VolumeControlPoint => st.vcs.as_ref().map(|v| v.cp_hdl),
            Characteristic::VolumeFlags => st.vcs.as_ref().map(|v| v.flag_hdl),
            Characteristic::VolumeOffsetState => st.vocs.as_ref().map(|v| v.state_hdl),
            Characteristic::AudioLocation => st.vocs.as_ref().map(|v| v.loc_hdl),
            Characteristic::VolumeOffsetControlPoint => st.vocs.as_ref().map(|v| v.cp_hdl),
            Characteristic::AudioOutputDescription => st.vocs.as_ref().map(|v| v.desc_hdl),
            _ => None,
        }
    }

    /// Locks the volume state.
    #[inline(always)]
    pub(super) fn lock(&self) -> MutexGuard<State> {
        self.st.lock()
    }

    /// Drops the volume state.
    pub(super) fn clear(&self) {
        let mut st = self.lock();
        st.vcs = None;
        st.vocs = None;
    }
}

impl Debug for Binding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(name_of!(Binding))
            .field("db", &Arc::as_ptr(&self.db))
            .field("st", &*self.lock())
            .finish()
    }
}
