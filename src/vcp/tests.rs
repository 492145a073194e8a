use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use enum_iterator::all;
use matches::assert_matches;
use parking_lot::Mutex;

use burble_const::{Characteristic, Service};

use crate::att::{ErrorCode, Handle, Opcode};
use crate::gatt::{Client, Db, Loopback};

use super::*;

type Values = Arc<Mutex<Vec<Vec<u8>>>>;

fn init() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Returns an accessory context, its database, and the database binding.
fn accessory(cfg: Config) -> (Context, Arc<Db>, Arc<Binding>) {
    init();
    let ctx = Context::new(cfg);
    let db = Db::new();
    let b = ctx.add_db(&db);
    (ctx, db, b)
}

/// Returns the value handle of an accessory characteristic.
fn hdl(b: &Binding, c: Characteristic) -> Handle {
    b.handle(c).unwrap()
}

/// Enables notifications for `vhdl` and collects received values.
fn subscribe(lp: &Loopback, vhdl: Handle) -> Values {
    let v = Values::default();
    let w = Arc::clone(&v);
    let f = Arc::new(move |_: Handle, val: &[u8]| w.lock().push(val.to_vec()));
    lp.register_notify(vhdl, f).unwrap();
    v
}

/// Returns an observer that counts invocations.
fn counter() -> (Arc<AtomicUsize>, SessionFn) {
    let n = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&n);
    let f: SessionFn = Arc::new(move |_: &Session| {
        c.fetch_add(1, Ordering::Relaxed);
    });
    (n, f)
}

fn vol(volume: u8, mute: bool, counter: u8) -> VolumeState {
    VolumeState {
        volume,
        mute,
        counter,
    }
}

#[test]
fn set_absolute_volume() {
    let (_ctx, db, b) = accessory(Config::new());
    let lp = Loopback::connect(&db);
    let ntf = subscribe(&lp, hdl(&b, Characteristic::VolumeState));
    let cp = hdl(&b, Characteristic::VolumeControlPoint);

    assert_eq!(lp.write(cp, &[0x04, 0, 42]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(42, false, 1)));
    lp.process();
    assert_eq!(*ntf.lock(), [vec![42, 0, 1]]);

    // Extra parameter bytes are ignored
    assert_eq!(lp.write(cp, &[0x04, 1, 7, 0xFF]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(7, false, 2)));
}

#[test]
fn relative_volume_clamps() {
    let (_ctx, db, b) = accessory(Config::new().with_volume(255));
    let lp = Loopback::connect(&db);
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    assert_eq!(lp.write(cp, &[0x01, 0]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(255, false, 1)));
    assert_eq!(lp.write(cp, &[0x00, 1]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(254, false, 2)));
    assert_eq!(lp.write(cp, &[0x04, 2, 0]), Ok(()));
    assert_eq!(lp.write(cp, &[0x02, 3]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(0, false, 4)));

    let (_ctx, db, b) = accessory(Config::new().with_step(10).with_volume(100));
    let lp = Loopback::connect(&db);
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    assert_eq!(lp.write(cp, &[0x01, 0]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(110, false, 1)));
}

#[test]
fn stale_counter() {
    let (_ctx, db, b) = accessory(Config::new().with_volume(10));
    let lp = Loopback::connect(&db);
    let ntf = subscribe(&lp, hdl(&b, Characteristic::VolumeState));
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    for op in all::<VcsOp>() {
        assert_eq!(
            lp.write(cp, &[op.into(), 5, 5]),
            Err(ErrorCode::InvalidChangeCounter)
        );
    }
    assert_eq!(b.volume_state(), Some(vol(10, false, 0)));

    let ocp = hdl(&b, Characteristic::VolumeOffsetControlPoint);
    assert_eq!(
        lp.write(ocp, &[0x01, 1, 10, 0]),
        Err(ErrorCode::InvalidChangeCounter)
    );
    assert_eq!(b.offset_state(), Some(VolumeOffsetState::default()));
    assert_eq!(lp.process(), 0);
    assert!(ntf.lock().is_empty());
}

#[test]
fn counter_wraps() {
    let (_ctx, db, b) = accessory(Config::new());
    let lp = Loopback::connect(&db);
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    for i in 0..=u8::MAX {
        assert_eq!(lp.write(cp, &[0x05, i]), Ok(()));
    }
    assert_eq!(b.volume_state(), Some(vol(0, false, 0)));
}

#[test]
fn mute_does_not_notify() {
    let (_ctx, db, b) = accessory(Config::new().with_volume(10));
    let lp = Loopback::connect(&db);
    let ntf = subscribe(&lp, hdl(&b, Characteristic::VolumeState));
    let cp = hdl(&b, Characteristic::VolumeControlPoint);

    assert_eq!(lp.write(cp, &[0x06, 0]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(10, true, 1)));
    assert_eq!(lp.process(), 0);

    assert_eq!(lp.write(cp, &[0x03, 1]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(11, false, 2)));
    assert_eq!(lp.process(), 1);
    assert_eq!(*ntf.lock(), [vec![11, 0, 2]]);

    assert_eq!(lp.write(cp, &[0x06, 2]), Ok(()));
    assert_eq!(lp.write(cp, &[0x05, 3]), Ok(()));
    lp.process();
    assert_eq!(ntf.lock().last(), Some(&vec![11, 0, 4]));
}

#[test]
fn volume_offset() {
    let (_ctx, db, b) = accessory(Config::new());
    let lp = Loopback::connect(&db);
    let ntf = subscribe(&lp, hdl(&b, Characteristic::VolumeOffsetState));
    let cp = hdl(&b, Characteristic::VolumeOffsetControlPoint);

    let [lo, hi] = (-10_i16).to_le_bytes();
    assert_eq!(lp.write(cp, &[0x01, 0, lo, hi]), Ok(()));
    lp.process();
    assert_eq!(*ntf.lock(), [vec![lo, hi, 1]]);

    // Out-of-range offsets are stored without a counter update
    let [lo, hi] = 300_i16.to_le_bytes();
    assert_eq!(
        lp.write(cp, &[0x01, 1, lo, hi]),
        Err(ErrorCode::ValueOutOfRange)
    );
    let st = b.offset_state().unwrap();
    assert_eq!((st.offset, st.counter), (300, 1));
    assert_eq!(lp.process(), 0);
    let vhdl = hdl(&b, Characteristic::VolumeOffsetState);
    assert_eq!(db.read(lp.bearer(), vhdl, 0).unwrap().as_ref(), &[lo, hi, 1]);
}

#[test]
fn control_point_validation() {
    let (_ctx, db, b) = accessory(Config::new());
    let lp = Loopback::connect(&db);
    let br = lp.bearer();
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    let ocp = hdl(&b, Characteristic::VolumeOffsetControlPoint);

    for (h, val) in [(cp, &[0x04, 0, 1][..]), (ocp, &[0x01, 0, 0, 0]), (cp, &[])] {
        assert_eq!(
            db.write(br, Opcode::WriteReq, h, 1, val),
            Err(ErrorCode::InvalidOffset)
        );
    }
    assert_eq!(lp.write(cp, &[]), Err(ErrorCode::InvalidAttributeValueLength));
    assert_eq!(lp.write(ocp, &[]), Err(ErrorCode::InvalidAttributeValueLength));
    assert_eq!(lp.write(cp, &[0x07, 0]), Err(ErrorCode::OpcodeNotSupported));
    assert_eq!(lp.write(ocp, &[0x00, 0, 0, 0]), Err(ErrorCode::OpcodeNotSupported));
    for op in all::<VcsOp>() {
        assert_eq!(lp.write(cp, &[op.into()]), Err(ErrorCode::OpcodeNotSupported));
    }
    assert_eq!(lp.write(cp, &[0x04, 0]), Err(ErrorCode::OpcodeNotSupported));
    assert_eq!(lp.write(ocp, &[0x01, 0, 0]), Err(ErrorCode::OpcodeNotSupported));
    assert_eq!(b.volume_state(), Some(vol(0, false, 0)));
    assert_eq!(b.offset_state(), Some(VolumeOffsetState::default()));

    // Write Command uses the same validation
    assert_eq!(
        db.write(br, Opcode::WriteCmd, cp, 0, &[0x06, 0]),
        Ok(())
    );
    assert_eq!(b.volume_state(), Some(vol(0, true, 1)));

    // State characteristics are read-only
    let vhdl = hdl(&b, Characteristic::VolumeState);
    assert_eq!(lp.write(vhdl, &[1, 0, 0]), Err(ErrorCode::WriteNotPermitted));
    assert_eq!(db.read(br, cp, 0).unwrap_err(), ErrorCode::ReadNotPermitted);
}

#[test]
fn read_values() {
    let cfg = Config::new()
        .with_volume(3)
        .with_mute(true)
        .with_flag(VolumeFlag::Reset)
        .with_location(AudioLocation::FRONT_RIGHT | AudioLocation::BACK_RIGHT)
        .with_description("Right Speaker");
    let (_ctx, db, b) = accessory(cfg);
    let (br, _rx) = crate::att::Bearer::new();
    let read = |c| db.read(&br, hdl(&b, c), 0).unwrap().as_ref().to_vec();
    assert_eq!(read(Characteristic::VolumeState), [3, 1, 0]);
    assert_eq!(read(Characteristic::VolumeFlags), [0]);
    assert_eq!(read(Characteristic::VolumeOffsetState), [0, 0, 0]);
    assert_eq!(read(Characteristic::AudioLocation), [0x44, 0, 0, 0]);
    assert_eq!(read(Characteristic::AudioOutputDescription), b"Right Speaker");
    let vhdl = hdl(&b, Characteristic::AudioOutputDescription);
    assert_eq!(db.read(&br, vhdl, 6).unwrap().as_ref(), b"Speaker");
    assert_eq!(b.description().as_deref(), Some("Right Speaker"));
    assert_eq!(b.volume_flag(), Some(VolumeFlag::Reset));
}

#[test]
fn service_layout() {
    let (ctx, db, b) = accessory(Config::new());
    assert!(Arc::ptr_eq(&ctx.add_db(&db), &b));
    assert!(Arc::ptr_eq(&ctx.binding(&db).unwrap(), &b));
    assert!(ctx.binding(&Db::new()).is_none());

    let vcs = db.services(Service::VolumeControl);
    assert_eq!(vcs.len(), 1);
    assert!(vcs[0].primary);
    let inc = db.includes(&vcs[0]);
    assert_eq!(inc.len(), 1);
    assert_eq!(inc[0].uuid, Service::VolumeOffsetControl.uuid());
    assert!(!inc[0].primary);
    assert_eq!(db.services(Service::VolumeOffsetControl), inc);

    let chars: Vec<_> = db.characteristics(&vcs[0]).iter().map(|c| c.uuid).collect();
    assert_eq!(
        chars,
        [
            Characteristic::VolumeState.uuid(),
            Characteristic::VolumeControlPoint.uuid(),
            Characteristic::VolumeFlags.uuid(),
        ]
    );
    let ochars = db.characteristics(&inc[0]);
    assert_eq!(ochars.len(), 4);
    for c in db.characteristics(&vcs[0]).iter().chain(&ochars) {
        assert_eq!(db.cccd(c.vhdl).is_some(), c.props.contains(crate::gatt::Prop::NOTIFY));
    }
    db.dump();
}

#[test]
fn missing_state() {
    let (ctx, db, b) = accessory(Config::new());
    let lp = Loopback::connect(&db);
    let ntf = subscribe(&lp, hdl(&b, Characteristic::VolumeState));
    let (cp, ocp) = (
        hdl(&b, Characteristic::VolumeControlPoint),
        hdl(&b, Characteristic::VolumeOffsetControlPoint),
    );
    let vhdl = hdl(&b, Characteristic::VolumeState);
    assert!(ctx.remove_db(&db));
    assert!(!ctx.remove_db(&db));
    assert!(ctx.binding(&db).is_none());
    assert_eq!(b.volume_state(), None);

    // Missing state is reported as success, but nothing changes
    assert_eq!(lp.write(cp, &[0x04, 0, 42]), Ok(()));
    assert_eq!(lp.write(ocp, &[0x01, 0, 1, 0]), Ok(()));
    assert_eq!(lp.process(), 0);
    assert!(ntf.lock().is_empty());
    assert_eq!(
        db.read(lp.bearer(), vhdl, 0).unwrap_err(),
        ErrorCode::UnlikelyError
    );

    // Requests fail once the context is dropped
    drop((ctx, b));
    assert_eq!(lp.write(cp, &[0x04, 0, 42]), Err(ErrorCode::UnlikelyError));
}

#[test]
fn session_per_connection() {
    let (ctx, db, b) = accessory(Config::new());
    let (attached, fa) = counter();
    let (detached, fd) = counter();
    ctx.register(Some(fa), Some(fd)).unwrap();
    let cp = hdl(&b, Characteristic::VolumeControlPoint);

    let (a, c) = (Loopback::connect(&db), Loopback::connect(&db));
    assert_eq!(a.write(cp, &[0x01, 0]), Ok(()));
    assert_eq!(a.write(cp, &[0x01, 1]), Ok(()));
    assert_eq!(c.write(cp, &[0x01, 2]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(3, false, 3)));
    assert_eq!(attached.load(Ordering::Relaxed), 2);

    let ss = ctx.sessions();
    assert_eq!(ss.len(), 2);
    assert_eq!(ss[0].bearer().unwrap().id(), a.bearer().id());
    assert_eq!(ss[1].bearer().unwrap().id(), c.bearer().id());
    assert!(ss.iter().all(|s| Arc::ptr_eq(s.local(), &b) && s.remote_db().is_none()));
    drop(ss);

    a.disconnect();
    assert_eq!(detached.load(Ordering::Relaxed), 1);
    let ss = ctx.sessions();
    assert_eq!(ss.len(), 1);
    assert_eq!(ss[0].bearer().unwrap().id(), c.bearer().id());
}

#[test]
fn observers() {
    let (ctx, db, _) = accessory(Config::new());
    assert!(ctx.register(None, None).is_none());
    let (attached, fa) = counter();
    let (detached, fd) = counter();
    let a = ctx.register(Some(fa), None).unwrap();
    let d = ctx.register(None, Some(fd)).unwrap();
    assert!(a < d);

    let s = ctx.session(&db, None);
    assert!(!s.is_attached());
    s.detach();
    assert_eq!(detached.load(Ordering::Relaxed), 0);

    s.attach(None).unwrap();
    s.attach(None).unwrap();
    assert!(s.is_attached());
    assert_eq!(attached.load(Ordering::Relaxed), 1);
    s.detach();
    s.detach();
    assert!(!s.is_attached());
    assert_eq!(detached.load(Ordering::Relaxed), 1);

    assert!(ctx.unregister(a));
    assert!(!ctx.unregister(a));
    s.attach(None).unwrap();
    assert_eq!(attached.load(Ordering::Relaxed), 1);

    // Dropping the last handle detaches the session
    drop(s);
    assert_eq!(detached.load(Ordering::Relaxed), 2);
    assert!(ctx.sessions().is_empty());
}

/// Returns a peer accessory database with a connected client.
fn peer(cfg: Config) -> (Context, Arc<Db>, Loopback) {
    let (ctx, db, _) = accessory(cfg);
    let lp = Loopback::connect(&db);
    (ctx, db, lp)
}

#[test]
fn discovery() -> anyhow::Result<()> {
    let (ctx, ldb, _) = accessory(Config::new());
    let (_pctx, rdb, lp) = peer(Config::new().with_volume(7).with_description("Peer"));
    let client: Arc<dyn Client> = Arc::new(lp.clone());

    let s = ctx.session(&ldb, Some(&rdb));
    let mut rx = s.remote_state();
    s.attach(Some(&client))?;
    assert!(s.is_attached());
    assert_eq!(lp.pending_reads(), 5);
    assert_eq!(lp.notify_registrations(), 5);
    for svc in (rdb.services(Service::VolumeControl).iter())
        .chain(&rdb.services(Service::VolumeOffsetControl))
    {
        assert!(rdb.is_claimed(svc.handle()));
    }

    // Repeated discovery and attach do not duplicate bindings
    s.discover();
    assert_eq!(s.attach(Some(&client)), Err(Error::AlreadyAttached));
    assert_eq!(lp.pending_reads(), 5);
    assert_eq!(lp.notify_registrations(), 5);

    assert_eq!(lp.process(), 5);
    assert!(rx.has_changed()?);
    let st = rx.borrow_and_update().clone();
    assert_eq!(st.volume, Some(vol(7, false, 0)));
    assert_eq!(st.flag, Some(VolumeFlag::UserSet));
    assert_eq!(st.offset, Some(VolumeOffsetState::default()));
    assert_eq!(st.location, Some(AudioLocation::FRONT_LEFT));
    assert_eq!(st.description.as_deref(), Some("Peer"));

    // Remote changes are observed through notifications
    let cp = s.remote_handle(Characteristic::VolumeControlPoint).unwrap();
    assert_eq!(lp.write(cp, &[0x04, 0, 99]), Ok(()));
    let ocp = s.remote_handle(Characteristic::VolumeOffsetControlPoint).unwrap();
    assert_eq!(lp.write(ocp, &[0x01, 0, 5, 0]), Ok(()));
    assert_eq!(lp.process(), 2);
    let st = rx.borrow_and_update().clone();
    assert_eq!(st.volume, Some(vol(99, false, 1)));
    assert_eq!(st.offset.map(|o| (o.offset, o.counter)), Some((5, 1)));

    s.detach();
    assert!(!s.is_attached());
    assert_eq!(lp.notify_registrations(), 0);
    assert_eq!(s.remote_handle(Characteristic::VolumeState), None);
    assert_eq!(lp.write(cp, &[0x04, 1, 0]), Ok(()));
    assert_eq!(lp.process(), 0);
    Ok(())
}

#[test]
fn drop_releases_operations() {
    let (ctx, ldb, _) = accessory(Config::new());
    let (_pctx, rdb, lp) = peer(Config::new());
    let client: Arc<dyn Client> = Arc::new(lp.clone());
    let (detached, fd) = counter();
    ctx.register(None, Some(fd));

    let s = ctx.session(&ldb, Some(&rdb));
    s.attach(Some(&client)).unwrap();
    assert_eq!(lp.pending_reads(), 5);
    drop(s);
    assert_eq!(detached.load(Ordering::Relaxed), 1);
    assert_eq!(lp.pending_reads(), 0);
    assert_eq!(lp.notify_registrations(), 0);
    assert_eq!(lp.process(), 0);
}

#[test]
fn attach_failures() {
    let (ctx, ldb, _) = accessory(Config::new());
    let (_pctx, rdb, lp) = peer(Config::new());
    let client: Arc<dyn Client> = Arc::new(lp.clone());

    let s = ctx.session(&ldb, None);
    assert_eq!(s.attach(Some(&client)), Err(Error::NoRemoteDb));
    assert!(s.is_attached());

    // Failed client clone leaves the session registered
    let s = ctx.session(&ldb, Some(&rdb));
    lp.disconnect();
    assert_matches!(s.attach(Some(&client)), Err(Error::ClientClone));
    assert!(s.is_attached());
    assert_eq!(lp.notify_registrations(), 0);

    let s = Context::new(Config::new()).session(&Db::new(), None);
    assert_eq!(s.attach(None), Err(Error::ContextClosed));
}

#[test]
fn session_data() {
    let (ctx, db, b) = accessory(Config::new());
    let lp = Loopback::connect(&db);
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    assert_eq!(lp.write(cp, &[0x01, 0]), Ok(()));
    let s = ctx.sessions().pop().unwrap();

    let msgs = Arc::new(Mutex::new(Vec::<String>::new()));
    let m = Arc::clone(&msgs);
    s.set_debug(Some(Arc::new(move |msg: &str| m.lock().push(msg.to_owned()))));
    assert_eq!(lp.write(cp, &[0x01, 0]), Err(ErrorCode::InvalidChangeCounter));
    assert_eq!(lp.write(cp, &[0x01, 1]), Ok(()));
    assert!(msgs.lock().iter().any(|m| m.contains("Relative Volume Up")));
    s.set_debug(None);

    assert!(s.user_data().is_none());
    s.set_user_data(Some(Arc::new(5_u32)));
    let v = s.user_data().unwrap();
    assert_eq!(v.downcast_ref::<u32>(), Some(&5));
    assert!(ctx.sessions()[0].ptr_eq(&s));
    assert!(ctx.sessions()[0].user_data().is_some());
}

#[tokio::test]
async fn disconnect_detaches() {
    let (ctx, db, b) = accessory(Config::new());
    let lp = Loopback::connect(&db);
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    assert_eq!(lp.write(cp, &[0x01, 0]), Ok(()));
    assert_eq!(ctx.sessions().len(), 1);

    let br = Arc::clone(lp.bearer());
    let wait = tokio::spawn(async move { br.closed().await });
    lp.disconnect();
    wait.await.unwrap();
    assert!(ctx.sessions().is_empty());
    assert_eq!(lp.write(cp, &[0x01, 1]), Ok(()));
    assert_eq!(b.volume_state(), Some(vol(2, false, 2)));
}

#[test]
fn config() {
    let cfg = Config::default();
    assert_eq!(cfg.step, 1);
    assert_eq!(cfg.flag, VolumeFlag::UserSet);
    assert_eq!(cfg.location, AudioLocation::FRONT_LEFT);
    assert_eq!(cfg.description, "Left Speaker");
    let cfg = Config::new().with_step(5).with_description("Right");
    assert_eq!((cfg.step, cfg.description.as_str()), (5, "Right"));
}

#[cfg(feature = "json")]
#[test]
fn config_json() -> anyhow::Result<()> {
    let cfg = Config::from_json(r#"{"step": 5, "mute": true, "flag": "Reset"}"#)?;
    assert_eq!(cfg, Config::new().with_step(5).with_mute(true).with_flag(VolumeFlag::Reset));
    assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    assert!(Config::from_json(r#"{"step": 256}"#).is_err());
    let s = serde_json::to_string(&Config::default())?;
    assert_eq!(Config::from_json(&s)?, Config::default());
    Ok(())
}

#[test]
fn sink_reads_binding() {
    let (ctx, db, b) = accessory(Config::new());
    let lp = Loopback::connect(&db);
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    let ocp = hdl(&b, Characteristic::VolumeOffsetControlPoint);
    assert_eq!(lp.write(cp, &[0x01, 0]), Ok(()));
    let s = ctx.sessions().pop().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (bb, v) = (Arc::clone(&b), Arc::clone(&seen));
    s.set_debug(Some(Arc::new(move |_: &str| {
        v.lock().push((bb.volume_state(), bb.offset_state()));
    })));
    assert_eq!(lp.write(cp, &[0x01, 1]), Ok(()));
    assert!(seen.lock().contains(&(Some(vol(2, false, 2)), Some(VolumeOffsetState::default()))));

    seen.lock().clear();
    assert!(ctx.remove_db(&db));
    assert_eq!(lp.write(cp, &[0x01, 2]), Ok(()));
    assert_eq!(lp.write(ocp, &[0x01, 0, 1, 0]), Ok(()));
    let seen = seen.lock();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|&st| st == (None, None)));
}

#[test]
fn concurrent_writers() {
    const THREADS: usize = 4;
    const WRITES: usize = 50;
    let (ctx, db, b) = accessory(Config::new());
    let cp = hdl(&b, Characteristic::VolumeControlPoint);
    let ok = AtomicUsize::new(0);
    std::thread::scope(|sc| {
        for _ in 0..THREADS {
            sc.spawn(|| {
                let lp = Loopback::connect(&db);
                let mut done = 0;
                while done < WRITES {
                    let counter = b.volume_state().unwrap().counter;
                    match lp.write(cp, &[0x01, counter]) {
                        Ok(()) => {
                            done += 1;
                            ok.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => assert_eq!(e, ErrorCode::InvalidChangeCounter),
                    }
                }
            });
        }
    });
    let n = ok.load(Ordering::Relaxed);
    assert_eq!(n, THREADS * WRITES);
    let n = u8::try_from(n).unwrap();
    assert_eq!(b.volume_state(), Some(vol(n, false, n)));
    assert_eq!(ctx.sessions().len(), THREADS);
}

#[test]
fn concurrent_handles() {
    let (ctx, db, _) = accessory(Config::new());
    let (detached, fd) = counter();
    ctx.register(None, Some(fd)).unwrap();
    let s = ctx.session(&db, None);
    s.attach(None).unwrap();

    let handles: Vec<Session> = (0..8).map(|_| s.clone()).collect();
    drop(s);
    let ctx = &ctx;
    std::thread::scope(|sc| {
        for h in handles {
            sc.spawn(move || {
                for _ in 0..1000 {
                    let c = h.clone();
                    assert!(c.is_attached());
                    drop(c);
                    drop(ctx.sessions());
                }
            });
        }
    });
    assert_eq!(detached.load(Ordering::Relaxed), 1);
    assert!(ctx.sessions().is_empty());
}

#[test]
fn observer_keeps_session() {
    let (ctx, db, _) = accessory(Config::new());
    let kept = Arc::new(Mutex::new(Vec::<Session>::new()));
    let k = Arc::clone(&kept);
    let (detached, fd) = counter();
    ctx.register(None, Some(fd)).unwrap();
    ctx.register(None, Some(Arc::new(move |s: &Session| k.lock().push(s.clone()))))
        .unwrap();

    let s = ctx.session(&db, None);
    s.attach(None).unwrap();
    drop(s);
    assert_eq!(detached.load(Ordering::Relaxed), 1);
    assert!(ctx.sessions().is_empty());

    let s = kept.lock().pop().unwrap();
    assert!(!s.is_attached());
    drop(s);
    assert_eq!(detached.load(Ordering::Relaxed), 1);

    // A session kept by an observer can be attached again
    let s = ctx.session(&db, None);
    s.attach(None).unwrap();
    drop(s);
    let s = kept.lock().pop().unwrap();
    s.attach(None).unwrap();
    assert_eq!(ctx.sessions().len(), 1);
    drop(s);
    assert_eq!(detached.load(Ordering::Relaxed), 3);
    let s = kept.lock().pop();
    assert!(s.is_some() && kept.lock().is_empty());
    drop(s);
    assert_eq!(detached.load(Ordering::Relaxed), 3);
    assert!(ctx.sessions().is_empty());
}
