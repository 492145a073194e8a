use std::marker::PhantomData;

use structbuf::{Pack, Packer, StructBuf};

use burble_const::{Descriptor, UuidPacker};

use super::*;

/// Database service definition marker type.
#[derive(Debug)]
pub struct ServiceDef;

/// Database characteristic definition marker type.
#[derive(Debug)]
pub struct CharacteristicDef;

/// Database builder used to define services, characteristics, and descriptors.
/// The builder holds the database write lock, so I/O callbacks are never
/// invoked while a service is being defined.
#[derive(Debug)]
pub struct Builder<'a, T> {
    db: &'a mut DbInner,
    vhdl: Option<Handle>,
    _t: PhantomData<T>,
}

impl<T> Builder<'_, T> {
    /// Creates a read-only GATT profile declaration with value set by `val`.
    fn decl(&mut self, typ: impl Into<Uuid>, val: impl FnOnce(&mut Packer)) -> Handle {
        // Maximum length of the Characteristic declaration value, which is the
        // longest value stored in the database ([Vol 3] Part G, Section 3.3.1).
        let mut b = StructBuf::new(1 + 2 + 16);
        val(&mut b.append());
        self.attr(typ.into(), Access::READ, Val::Data(SmallVec::from_slice(b.as_ref())))
    }

    /// Appends a new attribute entry.
    fn attr(&mut self, typ: Uuid, perms: Access, val: Val) -> Handle {
        let hdl = self.next_handle();
        self.db.attr.push(Attr {
            hdl,
            typ,
            perms,
            val,
        });
        hdl
    }

    /// Returns the next unused handle.
    #[inline]
    fn next_handle(&self) -> Handle {
        (self.db.attr.last()).map_or(Handle::MIN, |at| {
            at.hdl.next().expect("maximum handle reached")
        })
    }

    /// Returns the handle of the last defined attribute.
    #[inline]
    pub(super) fn last_handle(&self) -> Handle {
        self.db.attr.last().map_or(Handle::MIN, |at| at.hdl)
    }

    /// Returns a builder of another definition type.
    #[inline(always)]
    fn builder<U>(&mut self, vhdl: Option<Handle>) -> Builder<'_, U> {
        Builder {
            db: &mut *self.db,
            vhdl,
            _t: PhantomData,
        }
    }
}

impl<'a> Builder<'a, ServiceDef> {
    /// Creates a new service builder.
    #[inline]
    pub(super) fn new(db: &'a mut DbInner) -> Self {
        Self {
            db,
            vhdl: None,
            _t: PhantomData,
        }
    }

    /// Declares a primary or secondary service and any included services
    /// ([Vol 3] Part G, Section 3.2).
    pub(super) fn service(&mut self, primary: bool, uuid: Uuid, include: &[Handle]) -> Handle {
        let typ = if primary {
            Declaration::PrimaryService
        } else {
            Declaration::SecondaryService
        };
        let hdl = self.decl(typ, |v| {
            v.uuid(uuid);
        });
        for &inc in include {
            let s = (self.db.svc.iter())
                .find(|s| s.range.start() == inc)
                .expect("invalid service handle");
            let (end, uuid) = (s.range.end(), s.uuid.as_u16());
            self.decl(Declaration::Include, |v| {
                v.u16(inc).u16(end);
                uuid.map(|u| v.u16(u));
            });
        }
        hdl
    }

    /// Defines a single-value characteristic ([Vol 3] Part G, Section 3.3)
    /// and returns its value handle.
    ///
    /// Mandatory service characteristics must precede optional ones and 16-bit
    /// UUID characteristics should precede 128-bit ones.
    pub fn characteristic<T>(
        &mut self,
        uuid: impl Into<Uuid>,
        props: Prop,
        perms: Access,
        io: impl Into<Io>,
        descs: impl FnOnce(&mut Builder<CharacteristicDef>) -> T,
    ) -> (Handle, T) {
        let uuid = uuid.into();
        let vhdl = self.next_handle().next().expect("maximum handle reached");
        self.decl(Declaration::Characteristic, |v| {
            v.u8(props.bits()).u16(vhdl).uuid(uuid);
        });
        self.attr(uuid, perms, Val::Io(io.into()));
        (self.db.chars).insert(vhdl, CharDef { props, cccd: None });
        let v = descs(&mut self.builder(Some(vhdl)));
        (vhdl, v)
    }
}

impl Builder<'_, CharacteristicDef> {
    /// Declares a Client Characteristic Configuration descriptor
    /// ([Vol 3] Part G, Section 3.3.3.3).
    pub fn cccd(&mut self, perms: Access) -> Handle {
        let vhdl = self.vhdl.expect("not a characteristic builder");
        assert!(
            self.db.chars.get(&vhdl).map_or(true, |c| c.cccd.is_none()),
            "descriptor already exists"
        );
        let typ = Descriptor::ClientCharacteristicConfiguration.uuid();
        let hdl = self.attr(typ, perms, Val::Cccd);
        if let Some(c) = self.db.chars.get_mut(&vhdl) {
            c.cccd = Some(hdl);
        }
        hdl
    }
}
