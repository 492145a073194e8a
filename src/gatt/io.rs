use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

use structbuf::{Pack, StructBuf};

use burble_const::Uuid;

use crate::name_of;

use super::*;

/// I/O callback result type.
pub type IoResult = Result<(), ErrorCode>;

/// Characteristic I/O callback.
#[derive(Clone)]
#[repr(transparent)]
pub struct Io(Arc<dyn for<'a> Fn(IoReq<'a>) -> IoResult + Send + Sync>);

impl Io {
    /// Returns an I/O callback for a method of `T` that does not keep `T`
    /// alive. Requests fail with `UnlikelyError` once `T` is dropped. This is
    /// used when `T` owns the database that owns the callback.
    #[inline]
    pub fn weak<T: Send + Sync + 'static>(
        this: &Weak<T>,
        f: impl Fn(&T, IoReq) -> IoResult + Send + Sync + 'static,
    ) -> Self {
        let this = Weak::clone(this);
        Self(Arc::new(move |req: IoReq| {
            this.upgrade()
                .map_or(Err(ErrorCode::UnlikelyError), |this| f(&this, req))
        }))
    }

    /// Executes the request.
    #[inline(always)]
    pub(super) fn exec(&self, req: IoReq) -> IoResult {
        (self.0)(req)
    }
}

impl Debug for Io {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        (f.debug_tuple(name_of!(Io)).field(&Arc::as_ptr(&self.0).cast::<()>())).finish()
    }
}

impl<T: Fn(IoReq) -> IoResult + Send + Sync + 'static> From<T> for Io {
    #[inline(always)]
    fn from(f: T) -> Self {
        Self(Arc::new(f))
    }
}

/// Characteristic I/O request.
#[derive(Debug)]
#[non_exhaustive]
pub enum IoReq<'a> {
    Read(&'a mut ReadReq),
    Write(&'a WriteReq<'a>),
}

/// Server characteristic read request.
#[derive(Debug)]
pub struct ReadReq {
    pub(super) op: Opcode,
    pub(super) hdl: Handle,
    pub(super) uuid: Uuid,
    pub(super) off: u16,
    pub(super) buf: StructBuf,
}

impl ReadReq {
    /// Creates a new read request.
    #[inline]
    pub(super) fn new(hdl: Handle, uuid: Uuid, off: u16) -> Self {
        Self {
            op: Opcode::read(off),
            hdl,
            uuid,
            off,
            buf: StructBuf::new(MAX_VAL_LEN),
        }
    }

    /// Returns the request opcode.
    #[inline(always)]
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.op
    }

    /// Returns the attribute handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.hdl
    }

    /// Returns the attribute UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the value offset.
    #[inline(always)]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.off as _
    }

    /// Provides the complete attribute value with automatic offset handling.
    #[inline]
    pub fn complete(&mut self, v: impl AsRef<[u8]>) -> IoResult {
        let v = v.as_ref();
        let v = (v.get(self.offset()..)).ok_or(ErrorCode::InvalidOffset)?;
        self.buf.clear();
        self.buf.put_at(0, &v[..v.len().min(self.buf.lim())]);
        Ok(())
    }

    /// Returns the value provided by the callback.
    #[inline(always)]
    pub(super) fn into_value(self) -> StructBuf {
        self.buf
    }
}

/// Server characteristic write request.
#[derive(Debug)]
pub struct WriteReq<'a> {
    pub(super) br: &'a Arc<Bearer>,
    pub(super) op: Opcode,
    pub(super) hdl: Handle,
    pub(super) uuid: Uuid,
    pub(super) off: u16,
    pub(super) val: &'a [u8],
}

impl<'a> WriteReq<'a> {
    /// Returns the bearer of the connection that issued the request.
    #[inline(always)]
    #[must_use]
    pub const fn bearer(&self) -> &'a Arc<Bearer> {
        self.br
    }

    /// Returns the request opcode.
    #[inline(always)]
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.op
    }

    /// Returns the attribute handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.hdl
    }

    /// Returns the attribute UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the value offset.
    #[inline(always)]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.off as _
    }

    /// Returns the value to be written at the specified offset.
    #[inline(always)]
    #[must_use]
    pub const fn value(&self) -> &'a [u8] {
        self.val
    }
}

impl<'a> AsRef<[u8]> for WriteReq<'a> {
    #[inline(always)]
    fn as_ref(&self) -> &'a [u8] {
        self.val
    }
}
