//! Control point write dispatcher.

use std::fmt::Debug;
use std::sync::Weak;

use crate::att::{Bearer, ErrorCode};
use crate::gatt::{Io, IoReq, IoResult, WriteReq};

use super::{Binding, Context, CtxInner, Session};

/// Control point operation table.
pub(super) trait ControlPoint: Copy + Debug + TryFrom<u8> {
    /// Service name used for logging.
    const SERVICE: &'static str;

    /// Returns the operation name.
    fn name(self) -> &'static str;

    /// Returns the minimum parameter length following the opcode.
    fn param_len(self) -> usize;

    /// Executes the operation with parameters `p` on behalf of the client
    /// connected via `br`.
    fn exec(self, s: &Session, br: &Bearer, p: &[u8]) -> IoResult;
}

/// Returns the I/O callback of a control point characteristic. Requests fail
/// with `UnlikelyError` once the context or the binding is dropped.
pub(super) fn io<T: ControlPoint>(ctx: &Weak<CtxInner>, b: &Weak<Binding>) -> Io {
    let (ctx, b) = (Weak::clone(ctx), Weak::clone(b));
    Io::from(move |req: IoReq| {
        let IoReq::Write(w) = req else {
            return Err(ErrorCode::RequestNotSupported);
        };
        let (Some(ctx), Some(b)) = (Context::upgrade(&ctx), b.upgrade()) else {
            return Err(ErrorCode::UnlikelyError);
        };
        let s = ctx.resolve(w.bearer(), &b);
        write::<T>(&s, w)
    })
}

/// Validates and executes a control point write.
pub(super) fn write<T: ControlPoint>(s: &Session, w: &WriteReq) -> IoResult {
    if w.offset() != 0 {
        s.log(format_args!("{} CP write at offset {}", T::SERVICE, w.offset()));
        return Err(ErrorCode::InvalidOffset);
    }
    let Some((&op, p)) = w.value().split_first() else {
        s.log(format_args!("{} CP write without an opcode", T::SERVICE));
        return Err(ErrorCode::InvalidAttributeValueLength);
    };
    let Ok(op) = T::try_from(op) else {
        s.log(format_args!("{} CP opcode {op:#04X} not supported", T::SERVICE));
        return Err(ErrorCode::OpcodeNotSupported);
    };
    if p.len() < op.param_len() {
        s.log(format_args!(
            "{} CP {} parameters too short: {} < {}",
            T::SERVICE,
            op.name(),
            p.len(),
            op.param_len()
        ));
        return Err(ErrorCode::OpcodeNotSupported);
    }
    s.log(format_args!("{} CP {} {p:02X?}", T::SERVICE, op.name()));
    op.exec(s, w.bearer(), p)
}
