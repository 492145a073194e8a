//! Attribute Protocol ([Vol 3] Part F).
//!
//! Only the parts of ATT that the volume control engine interacts with are
//! modeled here: handles, error codes, access permissions, and the per
//! connection bearer that carries requests and notifications.

pub use {bearer::*, consts::*, handle::*, perm::*};

mod bearer;
mod consts;
mod handle;
mod perm;
