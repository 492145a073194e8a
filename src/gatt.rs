//! Generic Attribute Profile ([Vol 3] Part G).
//!
//! Provides the server-side attribute database used by the accessory role and
//! the client interface used by the controller role.

pub use {client::*, consts::*, db::*, io::*, loopback::*};

use crate::att::*;

mod client;
mod consts;
mod db;
mod io;
mod loopback;
