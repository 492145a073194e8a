//! Blackrock Bluetooth LE Volume Control Profile engine.
//!
//! Implements both roles of the Volume Control Profile ([VCP]): the
//! accessory-side Volume Control Service and Volume Offset Control Service
//! exposed through a GATT database, and the controller-side client that
//! discovers and observes the same services on a peer.
//!
//! [VCP]: https://www.bluetooth.com/specifications/specs/volume-control-profile-1-0/

#![warn(missing_debug_implementations)]
#![warn(non_ascii_idents)]
#![warn(single_use_lifetimes)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_lifetimes)]
#![warn(unused_qualifications)]
#![warn(clippy::nursery)]
#![warn(clippy::pedantic)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::inline_always)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::get_unwrap)]
#![warn(clippy::mod_module_files)]
#![warn(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![warn(clippy::str_to_string)]
#![warn(clippy::todo)]
#![warn(clippy::try_err)]

pub mod att;
pub mod gatt;
pub mod vcp;

mod util;

pub(crate) use util::*;
