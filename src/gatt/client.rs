use std::fmt::Debug;
use std::num::NonZeroU32;
use std::sync::Arc;

use super::*;

/// Client request identifier used to cancel reads and remove notification
/// registrations.
pub type ReqId = NonZeroU32;

/// Read completion callback. Called exactly once, unless the request is
/// cancelled, with either the value or the ATT error returned by the server.
pub type ReadCb = Box<dyn FnOnce(Result<&[u8], ErrorCode>) + Send>;

/// Notification callback. Called with the value handle and value of each
/// received notification.
pub type NotifyCb = Arc<dyn Fn(Handle, &[u8]) + Send + Sync>;

/// GATT client bound to a single connection ([Vol 3] Part G, Section 4).
///
/// Callbacks are never invoked from within the method that registers them.
pub trait Client: Debug + Send + Sync {
    /// Returns the connection bearer.
    fn bearer(&self) -> &Arc<Bearer>;

    /// Returns another handle to the same client or `None` if the client can
    /// no longer be used.
    fn try_clone(&self) -> Option<Arc<dyn Client>>;

    /// Reads a characteristic value ([Vol 3] Part G, Section 4.8.1).
    fn read_value(&self, vhdl: Handle, f: ReadCb) -> Option<ReqId>;

    /// Cancels a pending read. The read callback is dropped without being
    /// called.
    fn cancel(&self, id: ReqId) -> bool;

    /// Enables notifications for a characteristic value and registers a
    /// callback to receive them ([Vol 3] Part G, Section 4.10).
    fn register_notify(&self, vhdl: Handle, f: NotifyCb) -> Option<ReqId>;

    /// Removes a notification registration.
    fn unregister_notify(&self, id: ReqId) -> bool;
}
