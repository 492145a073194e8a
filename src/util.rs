/// Mutex used for state that is never held across an await point.
pub(crate) type SyncMutex<T> = parking_lot::Mutex<T>;

/// Returns a string representation of the specified type.
macro_rules! name_of {
    ($t:ty) => {{
        type _T = $t; // Allows $t to be recognized as a type for refactoring
        stringify!($t)
    }};
}
pub(crate) use name_of;

/// Implements `Display` for types that already implement `Debug`.
macro_rules! impl_display_via_debug {
    { $($t:ty),+ $(,)? } => {$(
        impl ::core::fmt::Display for $t {
            #[inline(always)]
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::fmt::Debug::fmt(self, f)
            }
        }
    )+};
}
pub(crate) use impl_display_via_debug;

/// Allocates a non-zero id from a monotonic counter, skipping zero on wrap.
#[inline]
pub(crate) fn next_id(n: &std::sync::atomic::AtomicU32) -> std::num::NonZeroU32 {
    use std::sync::atomic::Ordering::Relaxed;
    loop {
        if let Some(id) = std::num::NonZeroU32::new(n.fetch_add(1, Relaxed).wrapping_add(1)) {
            return id;
        }
    }
}
