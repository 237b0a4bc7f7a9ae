//!The capability every hardware-bound object shares.

use std::{
    any::Any,
    sync::{Arc, Mutex, MutexGuard},
};

///A hardware-bound object that owns one physical resource, identified by a process-unique key.
///
///Devices are opened by construction and closed exactly once. `close` never fails: secondary errors
///while releasing hardware are logged and swallowed so it is safe to call from `Drop` and from
///`DeviceRegistry::shutdown`.
pub trait Device: Send + Sync + 'static {
    fn key(&self) -> &str;

    ///Release the underlying hardware and unregister. Calling it again is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;

    ///Used by `DeviceRegistry::lookup_as` to hand back the concrete device type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

//recover the guard when a panicking holder poisoned the lock; device state stays usable
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
