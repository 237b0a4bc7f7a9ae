//!Process-wide ownership table for hardware devices.
//!
//! Every device registers its key when opened and unregisters when closed, so two independently
//! constructed objects can never drive the same pin or bus address at once.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{atomic::AtomicBool, atomic::Ordering, Arc, Mutex, OnceLock, Weak},
};

use tracing::{debug, error, info, warn};

use crate::{
    device::{lock, Device},
    error::DeviceError,
};

#[derive(Default)]
struct RegistryState {
    devices: HashMap<String, Weak<dyn Device>>,
    shutdown: bool,
}

//Upgrading may hand back the last strong reference, whose Drop closes the device and unregisters.
//Only call this once the state lock has been released.
fn is_live(entry: &Weak<dyn Device>) -> bool {
    entry
        .upgrade()
        .map(|device| !device.is_closed())
        .unwrap_or(false)
}

///Maps resource keys to the device currently holding them.
///
///Entries hold weak references: the registry never keeps a device alive on its own, and an entry
///whose device was dropped or closed counts as absent.
#[derive(Default)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
}

static GLOBAL: OnceLock<Arc<DeviceRegistry>> = OnceLock::new();

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    ///A lazily created, process-wide registry for embedders that want one.
    pub fn global() -> Arc<DeviceRegistry> {
        GLOBAL.get_or_init(|| Arc::new(DeviceRegistry::new())).clone()
    }

    ///Insert `device` under `key`. Fails with `AlreadyOpen` while another open device holds the key
    ///and with `RegistryShutdown` once `shutdown` has run.
    pub fn register<D: Device>(&self, key: &str, device: &Arc<D>) -> Result<(), DeviceError> {
        //declared before the guard so the current holder is dropped after the lock is released
        let current: Option<Arc<dyn Device>>;
        let mut state = lock(&self.state);
        if state.shutdown {
            return Err(DeviceError::RegistryShutdown);
        }
        current = state.devices.get(key).and_then(Weak::upgrade);
        if current.as_ref().is_some_and(|holder| !holder.is_closed()) {
            return Err(DeviceError::AlreadyOpen(key.to_string()));
        }
        let entry: Weak<D> = Arc::downgrade(device);
        let entry: Weak<dyn Device> = entry;
        state.devices.insert(key.to_string(), entry);
        debug!("registered device {}", key);
        Ok(())
    }

    ///Remove the entry for `key`. Absent keys are ignored.
    pub fn unregister(&self, key: &str) {
        if lock(&self.state).devices.remove(key).is_some() {
            debug!("unregistered device {}", key);
        }
    }

    //only removes the entry if it still belongs to `device`
    fn unregister_device(&self, key: &str, device: &Weak<dyn Device>) {
        let mut state = lock(&self.state);
        if state
            .devices
            .get(key)
            .is_some_and(|entry| Weak::ptr_eq(entry, device))
        {
            state.devices.remove(key);
            debug!("unregistered device {}", key);
        }
    }

    //the entry is copied out so it is upgraded with the lock released
    fn entry(&self, key: &str) -> Option<Weak<dyn Device>> {
        lock(&self.state).devices.get(key).cloned()
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.entry(key).is_some_and(|entry| is_live(&entry))
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<dyn Device>> {
        self.entry(key)
            .and_then(|entry| entry.upgrade())
            .filter(|device| !device.is_closed())
    }

    ///Like `lookup`, but hands back the concrete device type. Returns `None` when the key is held
    ///by a different kind of device.
    pub fn lookup_as<D: Device>(&self, key: &str) -> Option<Arc<D>> {
        self.lookup(key)
            .and_then(|device| device.into_any().downcast::<D>().ok())
    }

    ///Keys of every open device.
    pub fn keys(&self) -> Vec<String> {
        let entries: Vec<(String, Weak<dyn Device>)> = lock(&self.state)
            .devices
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        entries
            .into_iter()
            .filter(|(_, entry)| is_live(entry))
            .map(|(key, _)| key)
            .collect()
    }

    pub fn is_shutdown(&self) -> bool {
        lock(&self.state).shutdown
    }

    ///Close every registered device, then refuse further registrations.
    ///
    ///Best-effort: a device that panics while closing is logged and the sweep carries on with the
    ///rest. Calling this more than once is a no-op.
    pub fn shutdown(&self) {
        let devices: Vec<(String, Weak<dyn Device>)> = {
            let mut state = lock(&self.state);
            if state.shutdown {
                debug!("device registry already shut down");
                return;
            }
            state.shutdown = true;
            state.devices.drain().collect()
        };

        info!("shutting down device registry, {} device(s) registered", devices.len());
        for (key, entry) in devices {
            let Some(device) = entry.upgrade() else {
                continue;
            };
            debug!("closing device {}", key);
            if catch_unwind(AssertUnwindSafe(|| device.close())).is_err() {
                error!("device {} panicked while closing, continuing shutdown", key);
            }
        }
        info!("device registry shut down");
    }
}

///A device's handle on its own registry entry.
///
///Release removes the entry only if it still points at the owning device, so a late release can
///never evict a newer device that reused the key.
pub struct Registration {
    registry: Arc<DeviceRegistry>,
    key: String,
    entry: Mutex<Option<Weak<dyn Device>>>,
    released: AtomicBool,
}

impl Registration {
    pub fn new(registry: Arc<DeviceRegistry>, key: String) -> Self {
        Self {
            registry,
            key,
            entry: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn register<D: Device>(&self, device: &Arc<D>) -> Result<(), DeviceError> {
        self.registry.register(&self.key, device)?;
        let entry: Weak<D> = Arc::downgrade(device);
        let entry: Weak<dyn Device> = entry;
        *lock(&self.entry) = Some(entry);
        Ok(())
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match lock(&self.entry).take() {
            Some(entry) => self.registry.unregister_device(&self.key, &entry),
            None => warn!("device {} released without being registered", self.key),
        }
    }
}
