//! Shared, swappable schema registry with change notifications.
//!
//! Readers take an `Arc` snapshot and hold no lock while they work. Writers build a
//! new registry, swap it in and notify listeners; writers and the listener list are
//! serialized by one mutex. Listeners must not call back into the store.

use super::error::RefError;
use super::patch::patch;
use super::registry::{RegistryBuilder, SchemaRegistry};
use super::types::SchemaId;
use crate::config::Reader;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback invoked with the new registry and the id that changed.
pub type Listener = Box<dyn Fn(&SchemaRegistry, SchemaId) + Send + Sync>;

/// Handle returned by [`SchemaStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

struct Subscriber {
    handle: u64,
    schema: Option<SchemaId>,
    listener: Listener,
}

#[derive(Default)]
struct Listeners {
    next: u64,
    entries: Vec<Subscriber>,
}

pub struct SchemaStore {
    current: RwLock<Arc<SchemaRegistry>>,
    listeners: Mutex<Listeners>,
}

impl std::fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaStore")
            .field("schemas", &self.current.read().len())
            .field("listeners", &self.listeners.lock().entries.len())
            .finish()
    }
}

impl SchemaStore {
    pub fn new(registry: SchemaRegistry) -> Self {
        SchemaStore {
            current: RwLock::new(Arc::new(registry)),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    /// Current registry.
    pub fn snapshot(&self) -> Arc<SchemaRegistry> {
        self.current.read().clone()
    }

    /// Listen for changes to one schema.
    pub fn subscribe<F>(&self, id: SchemaId, listener: F) -> Subscription
    where
        F: Fn(&SchemaRegistry, SchemaId) + Send + Sync + 'static,
    {
        self.add_listener(Some(id), Box::new(listener))
    }

    /// Listen for every change, including whole-registry replacement.
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SchemaRegistry, SchemaId) + Send + Sync + 'static,
    {
        self.add_listener(None, Box::new(listener))
    }

    fn add_listener(&self, schema: Option<SchemaId>, listener: Listener) -> Subscription {
        let mut listeners = self.listeners.lock();
        listeners.next += 1;
        let handle = listeners.next;
        listeners.entries.push(Subscriber {
            handle,
            schema,
            listener,
        });
        Subscription(handle)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.listeners
            .lock()
            .entries
            .retain(|s| s.handle != subscription.0);
    }

    /// Swap in a new registry; every listener is notified.
    pub fn replace(&self, registry: SchemaRegistry) {
        let listeners = self.listeners.lock();
        let registry = Arc::new(registry);
        *self.current.write() = registry.clone();
        debug!("Schema registry replaced ({} schemas)", registry.len());
        for subscriber in &listeners.entries {
            match subscriber.schema {
                Some(id) if id.index() < registry.len() => (subscriber.listener)(&registry, id),
                Some(_) => {}
                None => {
                    if let Some(first) = registry.ids().next() {
                        (subscriber.listener)(&registry, first);
                    }
                }
            }
        }
    }

    /// Merge `overlay` into `base` and notify listeners of `base`.
    pub fn patch(&self, base: SchemaId, overlay: SchemaId) {
        let result = self.update(base, |builder| {
            patch(builder, base, overlay);
            Ok(())
        });
        if let Err(e) = result {
            warn!("Schema patch failed: {}", e);
        }
    }

    /// Load `overlay` as a new document, link it and merge it into `base`.
    pub fn patch_document(
        &self,
        base: SchemaId,
        url: &str,
        overlay: Value,
        reader: &dyn Reader,
    ) -> Result<SchemaId, RefError> {
        let mut overlay_id = None;
        self.update(base, |builder| {
            let id = builder.load_root(url, overlay)?;
            builder.link(reader)?;
            patch(builder, base, id);
            overlay_id = Some(id);
            Ok(())
        })?;
        overlay_id.ok_or_else(|| RefError::unresolved(url, "overlay not loaded"))
    }

    fn update<F>(&self, changed: SchemaId, edit: F) -> Result<(), RefError>
    where
        F: FnOnce(&mut RegistryBuilder) -> Result<(), RefError>,
    {
        let listeners = self.listeners.lock();
        let mut builder = RegistryBuilder::from((*self.snapshot()).clone());
        edit(&mut builder)?;
        let registry = Arc::new(builder.build());
        *self.current.write() = registry.clone();
        debug!("Schema {} patched", changed);
        for subscriber in &listeners.entries {
            if subscriber.schema.is_none() || subscriber.schema == Some(changed) {
                (subscriber.listener)(&registry, changed);
            }
        }
        Ok(())
    }
}
