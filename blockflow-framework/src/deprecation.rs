//! Once-per-process reporting of deprecated ports
//!
//! A port is reported at most once per (system type, direction, port name)
//! in the whole process. Each port first checks its own atomic flag, which
//! keeps repeat evaluations lock-free; the first evaluation per port object
//! then consults a shared registry of hashed keys.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Set of deprecation keys that have already been reported
pub trait DeprecationRegistry: Send + Sync + fmt::Debug {
    /// Record `key`; returns true if it was not present before
    fn insert_if_absent(&self, key: u64) -> bool;
}

/// Lock-protected key set
#[derive(Debug, Default)]
pub struct WarnedPortSet {
    warned: Mutex<HashSet<u64>>,
}

impl WarnedPortSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.warned.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.warned.lock().is_empty()
    }
}

impl DeprecationRegistry for WarnedPortSet {
    fn insert_if_absent(&self, key: u64) -> bool {
        self.warned.lock().insert(key)
    }
}

// Created on first use and kept for the life of the process.
static PROCESS_REGISTRY: Lazy<Arc<WarnedPortSet>> = Lazy::new(|| Arc::new(WarnedPortSet::new()));

/// The registry shared by every system that was not given its own
pub fn process_registry() -> Arc<dyn DeprecationRegistry> {
    PROCESS_REGISTRY.clone()
}

/// Key identifying a port of a system type, independent of instance
pub fn deprecation_key(system_type: &str, is_input: bool, port_name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    system_type.hash(&mut hasher);
    is_input.hash(&mut hasher);
    port_name.hash(&mut hasher);
    hasher.finish()
}
