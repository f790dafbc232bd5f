//! Shared types for blockflow
//!
//! This crate provides the small identifier types shared by the framework
//! crates: dependency tickets, the dense indices of ports and cache entries,
//! and process-unique system identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a value or value group that can be depended upon
///
/// Tickets are assigned by a system while it declares its ports, state,
/// parameters and cache entries. They stay stable for the lifetime of the
/// system and are the only link between those declarations and the trackers
/// of a runtime context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyTicket(pub usize);

impl DependencyTicket {
    /// Depends on nothing; never changes
    pub const NOTHING: DependencyTicket = DependencyTicket(0);
    /// Time
    pub const TIME: DependencyTicket = DependencyTicket(1);
    /// Integration accuracy
    pub const ACCURACY: DependencyTicket = DependencyTicket(2);
    /// Continuous state
    pub const XC: DependencyTicket = DependencyTicket(3);
    /// All discrete state groups
    pub const XD: DependencyTicket = DependencyTicket(4);
    /// All abstract state groups
    pub const XA: DependencyTicket = DependencyTicket(5);
    /// All state
    pub const X: DependencyTicket = DependencyTicket(6);
    /// All numeric parameter groups
    pub const PN: DependencyTicket = DependencyTicket(7);
    /// All abstract parameter groups
    pub const PA: DependencyTicket = DependencyTicket(8);
    /// All parameters
    pub const ALL_PARAMETERS: DependencyTicket = DependencyTicket(9);
    /// All input ports
    pub const ALL_INPUT_PORTS: DependencyTicket = DependencyTicket(10);
    /// Every source except the input ports
    pub const ALL_SOURCES_EXCEPT_INPUT_PORTS: DependencyTicket = DependencyTicket(11);
    /// Every source
    pub const ALL_SOURCES: DependencyTicket = DependencyTicket(12);

    /// First ticket a system may hand out for its own declarations
    pub const FIRST_ASSIGNABLE: DependencyTicket = DependencyTicket(13);

    pub fn new(ticket: usize) -> Self {
        Self(ticket)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn next(self) -> DependencyTicket {
        DependencyTicket(self.0 + 1)
    }

    /// Returns true for the tickets every context owns before any
    /// system-specific declaration is replayed
    pub fn is_built_in(&self) -> bool {
        *self < Self::FIRST_ASSIGNABLE
    }
}

impl fmt::Display for DependencyTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! dense_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub usize);

        impl $name {
            pub fn new(index: usize) -> Self {
                Self(index)
            }

            pub fn as_usize(&self) -> usize {
                self.0
            }
        }

        impl From<usize> for $name {
            fn from(index: usize) -> Self {
                $name(index)
            }
        }

        impl From<$name> for usize {
            fn from(index: $name) -> Self {
                index.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

dense_index!(
    /// Position of a cache entry in its system's declaration order
    CacheIndex
);
dense_index!(
    /// Position of an input port in its system's declaration order
    InputPortIndex
);
dense_index!(
    /// Position of an output port in its system's declaration order
    OutputPortIndex
);
dense_index!(
    /// Position of a child system within its parent coordinator
    SubsystemIndex
);

static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a system
///
/// Every context records the identity of the system that initialized it, so
/// a system can tell whether a context handed to it is really its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemId(NonZeroU64);

impl SystemId {
    /// Allocate a fresh identity. Never returns the same value twice in one
    /// process.
    pub fn get_new_id() -> Self {
        let raw = NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed);
        SystemId(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
