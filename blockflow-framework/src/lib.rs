//! Blockflow dependency tracking and caching engine
//!
//! This crate provides the bookkeeping underneath a hierarchical block
//! diagram framework: which computed values depend on which inputs, when a
//! cached value may be reused, and how an input port finds its value.
//!
//! # Architecture
//!
//! A **system** ([`SystemBase`]) declares its ports, state and parameter
//! groups and cache entries once. Every declaration receives a
//! [`DependencyTicket`] that is unique within the system.
//!
//! A **context** ([`ContextBase`]) holds the runtime state of one system
//! instance. Contexts live in a [`ContextTree`] mirroring the system
//! hierarchy. Each context owns a [`DependencyGraph`] of trackers, one per
//! ticket, and a [`Cache`] with one value slot per declared cache entry.
//!
//! ## Invalidation
//!
//! ```text
//! source changes ─▶ note_value_change ─▶ subscribers stamped with a new serial
//!                                          │
//! eval_cache_entry ◀── stamp differs from ─┘  (recompute, otherwise reuse)
//! ```
//!
//! Notification only stamps trackers; values are recomputed lazily the next
//! time they are evaluated. Links between contexts are recorded with
//! [`ContextTree::subscribe_across`]: a sibling's output feeding an input
//! ([`ContextTree::subscribe_input_to_output`]), a parent input exported to a
//! child ([`ContextTree::subscribe_input_to_input`]) and a child output
//! exported by its parent ([`ContextTree::subscribe_output_to_output`]).
//! Changes propagate across those links at any depth.
//!
//! ## Input ports
//!
//! An input port's value is, in order of precedence, the value fixed on it
//! in the context, the value its parent coordinator
//! ([`SystemParentService`]) resolves for it, or nothing at all.
//!
//! # Example
//!
//! ```rust
//! use blockflow_framework::prelude::*;
//!
//! struct Doubler;
//!
//! let mut system = SystemBase::new::<Doubler>("doubler");
//! let u = system.declare_input_port("u", PortDataType::abstract_of::<f64>());
//! let u_ticket = system.get_input_port_base(u)?.ticket();
//! let doubled = system
//!     .declare_typed_cache_entry(
//!         "doubled",
//!         0.0_f64,
//!         move |sys: &SystemBase, ctx: ContextRef<'_>, out: &mut f64| {
//!             *out = 2.0 * sys.eval_input_value::<f64>(ctx, u)?.unwrap_or_default();
//!             Ok(())
//!         },
//!         [u_ticket],
//!     )?
//!     .cache_index();
//!
//! let mut tree = ContextTree::new();
//! let ctx = system.create_context(&mut tree, None)?;
//! tree.fix_input_port(ctx, u, AbstractValue::new(21.0_f64))?;
//!
//! let value = system.eval_cache_entry(tree.get(ctx)?, doubled)?;
//! assert_eq!(value.get::<f64>(), Some(&42.0));
//! # Ok::<(), blockflow_framework::FrameworkError>(())
//! ```

#![warn(missing_debug_implementations)]

// Core modules
pub mod cache;
pub mod context;
pub mod error;
pub mod system;
pub mod tracker;

// Supporting modules
pub mod config;
pub mod deprecation;
pub mod metrics;
pub mod naming;
pub mod parent;
pub mod port;
pub mod value;

// Re-export main types
pub use blockflow_types::{
    CacheIndex, DependencyTicket, InputPortIndex, OutputPortIndex, SubsystemIndex, SystemId,
};
pub use cache::{Cache, CacheEntry, CacheEntryValue, ValueAllocator, ValueProducer};
pub use config::{ConfigError, FrameworkConfig};
pub use context::{ContextBase, ContextId, ContextRef, ContextTree, SourceGroup, TrackerLocation};
pub use deprecation::{DeprecationRegistry, WarnedPortSet};
pub use error::{FrameworkError, Result};
pub use metrics::{CacheEntryMetrics, MetricsSnapshot};
pub use parent::SystemParentService;
pub use port::{InputPortBase, OutputPortBase, OutputPortPrerequisite, PortDataType, PortKind};
pub use system::SystemBase;
pub use tracker::{ChangeSerial, DependencyGraph, DependencyTracker};
pub use value::{AbstractValue, BasicVector};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{ContextId, ContextRef, ContextTree};
    pub use crate::error::{FrameworkError, Result};
    pub use crate::parent::SystemParentService;
    pub use crate::port::{InputPortBase, OutputPortPrerequisite, PortDataType};
    pub use crate::system::SystemBase;
    pub use crate::value::{AbstractValue, BasicVector};
    pub use blockflow_types::{CacheIndex, DependencyTicket, InputPortIndex, OutputPortIndex};
}
