//! Builds a startup snapshot of a bootstrapped runtime and emits it as C++
//! source that can be linked into the binary that later loads it.
//!
//! The pipeline is a fixed sequence of typed stages:
//!
//! ```text
//! Allocated -> Registered -> Bound -> Recording -> Finalized -> Disposed -> Unregistered
//! ```
//!
//! Each transition consumes the previous stage, so the ordering constraints of
//! the engine (no handle scope during blob creation, dispose before the isolate
//! leaves the platform registry, ...) are enforced by the compiler.
//! [`SnapshotBuilder`] drives the whole sequence.

pub mod binder;
pub mod blob;
pub mod builder;
pub mod config;
pub mod engine;
pub mod format;
pub mod logger;
pub mod output;
pub mod runtime;
pub mod scheduler;
pub mod teardown;
#[cfg(feature = "v8")]
pub mod v8_engine;

pub use builder::SnapshotBuilder;
pub use engine::{
    Engine, ExternalReferences, FunctionCodeHandling, HandleScope, Isolate, SnapshotCreator,
    StartupBlob, MAIN_CONTEXT_INDEX,
};
pub use format::{format_blob, parse_embedded, EmbeddedSnapshot, SnapshotFormat};
pub use models::{Error, ErrorKind, IsolateId, OptionExt, ResultExt};
pub use runtime::{RuntimeFactory, RuntimeInstance, StartupArgs};
pub use scheduler::{PlatformScheduler, Registration, Scheduler};
