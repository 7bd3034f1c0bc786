use std::ops::{Deref, DerefMut};

use models::{Error, IsolateId};

/// Index the loader expects the main context to occupy among the contexts
/// added to the snapshot. The default context is not counted.
pub const MAIN_CONTEXT_INDEX: usize = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionCodeHandling {
    /// Drop compiled function code; only the object graph is kept.
    Clear,
}

/// Native addresses the serializer may encounter while walking the heap.
///
/// Read once when the snapshot creator is constructed. Backends append their
/// own terminator, so an empty list is the null placeholder table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalReferences(Vec<usize>);
impl ExternalReferences {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, address: usize) {
        self.0.push(address)
    }
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl FromIterator<usize> for ExternalReferences {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        ExternalReferences(iter.into_iter().collect())
    }
}

pub trait Isolate {
    fn id(&self) -> IsolateId;
}

/// The virtual machine that owns heaps and knows how to serialize them.
pub trait Engine {
    type Isolate: Isolate;
    type Creator: SnapshotCreator;

    /// Reserves a fresh isolate. Failing here means the process is out of
    /// memory; callers treat it as fatal.
    fn allocate(&self) -> Result<Self::Isolate, Error>;

    fn snapshot_creator(
        &self,
        isolate: Self::Isolate,
        external_references: &ExternalReferences,
    ) -> Result<Self::Creator, Error>;
}

/// Serializer bound to a single isolate.
///
/// `create_blob` takes `self`: once finalized the creator can no longer be
/// used.
pub trait SnapshotCreator {
    type Context;
    type Blob: StartupBlob;

    fn isolate_id(&self) -> IsolateId;

    fn enter_handle_scope(&mut self);
    fn exit_handle_scope(&mut self);

    /// Plain context with no runtime setup.
    fn new_context(&mut self) -> Result<Self::Context, Error>;
    fn set_default_context(&mut self, context: Self::Context) -> Result<(), Error>;
    fn add_context(&mut self, context: Self::Context) -> Result<usize, Error>;

    fn create_blob(self, function_code_handling: FunctionCodeHandling)
        -> Result<Self::Blob, Error>;
}

/// Serialized heap. Dropping the value releases its buffer.
pub trait StartupBlob {
    fn data(&self) -> &[u8];
    fn can_be_rehashed(&self) -> bool;
}

/// Handle region over a snapshot creator.
///
/// While the guard is alive it holds the creator mutably, so `create_blob`
/// cannot be reached until the region is closed.
pub struct HandleScope<'a, C: SnapshotCreator> {
    creator: &'a mut C,
}
impl<'a, C: SnapshotCreator> HandleScope<'a, C> {
    pub fn new(creator: &'a mut C) -> Self {
        creator.enter_handle_scope();
        HandleScope { creator }
    }
}
impl<'a, C: SnapshotCreator> Deref for HandleScope<'a, C> {
    type Target = C;
    fn deref(&self) -> &Self::Target {
        self.creator
    }
}
impl<'a, C: SnapshotCreator> DerefMut for HandleScope<'a, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.creator
    }
}
impl<'a, C: SnapshotCreator> Drop for HandleScope<'a, C> {
    fn drop(&mut self) {
        self.creator.exit_handle_scope();
    }
}
