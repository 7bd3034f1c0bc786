use models::Error;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::engine::SnapshotCreator;
use crate::scheduler::Scheduler;

/// Arguments handed to runtime construction untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StartupArgs {
    pub args: Vec<String>,
    pub exec_args: Vec<String>,
}
impl StartupArgs {
    pub fn new(args: Vec<String>, exec_args: Vec<String>) -> Self {
        StartupArgs { args, exec_args }
    }
}

/// Constructs runtime instances against an isolate owned by `C`.
pub trait RuntimeFactory<C: SnapshotCreator> {
    type Instance: RuntimeInstance<C>;

    /// Runs the isolate-level bootstrap. The isolate must already be
    /// registered with `platform`.
    fn create(
        &self,
        creator: &mut C,
        event_loop: &Handle,
        platform: &dyn Scheduler,
        startup: &StartupArgs,
    ) -> Result<Self::Instance, Error>;
}

pub trait RuntimeInstance<C: SnapshotCreator> {
    /// Registers the instance's per-isolate fields with the serializer and
    /// returns where they landed, in registration order.
    fn serialize_isolate_data(&mut self, creator: &mut C) -> Result<Vec<usize>, Error>;

    /// Creates the fully bootstrapped main context.
    fn new_context(&mut self, creator: &mut C) -> Result<C::Context, Error>;

    /// Runs after the blob exists, when the isolate has already been consumed
    /// by `create_blob`. Implementations must not touch the isolate here.
    fn dispose(self);
}
