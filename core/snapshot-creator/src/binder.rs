use models::{Error, IsolateId};
use tokio::runtime::Handle;
use tracing::instrument;

use crate::engine::{Engine, ExternalReferences, Isolate};
use crate::scheduler::{Registration, Scheduler};

/// A freshly allocated isolate, not yet known to the platform.
pub struct Allocated<I: Isolate> {
    isolate: I,
}
impl<I: Isolate> Allocated<I> {
    #[instrument(skip_all)]
    pub fn allocate<E: Engine<Isolate = I>>(engine: &E) -> Result<Self, Error> {
        let isolate = engine.allocate()?;
        tracing::debug!("allocated {}", isolate.id());
        Ok(Allocated { isolate })
    }

    pub fn id(&self) -> IsolateId {
        self.isolate.id()
    }

    pub fn register<'s>(
        self,
        scheduler: &'s dyn Scheduler,
        event_loop: &Handle,
    ) -> Result<Registered<'s, I>, Error> {
        let registration = Registration::register(scheduler, self.isolate.id(), event_loop)?;
        Ok(Registered {
            isolate: self.isolate,
            event_loop: event_loop.clone(),
            registration,
        })
    }
}

/// An isolate the platform can schedule work for.
pub struct Registered<'s, I: Isolate> {
    isolate: I,
    event_loop: Handle,
    registration: Registration<'s>,
}
impl<'s, I: Isolate> Registered<'s, I> {
    pub fn id(&self) -> IsolateId {
        self.registration.isolate()
    }

    /// Hands the isolate to a snapshot creator. The reference table is read
    /// here and never again.
    #[instrument(skip_all, fields(isolate = %self.id()))]
    pub fn bind<E: Engine<Isolate = I>>(
        self,
        engine: &E,
        external_references: &ExternalReferences,
    ) -> Result<Bound<'s, E::Creator>, Error> {
        let Registered {
            registration,
            event_loop,
            isolate,
        } = self;
        tracing::debug!(
            "binding snapshot creator with {} external references",
            external_references.len()
        );
        let creator = engine.snapshot_creator(isolate, external_references)?;
        Ok(Bound {
            creator,
            event_loop,
            registration,
        })
    }
}

/// A snapshot creator that owns the registered isolate.
pub struct Bound<'s, C> {
    pub(crate) creator: C,
    pub(crate) event_loop: Handle,
    pub(crate) registration: Registration<'s>,
}
impl<'s, C> Bound<'s, C> {
    pub fn id(&self) -> IsolateId {
        self.registration.isolate()
    }
}
