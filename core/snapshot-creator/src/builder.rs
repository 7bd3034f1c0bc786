use std::marker::PhantomData;

use models::{ensure_code, Error, ErrorKind};
use tokio::runtime::Handle;
use tracing::instrument;

use crate::binder::{Allocated, Bound};
use crate::blob::BlobGuard;
use crate::engine::{
    Engine, ExternalReferences, FunctionCodeHandling, HandleScope, SnapshotCreator,
    MAIN_CONTEXT_INDEX,
};
use crate::format::SnapshotFormat;
use crate::runtime::{RuntimeFactory, RuntimeInstance, StartupArgs};
use crate::scheduler::{Registration, Scheduler};

impl<'s, C: SnapshotCreator> Bound<'s, C> {
    /// Bootstraps the runtime and records everything the snapshot contains.
    ///
    /// All work happens inside one handle region, which is closed before this
    /// returns.
    #[instrument(skip_all, fields(isolate = %self.id()))]
    pub fn record<F: RuntimeFactory<C>>(
        self,
        factory: &F,
        startup: &StartupArgs,
    ) -> Result<Recording<'s, C, F::Instance>, Error> {
        let Bound {
            registration,
            event_loop,
            mut creator,
        } = self;

        let (instance, isolate_data_indexes) = {
            let mut scope = HandleScope::new(&mut creator);
            let mut instance = factory.create(
                &mut *scope,
                &event_loop,
                registration.scheduler(),
                startup,
            )?;

            let default_context = scope.new_context()?;
            scope.set_default_context(default_context)?;

            let isolate_data_indexes = instance.serialize_isolate_data(&mut *scope)?;
            tracing::debug!(
                "serialized {} isolate data fields",
                isolate_data_indexes.len()
            );

            let main_context = instance.new_context(&mut *scope)?;
            let index = scope.add_context(main_context)?;
            ensure_code!(
                index == MAIN_CONTEXT_INDEX,
                ErrorKind::ContextIndex,
                "main context was added at index {} but the loader expects index {}",
                index,
                MAIN_CONTEXT_INDEX
            );

            (instance, isolate_data_indexes)
        };

        Ok(Recording {
            creator,
            instance,
            isolate_data_indexes,
            registration,
        })
    }
}

/// Contexts and isolate data are recorded; the handle region is closed.
pub struct Recording<'s, C: SnapshotCreator, I: RuntimeInstance<C>> {
    creator: C,
    instance: I,
    isolate_data_indexes: Vec<usize>,
    registration: Registration<'s>,
}
impl<'s, C: SnapshotCreator, I: RuntimeInstance<C>> Recording<'s, C, I> {
    pub fn isolate_data_indexes(&self) -> &[usize] {
        &self.isolate_data_indexes
    }

    /// Serializes the heap. Compiled function code is not kept.
    #[instrument(skip_all, fields(isolate = %self.registration.isolate()))]
    pub fn finalize(self) -> Result<Finalized<'s, C, I>, Error> {
        let Recording {
            registration,
            isolate_data_indexes,
            instance,
            creator,
        } = self;
        let blob = BlobGuard::new(creator.create_blob(FunctionCodeHandling::Clear)?);
        ensure_code!(
            blob.can_be_rehashed(),
            ErrorKind::NotRehashable,
            "startup blob for {} cannot be rehashed",
            registration.isolate()
        );
        Ok(Finalized {
            blob,
            instance,
            isolate_data_indexes,
            registration,
            creator: PhantomData,
        })
    }
}

/// The blob exists; the runtime instance is still alive.
pub struct Finalized<'s, C: SnapshotCreator, I: RuntimeInstance<C>> {
    pub(crate) blob: BlobGuard<C::Blob>,
    pub(crate) instance: I,
    pub(crate) isolate_data_indexes: Vec<usize>,
    pub(crate) registration: Registration<'s>,
    pub(crate) creator: PhantomData<fn(C)>,
}
impl<'s, C: SnapshotCreator, I: RuntimeInstance<C>> Finalized<'s, C, I> {
    pub fn blob(&self) -> &[u8] {
        self.blob.data()
    }
}

/// Drives one snapshot build from allocation to emitted source.
pub struct SnapshotBuilder<'a, E, F> {
    engine: &'a E,
    factory: &'a F,
    scheduler: &'a dyn Scheduler,
    event_loop: Handle,
    external_references: ExternalReferences,
    format: SnapshotFormat,
}
impl<'a, E, F> SnapshotBuilder<'a, E, F>
where
    E: Engine,
    F: RuntimeFactory<E::Creator>,
{
    pub fn new(
        engine: &'a E,
        factory: &'a F,
        scheduler: &'a dyn Scheduler,
        event_loop: Handle,
    ) -> Self {
        SnapshotBuilder {
            engine,
            factory,
            scheduler,
            event_loop,
            external_references: ExternalReferences::new(),
            format: SnapshotFormat::default(),
        }
    }

    /// Replaces the reference table handed to the serializer. Any native
    /// callbacks reachable from the heap must be listed here.
    pub fn external_references(mut self, external_references: ExternalReferences) -> Self {
        self.external_references = external_references;
        self
    }

    pub fn format(mut self, format: SnapshotFormat) -> Self {
        self.format = format;
        self
    }

    /// Builds the snapshot and returns the emitted source.
    ///
    /// There is no recoverable failure: any error aborts generation with a
    /// panic carrying the diagnostic, and no partial source is returned.
    pub fn generate(&self, args: Vec<String>, exec_args: Vec<String>) -> String {
        match self.try_generate(&StartupArgs::new(args, exec_args)) {
            Ok(source) => source,
            Err(e) => fatal(e),
        }
    }

    #[instrument(skip_all)]
    fn try_generate(&self, startup: &StartupArgs) -> Result<String, Error> {
        let allocated = Allocated::allocate(self.engine)?;
        let registered = allocated.register(self.scheduler, &self.event_loop)?;
        let bound = registered.bind(self.engine, &self.external_references)?;
        let recording = bound.record(self.factory, startup)?;
        let finalized = recording.finalize()?;
        tracing::info!(
            "snapshot blob is {} bytes with {} isolate data indexes",
            finalized.blob().len(),
            finalized.isolate_data_indexes.len()
        );
        let disposed = finalized.dispose();
        let unregistered = disposed.finish(&self.format);
        Ok(unregistered.into_source())
    }
}

fn fatal(e: Error) -> ! {
    tracing::error!("{e}");
    tracing::debug!("{e:?}");
    panic!("snapshot generation failed: {e}")
}
