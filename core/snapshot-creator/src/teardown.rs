use models::IsolateId;
use tracing::instrument;

use crate::blob::BlobGuard;
use crate::builder::Finalized;
use crate::engine::{SnapshotCreator, StartupBlob};
use crate::format::{format_blob, SnapshotFormat};
use crate::runtime::RuntimeInstance;
use crate::scheduler::Registration;

impl<'s, C: SnapshotCreator, I: RuntimeInstance<C>> Finalized<'s, C, I> {
    /// Disposes the runtime instance. The blob stays alive and the isolate
    /// stays registered.
    #[instrument(skip_all, fields(isolate = %self.registration.isolate()))]
    pub fn dispose(self) -> Disposed<'s, C::Blob> {
        let Finalized {
            registration,
            isolate_data_indexes,
            instance,
            blob,
            ..
        } = self;
        instance.dispose();
        tracing::debug!("runtime instance disposed");
        Disposed {
            blob,
            isolate_data_indexes,
            registration,
        }
    }
}

/// Only the blob, its index list and the registration remain.
pub struct Disposed<'s, B: StartupBlob> {
    blob: BlobGuard<B>,
    isolate_data_indexes: Vec<usize>,
    registration: Registration<'s>,
}
impl<'s, B: StartupBlob> Disposed<'s, B> {
    pub fn blob(&self) -> &[u8] {
        self.blob.data()
    }

    pub fn isolate_data_indexes(&self) -> &[usize] {
        &self.isolate_data_indexes
    }

    /// Emits the source, releases the blob, then takes the isolate out of the
    /// platform registry.
    #[instrument(skip_all, fields(isolate = %self.registration.isolate()))]
    pub fn finish(self, format: &SnapshotFormat) -> Unregistered {
        let Disposed {
            registration,
            isolate_data_indexes,
            blob,
        } = self;
        let source = format_blob(blob.data(), &isolate_data_indexes, format);
        blob.release();
        let isolate = registration.unregister();
        tracing::debug!("{isolate} unregistered");
        Unregistered { isolate, source }
    }
}

/// Terminal stage: nothing engine-side is alive any more.
#[derive(Debug)]
pub struct Unregistered {
    isolate: IsolateId,
    source: String,
}
impl Unregistered {
    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn into_source(self) -> String {
        self.source
    }
}
