use crate::engine::StartupBlob;

/// Sole owner of a finalized blob.
///
/// The buffer is released exactly once: by [`BlobGuard::release`] on the
/// normal path, or by `Drop` when a later stage fails.
pub struct BlobGuard<B: StartupBlob> {
    blob: Option<B>,
}
impl<B: StartupBlob> BlobGuard<B> {
    pub fn new(blob: B) -> Self {
        tracing::debug!("startup blob created ({} bytes)", blob.data().len());
        BlobGuard { blob: Some(blob) }
    }

    pub fn data(&self) -> &[u8] {
        self.blob.as_ref().map(|b| b.data()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn can_be_rehashed(&self) -> bool {
        self.blob.as_ref().map_or(false, |b| b.can_be_rehashed())
    }

    pub fn release(self) {
        drop(self)
    }
}
impl<B: StartupBlob> Drop for BlobGuard<B> {
    fn drop(&mut self) {
        if let Some(blob) = self.blob.take() {
            tracing::trace!("releasing startup blob ({} bytes)", blob.data().len());
            drop(blob);
        }
    }
}
