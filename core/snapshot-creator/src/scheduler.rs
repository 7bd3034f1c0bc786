use dashmap::DashMap;
use models::{Error, ErrorKind, IsolateId};
use tokio::runtime::Handle;

/// Platform-side registry of isolates and the event loops that drive them.
pub trait Scheduler {
    fn register_isolate(&self, isolate: IsolateId, event_loop: &Handle) -> Result<(), Error>;
    fn unregister_isolate(&self, isolate: IsolateId);
    fn is_registered(&self, isolate: IsolateId) -> bool;
}

#[derive(Debug, Default)]
pub struct PlatformScheduler {
    isolates: DashMap<IsolateId, Handle>,
}
impl PlatformScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_loop(&self, isolate: IsolateId) -> Option<Handle> {
        self.isolates.get(&isolate).map(|h| h.value().clone())
    }

    pub fn len(&self) -> usize {
        self.isolates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.isolates.is_empty()
    }
}
impl Scheduler for PlatformScheduler {
    fn register_isolate(&self, isolate: IsolateId, event_loop: &Handle) -> Result<(), Error> {
        use dashmap::mapref::entry::Entry;
        match self.isolates.entry(isolate) {
            Entry::Occupied(_) => Err(Error::new(
                models::eyre!("{isolate} is already registered with the platform"),
                ErrorKind::Registration,
            )),
            Entry::Vacant(v) => {
                v.insert(event_loop.clone());
                tracing::trace!("registered {isolate}");
                Ok(())
            }
        }
    }

    fn unregister_isolate(&self, isolate: IsolateId) {
        if self.isolates.remove(&isolate).is_none() {
            tracing::warn!("{isolate} was not registered with the platform");
        } else {
            tracing::trace!("unregistered {isolate}");
        }
    }

    fn is_registered(&self, isolate: IsolateId) -> bool {
        self.isolates.contains_key(&isolate)
    }
}

/// A live registration of one isolate.
///
/// Consumed by [`Registration::unregister`]. If it is dropped without that
/// (a stage failed and is unwinding) the isolate is still removed from the
/// registry.
pub struct Registration<'a> {
    scheduler: &'a dyn Scheduler,
    isolate: IsolateId,
    active: bool,
}
impl<'a> Registration<'a> {
    pub fn register(
        scheduler: &'a dyn Scheduler,
        isolate: IsolateId,
        event_loop: &Handle,
    ) -> Result<Self, Error> {
        scheduler.register_isolate(isolate, event_loop)?;
        Ok(Registration {
            scheduler,
            isolate,
            active: true,
        })
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn scheduler(&self) -> &'a dyn Scheduler {
        self.scheduler
    }

    pub fn unregister(mut self) -> IsolateId {
        self.active = false;
        self.scheduler.unregister_isolate(self.isolate);
        self.isolate
    }
}
impl<'a> Drop for Registration<'a> {
    fn drop(&mut self) {
        if self.active {
            tracing::warn!("{} dropped while still registered", self.isolate);
            self.scheduler.unregister_isolate(self.isolate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_loop() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
    }

    #[test]
    fn register_and_unregister() {
        let rt = event_loop();
        let platform = PlatformScheduler::new();
        let isolate = IsolateId::next();

        let registration = Registration::register(&platform, isolate, rt.handle()).unwrap();
        assert!(platform.is_registered(isolate));
        assert!(platform.event_loop(isolate).is_some());

        assert_eq!(registration.unregister(), isolate);
        assert!(!platform.is_registered(isolate));
        assert!(platform.is_empty());
    }

    #[test]
    fn double_registration_is_rejected() {
        let rt = event_loop();
        let platform = PlatformScheduler::new();
        let isolate = IsolateId::next();

        let _registration = Registration::register(&platform, isolate, rt.handle()).unwrap();
        let err = platform
            .register_isolate(isolate, rt.handle())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Registration);
        assert_eq!(platform.len(), 1);
    }

    #[test]
    fn dropped_registration_unregisters() {
        let rt = event_loop();
        let platform = PlatformScheduler::new();
        let isolate = IsolateId::next();
        {
            let _registration =
                Registration::register(&platform, isolate, rt.handle()).unwrap();
        }
        assert!(!platform.is_registered(isolate));
    }
}
