#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use models::ensure_code;
use snapshot_creator::{
    Engine, Error, ErrorKind, ExternalReferences, FunctionCodeHandling, Isolate, IsolateId,
    RuntimeFactory, RuntimeInstance, Scheduler, SnapshotCreator, StartupArgs, StartupBlob,
};
use tokio::runtime::Handle;

#[derive(Clone, Debug, Default)]
pub struct CallLog(Rc<RefCell<Vec<String>>>);
impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into())
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.borrow().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == entry).count()
    }

    /// Index of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> usize {
        self.0
            .borrow()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} was never called: {:?}", self.entries()))
    }

    pub fn assert_order(&self, entries: &[&str]) {
        for pair in entries.windows(2) {
            assert!(
                self.position(pair[0]) < self.position(pair[1]),
                "expected {} before {}: {:?}",
                pair[0],
                pair[1],
                self.entries()
            );
        }
    }
}

pub fn event_loop() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[derive(Clone, Debug)]
pub struct MockEngine {
    pub log: CallLog,
    pub blob: Vec<u8>,
    pub rehashable: bool,
    /// Added to every index `add_context` reports.
    pub context_offset: usize,
}
impl MockEngine {
    pub fn new(log: &CallLog, blob: Vec<u8>) -> Self {
        MockEngine {
            log: log.clone(),
            blob,
            rehashable: true,
            context_offset: 0,
        }
    }
}

pub struct MockIsolate {
    id: IsolateId,
}
impl Isolate for MockIsolate {
    fn id(&self) -> IsolateId {
        self.id
    }
}

impl Engine for MockEngine {
    type Isolate = MockIsolate;
    type Creator = MockCreator;

    fn allocate(&self) -> Result<MockIsolate, Error> {
        self.log.push("allocate");
        Ok(MockIsolate {
            id: IsolateId::next(),
        })
    }

    fn snapshot_creator(
        &self,
        isolate: MockIsolate,
        external_references: &ExternalReferences,
    ) -> Result<MockCreator, Error> {
        self.log.push("bind");
        self.log
            .push(format!("external_references={}", external_references.len()));
        Ok(MockCreator {
            id: isolate.id,
            engine: self.clone(),
            scope_depth: 0,
            contexts_created: 0,
            contexts_added: 0,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MockContext(pub usize);

pub struct MockCreator {
    id: IsolateId,
    engine: MockEngine,
    scope_depth: usize,
    contexts_created: usize,
    contexts_added: usize,
}
impl MockCreator {
    pub fn scope_depth(&self) -> usize {
        self.scope_depth
    }
}
impl SnapshotCreator for MockCreator {
    type Context = MockContext;
    type Blob = MockBlob;

    fn isolate_id(&self) -> IsolateId {
        self.id
    }

    fn enter_handle_scope(&mut self) {
        self.scope_depth += 1;
        self.engine.log.push("scope.open");
    }

    fn exit_handle_scope(&mut self) {
        self.scope_depth -= 1;
        self.engine.log.push("scope.close");
    }

    fn new_context(&mut self) -> Result<MockContext, Error> {
        self.engine.log.push("new_context");
        self.contexts_created += 1;
        Ok(MockContext(self.contexts_created))
    }

    fn set_default_context(&mut self, _context: MockContext) -> Result<(), Error> {
        self.engine.log.push("set_default_context");
        Ok(())
    }

    fn add_context(&mut self, _context: MockContext) -> Result<usize, Error> {
        self.engine.log.push("add_context");
        let index = self.contexts_added + self.engine.context_offset;
        self.contexts_added += 1;
        Ok(index)
    }

    fn create_blob(self, function_code_handling: FunctionCodeHandling) -> Result<MockBlob, Error> {
        ensure_code!(
            self.scope_depth == 0,
            ErrorKind::HandleScope,
            "{} handle scope(s) still open",
            self.scope_depth
        );
        self.engine.log.push("create_blob");
        self.engine
            .log
            .push(format!("function_code={function_code_handling:?}"));
        Ok(MockBlob {
            data: self.engine.blob.clone(),
            rehashable: self.engine.rehashable,
            log: self.engine.log.clone(),
        })
    }
}

pub struct MockBlob {
    data: Vec<u8>,
    rehashable: bool,
    log: CallLog,
}
impl StartupBlob for MockBlob {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn can_be_rehashed(&self) -> bool {
        self.rehashable
    }
}
impl Drop for MockBlob {
    fn drop(&mut self) {
        self.log.push("release_blob");
    }
}

#[derive(Debug, Default)]
pub struct MockScheduler {
    log: CallLog,
    registered: RefCell<BTreeSet<IsolateId>>,
}
impl MockScheduler {
    pub fn new(log: &CallLog) -> Self {
        MockScheduler {
            log: log.clone(),
            registered: RefCell::default(),
        }
    }

    pub fn registered(&self) -> usize {
        self.registered.borrow().len()
    }
}
impl Scheduler for MockScheduler {
    fn register_isolate(&self, isolate: IsolateId, _event_loop: &Handle) -> Result<(), Error> {
        ensure_code!(
            self.registered.borrow_mut().insert(isolate),
            ErrorKind::Registration,
            "{} registered twice",
            isolate
        );
        self.log.push("register");
        Ok(())
    }

    fn unregister_isolate(&self, isolate: IsolateId) {
        self.registered.borrow_mut().remove(&isolate);
        self.log.push("unregister");
    }

    fn is_registered(&self, isolate: IsolateId) -> bool {
        self.registered.borrow().contains(&isolate)
    }
}

#[derive(Debug, Default)]
pub struct MockRuntimeFactory {
    pub log: CallLog,
    pub isolate_data: Vec<usize>,
    pub fail_bootstrap: bool,
    pub startup: RefCell<Option<StartupArgs>>,
}
impl MockRuntimeFactory {
    pub fn new(log: &CallLog, isolate_data: Vec<usize>) -> Self {
        MockRuntimeFactory {
            log: log.clone(),
            isolate_data,
            ..Default::default()
        }
    }
}

impl RuntimeFactory<MockCreator> for MockRuntimeFactory {
    type Instance = MockRuntime;

    fn create(
        &self,
        creator: &mut MockCreator,
        _event_loop: &Handle,
        platform: &dyn Scheduler,
        startup: &StartupArgs,
    ) -> Result<MockRuntime, Error> {
        ensure_code!(
            platform.is_registered(creator.isolate_id()),
            ErrorKind::Bootstrap,
            "{} is not registered",
            creator.isolate_id()
        );
        ensure_code!(
            creator.scope_depth() > 0,
            ErrorKind::HandleScope,
            "runtime created outside a handle scope"
        );
        self.log.push("runtime.create");
        *self.startup.borrow_mut() = Some(startup.clone());
        Ok(MockRuntime {
            log: self.log.clone(),
            isolate_data: self.isolate_data.clone(),
            fail_bootstrap: self.fail_bootstrap,
        })
    }
}

pub struct MockRuntime {
    log: CallLog,
    isolate_data: Vec<usize>,
    fail_bootstrap: bool,
}
impl RuntimeInstance<MockCreator> for MockRuntime {
    fn serialize_isolate_data(&mut self, _creator: &mut MockCreator) -> Result<Vec<usize>, Error> {
        self.log.push("serialize_isolate_data");
        Ok(self.isolate_data.clone())
    }

    fn new_context(&mut self, creator: &mut MockCreator) -> Result<MockContext, Error> {
        self.log.push("runtime.new_context");
        ensure_code!(
            !self.fail_bootstrap,
            ErrorKind::Bootstrap,
            "bootstrap script threw"
        );
        creator.new_context()
    }

    fn dispose(self) {
        self.log.push("dispose");
    }
}
