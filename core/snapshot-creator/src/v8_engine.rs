//! [`Engine`] backed by V8.
//!
//! V8 can only be initialized once per process; the platform is set up lazily
//! by the first allocation and shared by every isolate after that.

use std::ffi::c_void;
use std::path::Path;
use std::sync::OnceLock;

use dashmap::DashMap;
use deno_core::v8;
use models::{ensure_code, eyre, Error, ErrorKind, IsolateId, OptionExt};
use tokio::runtime::Handle;
use tracing::instrument;

use crate::engine::{
    Engine, ExternalReferences, FunctionCodeHandling, Isolate, SnapshotCreator, StartupBlob,
};
use crate::runtime::{RuntimeFactory, RuntimeInstance, StartupArgs};
use crate::scheduler::Scheduler;

static PLATFORM: OnceLock<v8::SharedRef<v8::Platform>> = OnceLock::new();

/// V8 holds on to a reference table for the lifetime of the isolate, so
/// tables live for the rest of the process. One per distinct list.
static REFERENCE_TABLES: OnceLock<DashMap<Vec<usize>, &'static v8::ExternalReferences>> =
    OnceLock::new();

/// Byte offset of the rehashability word in a V8 startup blob header. It
/// follows the context count.
const REHASHABILITY_OFFSET: usize = 4;

const BOOTSTRAP: &str = include_str!("js/bootstrap.js");

/// Strings every runtime instance registers as per-isolate data. Their order
/// is the order of the emitted index list.
const ISOLATE_STRINGS: &[&str] = &[
    "process", "argv", "execArgv", "env", "title", "versions", "global",
];

fn init_platform(flags: Option<&str>) {
    PLATFORM.get_or_init(|| {
        if let Some(flags) = flags {
            v8::V8::set_flags_from_string(flags);
        }
        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform.clone());
        v8::V8::initialize();
        tracing::debug!("V8 {} initialized", v8::V8::get_version());
        platform
    });
}

fn reference_table(external_references: &ExternalReferences) -> &'static v8::ExternalReferences {
    let table = *REFERENCE_TABLES
        .get_or_init(DashMap::new)
        .entry(external_references.as_slice().to_vec())
        .or_insert_with(|| {
            let references = external_references
                .as_slice()
                .iter()
                .map(|address| v8::ExternalReference {
                    pointer: *address as *mut c_void,
                })
                .collect::<Vec<_>>();
            tracing::debug!("new external reference table ({} entries)", references.len());
            let leaked: &'static v8::ExternalReferences =
                Box::leak(Box::new(v8::ExternalReferences::new(&references)));
            leaked
        });
    table
}

#[derive(Debug, Default, Clone)]
pub struct V8Engine {
    flags: Option<String>,
}
impl V8Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags are applied only if this engine is the first to touch V8 in the
    /// process.
    pub fn with_flags(flags: impl Into<String>) -> Self {
        V8Engine {
            flags: Some(flags.into()),
        }
    }
}

#[derive(Debug)]
pub struct V8Isolate {
    id: IsolateId,
}
impl Isolate for V8Isolate {
    fn id(&self) -> IsolateId {
        self.id
    }
}

impl Engine for V8Engine {
    type Isolate = V8Isolate;
    type Creator = V8SnapshotCreator;

    fn allocate(&self) -> Result<V8Isolate, Error> {
        init_platform(self.flags.as_deref());
        Ok(V8Isolate {
            id: IsolateId::next(),
        })
    }

    fn snapshot_creator(
        &self,
        isolate: V8Isolate,
        external_references: &ExternalReferences,
    ) -> Result<V8SnapshotCreator, Error> {
        Ok(V8SnapshotCreator {
            id: isolate.id,
            isolate: v8::Isolate::snapshot_creator(Some(reference_table(external_references))),
            scope_depth: 0,
        })
    }
}

pub struct V8SnapshotCreator {
    id: IsolateId,
    isolate: v8::OwnedIsolate,
    scope_depth: usize,
}
impl V8SnapshotCreator {
    pub fn isolate(&mut self) -> &mut v8::OwnedIsolate {
        &mut self.isolate
    }
}
impl SnapshotCreator for V8SnapshotCreator {
    type Context = v8::Global<v8::Context>;
    type Blob = V8StartupBlob;

    fn isolate_id(&self) -> IsolateId {
        self.id
    }

    fn enter_handle_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn exit_handle_scope(&mut self) {
        self.scope_depth = self.scope_depth.saturating_sub(1);
    }

    fn new_context(&mut self) -> Result<Self::Context, Error> {
        let scope = &mut v8::HandleScope::new(&mut self.isolate);
        let context = v8::Context::new(scope);
        Ok(v8::Global::new(scope, context))
    }

    fn set_default_context(&mut self, context: Self::Context) -> Result<(), Error> {
        let scope = &mut v8::HandleScope::new(&mut self.isolate);
        let context = v8::Local::new(scope, context);
        scope.set_default_context(context);
        Ok(())
    }

    fn add_context(&mut self, context: Self::Context) -> Result<usize, Error> {
        let scope = &mut v8::HandleScope::new(&mut self.isolate);
        let context = v8::Local::new(scope, context);
        Ok(scope.add_context(context))
    }

    fn create_blob(
        self,
        function_code_handling: FunctionCodeHandling,
    ) -> Result<V8StartupBlob, Error> {
        ensure_code!(
            self.scope_depth == 0,
            ErrorKind::HandleScope,
            "cannot create a blob for {} with {} handle scope(s) open",
            self.id,
            self.scope_depth
        );
        let V8SnapshotCreator { id, mut isolate, .. } = self;
        let data = isolate
            .create_blob(match function_code_handling {
                FunctionCodeHandling::Clear => v8::FunctionCodeHandling::Clear,
            })
            .or_kind(
                ErrorKind::Serialization,
                format!("V8 could not serialize {id}"),
            )?;
        Ok(V8StartupBlob { data })
    }
}

pub struct V8StartupBlob {
    data: v8::StartupData,
}
impl StartupBlob for V8StartupBlob {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn can_be_rehashed(&self) -> bool {
        header_rehashability(&self.data)
    }
}

fn header_rehashability(data: &[u8]) -> bool {
    data.get(REHASHABILITY_OFFSET..REHASHABILITY_OFFSET + 4)
        .and_then(|word| word.try_into().ok())
        .map_or(false, |word| u32::from_ne_bytes(word) != 0)
}

#[derive(Clone, Debug)]
pub struct JsSource {
    pub name: String,
    pub code: String,
}
impl JsSource {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        JsSource {
            name: name.into(),
            code: code.into(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let code = std::fs::read_to_string(path).map_err(|e| {
            Error::new(
                eyre!("{}: {}", path.display(), e),
                ErrorKind::Filesystem,
            )
        })?;
        Ok(JsSource::new(path.display().to_string(), code))
    }
}

/// Builds [`V8Runtime`]s that run the built-in bootstrap followed by any
/// extra scripts.
#[derive(Clone, Debug)]
pub struct V8RuntimeFactory {
    scripts: Vec<JsSource>,
}
impl Default for V8RuntimeFactory {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
impl V8RuntimeFactory {
    pub fn new(extra_scripts: Vec<JsSource>) -> Self {
        let mut scripts = vec![JsSource::new("snapshot:bootstrap", BOOTSTRAP)];
        scripts.extend(extra_scripts);
        V8RuntimeFactory { scripts }
    }
}

pub struct V8Runtime {
    isolate: IsolateId,
    event_loop: Handle,
    startup: StartupArgs,
    scripts: Vec<JsSource>,
    isolate_strings: Vec<v8::Global<v8::String>>,
}

impl RuntimeFactory<V8SnapshotCreator> for V8RuntimeFactory {
    type Instance = V8Runtime;

    #[instrument(skip_all, fields(isolate = %creator.isolate_id()))]
    fn create(
        &self,
        creator: &mut V8SnapshotCreator,
        event_loop: &Handle,
        platform: &dyn Scheduler,
        startup: &StartupArgs,
    ) -> Result<V8Runtime, Error> {
        let isolate = creator.isolate_id();
        ensure_code!(
            platform.is_registered(isolate),
            ErrorKind::Bootstrap,
            "{} must be registered with the platform before bootstrap",
            isolate
        );
        let _guard = event_loop.enter();

        let scope = &mut v8::HandleScope::new(creator.isolate());
        let mut isolate_strings = Vec::with_capacity(ISOLATE_STRINGS.len());
        for name in ISOLATE_STRINGS {
            let string =
                v8::String::new_from_utf8(scope, name.as_bytes(), v8::NewStringType::Internalized)
                    .or_kind(ErrorKind::Bootstrap, format!("could not intern {name:?}"))?;
            isolate_strings.push(v8::Global::new(scope, string));
        }

        Ok(V8Runtime {
            isolate,
            event_loop: event_loop.clone(),
            startup: startup.clone(),
            scripts: self.scripts.clone(),
            isolate_strings,
        })
    }
}

impl RuntimeInstance<V8SnapshotCreator> for V8Runtime {
    fn serialize_isolate_data(
        &mut self,
        creator: &mut V8SnapshotCreator,
    ) -> Result<Vec<usize>, Error> {
        let scope = &mut v8::HandleScope::new(creator.isolate());
        let mut indexes = Vec::with_capacity(self.isolate_strings.len());
        for string in self.isolate_strings.drain(..) {
            let string = v8::Local::new(scope, string);
            indexes.push(scope.add_isolate_data(string));
        }
        Ok(indexes)
    }

    #[instrument(skip_all, fields(isolate = %self.isolate))]
    fn new_context(
        &mut self,
        creator: &mut V8SnapshotCreator,
    ) -> Result<v8::Global<v8::Context>, Error> {
        let _guard = self.event_loop.enter();

        let scope = &mut v8::HandleScope::new(creator.isolate());
        let context = v8::Context::new(scope);
        let scope = &mut v8::ContextScope::new(scope, context);
        install_process(scope, context, &self.startup)?;

        let scope = &mut v8::TryCatch::new(scope);
        for script in &self.scripts {
            run_script(scope, script)?;
        }
        scope.perform_microtask_checkpoint();

        Ok(v8::Global::new(scope, context))
    }

    fn dispose(self) {
        tracing::debug!(
            "disposing runtime for {} ({} argv, {} execArgv)",
            self.isolate,
            self.startup.args.len(),
            self.startup.exec_args.len()
        );
    }
}

fn string_array<'s>(
    scope: &mut v8::HandleScope<'s>,
    items: &[String],
) -> Result<v8::Local<'s, v8::Array>, Error> {
    let elements = items
        .iter()
        .map(|item| {
            v8::String::new(scope, item)
                .map(Into::into)
                .or_kind(ErrorKind::Bootstrap, format!("argument too long: {item}"))
        })
        .collect::<Result<Vec<v8::Local<v8::Value>>, Error>>()?;
    Ok(v8::Array::new_with_elements(scope, &elements))
}

fn set_property(
    scope: &mut v8::HandleScope,
    object: v8::Local<v8::Object>,
    key: &str,
    value: v8::Local<v8::Value>,
) -> Result<(), Error> {
    let name = v8::String::new(scope, key)
        .or_kind(ErrorKind::Bootstrap, format!("could not allocate {key:?}"))?;
    object
        .set(scope, name.into(), value)
        .or_kind(ErrorKind::Bootstrap, format!("could not set {key:?}"))?;
    Ok(())
}

/// `globalThis.process` with the startup arguments, before any script runs.
fn install_process(
    scope: &mut v8::HandleScope,
    context: v8::Local<v8::Context>,
    startup: &StartupArgs,
) -> Result<(), Error> {
    let global = context.global(scope);
    let process = v8::Object::new(scope);
    let argv = string_array(scope, &startup.args)?;
    set_property(scope, process, "argv", argv.into())?;
    let exec_argv = string_array(scope, &startup.exec_args)?;
    set_property(scope, process, "execArgv", exec_argv.into())?;
    set_property(scope, global, "process", process.into())
}

fn run_script(scope: &mut v8::TryCatch<v8::HandleScope>, script: &JsSource) -> Result<(), Error> {
    let code = v8::String::new(scope, &script.code)
        .or_kind(ErrorKind::Bootstrap, format!("{} is too large", script.name))?;
    let result = v8::Script::compile(scope, code, None).and_then(|compiled| compiled.run(scope));
    if result.is_some() {
        return Ok(());
    }
    let message = match scope.exception() {
        Some(exception) => exception.to_rust_string_lossy(scope),
        None => "execution terminated".to_owned(),
    };
    Err(Error::new(
        eyre!("{} threw during bootstrap: {}", script.name, message),
        ErrorKind::Bootstrap,
    ))
}
