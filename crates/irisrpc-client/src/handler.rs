//! Locally published functions and the built-in `instance_*` functions.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use irisrpc_u64json::bitpattern::bytes_to_u64_array;
use irisrpc_u64json::{Object, Value};
use tracing::debug;

use crate::codes;
use crate::error::{RemoteError, Result, RpcError};
use crate::runtime::{CallContext, HandlerResult};

/// Highest suffix tried by [`HandlerRegistry::register_unique`].
const MAX_UNIQUE_SUFFIX: usize = 100;

/// A function the target may call on this client.
///
/// `params` arrive with the routing member `instId` removed. Returning an
/// error sends an error response; notifications discard the outcome.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &CallContext<'_>, params: Object) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&CallContext<'_>, Object) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &CallContext<'_>, params: Object) -> HandlerResult {
        self(ctx, params)
    }
}

/// Description of one argument or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgInfo {
    pub type_name: String,
    pub description: String,
    pub optional: bool,
}

impl ArgInfo {
    fn to_value(&self) -> Value {
        let mut obj = Object::new();
        obj.insert("type".to_string(), Value::from(self.type_name.as_str()));
        obj.insert(
            "description".to_string(),
            Value::from(self.description.as_str()),
        );
        if self.optional {
            obj.insert("optional".to_string(), Value::Bool(true));
        }
        Value::Object(obj)
    }
}

/// Interface description published through `instance_getFunctionInfo`.
///
/// Every function takes the routing argument `instId`, so it is listed
/// from the start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub description: String,
    pub args: BTreeMap<String, ArgInfo>,
    pub retval: Option<ArgInfo>,
}

impl FunctionInfo {
    pub fn new(description: impl Into<String>) -> Self {
        let mut args = BTreeMap::new();
        args.insert(
            "instId".to_string(),
            ArgInfo {
                type_name: "NumberU64".to_string(),
                description: "Instance id.".to_string(),
                optional: false,
            },
        );
        Self {
            description: description.into(),
            args,
            retval: None,
        }
    }

    pub fn arg(self, name: &str, type_name: &str, description: &str) -> Self {
        self.with_arg(name, type_name, description, false)
    }

    pub fn optional_arg(self, name: &str, type_name: &str, description: &str) -> Self {
        self.with_arg(name, type_name, description, true)
    }

    fn with_arg(mut self, name: &str, type_name: &str, description: &str, optional: bool) -> Self {
        self.args.insert(
            name.to_string(),
            ArgInfo {
                type_name: type_name.to_string(),
                description: description.to_string(),
                optional,
            },
        );
        self
    }

    /// Interface of an event callback: the target calls it once per event
    /// on a stream set up with `eventStream_create`.
    pub fn event_callback(description: impl Into<String>) -> Self {
        Self::new(description)
            .arg("esId", "NumberU64", "Event stream id.")
            .arg(
                "fields",
                "Object",
                "Object which contains the names and values of all event source fields requested by the eventEnable() call.",
            )
            .arg("time", "NumberU64", "Simulation time timestamp of the event.")
            .arg(
                "sInstId",
                "NumberU64",
                "Source instId: Instance which generated and sent this event.",
            )
            .optional_arg("syncEc", "Boolean", "Synchronous callback behaviour.")
    }

    pub fn returns(mut self, type_name: &str, description: &str) -> Self {
        self.retval = Some(ArgInfo {
            type_name: type_name.to_string(),
            description: description.to_string(),
            optional: false,
        });
        self
    }

    /// Wire representation: `{description, args: {name: {type, description}}, retval}`.
    pub fn to_value(&self) -> Value {
        let mut obj = Object::new();
        obj.insert(
            "description".to_string(),
            Value::from(self.description.as_str()),
        );
        obj.insert(
            "args".to_string(),
            self.args
                .iter()
                .map(|(name, arg)| (name.clone(), arg.to_value()))
                .collect(),
        );
        let retval = match &self.retval {
            Some(retval) => retval.to_value(),
            None => [("type", Value::from("Null"))].into_iter().collect(),
        };
        obj.insert("retval".to_string(), retval);
        Value::Object(obj)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Ping,
    GetProperties,
    GetFunctionInfo,
    CheckFunctionSupport,
    ImageLoadDataRead,
}

#[derive(Clone)]
enum Callable {
    Builtin(Builtin),
    Handler(Arc<dyn Handler>),
}

struct Entry {
    info: FunctionInfo,
    callable: Callable,
}

/// What the dispatch loop found for a method name.
pub(crate) enum Lookup {
    Builtin(Builtin),
    Handler(Arc<dyn Handler>),
    Missing,
}

/// Named functions published by this client, plus its instance properties
/// and the files it serves as images.
pub struct HandlerRegistry {
    entries: RwLock<BTreeMap<String, Entry>>,
    properties: RwLock<Object>,
    /// Indexed by tag; a closed image leaves `None` so tags are never reused.
    images: Mutex<Vec<Option<File>>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// A registry holding only the built-in `instance_*` functions.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        for (name, builtin, info) in builtins() {
            entries.insert(
                name.to_string(),
                Entry {
                    info,
                    callable: Callable::Builtin(builtin),
                },
            );
        }
        Self {
            entries: RwLock::new(entries),
            properties: RwLock::new(Object::new()),
            images: Mutex::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `handler` under `name`. Names are never silently reused.
    pub fn register(
        &self,
        name: &str,
        info: FunctionInfo,
        handler: impl Handler + 'static,
    ) -> Result<()> {
        let mut entries = self.write();
        if entries.contains_key(name) {
            return Err(RpcError::HandlerExists(name.to_string()));
        }
        entries.insert(
            name.to_string(),
            Entry {
                info,
                callable: Callable::Handler(Arc::new(handler)),
            },
        );
        Ok(())
    }

    /// Publish under `name`, or `name_0` … `name_99` if taken. Returns the
    /// name actually used.
    pub fn register_unique(
        &self,
        name: &str,
        info: FunctionInfo,
        handler: impl Handler + 'static,
    ) -> Result<String> {
        let mut entries = self.write();
        let chosen = std::iter::once(name.to_string())
            .chain((0..MAX_UNIQUE_SUFFIX).map(|n| format!("{name}_{n}")))
            .find(|candidate| !entries.contains_key(candidate))
            .ok_or_else(|| RpcError::HandlerExists(format!("{name}_*")))?;
        entries.insert(
            chosen.clone(),
            Entry {
                info,
                callable: Callable::Handler(Arc::new(handler)),
            },
        );
        Ok(chosen)
    }

    /// Publish an event callback under `name` with the standard callback
    /// interface (see [`FunctionInfo::event_callback`]).
    pub fn register_event_callback(
        &self,
        name: &str,
        description: &str,
        handler: impl Handler + 'static,
    ) -> Result<()> {
        self.register(name, FunctionInfo::event_callback(description), handler)
    }

    /// Remove a published handler. Built-ins stay.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.write();
        match entries.get(name).map(|entry| &entry.callable) {
            Some(Callable::Handler(_)) => entries.remove(name).is_some(),
            _ => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Published function names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Map of function name to info, for names starting with `prefix`.
    pub fn function_info(&self, prefix: Option<&str>) -> Object {
        self.read()
            .iter()
            .filter(|(name, _)| prefix.is_none_or(|p| name.starts_with(p)))
            .map(|(name, entry)| (name.clone(), entry.info.to_value()))
            .collect()
    }

    pub fn set_property(&self, name: &str, value: Value) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    pub fn properties(&self) -> Object {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Open `path` for the target to read through `image_loadDataRead`.
    /// Returns the tag the target must pass back.
    pub fn open_image(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| RpcError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let mut images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        let tag = images.len() as u64;
        images.push(Some(file));
        debug!(tag, path = %path.display(), "image opened");
        Ok(tag)
    }

    /// Number of images opened and not yet closed.
    pub fn open_images(&self) -> usize {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|image| image.is_some())
            .count()
    }

    pub(crate) fn lookup(&self, method: &str) -> Lookup {
        match self.read().get(method).map(|entry| entry.callable.clone()) {
            Some(Callable::Builtin(builtin)) => Lookup::Builtin(builtin),
            Some(Callable::Handler(handler)) => Lookup::Handler(handler),
            None => Lookup::Missing,
        }
    }

    pub(crate) fn call_builtin(&self, builtin: Builtin, params: &Object) -> HandlerResult {
        match builtin {
            Builtin::Ping => Ok(params.get("payload").cloned().unwrap_or(Value::Null)),
            Builtin::GetProperties => Ok(Value::Object(self.properties())),
            Builtin::GetFunctionInfo => {
                let prefix = params.get("prefix").and_then(Value::as_str);
                Ok(Value::Object(self.function_info(prefix)))
            }
            Builtin::CheckFunctionSupport => self.check_function_support(params),
            Builtin::ImageLoadDataRead => self.image_load_data_read(params),
        }
    }

    /// Read `size` bytes at `position` of the image `tag`; fewer at the end
    /// of the file. With `end` set the image is closed afterwards.
    fn image_load_data_read(&self, params: &Object) -> HandlerResult {
        let number = |name: &str| {
            params.get(name).and_then(Value::as_u64).ok_or_else(|| {
                RemoteError::new(
                    codes::E_MALFORMATTED_REQUEST,
                    format!("image_loadDataRead expects a number '{name}'"),
                )
            })
        };
        let tag = number("tag")?;
        let position = number("position")?;
        let size = number("size")?;
        let end = params.get("end").and_then(Value::as_bool).unwrap_or(false);

        let mut images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        let index = usize::try_from(tag).unwrap_or(usize::MAX);
        let Some(slot) = images.get_mut(index).filter(|slot| slot.is_some()) else {
            return Err(RemoteError::new(
                codes::E_IO_ERROR,
                format!("no open image with tag {tag}"),
            ));
        };

        let io_error = |err: std::io::Error| {
            RemoteError::new(codes::E_IO_ERROR, format!("reading image {tag} failed: {err}"))
        };
        let mut data = Vec::new();
        if let Some(file) = slot.as_mut() {
            file.seek(SeekFrom::Start(position)).map_err(io_error)?;
            file.take(size).read_to_end(&mut data).map_err(io_error)?;
        }
        if end {
            *slot = None;
            debug!(tag, "image closed");
        }

        let mut result = Object::new();
        result.insert("data".to_string(), Value::U64Array(bytes_to_u64_array(&data)));
        result.insert("size".to_string(), Value::UInt(data.len() as u64));
        Ok(Value::Object(result))
    }

    /// True iff every requested function, and every argument named for it,
    /// is published.
    fn check_function_support(&self, params: &Object) -> HandlerResult {
        let Some(functions) = params.get("functions").and_then(Value::to_array) else {
            return Err(RemoteError::new(
                codes::E_MALFORMATTED_REQUEST,
                "instance_checkFunctionSupport expects an array 'functions'",
            ));
        };

        let entries = self.read();
        let supported = functions.iter().all(|request| {
            let (name, args) = match request {
                Value::String(name) => (name.as_str(), None),
                Value::Object(obj) => match obj.get("name").and_then(Value::as_str) {
                    Some(name) => (name, obj.get("args").and_then(Value::to_array)),
                    None => return false,
                },
                _ => return false,
            };
            let Some(entry) = entries.get(name) else {
                return false;
            };
            args.unwrap_or_default().iter().all(|arg| {
                let arg_name = match arg {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj.get("name").and_then(Value::as_str),
                    _ => None,
                };
                arg_name.is_some_and(|n| entry.info.args.contains_key(n))
            })
        });
        Ok(Value::Bool(supported))
    }
}

fn builtins() -> [(&'static str, Builtin, FunctionInfo); 5] {
    [
        (
            "instance_ping",
            Builtin::Ping,
            FunctionInfo::new("Ping instance. Returns the payload argument unmodified. No side effects.")
                .optional_arg("payload", "Value", "Dummy payload which is returned unmodified.")
                .returns("Value", "Payload argument."),
        ),
        (
            "instance_getProperties",
            Builtin::GetProperties,
            FunctionInfo::new("Get instance properties.")
                .returns("Object", "Object mapping property names onto property values."),
        ),
        (
            "instance_getFunctionInfo",
            Builtin::GetFunctionInfo,
            FunctionInfo::new(
                "Interface discovery: get all functions supported by this instance, optionally filtered by name prefix.",
            )
            .optional_arg(
                "prefix",
                "String",
                "Return only functions whose name starts with prefix.",
            )
            .returns("Object", "Object mapping function names onto FunctionInfo objects."),
        ),
        (
            "instance_checkFunctionSupport",
            Builtin::CheckFunctionSupport,
            FunctionInfo::new(
                "Interface discovery: check whether this instance supports all given functions and arguments.",
            )
            .arg(
                "functions",
                "Array",
                "Array of FunctionSupportRequest objects (functions and args to query).",
            )
            .returns("Boolean", "True iff all given functions and arguments are supported."),
        ),
        (
            "image_loadDataRead",
            Builtin::ImageLoadDataRead,
            FunctionInfo::new("Retrieve a chunk of data. Callback function of image_loadDataPull().")
                .arg("tag", "NumberU64", "The tag used in the image_loadDataPull() call.")
                .arg(
                    "position",
                    "NumberU64",
                    "Absolute read position in bytes, relative to the start of the image.",
                )
                .arg("size", "NumberU64", "Size of the chunk to read in bytes.")
                .optional_arg(
                    "end",
                    "Boolean",
                    "If this is present and true, this is the last callback for this tag.",
                )
                .returns("Object", "ImageReadResult object: read data and size."),
        ),
    ]
}
