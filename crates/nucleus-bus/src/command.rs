//! Locally provided command sets.
//!
//! A command set is a named collection of async handlers. Handlers receive
//! their argument decoded from CBOR and either complete without a value or
//! produce one, which is encoded back to CBOR for the reply.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::BusError;
use crate::message::SerializedType;

/// What a finished command hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    Value(Vec<u8>),
}

pub type CommandFuture = BoxFuture<'static, anyhow::Result<CommandOutcome>>;
type Handler = Arc<dyn Fn(Vec<u8>) -> CommandFuture + Send + Sync>;

/// Descriptor of a command that completes without a value.
pub struct Command<A> {
    command_set: &'static str,
    name: &'static str,
    _args: PhantomData<fn(A)>,
}

impl<A> Command<A> {
    pub const fn new(command_set: &'static str, name: &'static str) -> Self {
        Self {
            command_set,
            name,
            _args: PhantomData,
        }
    }

    pub fn command_set(&self) -> SerializedType {
        SerializedType::new(self.command_set)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Descriptor of a command that produces an `R`.
pub struct CommandWithResult<A, R> {
    command_set: &'static str,
    name: &'static str,
    _sig: PhantomData<fn(A) -> R>,
}

impl<A, R> CommandWithResult<A, R> {
    pub const fn new(command_set: &'static str, name: &'static str) -> Self {
        Self {
            command_set,
            name,
            _sig: PhantomData,
        }
    }

    pub fn command_set(&self) -> SerializedType {
        SerializedType::new(self.command_set)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub struct CommandSet {
    descriptor: SerializedType,
    handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for CommandSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut members: Vec<&String> = self.handlers.keys().collect();
        members.sort();
        f.debug_struct("CommandSet")
            .field("descriptor", &self.descriptor)
            .field("members", &members)
            .finish()
    }
}

impl CommandSet {
    pub fn builder(name: impl Into<String>) -> CommandSetBuilder {
        CommandSetBuilder {
            descriptor: SerializedType::new(name),
            handlers: HashMap::new(),
        }
    }

    pub fn descriptor(&self) -> &SerializedType {
        &self.descriptor
    }

    pub fn has_command(&self, member: &str) -> bool {
        self.handlers.contains_key(member)
    }

    /// Starts running `member` with CBOR encoded `arguments`. Looking up the
    /// member happens eagerly; decoding and execution happen in the future.
    pub fn invoke(&self, member: &str, arguments: Vec<u8>) -> Result<CommandFuture, BusError> {
        let handler = self.handlers.get(member).ok_or_else(|| BusError::UnknownCommand {
            command_set: self.descriptor.clone(),
            member: member.to_string(),
        })?;
        Ok(handler(arguments))
    }
}

pub struct CommandSetBuilder {
    descriptor: SerializedType,
    handlers: HashMap<String, Handler>,
}

impl CommandSetBuilder {
    pub fn command<A, F, Fut>(mut self, command: &Command<A>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        debug_assert_eq!(command.command_set, self.descriptor.name);
        let handler = Arc::new(handler);
        self.handlers.insert(
            command.name.to_string(),
            Arc::new(move |bytes: Vec<u8>| -> CommandFuture {
                Box::pin(run_command(handler.clone(), bytes))
            }),
        );
        self
    }

    pub fn command_with_result<A, R, F, Fut>(
        mut self,
        command: &CommandWithResult<A, R>,
        handler: F,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        debug_assert_eq!(command.command_set, self.descriptor.name);
        let handler = Arc::new(handler);
        self.handlers.insert(
            command.name.to_string(),
            Arc::new(move |bytes: Vec<u8>| -> CommandFuture {
                Box::pin(run_command_with_result(handler.clone(), bytes))
            }),
        );
        self
    }

    pub fn build(self) -> CommandSet {
        CommandSet {
            descriptor: self.descriptor,
            handlers: self.handlers,
        }
    }
}

async fn run_command<A, F, Fut>(handler: Arc<F>, bytes: Vec<u8>) -> anyhow::Result<CommandOutcome>
where
    A: DeserializeOwned,
    F: Fn(A) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let args: A = serde_cbor::from_slice(&bytes)?;
    (*handler)(args).await?;
    Ok(CommandOutcome::Completed)
}

async fn run_command_with_result<A, R, F, Fut>(
    handler: Arc<F>,
    bytes: Vec<u8>,
) -> anyhow::Result<CommandOutcome>
where
    A: DeserializeOwned,
    R: Serialize,
    F: Fn(A) -> Fut,
    Fut: Future<Output = anyhow::Result<R>>,
{
    let args: A = serde_cbor::from_slice(&bytes)?;
    let value = (*handler)(args).await?;
    Ok(CommandOutcome::Value(serde_cbor::to_vec(&value)?))
}

type RegistrationObserver = Box<dyn Fn(&SerializedType) + Send + Sync>;

/// Command sets offered by this endpoint, keyed by name.
#[derive(Default)]
pub struct LocalCommandCollection {
    sets: RwLock<BTreeMap<SerializedType, Arc<CommandSet>>>,
    on_registered: RwLock<Vec<RegistrationObserver>>,
}

impl LocalCommandCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, set: CommandSet) -> Result<Arc<CommandSet>, BusError> {
        let descriptor = set.descriptor.clone();
        let set = Arc::new(set);
        {
            let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
            if sets.contains_key(&descriptor) {
                return Err(BusError::DuplicateCommandSet(descriptor));
            }
            sets.insert(descriptor.clone(), set.clone());
        }
        tracing::debug!(command_set = %descriptor, "registered command set");
        for observer in self.on_registered.read().unwrap_or_else(|e| e.into_inner()).iter() {
            observer(&descriptor);
        }
        Ok(set)
    }

    pub fn unregister(&self, descriptor: &SerializedType) -> Result<Arc<CommandSet>, BusError> {
        self.sets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(descriptor)
            .ok_or_else(|| BusError::UnknownCommandSet(descriptor.clone()))
    }

    pub fn commands_for(&self, descriptor: &SerializedType) -> Option<Arc<CommandSet>> {
        self.sets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(descriptor)
            .cloned()
    }

    /// Descriptors of every registered set, sorted by name.
    pub fn registered_types(&self) -> Vec<SerializedType> {
        self.sets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `observer` with the descriptor of every set registered from now on.
    pub fn on_registered(&self, observer: impl Fn(&SerializedType) + Send + Sync + 'static) {
        self.on_registered
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(observer));
    }
}
