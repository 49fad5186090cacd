use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::{Call, Engine};
use crate::pending::PendingReply;
use crate::transport::Transport;
use crate::{ParleyError, Result};

/// One operation bound to an engine, and optionally to a send option.
///
/// Calling it is exactly a fresh [`Engine::request`]; nothing is cached.
pub struct Operation<T: Transport> {
    engine: Engine<T>,
    name: String,
    option: Option<T::Target>,
}

impl<T: Transport> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            name: self.name.clone(),
            option: self.option.clone(),
        }
    }
}

impl<T: Transport> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("option", &self.option)
            .finish()
    }
}

impl<T: Transport> Operation<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn request<A: Serialize>(&self, args: A) -> Result<PendingReply> {
        let call = match &self.option {
            Some(option) => Call::with_option(option.clone(), self.name.as_str(), args)?,
            None => Call::new(self.name.as_str(), args)?,
        };
        self.engine.request(call).await
    }

    pub async fn call<R, A>(&self, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        self.request(args).await?.json().await
    }
}

/// A named group of operations bound to one engine.
///
/// Built once by [`Engine::category`] from a known operation list; each
/// entry is an [`Operation`] delegating to the engine. The category name is
/// descriptive only and never travels on the wire.
///
/// # Examples
///
/// ```no_run
/// use parley_core::{Engine, MemoryTransport};
///
/// # async fn example() -> parley_core::Result<()> {
/// let (host, _worker) = MemoryTransport::pair();
/// let engine = Engine::new(host);
/// let math = engine.category("math", &["add", "mul"]);
///
/// let sum: i64 = math.call("add", (2, 3)).await?;
/// let product: i64 = math.operation("mul").unwrap().call((4, 5)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Category<T: Transport> {
    name: String,
    operations: BTreeMap<String, Operation<T>>,
}

impl<T: Transport> Clone for Category<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            operations: self.operations.clone(),
        }
    }
}

impl<T: Transport> fmt::Debug for Category<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Category")
            .field("name", &self.name)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Transport> Category<T> {
    pub(crate) fn new(
        engine: Engine<T>,
        name: String,
        operations: &[&str],
        option: Option<T::Target>,
    ) -> Self {
        let operations = operations
            .iter()
            .map(|op| {
                let bound = Operation {
                    engine: engine.clone(),
                    name: op.to_string(),
                    option: option.clone(),
                };
                (op.to_string(), bound)
            })
            .collect();
        Self { name, operations }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operation(&self, name: &str) -> Option<&Operation<T>> {
        self.operations.get(name)
    }

    /// Bound operation names, sorted.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// The same operations, every call carrying `option`.
    pub fn with_option(&self, option: T::Target) -> Self {
        let operations = self
            .operations
            .iter()
            .map(|(name, op)| {
                let bound = Operation {
                    engine: op.engine.clone(),
                    name: op.name.clone(),
                    option: Some(option.clone()),
                };
                (name.clone(), bound)
            })
            .collect();
        Self {
            name: self.name.clone(),
            operations,
        }
    }

    pub async fn request<A: Serialize>(&self, operation: &str, args: A) -> Result<PendingReply> {
        self.operations
            .get(operation)
            .ok_or_else(|| ParleyError::UnknownOperation(format!("{}.{}", self.name, operation)))?
            .request(args)
            .await
    }

    pub async fn call<R, A>(&self, operation: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        self.request(operation, args).await?.json().await
    }
}
