//! Receptor Registry — catalogue of in-process message handlers, keyed by
//! message type (spec.md §4.6, §9 "polymorphic receptor bases → tagged
//! dispatch through a generated table"). Directly modeled on
//! `mqk-strategy::PluginRegistry`: an insertion-ordered catalogue entries
//! can be looked up by key, listed, and invoked, generalized from "one
//! active strategy" to "many registered receptors dispatched by type".

use serde_json::Value;

use crate::scope::RequestScope;

/// A message emitted by a receptor in response to a command/event — handed
/// back to the [`crate::Dispatcher`] to be queued as outbox rows.
#[derive(Debug, Clone)]
pub struct OutputEvent {
    pub message_type: String,
    pub payload: Value,
    /// `None` means "same stream as the message that produced it".
    pub stream_id: Option<String>,
    pub is_event: bool,
}

/// Errors a receptor invocation can produce. Caught by the worker loop and
/// turned into a queued failure (spec.md §7 `HandlerFailure`), never
/// propagated as a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptorError(pub String);

impl std::fmt::Display for ReceptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "receptor failed: {}", self.0)
    }
}

impl std::error::Error for ReceptorError {}

/// A registered in-process handler: receives the scope for this dispatch
/// plus the message payload, returns the events it produced.
pub type Receptor = Box<dyn Fn(&RequestScope, &Value) -> Result<Vec<OutputEvent>, ReceptorError> + Send + Sync>;

/// Static metadata for a registered receptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceptorMeta {
    pub message_type: String,
    pub description: String,
}

impl ReceptorMeta {
    pub fn new(message_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            description: description.into(),
        }
    }
}

/// Errors returned by [`ReceptorRegistry`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateMessageType { message_type: String },
    UnknownMessageType { message_type: String },
    EmptyMessageType,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateMessageType { message_type } => {
                write!(f, "receptor for message type '{message_type}' is already registered")
            }
            Self::UnknownMessageType { message_type } => {
                write!(f, "no receptor registered for message type '{message_type}'")
            }
            Self::EmptyMessageType => write!(f, "message type must not be empty"),
        }
    }
}

impl std::error::Error for RegistryError {}

struct RegistryEntry {
    meta: ReceptorMeta,
    receptor: Receptor,
}

/// Catalogue of registered receptors, keyed by message type. Insertion
/// order is preserved in `list()` (same determinism guarantee as
/// `mqk_strategy::PluginRegistry`).
#[derive(Default)]
pub struct ReceptorRegistry {
    entries: Vec<RegistryEntry>,
}

impl ReceptorRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register a receptor for `meta.message_type`.
    ///
    /// # Errors
    /// [`RegistryError::EmptyMessageType`] / [`RegistryError::DuplicateMessageType`].
    pub fn register<F>(&mut self, meta: ReceptorMeta, receptor: F) -> Result<(), RegistryError>
    where
        F: Fn(&RequestScope, &Value) -> Result<Vec<OutputEvent>, ReceptorError> + Send + Sync + 'static,
    {
        if meta.message_type.trim().is_empty() {
            return Err(RegistryError::EmptyMessageType);
        }
        if self.contains(&meta.message_type) {
            return Err(RegistryError::DuplicateMessageType {
                message_type: meta.message_type.clone(),
            });
        }
        self.entries.push(RegistryEntry {
            meta,
            receptor: Box::new(receptor),
        });
        Ok(())
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.entries.iter().any(|e| e.meta.message_type == message_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered receptors' metadata, in insertion order.
    pub fn list(&self) -> Vec<&ReceptorMeta> {
        self.entries.iter().map(|e| &e.meta).collect()
    }

    pub fn lookup(&self, message_type: &str) -> Result<&ReceptorMeta, RegistryError> {
        self.entries
            .iter()
            .find(|e| e.meta.message_type == message_type)
            .map(|e| &e.meta)
            .ok_or_else(|| RegistryError::UnknownMessageType {
                message_type: message_type.to_string(),
            })
    }

    /// Invoke the registered receptor for `message_type` with `scope`/`payload`.
    ///
    /// # Errors
    /// [`RegistryError::UnknownMessageType`] if nothing is registered.
    pub fn invoke(
        &self,
        message_type: &str,
        scope: &RequestScope,
        payload: &Value,
    ) -> Result<Vec<OutputEvent>, InvokeError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.meta.message_type == message_type)
            .ok_or_else(|| InvokeError::Registry(RegistryError::UnknownMessageType {
                message_type: message_type.to_string(),
            }))?;
        (entry.receptor)(scope, payload).map_err(InvokeError::Receptor)
    }
}

/// Either the registry couldn't find a receptor, or the receptor it found
/// failed. Kept as a distinct type from [`RegistryError`] so callers can
/// match on "misconfiguration" vs "application failure" separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    Registry(RegistryError),
    Receptor(ReceptorError),
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "{e}"),
            Self::Receptor(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InvokeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::RequestScope;

    fn noop_scope() -> RequestScope {
        RequestScope::for_test()
    }

    #[test]
    fn register_and_invoke_round_trips() {
        let mut registry = ReceptorRegistry::new();
        registry
            .register(ReceptorMeta::new("CreateProduct", "creates a product"), |_scope, payload| {
                Ok(vec![OutputEvent {
                    message_type: "ProductCreatedEvent".to_string(),
                    payload: payload.clone(),
                    stream_id: None,
                    is_event: true,
                }])
            })
            .unwrap();

        let scope = noop_scope();
        let out = registry.invoke("CreateProduct", &scope, &serde_json::json!({"ProductId": "P1"})).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message_type, "ProductCreatedEvent");
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ReceptorRegistry::new();
        registry
            .register(ReceptorMeta::new("X", ""), |_, _| Ok(Vec::new()))
            .unwrap();
        let err = registry
            .register(ReceptorMeta::new("X", ""), |_, _| Ok(Vec::new()))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateMessageType { message_type: "X".to_string() });
    }

    #[test]
    fn unknown_message_type_invoke_fails() {
        let registry = ReceptorRegistry::new();
        let scope = noop_scope();
        let err = registry.invoke("Nope", &scope, &Value::Null).unwrap_err();
        assert!(matches!(err, InvokeError::Registry(RegistryError::UnknownMessageType { .. })));
    }

    #[test]
    fn list_preserves_insertion_order() {
        let mut registry = ReceptorRegistry::new();
        registry.register(ReceptorMeta::new("A", ""), |_, _| Ok(Vec::new())).unwrap();
        registry.register(ReceptorMeta::new("B", ""), |_, _| Ok(Vec::new())).unwrap();
        let names: Vec<_> = registry.list().iter().map(|m| m.message_type.clone()).collect();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }
}
