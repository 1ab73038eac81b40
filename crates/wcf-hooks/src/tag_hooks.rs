//! Tag-hook registry (spec.md §4.7). Modeled directly on the teacher's
//! insertion-ordered `PluginRegistry`: hooks register against a tag type (or
//! `None` for "every tagged message, any tag"), and callers ask for the
//! hooks that should fire for one tag, already sorted by priority.

use serde_json::Value;
use uuid::Uuid;

/// Priority hooks get when none is supplied at registration — low enough
/// that built-ins (audit) run after any application-registered hook unless
/// that hook explicitly asks to run later.
pub const DEFAULT_PRIORITY: i32 = -100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookError(pub String);

impl std::fmt::Display for HookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tag hook failed: {}", self.0)
    }
}

impl std::error::Error for HookError {}

/// One message as seen by a tag hook: which tags it carries, and the tag
/// that caused this particular firing (a hook registered for `"audit"` only
/// cares that `"audit"` is present, even if other tags also matched).
#[derive(Debug, Clone)]
pub struct TaggedMessage {
    pub message_id: Uuid,
    pub message_type: String,
    pub stream_id: String,
    pub tags: Vec<String>,
    pub matched_tag: String,
    pub payload: Value,
}

impl TaggedMessage {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

pub type TagHook = Box<dyn Fn(&TaggedMessage) -> Result<(), HookError> + Send + Sync>;

struct Entry {
    tag_type: Option<String>,
    priority: i32,
    name: String,
    hook: TagHook,
}

/// Insertion-ordered catalogue of tag hooks (spec.md §4.7), generalizing the
/// teacher's `PluginRegistry` from "one factory per strategy name" to
/// "N hooks per tag type, plus any number of universal hooks".
#[derive(Default)]
pub struct TagHookRegistry {
    entries: Vec<Entry>,
}

impl TagHookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. `tag_type: None` means universal — it fires for
    /// every tag on every tagged message. Lower `priority` runs first;
    /// ties keep registration order (a stable sort over insertion order).
    pub fn register(&mut self, name: impl Into<String>, tag_type: Option<String>, priority: i32, hook: TagHook) {
        self.entries.push(Entry {
            tag_type,
            priority,
            name: name.into(),
            hook,
        });
    }

    pub fn register_default_priority(&mut self, name: impl Into<String>, tag_type: Option<String>, hook: TagHook) {
        self.register(name, tag_type, DEFAULT_PRIORITY, hook);
    }

    /// Hooks that should fire for `tag`, ascending by priority, universal
    /// hooks merged in alongside the tag-specific ones.
    fn hooks_for(&self, tag: &str) -> Vec<&Entry> {
        let mut matching: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| e.tag_type.as_deref() == Some(tag) || e.tag_type.is_none())
            .collect();
        matching.sort_by_key(|e| e.priority);
        matching
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fire every hook registered for `tag` against `message`, in priority
    /// order. Hooks are independent (an audit-write failure must not stop a
    /// metrics hook from running) so every failure is collected rather than
    /// short-circuiting.
    pub fn fire(&self, tag: &str, message: &TaggedMessage) -> Vec<(String, HookError)> {
        let mut errors = Vec::new();
        for entry in self.hooks_for(tag) {
            if let Err(e) = (entry.hook)(message) {
                errors.push((entry.name.clone(), e));
            }
        }
        errors
    }

    /// Fire the hooks registered for every tag the message carries. A
    /// universal hook fires once per tag present — if a message carries
    /// both `"audit"` and `"metric"`, a universal hook runs twice. This
    /// mirrors firing "per (message, tag) pairing", not "per message".
    pub fn fire_all(&self, message: &TaggedMessage) -> Vec<(String, HookError)> {
        let mut errors = Vec::new();
        for tag in &message.tags {
            errors.extend(self.fire(tag, message));
        }
        errors
    }
}
