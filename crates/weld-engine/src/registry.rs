//! Process-wide field registry.
//!
//! One [`FieldRegistry`] is constructed at startup, populated with field
//! descriptors, and shared (via `Arc`) into the condition builder and the
//! dispatcher. Names are unique across the process: registering a duplicate
//! is a fatal startup error, never silently tolerated. Aliases let several
//! names resolve to one underlying field.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use weld_core::EventCategory;

use crate::error::RegistryError;
use crate::field::{Field, FieldClause};

#[derive(Default)]
struct RegistryInner {
    fields: HashMap<String, FieldClause>,
    /// Registration order, for deterministic default-clause injection.
    order: Vec<String>,
    /// Alias → final field name (pre-resolved at alias creation).
    aliases: HashMap<String, String>,
}

/// The table of registered fields.
#[derive(Default)]
pub struct FieldRegistry {
    inner: RwLock<RegistryInner>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field, returning its singleton clause handle.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateField`] when the name is already taken by
    /// a field or an alias. Treat as fatal at startup.
    pub fn register(&self, field: Field) -> Result<FieldClause, RegistryError> {
        let mut inner = self.inner.write();
        let name = field.name().to_string();
        if inner.fields.contains_key(&name) || inner.aliases.contains_key(&name) {
            return Err(RegistryError::DuplicateField(name));
        }
        let clause = FieldClause::new(Arc::new(field));
        inner.fields.insert(name.clone(), clause.clone());
        inner.order.push(name);
        Ok(clause)
    }

    /// Creates a redirect alias. The target may itself be an alias; the
    /// redirect is resolved once, at creation time.
    pub fn alias(
        &self,
        alias: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let alias = alias.into();
        let target = target.into();
        let mut inner = self.inner.write();
        if inner.fields.contains_key(&alias) || inner.aliases.contains_key(&alias) {
            return Err(RegistryError::DuplicateField(alias));
        }
        let resolved = inner.aliases.get(&target).cloned().unwrap_or_else(|| target.clone());
        if !inner.fields.contains_key(&resolved) {
            return Err(RegistryError::UnknownAliasTarget { alias, target });
        }
        inner.aliases.insert(alias, resolved);
        Ok(())
    }

    /// Resolves a name (following aliases) to its clause handle.
    pub fn resolve(&self, name: &str) -> Result<FieldClause, RegistryError> {
        let inner = self.inner.read();
        let target = inner.aliases.get(name).map_or(name, String::as_str);
        inner
            .fields
            .get(target)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownField(name.to_string()))
    }

    /// Returns whether a field or alias exists under `name`.
    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.read();
        inner.fields.contains_key(name) || inner.aliases.contains_key(name)
    }

    /// Clauses of fields that carry a default factory and apply to
    /// `category`, in registration order.
    pub fn defaulted_fields(&self, category: EventCategory) -> Vec<FieldClause> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.fields.get(name))
            .filter(|clause| {
                clause.field().default_factory().is_some() && clause.field().applies_to(category)
            })
            .cloned()
            .collect()
    }

    /// Number of registered fields (aliases excluded).
    pub fn len(&self) -> usize {
        self.inner.read().fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().fields.is_empty()
    }
}

impl std::fmt::Debug for FieldRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("FieldRegistry")
            .field("fields", &inner.order)
            .field("aliases", &inner.aliases)
            .finish()
    }
}
