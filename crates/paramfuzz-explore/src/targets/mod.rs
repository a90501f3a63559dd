//! Per-DBMS configuration targets.
//!
//! A [`DbmsTarget`] lists the configuration actions of one database system
//! and renders the statements that apply or reset them. Targets are looked
//! up by identifier through a [`TargetRegistry`].

pub mod mysql;

use crate::action::{ActionSet, Assignment, ConfigAction, ParamValue, Scope};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use mysql::MySqlTarget;

/// Errors from target lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Unknown target {0}")]
    UnknownTarget(String),
}

/// Configuration capabilities of one DBMS.
pub trait DbmsTarget: Send + Sync {
    /// Registry identifier, e.g. `"mysql"`.
    fn name(&self) -> &str;

    fn list_actions(&self) -> &ActionSet;

    /// Statement that sets `action` to an already rendered SQL literal.
    fn literal_statement(&self, action: &ConfigAction, literal: &str, scope: Scope) -> String;

    /// Statement that sets `action` to `value` in `scope`.
    fn generate_statement(&self, action: &ConfigAction, value: &ParamValue, scope: Scope) -> String {
        self.literal_statement(action, &value.to_string(), scope)
    }

    /// Statement that resets `action` to its default in `scope`.
    fn default_statement(&self, action: &ConfigAction, scope: Scope) -> String;

    /// One statement per action of `assignment`, each in its preferred scope.
    fn apply_statements(&self, assignment: &Assignment) -> Vec<String> {
        assignment
            .values()
            .iter()
            .map(|(action, value)| self.generate_statement(action, value, action.preferred_scope()))
            .collect()
    }

    /// Statements undoing [`apply_statements`](Self::apply_statements).
    fn restore_statements(&self, assignment: &Assignment) -> Vec<String> {
        assignment
            .values()
            .iter()
            .map(|(action, _)| self.default_statement(action, action.preferred_scope()))
            .collect()
    }
}

/// Targets keyed by identifier.
#[derive(Default)]
pub struct TargetRegistry {
    targets: BTreeMap<String, Arc<dyn DbmsTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every target shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MySqlTarget::new()));
        registry
    }

    /// Add `target`, replacing any target with the same name.
    pub fn register(&mut self, target: Arc<dyn DbmsTarget>) {
        self.targets.insert(target.name().to_string(), target);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DbmsTarget>, TargetError> {
        self.targets
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| TargetError::UnknownTarget(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }
}
