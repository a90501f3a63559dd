//! Configuration actions, combinations and concrete assignments.
//!
//! A [`ConfigAction`] is one named configuration setting with a random
//! value generator. A [`Combo`] is the unordered set of actions tested
//! together, and an [`Assignment`] pins a concrete value to every action
//! of a combo for one execution episode.
//!
//! Actions compare and hash by name only: two separately constructed
//! actions with the same name are the same action. Combos are ordered
//! sets so weight tables keyed by them iterate deterministically.

use rand::RngCore;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// Errors from building actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Action {0} must have at least one scope")]
    NoScopes(String),
}

/// Where a configuration setting may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Global,
    Session,
}

impl Scope {
    /// SQL keyword for this scope.
    pub fn keyword(self) -> &'static str {
        match self {
            Scope::Global => "GLOBAL",
            Scope::Session => "SESSION",
        }
    }
}

/// A concrete value for a configuration setting.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for ParamValue {
    /// Renders the value as a SQL literal.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => write!(f, "ON"),
            ParamValue::Bool(false) => write!(f, "OFF"),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

type ValueGenerator = dyn Fn(&mut dyn RngCore) -> ParamValue + Send + Sync;

struct ActionInner {
    name: String,
    scopes: Vec<Scope>,
    generator: Box<ValueGenerator>,
}

/// A named configuration setting with a random value generator.
///
/// Cheap to clone (shared inner state).
#[derive(Clone)]
pub struct ConfigAction {
    inner: Arc<ActionInner>,
}

impl ConfigAction {
    /// Create an action. `scopes` must not be empty.
    pub fn new<G>(name: impl Into<String>, scopes: &[Scope], generator: G) -> Result<Self, ActionError>
    where
        G: Fn(&mut dyn RngCore) -> ParamValue + Send + Sync + 'static,
    {
        let name = name.into();
        if scopes.is_empty() {
            return Err(ActionError::NoScopes(name));
        }
        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();

        Ok(Self {
            inner: Arc::new(ActionInner {
                name,
                scopes,
                generator: Box::new(generator),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.inner.scopes
    }

    pub fn can_be_used_in(&self, scope: Scope) -> bool {
        self.inner.scopes.contains(&scope)
    }

    /// Scope used when applying a value: SESSION when allowed, else GLOBAL.
    pub fn preferred_scope(&self) -> Scope {
        if self.can_be_used_in(Scope::Session) {
            Scope::Session
        } else {
            Scope::Global
        }
    }

    /// Draw a fresh random value.
    pub fn generate_value(&self, rng: &mut dyn RngCore) -> ParamValue {
        (self.inner.generator)(rng)
    }
}

impl PartialEq for ConfigAction {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for ConfigAction {}

impl Hash for ConfigAction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl PartialOrd for ConfigAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConfigAction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(other.name())
    }
}

impl fmt::Debug for ConfigAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigAction")
            .field("name", &self.inner.name)
            .field("scopes", &self.inner.scopes)
            .finish()
    }
}

impl fmt::Display for ConfigAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The registered action universe of one target, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    actions: Vec<ConfigAction>,
    by_name: BTreeMap<String, ConfigAction>,
}

impl ActionSet {
    /// Build from a list of actions. Later duplicates of a name are ignored.
    pub fn new(actions: impl IntoIterator<Item = ConfigAction>) -> Self {
        let mut set = Self::default();
        for action in actions {
            if set.by_name.contains_key(action.name()) {
                log::warn!("Duplicate action {} ignored", action.name());
                continue;
            }
            set.by_name.insert(action.name().to_string(), action.clone());
            set.actions.push(action);
        }
        set
    }

    pub fn get(&self, name: &str) -> Option<&ConfigAction> {
        self.by_name.get(name)
    }

    pub fn as_slice(&self) -> &[ConfigAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// An unordered, duplicate-free set of actions tested jointly.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Combo {
    actions: BTreeSet<ConfigAction>,
}

impl Combo {
    pub fn new(actions: impl IntoIterator<Item = ConfigAction>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
        }
    }

    /// Every 2-action combination of `actions`.
    pub fn pairwise(actions: &[ConfigAction]) -> Vec<Combo> {
        let mut combos = Vec::with_capacity(actions.len() * actions.len().saturating_sub(1) / 2);
        for (i, a) in actions.iter().enumerate() {
            for b in &actions[i + 1..] {
                if a != b {
                    combos.push(Combo::new([a.clone(), b.clone()]));
                }
            }
        }
        combos
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, action: &ConfigAction) -> bool {
        self.actions.contains(action)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigAction> {
        self.actions.iter()
    }

    /// Action names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name().to_string()).collect()
    }

    /// Draw a concrete value for every action.
    pub fn roll(&self, rng: &mut dyn RngCore) -> Assignment {
        let values = self
            .actions
            .iter()
            .map(|a| (a.clone(), a.generate_value(rng)))
            .collect();
        Assignment {
            combo: self.clone(),
            values,
        }
    }
}

impl FromIterator<ConfigAction> for Combo {
    fn from_iter<I: IntoIterator<Item = ConfigAction>>(iter: I) -> Self {
        Combo::new(iter)
    }
}

impl fmt::Display for Combo {
    /// Comma-separated action names, the persisted key form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(action.name())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Combo{{{}}}", self)
    }
}

/// A combo with one concrete value per action.
#[derive(Debug, Clone)]
pub struct Assignment {
    combo: Combo,
    values: Vec<(ConfigAction, ParamValue)>,
}

impl Assignment {
    pub fn combo(&self) -> &Combo {
        &self.combo
    }

    pub fn values(&self) -> &[(ConfigAction, ParamValue)] {
        &self.values
    }

    pub fn value_of(&self, name: &str) -> Option<&ParamValue> {
        self.values
            .iter()
            .find(|(a, _)| a.name() == name)
            .map(|(_, v)| v)
    }

    /// Same action set, every value re-rolled.
    pub fn mutate(&self, rng: &mut dyn RngCore) -> Assignment {
        self.combo.roll(rng)
    }

    /// `(name, literal)` pairs for reports.
    pub fn describe(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(a, v)| (a.name().to_string(), v.to_string()))
            .collect()
    }
}
