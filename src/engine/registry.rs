//! Check registry.
//!
//! Maps check identifiers to their definitions. A registry may have a
//! parent; lookups that miss locally walk up the chain, so the OP catalog
//! sits on top of the generic response checks. Tables are built once and
//! never change afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use tracing::debug;

use crate::checks::{self, CheckFn, CheckResult, Params};
use crate::conversation::Conversation;
use crate::{CheckCategory, Error, Result, Status};

/// How a check is bound to its parameters.
#[derive(Clone, Copy)]
pub enum Constructor {
    /// The check takes no parameters
    Plain(fn(&mut Conversation) -> CheckResult),
    /// The check parses and validates its parameters when built
    WithParams(fn(&Params) -> std::result::Result<CheckFn, String>),
}

/// Static description of a check.
#[derive(Clone, Copy)]
pub struct CheckDef {
    pub id: &'static str,
    pub name: &'static str,
    pub category: CheckCategory,
    /// Status the check escalates to when the OP gets it wrong
    pub severity: Status,
    pub description: &'static str,
    pub constructor: Constructor,
}

impl CheckDef {
    /// Build a runnable check from the parameters given in a flow.
    pub fn instantiate(&self, params: &Params) -> Result<CheckFn> {
        match self.constructor {
            Constructor::Plain(check) => {
                if let Some(key) = params.keys().next() {
                    return Err(Error::InvalidParams {
                        id: self.id.to_string(),
                        reason: format!("takes no parameters, got '{}'", key),
                    });
                }
                Ok(Box::new(check))
            }
            Constructor::WithParams(build) => build(params).map_err(|reason| Error::InvalidParams {
                id: self.id.to_string(),
                reason,
            }),
        }
    }

    pub fn takes_params(&self) -> bool {
        matches!(self.constructor, Constructor::WithParams(_))
    }
}

impl fmt::Debug for CheckDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckDef")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("severity", &self.severity)
            .finish()
    }
}

pub struct Registry {
    name: &'static str,
    checks: HashMap<&'static str, CheckDef>,
    order: Vec<&'static str>,
    parent: Option<Box<Registry>>,
}

impl Registry {
    /// Create a registry from a table of definitions. Later duplicates of an
    /// identifier replace earlier ones.
    pub fn new(name: &'static str, defs: Vec<CheckDef>) -> Self {
        let mut checks = HashMap::new();
        let mut order = Vec::new();
        for def in defs {
            if checks.insert(def.id, def).is_none() {
                order.push(def.id);
            }
        }
        Registry {
            name,
            checks,
            order,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: Registry) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Registry of framework-level response checks.
    pub fn generic() -> Self {
        Registry::new("generic", checks::generic::definitions())
    }

    /// The OP check catalog with the generic registry as parent.
    pub fn standard() -> &'static Registry {
        static STANDARD: OnceLock<Registry> = OnceLock::new();
        STANDARD.get_or_init(|| Registry::new("op", checks::all_definitions()).with_parent(Registry::generic()))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up `id` here, then in each parent in turn.
    pub fn resolve(&self, id: &str) -> Result<&CheckDef> {
        let mut registry = Some(self);
        while let Some(current) = registry {
            if let Some(def) = current.checks.get(id) {
                debug!(check = id, registry = current.name, "resolved check");
                return Ok(def);
            }
            registry = current.parent.as_deref();
        }
        Err(Error::UnknownCheck { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_ok()
    }

    /// Definitions of this registry only, in registration order.
    pub fn local(&self) -> impl Iterator<Item = &CheckDef> {
        self.order.iter().filter_map(|id| self.checks.get(id))
    }

    /// Every definition reachable from this registry. A parent's check
    /// shadowed by a local one with the same id is left out.
    pub fn all(&self) -> Vec<&CheckDef> {
        let mut defs: Vec<&CheckDef> = Vec::new();
        let mut registry = Some(self);
        while let Some(current) = registry {
            for def in current.local() {
                if !defs.iter().any(|d| d.id == def.id) {
                    defs.push(def);
                }
            }
            registry = current.parent.as_deref();
        }
        defs
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("checks", &self.order.len())
            .field("parent", &self.parent.as_ref().map(|p| p.name))
            .finish()
    }
}
