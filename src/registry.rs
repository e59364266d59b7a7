//! Directive Registry
//!
//! Canonical name → ordered list of directives. Registration only records
//! definitions; each name is finalized into [`Directive`]s the first time the
//! matcher asks for it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

use crate::directive::{
    BindToController, BindingMode, BindingSpec, ComponentDefinition, ControllerSpec, Directive,
    DirectiveDefinition, Require, ScopeRequest, TemplateSource,
};
use crate::error::{Error, ExceptionHandler, Result};

lazy_static! {
    static ref ISOLATE_BINDING_RE: Regex =
        Regex::new(r"^\s*([@&<]|=(\*?))(\??)\s*([\w$]*)\s*$").unwrap();
    pub(crate) static ref REQUIRE_PREFIX_RE: Regex =
        Regex::new(r"^(?:(\^\^?)?(\?)?(\^\^?)?)?").unwrap();
    static ref CONTROLLER_AS_RE: Regex = Regex::new(r"^(\S+)(\s+as\s+([\w$]+))?$").unwrap();
    static ref RESTRICT_RE: Regex = Regex::new(r"[EACM]").unwrap();
}

/// Splits `"Name as alias"` into the registry name and the alias.
pub fn parse_controller_expression(expression: &str) -> (String, Option<String>) {
    match CONTROLLER_AS_RE.captures(expression.trim()) {
        Some(caps) => (
            caps[1].to_string(),
            caps.get(3).map(|m| m.as_str().to_string()),
        ),
        None => (expression.trim().to_string(), None),
    }
}

fn validate_name(name: &str) -> Result<()> {
    let first = name.chars().next();
    match first {
        Some(c) if c.is_lowercase() => {}
        _ => {
            return Err(Error::BadDirectiveName {
                name: name.to_string(),
                reason: "The first character must be a lowercase letter".to_string(),
            })
        }
    }
    if name != name.trim() {
        return Err(Error::BadDirectiveName {
            name: name.to_string(),
            reason: "The name should not contain leading or trailing whitespaces".to_string(),
        });
    }
    Ok(())
}

fn parse_bindings(
    definitions: &IndexMap<String, String>,
    directive: &str,
    for_controller: bool,
) -> Result<Vec<BindingSpec>> {
    definitions
        .iter()
        .map(|(property, definition)| {
            let caps = ISOLATE_BINDING_RE.captures(definition).ok_or_else(|| {
                Error::IsolateBinding {
                    kind: if for_controller {
                        "controller bindings definition".to_string()
                    } else {
                        "isolate scope definition".to_string()
                    },
                    directive: directive.to_string(),
                    binding: property.clone(),
                    definition: definition.clone(),
                }
            })?;
            let mode = match &caps[1][..1] {
                "@" => BindingMode::Interpolated,
                "=" => BindingMode::TwoWay,
                "<" => BindingMode::OneWay,
                _ => BindingMode::Expression,
            };
            let attr_name = caps
                .get(4)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or(property)
                .to_string();
            Ok(BindingSpec {
                property: property.clone(),
                attr_name,
                mode,
                collection: caps.get(2).is_some_and(|m| m.as_str() == "*"),
                optional: &caps[3] == "?",
                definition: definition.trim().to_string(),
            })
        })
        .collect()
}

/// Fills in the default `require` and expands empty map entries to their key.
fn resolve_require(definition: &DirectiveDefinition, name: &str) -> Require {
    match &definition.require {
        Require::None if definition.controller.is_some() => Require::One(name.to_string()),
        Require::Map(map) => Require::Map(
            map.iter()
                .map(|(key, value)| {
                    let prefix = REQUIRE_PREFIX_RE
                        .find(value)
                        .map(|m| m.as_str())
                        .unwrap_or("");
                    if value.len() == prefix.len() {
                        (key.clone(), format!("{}{}", prefix, key))
                    } else {
                        (key.clone(), value.clone())
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct Registry {
    definitions: RefCell<IndexMap<String, Vec<DirectiveDefinition>>>,
    finalized: RefCell<HashMap<String, Rc<Vec<Rc<Directive>>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, definition: DirectiveDefinition) -> Result<&Self> {
        validate_name(name)?;
        self.definitions
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(definition);
        self.finalized.borrow_mut().remove(name);
        tracing::debug!(directive = name, "registered directive");
        Ok(self)
    }

    /// Registers an element directive with an isolate scope and its bindings
    /// on the controller (aliased `$ctrl` unless told otherwise).
    pub fn component(&self, name: &str, component: ComponentDefinition) -> Result<&Self> {
        let controller = component
            .controller
            .unwrap_or_else(|| ControllerSpec::factory(|_, _| Ok(crate::value::Value::Undefined)));
        let named_alias = match &controller {
            ControllerSpec::Named(expr) => parse_controller_expression(expr).1,
            _ => None,
        };
        let template = match (&component.template, &component.template_url) {
            (None, None) => Some(TemplateSource::Markup(String::new())),
            (template, _) => template.clone(),
        };
        self.register(
            name,
            DirectiveDefinition {
                restrict: Some("E".to_string()),
                scope: ScopeRequest::Isolate(IndexMap::new()),
                bind_to_controller: BindToController::Bindings(component.bindings),
                controller_as: named_alias
                    .or(component.controller_as)
                    .or_else(|| Some("$ctrl".to_string())),
                controller: Some(controller),
                require: component.require,
                template,
                template_url: component.template_url,
                transclude: component.transclude,
                ..DirectiveDefinition::default()
            },
        )
    }

    pub fn has(&self, name: &str) -> bool {
        self.definitions.borrow().contains_key(name)
    }

    /// Directives registered under `name`, finalized on first use. Invalid
    /// `restrict` values are reported and the directive skipped; malformed
    /// bindings fail the lookup.
    pub fn lookup(
        &self,
        name: &str,
        handler: &dyn ExceptionHandler,
    ) -> Result<Rc<Vec<Rc<Directive>>>> {
        if let Some(found) = self.finalized.borrow().get(name) {
            return Ok(Rc::clone(found));
        }

        let definitions = self
            .definitions
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_default();

        let mut directives = Vec::new();
        for (index, definition) in definitions.into_iter().enumerate() {
            let restrict = match &definition.restrict {
                Some(r) if !r.is_empty() && !RESTRICT_RE.is_match(r) => {
                    let error = Error::BadRestrict {
                        restrict: r.clone(),
                        directive: name.to_string(),
                    };
                    tracing::warn!(directive = name, restrict = %r, "skipping directive");
                    handler.handle(&error, "");
                    continue;
                }
                Some(r) if !r.is_empty() => r.clone(),
                _ => "EA".to_string(),
            };
            directives.push(Rc::new(finalize(name, index, restrict, definition)?));
        }

        let directives = Rc::new(directives);
        self.finalized
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&directives));
        Ok(directives)
    }
}

fn finalize(
    name: &str,
    index: usize,
    restrict: String,
    definition: DirectiveDefinition,
) -> Result<Directive> {
    let mut isolate_bindings = Vec::new();
    let mut controller_bindings = Vec::new();

    if let ScopeRequest::Isolate(map) = &definition.scope {
        if definition.bind_to_controller == BindToController::On {
            controller_bindings = parse_bindings(map, name, true)?;
        } else {
            isolate_bindings = parse_bindings(map, name, false)?;
        }
    }
    if let BindToController::Bindings(map) = &definition.bind_to_controller {
        controller_bindings = parse_bindings(map, name, true)?;
    }

    let alias = match &definition.controller {
        Some(ControllerSpec::Named(expr)) => parse_controller_expression(expr).1,
        _ => None,
    };
    let controller_as = definition.controller_as.clone().or(alias);

    let binds_to_controller = definition.bind_to_controller != BindToController::Off
        && (matches!(definition.scope, ScopeRequest::Isolate(_))
            || matches!(definition.bind_to_controller, BindToController::Bindings(_)));
    if binds_to_controller {
        match &definition.controller {
            None => {
                return Err(Error::NoController {
                    directive: name.to_string(),
                })
            }
            Some(ControllerSpec::FromAttribute) => {}
            Some(_) if controller_as.is_none() => {
                return Err(Error::NoIdentifier {
                    directive: name.to_string(),
                })
            }
            Some(_) => {}
        }
    }

    let require = resolve_require(&definition, name);

    Ok(Directive {
        name: name.to_string(),
        index,
        priority: definition.priority,
        terminal: definition.terminal,
        restrict,
        scope: definition.scope,
        isolate_bindings,
        controller_bindings,
        binds_to_controller,
        controller: definition.controller,
        controller_as,
        require,
        template: definition.template,
        template_url: definition.template_url,
        replace: definition.replace,
        transclude: definition.transclude,
        compile: definition.compile,
        link: definition.link,
        marked_isolate_scope: false,
        marked_new_scope: false,
        original: None,
    })
}
