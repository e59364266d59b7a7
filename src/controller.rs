//! Controllers
//!
//! Instantiation happens in two steps so bindings can be written onto the
//! instance before the constructor runs: [`setup_controllers`] pre-creates an
//! empty instance per controller directive, [`ControllerInstance::construct`]
//! later invokes the constructor with that instance as `this`. A constructor
//! returning an object, array or function replaces the instance.
//!
//! [`get_controllers`] resolves a directive's `require` against the element's
//! own controllers and the `$<name>Controller` node data of its ancestors.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::attributes::Attributes;
use crate::bindings::BindingInfo;
use crate::compiler::CompilerCore;
use crate::directive::{ControllerFactory, ControllerSpec, Directive, Require};
use crate::dom::NodeRef;
use crate::error::{Error, ExceptionHandler, Result};
use crate::registry::{parse_controller_expression, REQUIRE_PREFIX_RE};
use crate::scope::Scope;
use crate::transclude::Transclude;
use crate::value::{Injectable, Value};

/// Locals available to a controller constructor.
#[derive(Clone)]
pub struct ControllerLocals {
    pub scope: Scope,
    pub element: NodeRef,
    pub attrs: Attributes,
    pub transclude: Option<Transclude>,
}

impl ControllerLocals {
    /// `$scope`, `$element`, `$attrs`, `$transclude` as injectable locals.
    pub fn to_value(&self) -> Value {
        Value::object_from([
            ("$scope", Value::host(self.scope.clone())),
            ("$element", Value::host(self.element.clone())),
            ("$attrs", Value::host(self.attrs.clone())),
            (
                "$transclude",
                self.transclude
                    .clone()
                    .map(Value::host)
                    .unwrap_or_default(),
            ),
        ])
    }
}

pub(crate) fn controller_data_key(name: &str) -> String {
    format!("${}Controller", name)
}

enum Constructor {
    Factory(ControllerFactory),
    Injectable(Rc<Injectable>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCES
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct ControllerInstance {
    pub(crate) directive: Rc<Directive>,
    instance: RefCell<Value>,
    identifier: Option<String>,
    constructor: Constructor,
    locals: ControllerLocals,
    pub(crate) binding_info: RefCell<Option<BindingInfo>>,
}

pub(crate) type ElementControllers = IndexMap<String, Rc<ControllerInstance>>;

/// Element controllers shared with the element's `$transclude`, which is
/// created before the controllers exist.
pub(crate) type SharedControllers = Rc<RefCell<ElementControllers>>;

impl ControllerInstance {
    pub(crate) fn instance(&self) -> Value {
        self.instance.borrow().clone()
    }

    fn publish(&self) {
        let instance = self.instance();
        if let Some(identifier) = &self.identifier {
            self.locals.scope.set(identifier, instance.clone());
        }
        self.locals
            .element
            .set_data(&controller_data_key(&self.directive.name), instance);
    }

    /// Runs the constructor against the pre-created instance. Returns true
    /// when the constructor supplied a replacement instance.
    pub(crate) fn construct(&self, core: &CompilerCore) -> Result<bool> {
        let this = self.instance();
        let result = match &self.constructor {
            Constructor::Factory(factory) => factory(&self.locals, &this)?,
            Constructor::Injectable(injectable) => {
                core.injector
                    .invoke(injectable, &this, Some(&self.locals.to_value()))?
            }
        };
        if result.is_reference() && !result.strict_eq(&this) {
            *self.instance.borrow_mut() = result;
            self.publish();
            return Ok(true);
        }
        Ok(false)
    }
}

/// Pre-creates the controllers of an element in directive order.
#[allow(clippy::too_many_arguments)]
pub(crate) fn setup_controllers(
    core: &CompilerCore,
    element: &NodeRef,
    attrs: &Attributes,
    transclude: Option<Transclude>,
    controller_directives: &IndexMap<String, Rc<Directive>>,
    isolate_scope: Option<&Scope>,
    scope: &Scope,
    new_isolate_scope_directive: Option<&Rc<Directive>>,
) -> Result<ElementControllers> {
    let mut controllers = ElementControllers::new();

    for (name, directive) in controller_directives {
        let uses_isolate = new_isolate_scope_directive.is_some_and(|d| Rc::ptr_eq(d, directive))
            || directive.marked_isolate_scope;
        let locals = ControllerLocals {
            scope: match (uses_isolate, isolate_scope) {
                (true, Some(isolate)) => isolate.clone(),
                _ => scope.clone(),
            },
            element: element.clone(),
            attrs: attrs.clone(),
            transclude: transclude.clone(),
        };

        let (constructor, alias) = match &directive.controller {
            Some(ControllerSpec::Factory(factory)) => (Constructor::Factory(Rc::clone(factory)), None),
            Some(ControllerSpec::Injectable(injectable)) => {
                (Constructor::Injectable(Rc::clone(injectable)), None)
            }
            Some(ControllerSpec::Named(expression)) => {
                let (registered, alias) = parse_controller_expression(expression);
                (Constructor::Injectable(core.controllers.get(&registered)?), alias)
            }
            Some(ControllerSpec::FromAttribute) => {
                let expression = attrs.get(&directive.name).to_display_string();
                let (registered, alias) = parse_controller_expression(&expression);
                (Constructor::Injectable(core.controllers.get(&registered)?), alias)
            }
            None => continue,
        };

        let controller = Rc::new(ControllerInstance {
            directive: Rc::clone(directive),
            instance: RefCell::new(Value::object()),
            identifier: alias.or_else(|| directive.controller_as.clone()),
            constructor,
            locals,
            binding_info: RefCell::new(None),
        });
        controller.publish();
        controllers.insert(name.clone(), controller);
    }

    Ok(controllers)
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUIRE
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves `require` for `directive_name`. Missing mandatory controllers
/// fail with `ctreq`; missing optional ones resolve to `null`.
pub(crate) fn get_controllers(
    directive_name: &str,
    require: &Require,
    element: &NodeRef,
    element_controllers: Option<&ElementControllers>,
) -> Result<Value> {
    match require {
        Require::None => Ok(Value::Undefined),
        Require::One(name) => get_controller(directive_name, name, element, element_controllers),
        Require::Many(names) => {
            let values = names
                .iter()
                .map(|name| get_controller(directive_name, name, element, element_controllers))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::array(values))
        }
        Require::Map(map) => {
            let value = Value::object();
            for (property, name) in map {
                value.set(
                    property,
                    get_controller(directive_name, name, element, element_controllers)?,
                );
            }
            Ok(value)
        }
    }
}

fn get_controller(
    directive_name: &str,
    require: &str,
    element: &NodeRef,
    element_controllers: Option<&ElementControllers>,
) -> Result<Value> {
    let prefix = REQUIRE_PREFIX_RE
        .captures(require)
        .map(|caps| {
            let inherit = caps
                .get(1)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string());
            let optional = caps.get(2).is_some();
            let length = caps.get(0).map_or(0, |m| m.len());
            (inherit, optional, length)
        })
        .unwrap_or((None, false, 0));
    let (inherit, optional, length) = prefix;
    let name = &require[length..];

    let mut value = None;
    let search_from = if inherit.as_deref() == Some("^^") {
        element.parent()
    } else {
        value = element_controllers
            .and_then(|controllers| controllers.get(name))
            .map(|controller| controller.instance());
        Some(element.clone())
    };

    if value.as_ref().map_or(true, |v| !v.truthy()) {
        let key = controller_data_key(name);
        value = search_from.and_then(|node| {
            if inherit.is_some() {
                node.inherited_data(&key)
            } else {
                node.data(&key)
            }
        });
    }

    match value {
        Some(value) if value.truthy() => Ok(value),
        _ if optional => Ok(Value::Null),
        _ => Err(Error::ControllerRequired {
            controller: name.to_string(),
            directive: directive_name.to_string(),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs `$onChanges` (with the initial changes), `$onInit` and `$doCheck`
/// for each controller in construction order and registers `$onDestroy`.
/// A throwing hook is reported and does not affect the other controllers.
pub(crate) fn run_initial_hooks(
    controllers: &ElementControllers,
    controller_scope: &Scope,
    handler: &Rc<dyn ExceptionHandler>,
    context: &str,
) {
    for controller in controllers.values() {
        let instance = controller.instance();

        if instance.get("$onChanges").is_function() {
            let initial = controller
                .binding_info
                .borrow()
                .as_ref()
                .map(|info| info.initial_changes.clone())
                .unwrap_or_else(Value::object);
            if let Some(Err(e)) = instance.call_method("$onChanges", &[initial]) {
                handler.handle(&e, context);
            }
        }

        if let Some(Err(e)) = instance.call_method("$onInit", &[]) {
            handler.handle(&e, context);
        }

        if instance.get("$doCheck").is_function() {
            let checked = instance.clone();
            controller_scope.watch(
                move |_| {
                    checked.call_method("$doCheck", &[]).transpose()?;
                    Ok(Value::Undefined)
                },
                None,
                false,
            );
            if let Some(Err(e)) = instance.call_method("$doCheck", &[]) {
                handler.handle(&e, context);
            }
        }

        if instance.get("$onDestroy").is_function() {
            let destroyed = instance.clone();
            controller_scope.on_destroy(move || {
                destroyed.call_method("$onDestroy", &[]).transpose()?;
                Ok(())
            });
        }
    }
}

/// Calls `$postLink` on each controller; errors are reported.
pub(crate) fn run_post_link_hooks(
    controllers: &ElementControllers,
    handler: &Rc<dyn ExceptionHandler>,
    context: &str,
) {
    for controller in controllers.values() {
        if let Some(Err(e)) = controller.instance().call_method("$postLink", &[]) {
            handler.handle(&e, context);
        }
    }
}
