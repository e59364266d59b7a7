//! Isolate & Controller Bindings
//!
//! Wires the `@`, `=`, `<` and `&` bindings declared by a directive between
//! the scope the element lives in and a destination: the isolate scope, or
//! the controller instance when bindings are moved onto the controller.
//!
//! Changes seen by `@` and `<` bindings are recorded for destinations that
//! implement `$onChanges`. Records are batched per destination and flushed
//! once per digest through a queue shared by the whole compiler.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::attributes::{Attributes, ObserverHandle};
use crate::compiler::CompilerCore;
use crate::directive::{BindingMode, BindingSpec, Directive};
use crate::error::{Error, Result};
use crate::scope::{Scope, WatchHandle, WatchListener};
use crate::value::Value;

// ═══════════════════════════════════════════════════════════════════════════════
// DESTINATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Where bound values are written.
#[derive(Clone)]
pub(crate) enum BindingTarget {
    Scope(Scope),
    Object(Value),
}

impl BindingTarget {
    fn get(&self, key: &str) -> Value {
        match self {
            BindingTarget::Scope(scope) => scope.get(key),
            BindingTarget::Object(object) => object.get(key),
        }
    }

    fn set(&self, key: &str, value: Value) {
        match self {
            BindingTarget::Scope(scope) => scope.set(key, value),
            BindingTarget::Object(object) => {
                object.set(key, value);
            }
        }
    }

    fn has_on_changes(&self) -> bool {
        self.get("$onChanges").is_function()
    }

    fn call_on_changes(&self, changes: &Value) -> Result<()> {
        let hook = self.get("$onChanges");
        let this = match self {
            BindingTarget::Scope(_) => Value::Undefined,
            BindingTarget::Object(object) => object.clone(),
        };
        hook.call(&this, std::slice::from_ref(changes)).map(|_| ())
    }
}

/// `{currentValue, previousValue, firstChange}` passed to `$onChanges`.
pub fn simple_change(previous: Value, current: Value, first_change: bool) -> Value {
    Value::object_from([
        ("currentValue", current),
        ("previousValue", previous),
        ("firstChange", Value::Bool(first_change)),
    ])
}

// ═══════════════════════════════════════════════════════════════════════════════
// $onChanges QUEUE
// ═══════════════════════════════════════════════════════════════════════════════

type ChangeTrigger = Rc<dyn Fn() -> Result<()>>;

/// Pending `$onChanges` calls, flushed after the digest that recorded them.
pub(crate) struct OnChangesQueue {
    ttl: u32,
    remaining: Cell<u32>,
    queue: RefCell<Option<Vec<ChangeTrigger>>>,
}

impl OnChangesQueue {
    pub(crate) fn new(ttl: u32) -> Self {
        Self {
            ttl,
            remaining: Cell::new(ttl),
            queue: RefCell::new(None),
        }
    }

    fn push(self: &Rc<Self>, scope: &Scope, trigger: ChangeTrigger) {
        let mut queue = self.queue.borrow_mut();
        if queue.is_none() {
            let me = Rc::clone(self);
            let root = scope.root_scope();
            scope.post_digest(move || me.flush(&root));
            *queue = Some(Vec::new());
        }
        if let Some(queue) = queue.as_mut() {
            queue.push(trigger);
        }
    }

    /// Runs every queued trigger inside one `apply`, so the hooks' own
    /// changes are digested in a single extra pass. Nested flushes are
    /// bounded by the configured TTL.
    fn flush(&self, root: &Scope) -> Result<()> {
        let remaining = self.remaining.get().saturating_sub(1);
        self.remaining.set(remaining);

        let result = if remaining == 0 {
            self.queue.borrow_mut().take();
            tracing::warn!(ttl = self.ttl, "$onChanges flush aborted");
            Err(Error::InfiniteChanges { ttl: self.ttl })
        } else {
            root.apply(|scope| {
                let handler = scope.exception_handler();
                let mut index = 0;
                loop {
                    let trigger = self
                        .queue
                        .borrow()
                        .as_ref()
                        .and_then(|q| q.get(index).cloned());
                    let Some(trigger) = trigger else { break };
                    if let Err(e) = trigger() {
                        handler.handle(&e, "$onChanges");
                    }
                    index += 1;
                }
                self.queue.borrow_mut().take();
                Ok(())
            })
        };

        self.remaining.set(self.remaining.get() + 1);
        result
    }
}

/// Accumulates the changes of one destination between flushes.
struct ChangeRecorder {
    target: BindingTarget,
    scope: Scope,
    queue: Rc<OnChangesQueue>,
    changes: RefCell<Option<Value>>,
}

impl ChangeRecorder {
    fn record(self: &Rc<Self>, key: &str, current: &Value, previous: &Value) {
        if !self.target.has_on_changes() || current.same_value(previous) {
            return;
        }
        let changes = {
            let mut slot = self.changes.borrow_mut();
            match &*slot {
                Some(changes) => changes.clone(),
                None => {
                    let changes = Value::object();
                    *slot = Some(changes.clone());
                    let me = Rc::clone(self);
                    self.queue.push(&self.scope, Rc::new(move || me.trigger()));
                    changes
                }
            }
        };
        // Several changes of one key between flushes keep the oldest value.
        let previous = match changes.get(key) {
            existing @ Value::Object(_) => existing.get("previousValue"),
            _ => previous.clone(),
        };
        changes.set(key, simple_change(previous, current.clone(), false));
    }

    fn trigger(&self) -> Result<()> {
        let changes = self.changes.borrow_mut().take();
        match changes {
            Some(changes) => self.target.call_on_changes(&changes),
            None => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INITIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

enum BindingHandle {
    Watch(WatchHandle),
    Observer(ObserverHandle),
}

/// Result of wiring one destination.
pub(crate) struct BindingInfo {
    /// Key → first `simple_change` for `@` and `<` bindings.
    pub(crate) initial_changes: Value,
    handles: Vec<BindingHandle>,
}

impl BindingInfo {
    pub(crate) fn remove_watches(&self) {
        for handle in &self.handles {
            match handle {
                BindingHandle::Watch(watch) => watch.remove(),
                BindingHandle::Observer(observer) => observer.remove(),
            }
        }
    }
}

/// Expression source of a `=` or `<` binding, or `None` when the binding is
/// optional and has nothing to bind to.
fn bound_expression(attrs: &Attributes, spec: &BindingSpec) -> Option<String> {
    if !attrs.has(&spec.attr_name) {
        if spec.optional {
            return None;
        }
        attrs.insert(&spec.attr_name, Value::Undefined);
    }
    let value = attrs.get(&spec.attr_name);
    if spec.optional && !value.truthy() {
        return None;
    }
    Some(match value {
        Value::String(source) => source,
        Value::Undefined => String::new(),
        other => other.to_js_string(),
    })
}

pub(crate) fn initialize_directive_bindings(
    core: &Rc<CompilerCore>,
    scope: &Scope,
    attrs: &Attributes,
    destination: BindingTarget,
    bindings: &[BindingSpec],
    directive: &Directive,
) -> Result<BindingInfo> {
    let recorder = Rc::new(ChangeRecorder {
        target: destination.clone(),
        scope: scope.clone(),
        queue: Rc::clone(&core.on_changes),
        changes: RefCell::new(None),
    });
    let initial_changes = Value::object();
    let mut handles = Vec::new();

    for spec in bindings {
        let key = spec.property.clone();
        match spec.mode {
            BindingMode::Interpolated => {
                if !spec.optional && !attrs.has(&spec.attr_name) {
                    destination.set(&key, Value::Undefined);
                    attrs.insert(&spec.attr_name, Value::Undefined);
                }

                let target = destination.clone();
                let recorder = Rc::clone(&recorder);
                let observed_key = key.clone();
                let observer = attrs.observe(&spec.attr_name, move |value| {
                    if matches!(value, Value::String(_) | Value::Bool(_)) {
                        let old = target.get(&observed_key);
                        recorder.record(&observed_key, value, &old);
                        target.set(&observed_key, value.clone());
                    }
                    Ok(())
                });
                handles.push(BindingHandle::Observer(observer));

                if let Value::String(text) = attrs.get(&spec.attr_name) {
                    if let Some(interpolation) =
                        core.interpolator.interpolate(&text, false, None, false)?
                    {
                        destination.set(&key, interpolation.eval(scope)?);
                    }
                }
                initial_changes.set(
                    &key,
                    simple_change(Value::Undefined, destination.get(&key), true),
                );
            }

            BindingMode::TwoWay => {
                let Some(source) = bound_expression(attrs, spec) else {
                    continue;
                };
                let parent_get = core.parser.parse(&source)?;
                let literal = parent_get.is_literal();
                let compare = move |a: &Value, b: &Value| {
                    if literal {
                        a.deep_equals(b)
                    } else {
                        a.same_value(b)
                    }
                };

                let initial = parent_get.eval(scope, None)?;
                destination.set(&key, initial.clone());
                let last_value = Rc::new(RefCell::new(initial));

                let target = destination.clone();
                let attr_name = spec.attr_name.clone();
                let directive_name = directive.name.clone();
                let parent_value_watch = move |scope: &Scope, parent_value: Value| -> Result<Value> {
                    let mut parent_value = parent_value;
                    let current = target.get(&key);
                    if !compare(&parent_value, &current) {
                        let last = last_value.borrow().clone();
                        if !compare(&parent_value, &last) {
                            // Parent changed: it wins.
                            target.set(&key, parent_value.clone());
                        } else {
                            parent_value = current;
                            if parent_get.is_assignable() {
                                parent_get.assign(scope, parent_value.clone())?;
                            } else {
                                let rolled_back = parent_get.eval(scope, None)?;
                                target.set(&key, rolled_back.clone());
                                *last_value.borrow_mut() = rolled_back;
                                return Err(Error::NonAssignable {
                                    expression: parent_get.source().to_string(),
                                    attribute: attr_name.clone(),
                                    directive: directive_name.clone(),
                                });
                            }
                        }
                    }
                    *last_value.borrow_mut() = parent_value.clone();
                    Ok(parent_value)
                };

                let getter = core.parser.parse(&source)?;
                let handle = if spec.collection {
                    let noop: WatchListener = Rc::new(|_: &Value, _: &Value, _: &Scope| Ok(()));
                    scope.watch_collection(
                        move |s| {
                            let value = getter.eval(s, None)?;
                            parent_value_watch(s, value)
                        },
                        noop,
                    )
                } else {
                    scope.watch(
                        move |s| {
                            let value = getter.eval(s, None)?;
                            parent_value_watch(s, value)
                        },
                        None,
                        literal,
                    )
                };
                handles.push(BindingHandle::Watch(handle));
            }

            BindingMode::OneWay => {
                let Some(source) = bound_expression(attrs, spec) else {
                    continue;
                };
                let parent_get = core.parser.parse(&source)?;
                let literal = parent_get.is_literal();
                let initial = parent_get.eval(scope, None)?;
                destination.set(&key, initial.clone());
                initial_changes.set(&key, simple_change(Value::Undefined, initial.clone(), true));

                let target = destination.clone();
                let recorder = Rc::clone(&recorder);
                let listener: WatchListener =
                    Rc::new(move |new: &Value, old: &Value, _: &Scope| {
                        let mut old = old.clone();
                        if old.strict_eq(new) {
                            if old.strict_eq(&initial) || (literal && old.deep_equals(&initial)) {
                                return Ok(());
                            }
                            old = initial.clone();
                        }
                        recorder.record(&key, new, &old);
                        target.set(&key, new.clone());
                        Ok(())
                    });
                let handle = if spec.collection {
                    scope.watch_collection(move |s| parent_get.eval(s, None), listener)
                } else {
                    scope.watch(move |s| parent_get.eval(s, None), Some(listener), literal)
                };
                handles.push(BindingHandle::Watch(handle));
            }

            BindingMode::Expression => {
                if !attrs.has(&spec.attr_name) && spec.optional {
                    continue;
                }
                let parent_get = match attrs.get(&spec.attr_name) {
                    Value::String(source) => Some(core.parser.parse(&source)?),
                    _ => None,
                };
                let parent_scope = scope.clone();
                destination.set(
                    &key,
                    Value::function(move |_, args| match &parent_get {
                        Some(expression) => expression.eval(&parent_scope, args.first()),
                        None => Ok(Value::Undefined),
                    }),
                );
            }
        }
    }

    tracing::trace!(
        directive = %directive.name,
        bindings = bindings.len(),
        "initialized directive bindings"
    );
    Ok(BindingInfo {
        initial_changes,
        handles,
    })
}
