//! Element Attributes
//!
//! One [`Attributes`] object is shared by every directive on an element. It
//! maps normalized names (`ngModel`) to values and remembers the original
//! spelling (`data-ng-model`) so writes land on the right DOM attribute.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

use crate::dom::NodeRef;
use crate::error::{ExceptionHandler, Result};
use crate::sanitize::UrlSanitizer;
use crate::scope::Scope;
use crate::value::Value;

lazy_static! {
    static ref SIMPLE_ATTR_NAME_RE: Regex = Regex::new(r"^[\w:\-.]+$").unwrap();
    static ref SNAKE_CASE_RE: Regex = Regex::new(r"[A-Z]").unwrap();
}

/// `fooBar` → `foo-bar` (with `-` as separator).
pub fn snake_case(name: &str, separator: char) -> String {
    SNAKE_CASE_RE
        .replace_all(name, |caps: &regex::Captures| {
            let letter = &caps[0];
            format!("{}{}", separator, letter.to_ascii_lowercase())
        })
        .into_owned()
}

pub type ObserverFn = Rc<dyn Fn(&Value) -> Result<()>>;

struct Observers {
    /// Set once an interpolation owns the attribute.
    interpolated: bool,
    listeners: Vec<(usize, ObserverFn)>,
}

struct AttributesInner {
    element: RefCell<NodeRef>,
    values: RefCell<IndexMap<String, Value>>,
    attr_names: RefCell<HashMap<String, String>>,
    observers: RefCell<HashMap<String, Observers>>,
    scope: RefCell<Option<Scope>>,
    handler: Rc<dyn ExceptionHandler>,
    next_observer: Cell<usize>,
}

#[derive(Clone)]
pub struct Attributes(Rc<AttributesInner>);

/// Returned by [`Attributes::observe`].
pub struct ObserverHandle {
    attrs: Attributes,
    key: String,
    id: usize,
}

impl ObserverHandle {
    pub fn remove(&self) {
        if let Some(observers) = self.attrs.0.observers.borrow_mut().get_mut(&self.key) {
            observers.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Attributes {
    pub fn new(element: &NodeRef, handler: Rc<dyn ExceptionHandler>) -> Self {
        Attributes(Rc::new(AttributesInner {
            element: RefCell::new(element.clone()),
            values: RefCell::new(IndexMap::new()),
            attr_names: RefCell::new(HashMap::new()),
            observers: RefCell::new(HashMap::new()),
            scope: RefCell::new(None),
            handler,
            next_observer: Cell::new(0),
        }))
    }

    /// Fresh instance for a cloned element: values and spellings are copied,
    /// observers are not.
    pub fn clone_for(&self, element: &NodeRef) -> Self {
        let copy = Attributes::new(element, Rc::clone(&self.0.handler));
        *copy.0.values.borrow_mut() = self.0.values.borrow().clone();
        *copy.0.attr_names.borrow_mut() = self.0.attr_names.borrow().clone();
        copy
    }

    pub fn ptr_eq(&self, other: &Attributes) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn element(&self) -> NodeRef {
        self.0.element.borrow().clone()
    }

    pub(crate) fn set_element(&self, element: &NodeRef) {
        *self.0.element.borrow_mut() = element.clone();
    }

    /// Scope used to schedule the initial `observe` callback.
    pub(crate) fn bind_scope(&self, scope: &Scope) {
        *self.0.scope.borrow_mut() = Some(scope.clone());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VALUES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn get(&self, key: &str) -> Value {
        self.0.values.borrow().get(key).cloned().unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.values.borrow().get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.values.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.values.borrow().keys().cloned().collect()
    }

    /// Writes the value map only: no DOM write, no observers.
    pub fn insert(&self, key: &str, value: Value) {
        self.0.values.borrow_mut().insert(key.to_string(), value);
    }

    /// DOM spelling recorded for a normalized name (`$attr`).
    pub fn attr_name(&self, key: &str) -> Option<String> {
        self.0.attr_names.borrow().get(key).cloned()
    }

    pub(crate) fn set_attr_name(&self, key: &str, name: &str) {
        self.0
            .attr_names
            .borrow_mut()
            .insert(key.to_string(), name.to_string());
    }

    pub(crate) fn remove_attr_name(&self, key: &str) {
        self.0.attr_names.borrow_mut().remove(key);
    }

    /// Normalizes a raw attribute name.
    pub fn normalize(&self, name: &str) -> String {
        crate::matcher::directive_normalize(name)
    }

    /// Sets `key` to `value`, optionally mirroring it onto the element, and
    /// notifies observers. `null`/`undefined` removes the DOM attribute.
    pub fn set(&self, key: &str, value: Value, write_attr: bool, attr_name: Option<&str>) {
        let element = self.element();

        let attr_name = match attr_name {
            Some(name) => {
                self.set_attr_name(key, name);
                name.to_string()
            }
            None => match self.attr_name(key) {
                Some(name) => name,
                None => {
                    let name = snake_case(key, '-');
                    self.set_attr_name(key, &name);
                    name
                }
            },
        };

        let value = match (&value, UrlSanitizer::applies_to(element.tag_name(), key)) {
            (Value::String(url), Some(is_media)) => {
                Value::String(UrlSanitizer.sanitize(url, is_media))
            }
            _ => value,
        };

        self.insert(key, value.clone());

        if write_attr {
            if value.is_nullish() {
                element.remove_attr(&attr_name);
            } else if SIMPLE_ATTR_NAME_RE.is_match(&attr_name) {
                element.set_attr(&attr_name, &value.to_display_string());
            } else {
                tracing::warn!(attribute = %attr_name, "skipping write of unusual attribute name");
            }
        }

        let listeners: Vec<ObserverFn> = self
            .0
            .observers
            .borrow()
            .get(key)
            .map(|o| o.listeners.iter().map(|(_, f)| Rc::clone(f)).collect())
            .unwrap_or_default();
        for listener in listeners {
            if let Err(e) = listener(&value) {
                self.0.handler.handle(&e, &element.starting_tag());
            }
        }
    }

    /// Calls `f` whenever `key` changes through [`Attributes::set`]. Unless an
    /// interpolation owns the attribute, `f` also runs once on the next digest
    /// with the current value.
    pub fn observe(
        &self,
        key: &str,
        f: impl Fn(&Value) -> Result<()> + 'static,
    ) -> ObserverHandle {
        let id = self.0.next_observer.get();
        self.0.next_observer.set(id + 1);
        let f: ObserverFn = Rc::new(f);

        self.0
            .observers
            .borrow_mut()
            .entry(key.to_string())
            .or_insert_with(|| Observers {
                interpolated: false,
                listeners: Vec::new(),
            })
            .listeners
            .push((id, Rc::clone(&f)));

        let scope = self.0.scope.borrow().clone();
        if let Some(scope) = scope {
            let attrs = self.clone();
            let key = key.to_string();
            scope.eval_async(move |_| {
                let interpolated = attrs
                    .0
                    .observers
                    .borrow()
                    .get(&key)
                    .is_some_and(|o| o.interpolated);
                let value = attrs.get(&key);
                if !interpolated && attrs.has(&key) && !value.is_undefined() {
                    f(&value)?;
                }
                Ok(())
            });
        }

        ObserverHandle {
            attrs: self.clone(),
            key: key.to_string(),
            id,
        }
    }

    pub(crate) fn mark_interpolated(&self, key: &str) {
        self.0
            .observers
            .borrow_mut()
            .entry(key.to_string())
            .or_insert_with(|| Observers {
                interpolated: true,
                listeners: Vec::new(),
            })
            .interpolated = true;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLASSES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn add_class(&self, classes: &str) {
        if !classes.trim().is_empty() {
            self.element().add_class(classes);
        }
    }

    pub fn remove_class(&self, classes: &str) {
        if !classes.trim().is_empty() {
            self.element().remove_class(classes);
        }
    }

    /// Applies the difference between two class strings.
    pub fn update_class(&self, new_classes: &str, old_classes: &str) {
        let new: HashSet<&str> = new_classes.split_whitespace().collect();
        let old: HashSet<&str> = old_classes.split_whitespace().collect();
        let to_add: Vec<&str> = new_classes
            .split_whitespace()
            .filter(|c| !old.contains(c))
            .collect();
        let to_remove: Vec<&str> = old_classes
            .split_whitespace()
            .filter(|c| !new.contains(c))
            .collect();
        self.add_class(&to_add.join(" "));
        self.remove_class(&to_remove.join(" "));
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.values.borrow().iter())
            .finish()
    }
}
