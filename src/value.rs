//! Dynamic Value Model
//!
//! Scope properties, controller instances, attribute values and expression
//! results all share this representation. Arrays and objects are shared
//! handles so identity (`strict_eq`) and in-place mutation behave the way
//! bound templates expect.

use indexmap::IndexMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Largest integer an `f64` represents exactly (2^53 - 1).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Native callable: `(this, args) -> value`.
pub type NativeFn = Rc<dyn Fn(&Value, &[Value]) -> Result<Value>>;

pub type ObjectMap = IndexMap<String, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectMap>>),
    Function(NativeFn),
    /// Opaque host object (scope, element, attributes, transclude handle).
    Host(Rc<dyn Any>),
}

impl Value {
    // ═══════════════════════════════════════════════════════════════════════════
    // CONSTRUCTORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn object() -> Self {
        Value::Object(Rc::new(RefCell::new(IndexMap::new())))
    }

    pub fn object_from<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn function(f: impl Fn(&Value, &[Value]) -> Result<Value> + 'static) -> Self {
        Value::Function(Rc::new(f))
    }

    pub fn host<T: Any>(item: T) -> Self {
        Value::Host(Rc::new(item))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INSPECTION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    /// Objects, arrays, functions and host values.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Host(_)
        )
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn downcast_host<T: Any>(&self) -> Option<Rc<T>> {
        match self {
            Value::Host(rc) => Rc::clone(rc).downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// String form used when a value is written into text or an attribute.
    /// `undefined` and `null` render as the empty string, objects as JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
            other => other.to_js_string(),
        }
    }

    /// `String(value)` semantics.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(_) => "function".to_string(),
            Value::Host(_) => "[object Host]".to_string(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROPERTY ACCESS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
            Value::Array(items) => {
                if key == "length" {
                    return Value::Number(items.borrow().len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.borrow().get(i).cloned())
                    .unwrap_or_default()
            }
            Value::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Undefined,
        }
    }

    /// Assigns a property. Returns false when the value cannot hold properties.
    pub fn set(&self, key: &str, value: Value) -> bool {
        match self {
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                true
            }
            Value::Array(items) => match key.parse::<usize>() {
                Ok(i) => {
                    let mut items = items.borrow_mut();
                    if i >= items.len() {
                        items.resize(i + 1, Value::Undefined);
                    }
                    items[i] = value;
                    true
                }
                Err(_) => false,
            },
            _ => false,
        }
    }

    pub fn has_own(&self, key: &str) -> bool {
        match self {
            Value::Object(map) => map.borrow().contains_key(key),
            _ => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.borrow().keys().cloned().collect(),
            Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Copies every own property of `source` onto `self`.
    pub fn extend_from(&self, source: &Value) {
        if let Value::Object(src) = source {
            let entries: Vec<(String, Value)> = src
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (k, v) in entries {
                self.set(&k, v);
            }
        }
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(f) => f(this, args),
            other => Err(Error::callback(format!(
                "{} is not a function",
                other.to_js_string()
            ))),
        }
    }

    /// Calls the method stored under `name`, if there is one.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Option<Result<Value>> {
        match self.get(name) {
            Value::Function(f) => Some(f(self, args)),
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EQUALITY
    // ═══════════════════════════════════════════════════════════════════════════

    /// `===`: NaN is unequal to itself, references compare by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `===` with NaN treated as equal to NaN.
    pub fn same_value(&self, other: &Value) -> bool {
        self.strict_eq(other) || (self.is_nan() && other.is_nan())
    }

    /// `==` loose equality for primitives.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if self.is_reference() || other.is_reference() {
                    self.strict_eq(other)
                } else {
                    self.to_number() == other.to_number()
                }
            }
            _ => self.strict_eq(other),
        }
    }

    /// Structural equality over arrays and objects; NaN equals NaN.
    pub fn deep_equals(&self, other: &Value) -> bool {
        if self.same_value(other) {
            return true;
        }
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|w| v.deep_equals(w)).unwrap_or(false))
            }
            _ => false,
        }
    }

    /// Copies arrays and objects recursively; other values are shared.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(items) => {
                Value::array(items.borrow().iter().map(Value::deep_clone).collect())
            }
            Value::Object(map) => Value::Object(Rc::new(RefCell::new(
                map.borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect(),
            ))),
            other => other.clone(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // JSON
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) | Value::Host(_) => {
                serde_json::Value::Null
            }
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                serde_json::Value::Number(serde_json::Number::from(*n as i64))
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.borrow().iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl PartialEq for Value {
    /// Structural comparison, see [`Value::deep_equals`].
    fn eq(&self, other: &Self) -> bool {
        self.deep_equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.borrow().iter()).finish(),
            Value::Function(_) => write!(f, "[function]"),
            Value::Host(_) => write!(f, "[host]"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::object_from(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INJECTABLE (DI-array form)
// ═══════════════════════════════════════════════════════════════════════════════

/// A function together with the names of the dependencies it expects,
/// resolved by an [`crate::injector::Injector`] at call time.
#[derive(Clone)]
pub struct Injectable {
    pub deps: Vec<String>,
    pub func: NativeFn,
}

impl Injectable {
    pub fn new<S: Into<String>>(
        deps: impl IntoIterator<Item = S>,
        func: impl Fn(&Value, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        Self {
            deps: deps.into_iter().map(Into::into).collect(),
            func: Rc::new(func),
        }
    }
}

impl fmt::Debug for Injectable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injectable").field("deps", &self.deps).finish()
    }
}
