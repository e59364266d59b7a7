//! Dependency Injection
//!
//! The compiler resolves injectable controllers and template functions
//! through the [`Injector`] trait. [`ServiceRegistry`] is a flat
//! name-to-value implementation; [`ControllerRegistry`] holds controllers
//! registered by name.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::{Injectable, Value};

pub trait Injector {
    fn has(&self, name: &str) -> bool;

    fn get(&self, name: &str) -> Result<Value>;

    /// Calls `injectable` with its dependencies. Own properties of `locals`
    /// take precedence over registered services.
    fn invoke(&self, injectable: &Injectable, this: &Value, locals: Option<&Value>) -> Result<Value> {
        let args = injectable
            .deps
            .iter()
            .map(|dep| match locals {
                Some(locals) if locals.has_own(dep) => Ok(locals.get(dep)),
                _ => self.get(dep),
            })
            .collect::<Result<Vec<_>>>()?;
        (injectable.func)(this, &args)
    }
}

#[derive(Default)]
pub struct ServiceRegistry {
    services: RefCell<IndexMap<String, Value>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, value: Value) -> &Self {
        self.services.borrow_mut().insert(name.to_string(), value);
        self
    }
}

impl Injector for ServiceRegistry {
    fn has(&self, name: &str) -> bool {
        self.services.borrow().contains_key(name)
    }

    fn get(&self, name: &str) -> Result<Value> {
        self.services
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProvider {
                name: name.to_string(),
            })
    }
}

/// Controllers addressable by name from a directive's `controller` field.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: RefCell<IndexMap<String, Rc<Injectable>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, controller: Injectable) -> &Self {
        self.controllers
            .borrow_mut()
            .insert(name.to_string(), Rc::new(controller));
        self
    }

    pub fn get(&self, name: &str) -> Result<Rc<Injectable>> {
        self.controllers
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ControllerRegistry {
                name: name.to_string(),
            })
    }
}
