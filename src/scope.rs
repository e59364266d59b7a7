//! Scope Hierarchy & Digest
//!
//! Scopes form a tree used for destruction and digesting. Property lookup
//! follows a separate chain: a child scope falls back to its prototype scope
//! (usually its parent), an isolate scope never does. Transcluded scopes use
//! the defining scope as prototype while being parented to the containing
//! scope.
//!
//! Children hold strong references downwards only; parent, prototype and root
//! pointers are weak.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{Error, ExceptionHandler, Result};
use crate::value::Value;

pub type WatchGetter = Rc<dyn Fn(&Scope) -> Result<Value>>;
pub type WatchListener = Rc<dyn Fn(&Value, &Value, &Scope) -> Result<()>>;

type AsyncTask = Box<dyn FnOnce(&Scope) -> Result<()>>;
type PostDigestTask = Box<dyn FnOnce() -> Result<()>>;
type DestroyListener = Box<dyn FnOnce() -> Result<()>>;

// ═══════════════════════════════════════════════════════════════════════════════
// INTERNAL STATE
// ═══════════════════════════════════════════════════════════════════════════════

enum ScopeKind {
    Root,
    Child { proto: Weak<ScopeInner> },
    Isolate,
}

struct Watcher {
    get: WatchGetter,
    listener: Option<WatchListener>,
    deep: bool,
    /// `None` until the first evaluation.
    last: RefCell<Option<Value>>,
    removed: Cell<bool>,
}

/// State shared by every scope of one tree.
struct RootState {
    phase: RefCell<Option<&'static str>>,
    async_queue: RefCell<VecDeque<(Scope, AsyncTask)>>,
    post_digest_queue: RefCell<VecDeque<PostDigestTask>>,
    exception_handler: Rc<dyn ExceptionHandler>,
    ttl: u32,
    next_id: Cell<usize>,
}

struct ScopeInner {
    id: usize,
    kind: ScopeKind,
    state: Rc<RootState>,
    root: Weak<ScopeInner>,
    parent: RefCell<Weak<ScopeInner>>,
    children: RefCell<Vec<Rc<ScopeInner>>>,
    props: RefCell<IndexMap<String, Value>>,
    watchers: RefCell<Vec<Rc<Watcher>>>,
    destroy_listeners: RefCell<Vec<DestroyListener>>,
    destroyed: Cell<bool>,
    transcluded: Cell<bool>,
    isolate_bindings: RefCell<Vec<(String, String)>>,
}

/// Handle to a scope. Cloning shares the scope.
#[derive(Clone)]
pub struct Scope(Rc<ScopeInner>);

/// Returned by [`Scope::watch`]; removes the watcher when asked.
#[derive(Clone)]
pub struct WatchHandle {
    watcher: Weak<Watcher>,
}

impl WatchHandle {
    pub fn remove(&self) {
        if let Some(watcher) = self.watcher.upgrade() {
            watcher.removed.set(true);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

impl Scope {
    pub fn root(exception_handler: Rc<dyn ExceptionHandler>, ttl: u32) -> Scope {
        let state = Rc::new(RootState {
            phase: RefCell::new(None),
            async_queue: RefCell::new(VecDeque::new()),
            post_digest_queue: RefCell::new(VecDeque::new()),
            exception_handler,
            ttl: ttl.max(1),
            next_id: Cell::new(2),
        });
        Scope(Rc::new_cyclic(|me| ScopeInner {
            id: 1,
            kind: ScopeKind::Root,
            state,
            root: me.clone(),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            props: RefCell::new(IndexMap::new()),
            watchers: RefCell::new(Vec::new()),
            destroy_listeners: RefCell::new(Vec::new()),
            destroyed: Cell::new(false),
            transcluded: Cell::new(false),
            isolate_bindings: RefCell::new(Vec::new()),
        }))
    }

    fn spawn(&self, kind: ScopeKind, parent: &Scope) -> Scope {
        let state = Rc::clone(&self.0.state);
        let id = state.next_id.get();
        state.next_id.set(id + 1);
        let child = Rc::new(ScopeInner {
            id,
            kind,
            state,
            root: self.0.root.clone(),
            parent: RefCell::new(Rc::downgrade(&parent.0)),
            children: RefCell::new(Vec::new()),
            props: RefCell::new(IndexMap::new()),
            watchers: RefCell::new(Vec::new()),
            destroy_listeners: RefCell::new(Vec::new()),
            destroyed: Cell::new(parent.is_destroyed()),
            transcluded: Cell::new(false),
            isolate_bindings: RefCell::new(Vec::new()),
        });
        parent.0.children.borrow_mut().push(Rc::clone(&child));
        Scope(child)
    }

    /// `$new(isolate)`.
    pub fn new_child(&self, isolate: bool) -> Scope {
        let kind = if isolate {
            ScopeKind::Isolate
        } else {
            ScopeKind::Child {
                proto: Rc::downgrade(&self.0),
            }
        };
        self.spawn(kind, self)
    }

    /// A scope that looks properties up through `self` but is destroyed with
    /// `containing`.
    pub fn new_transcluded(&self, containing: &Scope) -> Scope {
        let scope = self.spawn(
            ScopeKind::Child {
                proto: Rc::downgrade(&self.0),
            },
            containing,
        );
        scope.0.transcluded.set(true);
        scope
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HIERARCHY
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn parent(&self) -> Option<Scope> {
        self.0.parent.borrow().upgrade().map(Scope)
    }

    pub fn children(&self) -> Vec<Scope> {
        self.0.children.borrow().iter().cloned().map(Scope).collect()
    }

    pub fn root_scope(&self) -> Scope {
        self.0
            .root
            .upgrade()
            .map(Scope)
            .unwrap_or_else(|| self.clone())
    }

    pub fn is_isolate(&self) -> bool {
        matches!(self.0.kind, ScopeKind::Isolate)
    }

    pub fn is_transcluded(&self) -> bool {
        self.0.transcluded.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub fn exception_handler(&self) -> Rc<dyn ExceptionHandler> {
        Rc::clone(&self.0.state.exception_handler)
    }

    pub fn phase(&self) -> Option<&'static str> {
        *self.0.state.phase.borrow()
    }

    /// Binding definitions recorded on an isolate scope, as
    /// `(scope property, definition)` pairs.
    pub fn isolate_bindings(&self) -> Vec<(String, String)> {
        self.0.isolate_bindings.borrow().clone()
    }

    pub fn set_isolate_bindings(&self, bindings: Vec<(String, String)>) {
        *self.0.isolate_bindings.borrow_mut() = bindings;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROPERTIES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn get(&self, name: &str) -> Value {
        if let Some(value) = self.0.props.borrow().get(name) {
            return value.clone();
        }
        match &self.0.kind {
            ScopeKind::Child { proto } => proto
                .upgrade()
                .map(|p| Scope(p).get(name))
                .unwrap_or_default(),
            ScopeKind::Root | ScopeKind::Isolate => Value::Undefined,
        }
    }

    /// Assigns an own property, shadowing any inherited one.
    pub fn set(&self, name: &str, value: Value) {
        self.0.props.borrow_mut().insert(name.to_string(), value);
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.0.props.borrow().contains_key(name)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // WATCHERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Registers a watcher. The listener's first call receives the new value
    /// as both arguments. `deep` compares structurally against a copy.
    pub fn watch(
        &self,
        get: impl Fn(&Scope) -> Result<Value> + 'static,
        listener: Option<WatchListener>,
        deep: bool,
    ) -> WatchHandle {
        let watcher = Rc::new(Watcher {
            get: Rc::new(get),
            listener,
            deep,
            last: RefCell::new(None),
            removed: Cell::new(false),
        });
        let handle = WatchHandle {
            watcher: Rc::downgrade(&watcher),
        };
        self.0.watchers.borrow_mut().push(watcher);
        handle
    }

    /// Watches the shallow contents of an array or object: a change in any
    /// top-level item or key fires the listener.
    pub fn watch_collection(
        &self,
        get: impl Fn(&Scope) -> Result<Value> + 'static,
        listener: WatchListener,
    ) -> WatchHandle {
        let snapshot: Rc<RefCell<Option<Vec<(String, Value)>>>> = Rc::new(RefCell::new(None));
        let version = Rc::new(Cell::new(0.0_f64));
        let latest = Rc::new(RefCell::new(Value::Undefined));

        let counter = {
            let version = Rc::clone(&version);
            let latest = Rc::clone(&latest);
            move |scope: &Scope| -> Result<Value> {
                let value = get(scope)?;
                let entries = shallow_entries(&value);
                let mut prev = snapshot.borrow_mut();
                let changed = match prev.as_ref() {
                    None => true,
                    Some(old) => {
                        old.len() != entries.len()
                            || old
                                .iter()
                                .zip(entries.iter())
                                .any(|((ka, va), (kb, vb))| ka != kb || !va.same_value(vb))
                    }
                };
                if changed {
                    *prev = Some(entries);
                    version.set(version.get() + 1.0);
                }
                *latest.borrow_mut() = value;
                Ok(Value::Number(version.get()))
            }
        };

        let previous = Rc::new(RefCell::new(Value::Undefined));
        let wrapped: WatchListener = Rc::new(move |_: &Value, _: &Value, scope: &Scope| {
            let current = latest.borrow().clone();
            let old = std::mem::replace(&mut *previous.borrow_mut(), current.deep_clone());
            let old = if old.is_undefined() { current.clone() } else { old };
            listener(&current, &old, scope)
        });
        self.watch(counter, Some(wrapped), false)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DIGEST
    // ═══════════════════════════════════════════════════════════════════════════

    fn begin_phase(&self, phase: &'static str) -> Result<()> {
        let mut current = self.0.state.phase.borrow_mut();
        if let Some(running) = *current {
            return Err(Error::InProgress {
                phase: running.to_string(),
            });
        }
        *current = Some(phase);
        Ok(())
    }

    fn clear_phase(&self) {
        *self.0.state.phase.borrow_mut() = None;
    }

    fn report(&self, error: &Error, context: &str) {
        self.0.state.exception_handler.handle(error, context);
    }

    /// Dirty-checks this scope and its descendants until stable.
    pub fn digest(&self) -> Result<()> {
        self.begin_phase("$digest")?;
        let mut remaining = self.0.state.ttl;

        loop {
            self.drain_async_queue();

            let mut dirty = false;
            let mut stack = vec![self.clone()];
            while let Some(scope) = stack.pop() {
                if scope.is_destroyed() {
                    continue;
                }
                dirty |= scope.check_watchers();
                let mut children = scope.children();
                children.reverse();
                stack.extend(children);
            }

            let pending = !self.0.state.async_queue.borrow().is_empty();
            if !dirty && !pending {
                break;
            }
            remaining -= 1;
            if remaining == 0 {
                self.clear_phase();
                tracing::warn!(ttl = self.0.state.ttl, "digest aborted");
                return Err(Error::InfiniteDigest {
                    ttl: self.0.state.ttl,
                });
            }
        }

        self.clear_phase();

        loop {
            let task = self.0.state.post_digest_queue.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    if let Err(e) = task() {
                        self.report(&e, "$$postDigest");
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    fn drain_async_queue(&self) {
        loop {
            let task = self.0.state.async_queue.borrow_mut().pop_front();
            match task {
                Some((scope, task)) => {
                    if scope.is_destroyed() {
                        continue;
                    }
                    if let Err(e) = task(&scope) {
                        self.report(&e, "$evalAsync");
                    }
                }
                None => break,
            }
        }
    }

    fn check_watchers(&self) -> bool {
        let watchers: Vec<Rc<Watcher>> = self.0.watchers.borrow().clone();
        let mut dirty = false;
        for watcher in watchers {
            if watcher.removed.get() || self.is_destroyed() {
                continue;
            }
            let value = match (watcher.get)(self) {
                Ok(v) => v,
                Err(e) => {
                    self.report(&e, "watcher");
                    continue;
                }
            };
            let previous = watcher.last.borrow().clone();
            let changed = match &previous {
                None => true,
                Some(last) if watcher.deep => !last.deep_equals(&value),
                Some(last) => !last.same_value(&value),
            };
            if !changed {
                continue;
            }
            dirty = true;
            *watcher.last.borrow_mut() = Some(if watcher.deep {
                value.deep_clone()
            } else {
                value.clone()
            });
            if let Some(listener) = &watcher.listener {
                let old = previous.unwrap_or_else(|| value.clone());
                if let Err(e) = listener(&value, &old, self) {
                    self.report(&e, "watch listener");
                }
            }
        }
        self.0.watchers.borrow_mut().retain(|w| !w.removed.get());
        dirty
    }

    /// Runs `f` and then digests from the root. Errors raised by `f` are
    /// reported; digest failures are reported and returned.
    pub fn apply(&self, f: impl FnOnce(&Scope) -> Result<()>) -> Result<()> {
        self.begin_phase("$apply")?;
        let outcome = f(self);
        self.clear_phase();
        if let Err(e) = outcome {
            self.report(&e, "$apply");
        }
        let root = self.root_scope();
        root.digest().inspect_err(|e| root.report(e, "$digest"))
    }

    /// Queues `f` to run at the start of the next digest pass.
    pub fn eval_async(&self, f: impl FnOnce(&Scope) -> Result<()> + 'static) {
        self.0
            .state
            .async_queue
            .borrow_mut()
            .push_back((self.clone(), Box::new(f)));
    }

    /// Queues `f` to run once the current (or next) digest settles.
    pub fn post_digest(&self, f: impl FnOnce() -> Result<()> + 'static) {
        self.0
            .state
            .post_digest_queue
            .borrow_mut()
            .push_back(Box::new(f));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DESTRUCTION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn on_destroy(&self, f: impl FnOnce() -> Result<()> + 'static) {
        self.0.destroy_listeners.borrow_mut().push(Box::new(f));
    }

    /// Notifies `$destroy` listeners (parent before child), then detaches the
    /// subtree from its parent.
    pub fn destroy(&self) {
        if self.is_destroyed() {
            return;
        }
        self.broadcast_destroy();

        if let Some(parent) = self.parent() {
            parent
                .0
                .children
                .borrow_mut()
                .retain(|c| !Rc::ptr_eq(c, &self.0));
        }
        tracing::trace!(scope = self.id(), "scope destroyed");
    }

    fn broadcast_destroy(&self) {
        let listeners: Vec<DestroyListener> =
            self.0.destroy_listeners.borrow_mut().drain(..).collect();
        for listener in listeners {
            if let Err(e) = listener() {
                self.report(&e, "$destroy");
            }
        }
        self.0.destroyed.set(true);
        self.0.watchers.borrow_mut().clear();
        for child in self.children() {
            child.broadcast_destroy();
        }
    }
}

fn shallow_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Array(_) | Value::Object(_) => value
            .keys()
            .into_iter()
            .map(|k| {
                let v = value.get(&k);
                (k, v)
            })
            .collect(),
        other => vec![(String::new(), other.clone())],
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.0.kind {
            ScopeKind::Root => "root",
            ScopeKind::Child { .. } => "child",
            ScopeKind::Isolate => "isolate",
        };
        f.debug_struct("Scope")
            .field("id", &self.0.id)
            .field("kind", &kind)
            .finish()
    }
}
