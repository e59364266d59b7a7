//! Shared fixtures for the scenario suites: a compiler wired to a collecting
//! exception handler, an ordered call log, and a template loader whose
//! responses are released by the test.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::FutureExt;

use crate::compiler::{Compiler, CompilerBuilder, TranscludeFn};
use crate::config::CompilerConfig;
use crate::directive::{ComponentDefinition, DirectiveDefinition, LinkFns};
use crate::dom::NodeList;
use crate::error::{CollectingExceptionHandler, Error, Result};
use crate::loader::{TemplateFetch, TemplateLoader};
use crate::scope::Scope;

// ═══════════════════════════════════════════════════════════════════════════════
// CALL LOG
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
pub(crate) struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub(crate) fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Link functions that record `pre <name>` and `post <name>`.
    pub(crate) fn link_fns(&self, name: &str) -> LinkFns {
        let (pre_log, post_log) = (self.clone(), self.clone());
        let (pre_name, post_name) = (format!("pre {}", name), format!("post {}", name));
        LinkFns::pre_post(
            move |_| {
                pre_log.push(pre_name.clone());
                Ok(())
            },
            move |_| {
                post_log.push(post_name.clone());
                Ok(())
            },
        )
    }
}

/// Holder for a value produced inside a link function or controller.
pub(crate) struct Captured<T>(Rc<RefCell<Option<T>>>);

impl<T> Clone for Captured<T> {
    fn clone(&self) -> Self {
        Captured(Rc::clone(&self.0))
    }
}

impl<T: Clone> Captured<T> {
    pub(crate) fn new() -> Self {
        Captured(Rc::new(RefCell::new(None)))
    }

    pub(crate) fn set(&self, value: T) {
        *self.0.borrow_mut() = Some(value);
    }

    pub(crate) fn get(&self) -> T {
        self.0.borrow().clone().expect("value was never captured")
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.borrow().is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HARNESS
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct Harness {
    pub(crate) compiler: Compiler,
    pub(crate) errors: CollectingExceptionHandler,
    pub(crate) log: Log,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with(Compiler::builder())
    }

    pub(crate) fn with(builder: CompilerBuilder) -> Self {
        let errors = CollectingExceptionHandler::new();
        let compiler = builder.exception_handler(Rc::new(errors.clone())).build();
        Harness {
            compiler,
            errors,
            log: Log::default(),
        }
    }

    pub(crate) fn with_loader(loader: Rc<dyn TemplateLoader>) -> Self {
        Self::with(Compiler::builder().loader(loader))
    }

    pub(crate) fn with_config(config: CompilerConfig) -> Self {
        Self::with(Compiler::builder().config(config))
    }

    pub(crate) fn register(&self, name: &str, definition: DirectiveDefinition) {
        self.compiler.registry().register(name, definition).unwrap();
    }

    pub(crate) fn component(&self, name: &str, definition: ComponentDefinition) {
        self.compiler.registry().component(name, definition).unwrap();
    }

    pub(crate) fn scope(&self) -> Scope {
        self.compiler.root_scope()
    }

    pub(crate) fn compile(&self, markup: &str) -> (NodeList, TranscludeFn) {
        self.compiler.compile_html(markup).unwrap()
    }

    /// Compiles, links against the root scope and digests once.
    pub(crate) fn compile_and_link(&self, markup: &str) -> NodeList {
        let (nodes, link) = self.compile(markup);
        let scope = self.scope();
        link.link_to(&scope).unwrap();
        scope.digest().unwrap();
        nodes
    }

    pub(crate) fn digest(&self) {
        self.scope().digest().unwrap();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFERRED LOADER
// ═══════════════════════════════════════════════════════════════════════════════

/// Answers every fetch with a pending future; the test settles it with
/// [`DeferredLoader::resolve`] or [`DeferredLoader::reject`] and then drives
/// the compiler with `flush`.
#[derive(Default)]
pub(crate) struct DeferredLoader {
    requests: RefCell<Vec<String>>,
    pending: RefCell<HashMap<String, Vec<oneshot::Sender<Result<String>>>>>,
}

impl DeferredLoader {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub(crate) fn resolve(&self, url: &str, markup: &str) {
        self.settle(url, || Ok(markup.to_string()));
    }

    pub(crate) fn reject(&self, url: &str, reason: &str) {
        self.settle(url, || {
            Err(Error::TemplateLoad {
                url: url.to_string(),
                reason: reason.to_string(),
            })
        });
    }

    fn settle(&self, url: &str, outcome: impl Fn() -> Result<String>) {
        let senders = self.pending.borrow_mut().remove(url).unwrap_or_default();
        for sender in senders {
            let _ = sender.send(outcome());
        }
    }
}

impl TemplateLoader for DeferredLoader {
    fn fetch(&self, url: &str) -> TemplateFetch {
        self.requests.borrow_mut().push(url.to_string());
        let (sender, receiver) = oneshot::channel();
        self.pending
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push(sender);

        let url = url.to_string();
        TemplateFetch::Pending(
            receiver
                .map(move |answer| {
                    answer.unwrap_or_else(|_| {
                        Err(Error::TemplateLoad {
                            url,
                            reason: "request dropped".to_string(),
                        })
                    })
                })
                .boxed_local(),
        )
    }
}
