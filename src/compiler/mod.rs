//! # Directive Compiler
//!
//! Compilation walks a node list once, collects the directives of every node
//! and runs their `compile` functions. The result is a tree of link functions
//! mirroring the node tree; linking binds that tree to a scope.
//!
//! ## Phases
//!
//! 1. **Collect** ([`crate::matcher`]): directives of a node, sorted.
//! 2. **Apply** ([`apply`]): scope requests, controllers, transclusion,
//!    templates and `compile` functions of one node.
//! 3. **Recurse** ([`nodes`]): children are compiled unless a directive on the
//!    node is terminal.
//! 4. **Link** ([`node_link`]): controllers, pre-links in order, children,
//!    post-links in reverse.
//!
//! `templateUrl` directives suspend the apply phase of their node until the
//! template arrives ([`delayed`]); links requested meanwhile are queued.
//!
//! ## Invariants
//!
//! - A link function produced without a clone-attach callback links its
//!   nodes at most once (`multilink`).
//! - Root replacement (`replace: true`, element transclusion) is written back
//!   into the node list being compiled.

mod apply;
mod delayed;
mod node_link;
mod nodes;

use std::cell::RefCell;
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use indexmap::IndexMap;

use crate::bindings::OnChangesQueue;
use crate::config::CompilerConfig;
use crate::controller::{controller_data_key, SharedControllers};
use crate::dom::{NodeList, NodeRef};
use crate::error::{Error, ExceptionHandler, LoggingExceptionHandler, Result};
use crate::expr::{ExpressionParser, Parser};
use crate::injector::{ControllerRegistry, Injector, ServiceRegistry};
use crate::interpolate::Interpolator;
use crate::loader::{CachedTemplateLoader, TemplateCache, TemplateLoader};
use crate::parse::parse_node_list;
use crate::registry::Registry;
use crate::sanitize::TrustPolicy;
use crate::scope::Scope;
use crate::transclude::BoundTranscludeFn;
use crate::value::Value;

pub(crate) use apply::CompileContext;
use nodes::{compile_nodes, CompositeLinkFn};

/// Receives the cloned nodes, and the scope they will be linked to, before
/// linking starts.
pub type CloneAttachFn = Rc<dyn Fn(&NodeList, &Scope)>;

/// A compiled node list. Transclusion functions are link functions of the
/// captured content.
pub type TranscludeFn = Rc<LinkFunction>;

/// Extra arguments of [`LinkFunction::link`].
#[derive(Clone, Default)]
pub struct LinkOptions {
    /// Transclusion available to directives in the linked nodes that do not
    /// transclude themselves.
    pub parent_bound_transclude: Option<Rc<BoundTranscludeFn>>,
    /// Controllers published as node data on the linked roots, so that
    /// element-transcluded clones can `require` them.
    pub(crate) transclude_controllers: Option<SharedControllers>,
    /// Where the linked nodes will be attached. Without a clone-attach
    /// callback, detached nodes are appended here before they are linked.
    pub future_parent_element: Option<NodeRef>,
}

impl LinkOptions {
    pub fn with_parent_bound_transclude(mut self, bound: Rc<BoundTranscludeFn>) -> Self {
        self.parent_bound_transclude = Some(bound);
        self
    }

    pub fn with_future_parent_element(mut self, parent: &NodeRef) -> Self {
        self.future_parent_element = Some(parent.clone());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED COMPILER STATE
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct CompilerCore {
    pub(crate) config: CompilerConfig,
    pub(crate) registry: Rc<Registry>,
    pub(crate) parser: Rc<dyn ExpressionParser>,
    pub(crate) interpolator: Rc<Interpolator>,
    pub(crate) injector: Rc<dyn Injector>,
    pub(crate) controllers: Rc<ControllerRegistry>,
    pub(crate) loader: Rc<dyn TemplateLoader>,
    pub(crate) trust: Rc<TrustPolicy>,
    pub(crate) handler: Rc<dyn ExceptionHandler>,
    pub(crate) on_changes: Rc<OnChangesQueue>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl CompilerCore {
    /// Compiles `nodes` and returns their public link function.
    pub(crate) fn compile(
        self: &Rc<Self>,
        nodes: &NodeList,
        transclude: Option<TranscludeFn>,
        max_priority: Option<i32>,
        ignore_directive: Option<&str>,
        context: Option<CompileContext>,
    ) -> Result<TranscludeFn> {
        let needs_new_scope = context.as_ref().is_some_and(|c| c.needs_new_scope);
        let composite = compile_nodes(self, nodes, transclude, max_priority, ignore_directive, context)?;
        for node in nodes.to_vec() {
            self.add_scope_class(&node, false);
        }
        Ok(Rc::new(LinkFunction {
            core: Rc::clone(self),
            state: RefCell::new(LinkState::Compiled(Compiled {
                nodes: Some(nodes.clone()),
                composite,
                needs_new_scope,
            })),
            slots: RefCell::new(IndexMap::new()),
        }))
    }

    /// Compiles now when `eager`, otherwise on first link. Eager compilation
    /// is used when a later directive on the same node may raise a
    /// `multidir` error, so that the error surfaces during compile.
    pub(crate) fn compilation_generator(
        self: &Rc<Self>,
        eager: bool,
        nodes: NodeList,
        transclude: Option<TranscludeFn>,
        max_priority: Option<i32>,
        ignore_directive: Option<String>,
        context: Option<CompileContext>,
    ) -> Result<TranscludeFn> {
        if eager {
            return self.compile(&nodes, transclude, max_priority, ignore_directive.as_deref(), context);
        }
        Ok(Rc::new(LinkFunction {
            core: Rc::clone(self),
            state: RefCell::new(LinkState::Lazy(LazyCompile {
                nodes,
                transclude,
                max_priority,
                ignore_directive,
                context,
            })),
            slots: RefCell::new(IndexMap::new()),
        }))
    }

    pub(crate) fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(e) = self.spawner.spawn_local(task) {
            tracing::error!(error = %e, "failed to schedule template continuation");
        }
    }

    /// Runs queued template continuations until none can make progress.
    pub(crate) fn flush(&self) {
        match self.pool.try_borrow_mut() {
            Ok(mut pool) => pool.run_until_stalled(),
            Err(_) => tracing::trace!("flush requested while already flushing"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEBUG INFO
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn add_scope_class(&self, node: &NodeRef, isolated: bool) {
        if self.config.debug_info_enabled && node.is_element() {
            node.add_class(if isolated { "ng-isolate-scope" } else { "ng-scope" });
        }
    }

    pub(crate) fn add_scope_info(&self, node: &NodeRef, scope: &Scope, isolated: bool, no_template: bool) {
        if !self.config.debug_info_enabled || !node.is_element() {
            return;
        }
        let key = match (isolated, no_template) {
            (false, _) => "$scope",
            (true, false) => "$isolateScope",
            (true, true) => "$isolateScopeNoTemplate",
        };
        node.set_data(key, Value::host(scope.clone()));
    }

    /// Placeholder left where an element was transcluded away.
    pub(crate) fn create_comment(&self, directive: &str, value: &Value) -> NodeRef {
        let text = if self.config.debug_info_enabled {
            let value = match value {
                Value::Undefined | Value::Null => String::new(),
                other => other.to_display_string(),
            };
            format!(" {}: {} ", directive, value)
        } else {
            String::new()
        };
        NodeRef::comment(&text)
    }
}

/// Swaps `old` for `new` in `root_list` and in the tree.
pub(crate) fn replace_with(root_list: &NodeList, old: &NodeRef, new: &NodeRef) {
    root_list.replace(old, new);
    old.replace_with(new);
}

// ═══════════════════════════════════════════════════════════════════════════════
// PUBLIC LINK FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

struct LazyCompile {
    nodes: NodeList,
    transclude: Option<TranscludeFn>,
    max_priority: Option<i32>,
    ignore_directive: Option<String>,
    context: Option<CompileContext>,
}

struct Compiled {
    /// Cleared once linked without cloning.
    nodes: Option<NodeList>,
    composite: Option<Rc<CompositeLinkFn>>,
    needs_new_scope: bool,
}

enum LinkState {
    Lazy(LazyCompile),
    Compiled(Compiled),
}

pub struct LinkFunction {
    core: Rc<CompilerCore>,
    state: RefCell<LinkState>,
    /// Named transclusion slots captured by the directive that produced this
    /// function; `None` marks an optional slot left unfilled.
    slots: RefCell<IndexMap<String, Option<TranscludeFn>>>,
}

impl LinkFunction {
    pub(crate) fn slots(&self) -> IndexMap<String, Option<TranscludeFn>> {
        self.slots.borrow().clone()
    }

    pub(crate) fn set_slots(&self, slots: IndexMap<String, Option<TranscludeFn>>) {
        *self.slots.borrow_mut() = slots;
    }

    fn ensure_compiled(&self) -> Result<()> {
        let lazy = match &*self.state.borrow() {
            LinkState::Compiled(_) => return Ok(()),
            LinkState::Lazy(lazy) => (
                lazy.nodes.clone(),
                lazy.transclude.clone(),
                lazy.max_priority,
                lazy.ignore_directive.clone(),
                lazy.context.clone(),
            ),
        };
        let (nodes, transclude, max_priority, ignore_directive, context) = lazy;
        let compiled = self.core.compile(
            &nodes,
            transclude,
            max_priority,
            ignore_directive.as_deref(),
            context,
        )?;
        let state = std::mem::replace(
            &mut *compiled.state.borrow_mut(),
            LinkState::Compiled(Compiled {
                nodes: None,
                composite: None,
                needs_new_scope: false,
            }),
        );
        *self.state.borrow_mut() = state;
        Ok(())
    }

    /// Links the compiled nodes to `scope` and returns the linked nodes.
    ///
    /// With `clone_attach` the nodes are cloned first and the callback sees
    /// the clone before linking; the function can then be linked again.
    /// Without it the compiled nodes themselves are linked, once.
    pub fn link(
        &self,
        scope: &Scope,
        clone_attach: Option<CloneAttachFn>,
        options: LinkOptions,
    ) -> Result<NodeList> {
        self.ensure_compiled()?;
        let (nodes, composite, needs_new_scope) = match &*self.state.borrow() {
            LinkState::Compiled(compiled) => (
                compiled.nodes.clone(),
                compiled.composite.clone(),
                compiled.needs_new_scope,
            ),
            LinkState::Lazy(_) => (None, None, false),
        };
        let Some(nodes) = nodes else {
            return Err(Error::MultiLink);
        };

        let scope = match scope.parent() {
            Some(parent) if needs_new_scope => parent.new_child(false),
            _ => scope.clone(),
        };

        let link_nodes = if clone_attach.is_some() {
            nodes.deep_clone()
        } else {
            nodes
        };

        if let Some(controllers) = &options.transclude_controllers {
            for (name, controller) in controllers.borrow().iter() {
                for node in link_nodes.to_vec().iter().filter(|n| n.is_element()) {
                    node.set_data(&controller_data_key(name), controller.instance());
                }
            }
        }

        for node in link_nodes.to_vec() {
            self.core.add_scope_info(&node, &scope, false, false);
        }

        match (&clone_attach, &options.future_parent_element) {
            (Some(attach), _) => attach(&link_nodes, &scope),
            (None, Some(parent)) => {
                for node in link_nodes.to_vec().iter().filter(|n| n.parent().is_none()) {
                    parent.append_child(node);
                }
            }
            (None, None) => {}
        }
        if let Some(composite) = composite {
            composite.link(&self.core, &scope, &link_nodes, options.parent_bound_transclude)?;
        }

        if clone_attach.is_none() {
            if let LinkState::Compiled(compiled) = &mut *self.state.borrow_mut() {
                compiled.nodes = None;
                compiled.composite = None;
            }
        }
        Ok(link_nodes)
    }

    /// Links the compiled nodes in place.
    pub fn link_to(&self, scope: &Scope) -> Result<NodeList> {
        self.link(scope, None, LinkOptions::default())
    }

    /// Links a fresh clone of the compiled nodes, handing it to `attach`
    /// first.
    pub fn link_clone(
        &self,
        scope: &Scope,
        attach: impl Fn(&NodeList, &Scope) + 'static,
    ) -> Result<NodeList> {
        self.link(scope, Some(Rc::new(attach)), LinkOptions::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

/// Entry point: owns the collaborators, the root scope and the executor that
/// drives asynchronous template loads.
pub struct Compiler {
    core: Rc<CompilerCore>,
    root_scope: Scope,
}

impl Compiler {
    pub fn builder() -> CompilerBuilder {
        CompilerBuilder::default()
    }

    /// Compiler with default collaborators around `registry`.
    pub fn new(registry: Registry) -> Self {
        Self::builder().registry(registry).build()
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.core.config
    }

    pub fn registry(&self) -> &Registry {
        &self.core.registry
    }

    pub fn root_scope(&self) -> Scope {
        self.root_scope.clone()
    }

    pub fn exception_handler(&self) -> Rc<dyn ExceptionHandler> {
        Rc::clone(&self.core.handler)
    }

    pub fn interpolator(&self) -> Rc<Interpolator> {
        Rc::clone(&self.core.interpolator)
    }

    /// Compiles `nodes` in place. Non-blank top-level text nodes are wrapped
    /// in a `<span>` first, and the list is updated accordingly.
    ///
    /// Detached roots are adopted by a fragment container so directives on
    /// a root can insert siblings (element transclusion places its clones
    /// after the comment left in the root's place).
    pub fn compile(&self, nodes: &NodeList) -> Result<TranscludeFn> {
        let detached: Vec<NodeRef> = nodes
            .to_vec()
            .into_iter()
            .filter(|node| node.parent().is_none())
            .collect();
        if !detached.is_empty() {
            let container = NodeRef::fragment();
            for node in &detached {
                container.append_child(node);
            }
        }
        for (index, node) in nodes.to_vec().into_iter().enumerate() {
            if node.is_text() && !node.value().trim().is_empty() {
                let span = NodeRef::element("span");
                node.replace_with(&span);
                span.append_child(&node);
                nodes.set(index, span);
            }
        }
        tracing::debug!(roots = nodes.len(), "compiling node list");
        self.core.compile(nodes, None, None, None, None)
    }

    /// Parses `markup` and compiles the resulting roots.
    pub fn compile_html(&self, markup: &str) -> Result<(NodeList, TranscludeFn)> {
        let nodes = parse_node_list(markup)?;
        let link = self.compile(&nodes)?;
        Ok((nodes, link))
    }

    /// Drives pending template loads. Continuations run compile and queued
    /// links for templates that became available; their errors are reported.
    pub fn flush(&self) {
        self.core.flush();
    }
}

#[derive(Default)]
pub struct CompilerBuilder {
    config: CompilerConfig,
    registry: Option<Rc<Registry>>,
    parser: Option<Rc<dyn ExpressionParser>>,
    injector: Option<Rc<dyn Injector>>,
    controllers: Option<Rc<ControllerRegistry>>,
    loader: Option<Rc<dyn TemplateLoader>>,
    handler: Option<Rc<dyn ExceptionHandler>>,
}

impl CompilerBuilder {
    pub fn config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(Rc::new(registry));
        self
    }

    pub fn parser(mut self, parser: Rc<dyn ExpressionParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn injector(mut self, injector: Rc<dyn Injector>) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn controllers(mut self, controllers: ControllerRegistry) -> Self {
        self.controllers = Some(Rc::new(controllers));
        self
    }

    pub fn loader(mut self, loader: Rc<dyn TemplateLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn exception_handler(mut self, handler: Rc<dyn ExceptionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Compiler {
        let config = self.config;
        let parser = self.parser.unwrap_or_else(|| Rc::new(Parser::new()));
        let handler = self
            .handler
            .unwrap_or_else(|| Rc::new(LoggingExceptionHandler));
        let trust = Rc::new(TrustPolicy::new(config.trusted_resource_url_prefixes.clone()));
        let interpolator = Rc::new(Interpolator::new(
            &config.start_symbol,
            &config.end_symbol,
            Rc::clone(&parser),
            Rc::clone(&trust),
        ));
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        let root_scope = Scope::root(Rc::clone(&handler), config.digest_ttl);

        let core = Rc::new(CompilerCore {
            on_changes: Rc::new(OnChangesQueue::new(config.on_changes_ttl)),
            registry: self.registry.unwrap_or_default(),
            injector: self
                .injector
                .unwrap_or_else(|| Rc::new(ServiceRegistry::new())),
            controllers: self.controllers.unwrap_or_default(),
            loader: self
                .loader
                .unwrap_or_else(|| Rc::new(CachedTemplateLoader::new(TemplateCache::new()))),
            config,
            parser,
            interpolator,
            trust,
            handler,
            pool: RefCell::new(pool),
            spawner,
        });
        tracing::debug!(debug_info = core.config.debug_info_enabled, "compiler ready");
        Compiler { core, root_scope }
    }
}
