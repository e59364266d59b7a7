//! `templateUrl` directives.
//!
//! The node is emptied and its remaining directives are set aside until the
//! loader answers. Links requested before that are queued and replayed once
//! the template is compiled; when loading fails they are dropped and the
//! failure is reported.

use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;

use crate::attributes::Attributes;
use crate::directive::{Directive, TranscludeMode};
use crate::dom::{NodeList, NodeRef};
use crate::error::Result;
use crate::loader::TemplateFetch;
use crate::matcher::collect_directives;
use crate::scope::Scope;
use crate::template::{mark_directive_scope, merge_template_attributes, replace_root, resolve_template};
use crate::transclude::BoundTranscludeFn;

use super::apply::{apply_directives_to_node, CompileContext};
use super::node_link::{LinkFnEntry, NodeLinkFn};
use super::nodes::{compile_nodes, CompositeLinkFn};
use super::{replace_with, CompilerCore, TranscludeFn};

struct QueuedLink {
    scope: Scope,
    node: NodeRef,
    root_list: NodeList,
    bound: Option<Rc<BoundTranscludeFn>>,
}

#[derive(Clone)]
struct ReadyLink {
    node_link: Rc<NodeLinkFn>,
    child_link: Option<Rc<CompositeLinkFn>>,
    /// The node as compiled, after the template was applied.
    compile_node: NodeRef,
    /// The node as it was when compilation was suspended.
    before_compile_node: NodeRef,
    /// Link queued clones in place instead of cloning the compiled node.
    link_in_place: bool,
}

enum DelayedState {
    Pending(Vec<QueuedLink>),
    Ready(ReadyLink),
    Failed,
}

pub(crate) struct DelayedLink {
    state: RefCell<DelayedState>,
}

impl DelayedLink {
    pub(crate) fn link(
        &self,
        core: &Rc<CompilerCore>,
        scope: &Scope,
        node: &NodeRef,
        root_list: &NodeList,
        bound: Option<Rc<BoundTranscludeFn>>,
    ) -> Result<()> {
        if scope.is_destroyed() {
            return Ok(());
        }
        let ready = match &mut *self.state.borrow_mut() {
            DelayedState::Pending(queue) => {
                queue.push(QueuedLink {
                    scope: scope.clone(),
                    node: node.clone(),
                    root_list: root_list.clone(),
                    bound,
                });
                return Ok(());
            }
            DelayedState::Failed => return Ok(()),
            DelayedState::Ready(ready) => ready.clone(),
        };
        ready.link(core, scope, node, root_list, bound)
    }

    fn next_queued(&self) -> Option<QueuedLink> {
        match &mut *self.state.borrow_mut() {
            DelayedState::Pending(queue) if !queue.is_empty() => Some(queue.remove(0)),
            _ => None,
        }
    }
}

impl ReadyLink {
    fn link(
        &self,
        core: &Rc<CompilerCore>,
        scope: &Scope,
        node: &NodeRef,
        root_list: &NodeList,
        bound: Option<Rc<BoundTranscludeFn>>,
    ) -> Result<()> {
        let bound = if self.node_link.transclude_on_this_element {
            self.node_link
                .transclude
                .as_ref()
                .map(|transclude| BoundTranscludeFn::create(scope, transclude, bound.clone()))
        } else {
            bound
        };
        self.node_link
            .link(core, self.child_link.as_ref(), scope, node, root_list, bound)
    }

    fn link_queued(&self, core: &Rc<CompilerCore>, queued: QueuedLink) -> Result<()> {
        if queued.scope.is_destroyed() {
            return Ok(());
        }
        let mut link_node = self.compile_node.clone();
        if !queued.node.ptr_eq(&self.before_compile_node) {
            let old_classes = queued.node.attr("class");
            if !self.link_in_place {
                link_node = self.compile_node.deep_clone();
            }
            replace_with(&queued.root_list, &queued.node, &link_node);
            if let Some(classes) = old_classes {
                link_node.add_class(&classes);
            }
        }
        self.link(core, &queued.scope, &link_node, &queued.root_list, queued.bound)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUSPENDED COMPILATION
// ═══════════════════════════════════════════════════════════════════════════════

struct Resume {
    core: Rc<CompilerCore>,
    delayed: Rc<DelayedLink>,
    original: Rc<Directive>,
    derived: Rc<Directive>,
    directives: Vec<Rc<Directive>>,
    compile_node: NodeRef,
    attrs: Attributes,
    root_list: NodeList,
    transclude: Option<TranscludeFn>,
    pre_links: Vec<LinkFnEntry>,
    post_links: Vec<LinkFnEntry>,
    context: CompileContext,
    url: String,
}

impl Resume {
    fn run(self, fetched: Result<String>) {
        let core = Rc::clone(&self.core);
        let delayed = Rc::clone(&self.delayed);
        let url = self.url.clone();

        let ready = match fetched.and_then(|markup| self.compile(markup)) {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(url = %url, code = e.code(), "template compilation abandoned");
                *delayed.state.borrow_mut() = DelayedState::Failed;
                core.handler.handle(&e, "");
                return;
            }
        };

        while let Some(queued) = delayed.next_queued() {
            if let Err(e) = ready.link_queued(&core, queued) {
                core.handler.handle(&e, &ready.compile_node.starting_tag());
            }
        }
        *delayed.state.borrow_mut() = DelayedState::Ready(ready);
    }

    fn compile(self, markup: String) -> Result<ReadyLink> {
        let core = &self.core;
        let markup = core.interpolator.denormalize_template(&markup);
        let holder = NodeList::new(vec![self.compile_node.clone()]);
        let mut directives = self.directives;

        let compile_node = if self.original.replace {
            let root = replace_root(&markup, &self.original.name, &self.url)?;
            let root_attrs = Attributes::new(&root, Rc::clone(&core.handler));
            replace_with(&self.root_list, &self.compile_node, &root);
            holder.set(0, root.clone());
            self.attrs.set_element(&root);

            let mut template_directives = collect_directives(core, &root, &root_attrs, None, None)?;
            if self.original.requests_isolate_scope() {
                mark_directive_scope(&mut template_directives, true, false);
            }
            template_directives.append(&mut directives);
            directives = template_directives;
            merge_template_attributes(&self.attrs, &root_attrs);
            root
        } else {
            self.compile_node.set_inner_html(&markup)?;
            self.compile_node.clone()
        };

        directives.insert(0, self.derived);
        let node_link = apply_directives_to_node(
            core,
            directives,
            &compile_node,
            &self.attrs,
            self.transclude.clone(),
            &holder,
            Some(Rc::clone(&self.original)),
            self.pre_links,
            self.post_links,
            Some(self.context),
        )?;

        let compiled = holder.first().unwrap_or_else(|| compile_node.clone());
        self.root_list.replace(&compile_node, &compiled);

        let child_link = compile_nodes(
            core,
            &NodeList::new(compiled.children()),
            self.transclude,
            None,
            None,
            None,
        )?;

        tracing::debug!(url = %self.url, directive = %self.original.name, "template applied");
        Ok(ReadyLink {
            link_in_place: node_link.has_element_transclude_directive && self.original.replace,
            node_link,
            child_link,
            compile_node: compiled,
            before_compile_node: self.compile_node,
        })
    }
}

/// Suspends compilation of `compile_node` at `directives[0]`, a `templateUrl`
/// directive, and starts loading its template.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compile_template_url(
    core: &Rc<CompilerCore>,
    mut directives: Vec<Rc<Directive>>,
    compile_node: &NodeRef,
    attrs: &Attributes,
    root_list: &NodeList,
    transclude: Option<TranscludeFn>,
    pre_links: Vec<LinkFnEntry>,
    post_links: Vec<LinkFnEntry>,
    context: CompileContext,
) -> Result<Rc<DelayedLink>> {
    let original = directives.remove(0);
    let mut derived = Directive::clone(&original);
    derived.template_url = None;
    derived.transclude = TranscludeMode::None;
    derived.replace = false;
    derived.original = Some(Rc::clone(&original));

    let url = match &original.template_url {
        Some(source) => resolve_template(core, source, compile_node, attrs)?,
        None => String::new(),
    };
    compile_node.empty();

    let delayed = Rc::new(DelayedLink {
        state: RefCell::new(DelayedState::Pending(Vec::new())),
    });
    let resume = Resume {
        core: Rc::clone(core),
        delayed: Rc::clone(&delayed),
        original,
        derived: Rc::new(derived),
        directives,
        compile_node: compile_node.clone(),
        attrs: attrs.clone(),
        root_list: root_list.clone(),
        transclude,
        pre_links,
        post_links,
        context,
        url: url.clone(),
    };

    if let Err(e) = core.trust.check_resource_url(&url) {
        resume.run(Err(e));
        return Ok(delayed);
    }

    tracing::debug!(url = %url, "requesting template");
    match core.loader.fetch(&url) {
        TemplateFetch::Ready(fetched) => resume.run(fetched),
        TemplateFetch::Pending(pending) => core.spawn(
            async move {
                let fetched = pending.await;
                resume.run(fetched);
            }
            .boxed_local(),
        ),
    }
    Ok(delayed)
}
