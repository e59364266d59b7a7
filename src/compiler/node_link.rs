//! Linking of a single node: scopes, controllers, bindings and the directive
//! link functions collected while its directives were applied.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::attributes::Attributes;
use crate::bindings::{initialize_directive_bindings, BindingTarget};
use crate::controller::{
    get_controllers, run_initial_hooks, run_post_link_hooks, setup_controllers, ElementControllers,
    SharedControllers,
};
use crate::directive::{Directive, LinkContext, LinkFn, Require};
use crate::dom::{NodeList, NodeRef};
use crate::error::Result;
use crate::scope::Scope;
use crate::transclude::{BoundTranscludeFn, Transclude};
use crate::value::Value;

use super::delayed::DelayedLink;
use super::nodes::CompositeLinkFn;
use super::{CompilerCore, TranscludeFn};

/// A pre- or post-link function with what it needs to be called.
pub(crate) struct LinkFnEntry {
    pub(crate) func: LinkFn,
    pub(crate) require: Require,
    pub(crate) directive_name: String,
    /// Link against the isolate scope instead of the element's scope.
    pub(crate) isolate_scope: bool,
}

pub(crate) enum NodeLinkKind {
    Sync(NodeLink),
    /// Waiting for a `templateUrl`.
    Delayed(Rc<DelayedLink>),
}

/// Link function of one node plus the flags its parent list looks at.
pub(crate) struct NodeLinkFn {
    /// A directive asked for `scope: true`.
    pub(crate) scope: bool,
    pub(crate) transclude_on_this_element: bool,
    pub(crate) template_on_this_element: bool,
    pub(crate) terminal: bool,
    /// Transclusion handed to the children.
    pub(crate) transclude: Option<TranscludeFn>,
    pub(crate) has_element_transclude_directive: bool,
    pub(crate) kind: NodeLinkKind,
}

pub(crate) struct NodeLink {
    pub(crate) compile_node: NodeRef,
    pub(crate) template_attrs: Attributes,
    pub(crate) pre_links: Vec<LinkFnEntry>,
    pub(crate) post_links: Vec<LinkFnEntry>,
    pub(crate) new_isolate_scope_directive: Option<Rc<Directive>>,
    pub(crate) new_scope_directive: Option<Rc<Directive>>,
    pub(crate) controller_directives: Option<IndexMap<String, Rc<Directive>>>,
    pub(crate) template_directive: Option<Rc<Directive>>,
}

impl NodeLinkFn {
    pub(crate) fn is_delayed(&self) -> bool {
        matches!(self.kind, NodeLinkKind::Delayed(_))
    }

    pub(crate) fn link(
        &self,
        core: &Rc<CompilerCore>,
        child_link: Option<&Rc<CompositeLinkFn>>,
        scope: &Scope,
        link_node: &NodeRef,
        root_list: &NodeList,
        bound: Option<Rc<BoundTranscludeFn>>,
    ) -> Result<()> {
        match &self.kind {
            NodeLinkKind::Sync(link) => self.link_node(link, core, child_link, scope, link_node, bound),
            NodeLinkKind::Delayed(delayed) => delayed.link(core, scope, link_node, root_list, bound),
        }
    }

    fn link_node(
        &self,
        link: &NodeLink,
        core: &Rc<CompilerCore>,
        child_link: Option<&Rc<CompositeLinkFn>>,
        scope: &Scope,
        link_node: &NodeRef,
        bound: Option<Rc<BoundTranscludeFn>>,
    ) -> Result<()> {
        let (element, attrs) = if link.compile_node.ptr_eq(link_node) {
            (link.template_attrs.element(), link.template_attrs.clone())
        } else {
            (link_node.clone(), link.template_attrs.clone_for(link_node))
        };
        attrs.bind_scope(scope);

        let isolate_directive = link.new_isolate_scope_directive.as_ref();
        let isolate_scope = isolate_directive.map(|_| scope.new_child(true));
        let controller_scope = match (isolate_directive, &link.new_scope_directive, scope.parent()) {
            (None, Some(_), Some(parent)) => parent,
            _ => scope.clone(),
        };
        let scope_to_child = match (isolate_directive, &isolate_scope) {
            (Some(directive), Some(isolate))
                if directive.template.is_some() || directive.is_template_url_derived() =>
            {
                isolate.clone()
            }
            _ => scope.clone(),
        };

        let shared: SharedControllers = Rc::new(RefCell::new(ElementControllers::new()));
        let transclude = bound.clone().map(|bound| {
            Transclude::new(
                bound,
                &element,
                self.has_element_transclude_directive,
                Rc::clone(&shared),
                &scope_to_child,
            )
        });

        let controllers = match &link.controller_directives {
            Some(directives) => setup_controllers(
                core,
                &element,
                &attrs,
                transclude.clone(),
                directives,
                isolate_scope.as_ref(),
                scope,
                isolate_directive,
            )?,
            None => ElementControllers::new(),
        };
        *shared.borrow_mut() = controllers.clone();

        if let (Some(directive), Some(isolate)) = (isolate_directive, &isolate_scope) {
            let no_template = !link.template_directive.as_ref().is_some_and(|template| {
                Rc::ptr_eq(template, directive)
                    || directive
                        .original
                        .as_ref()
                        .is_some_and(|original| Rc::ptr_eq(template, original))
            });
            core.add_scope_info(&element, isolate, true, no_template);
            core.add_scope_class(&element, true);
            isolate.set_isolate_bindings(
                directive
                    .isolate_bindings
                    .iter()
                    .map(|b| (b.property.clone(), b.definition.clone()))
                    .collect(),
            );
            let info = initialize_directive_bindings(
                core,
                scope,
                &attrs,
                BindingTarget::Scope(isolate.clone()),
                &directive.isolate_bindings,
                directive,
            )?;
            isolate.on_destroy(move || {
                info.remove_watches();
                Ok(())
            });
        }

        for controller in controllers.values() {
            let directive = &controller.directive;
            let bindings = &directive.controller_bindings;
            if !bindings.is_empty() {
                let info = initialize_directive_bindings(
                    core,
                    &controller_scope,
                    &attrs,
                    BindingTarget::Object(controller.instance()),
                    bindings,
                    directive,
                )?;
                *controller.binding_info.borrow_mut() = Some(info);
            }

            match controller.construct(core) {
                Ok(true) if !bindings.is_empty() => {
                    if let Some(stale) = controller.binding_info.borrow_mut().take() {
                        stale.remove_watches();
                    }
                    let info = initialize_directive_bindings(
                        core,
                        &controller_scope,
                        &attrs,
                        BindingTarget::Object(controller.instance()),
                        bindings,
                        directive,
                    )?;
                    *controller.binding_info.borrow_mut() = Some(info);
                }
                Ok(_) => {}
                Err(e) => core.handler.handle(&e, &element.starting_tag()),
            }
        }

        if let Some(directives) = &link.controller_directives {
            for (name, directive) in directives {
                if !directive.binds_to_controller || !matches!(directive.require, Require::Map(_)) {
                    continue;
                }
                if let Some(controller) = controllers.get(name) {
                    let required =
                        get_controllers(name, &directive.require, &element, Some(&controllers))?;
                    controller.instance().extend_from(&required);
                }
            }
        }

        run_initial_hooks(&controllers, &controller_scope, &core.handler, &element.starting_tag());

        let call = |entry: &LinkFnEntry| -> Result<()> {
            let entry_scope = match (&isolate_scope, entry.isolate_scope) {
                (Some(isolate), true) => isolate.clone(),
                _ => scope.clone(),
            };
            let required = if entry.require.is_none() {
                Value::Undefined
            } else {
                get_controllers(&entry.directive_name, &entry.require, &element, Some(&controllers))?
            };
            let context = LinkContext {
                scope: entry_scope,
                element: element.clone(),
                attrs: attrs.clone(),
                controllers: required,
                transclude: transclude.clone(),
            };
            if let Err(e) = (entry.func)(&context) {
                core.handler.handle(&e, &element.starting_tag());
            }
            Ok(())
        };

        for entry in &link.pre_links {
            call(entry)?;
        }

        if let Some(child_link) = child_link {
            child_link.link(core, &scope_to_child, &NodeList::new(link_node.children()), bound)?;
        }

        for entry in link.post_links.iter().rev() {
            call(entry)?;
        }

        run_post_link_hooks(&controllers, &core.handler, &element.starting_tag());
        Ok(())
    }
}
