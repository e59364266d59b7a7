//! Node-list compilation and the composite link function that replays it.

use std::rc::Rc;

use crate::attributes::Attributes;
use crate::dom::NodeList;
use crate::error::Result;
use crate::matcher::collect_directives;
use crate::scope::Scope;
use crate::transclude::BoundTranscludeFn;

use super::apply::{apply_directives_to_node, CompileContext};
use super::node_link::NodeLinkFn;
use super::{CompilerCore, TranscludeFn};

struct LinkEntry {
    index: usize,
    node_link: Option<Rc<NodeLinkFn>>,
    child_link: Option<Rc<CompositeLinkFn>>,
}

/// Link functions of one node list, by position.
pub(crate) struct CompositeLinkFn {
    entries: Vec<LinkEntry>,
    transclude: Option<TranscludeFn>,
}

/// Compiles every node of `nodes` and its subtree. `max_priority` and the
/// compile context only apply to the first node. Returns `None` when
/// nothing in the list needs linking.
pub(crate) fn compile_nodes(
    core: &Rc<CompilerCore>,
    nodes: &NodeList,
    transclude: Option<TranscludeFn>,
    max_priority: Option<i32>,
    ignore_directive: Option<&str>,
    context: Option<CompileContext>,
) -> Result<Option<Rc<CompositeLinkFn>>> {
    let mut entries = Vec::new();
    let mut context = context;

    for index in 0..nodes.len() {
        let Some(node) = nodes.get(index) else {
            continue;
        };
        let attrs = Attributes::new(&node, Rc::clone(&core.handler));
        let directives = collect_directives(
            core,
            &node,
            &attrs,
            if index == 0 { max_priority } else { None },
            ignore_directive,
        )?;

        let node_link = if directives.is_empty() {
            None
        } else {
            Some(apply_directives_to_node(
                core,
                directives,
                &node,
                &attrs,
                transclude.clone(),
                nodes,
                None,
                Vec::new(),
                Vec::new(),
                context.take(),
            )?)
        };
        context = None;

        if node_link.as_ref().is_some_and(|l| l.scope) {
            core.add_scope_class(&attrs.element(), false);
        }

        // Root replacement may have swapped the node.
        let node = nodes.get(index).unwrap_or(node);
        let child_link = match &node_link {
            // A suspended node was emptied; its template's children are
            // compiled when it resumes.
            Some(link) if link.terminal || link.is_delayed() => None,
            _ if !node.has_children() => None,
            Some(link) => {
                let child_transclude = if link.transclude_on_this_element
                    || !link.template_on_this_element
                {
                    link.transclude.clone()
                } else {
                    None
                };
                compile_nodes(core, &NodeList::new(node.children()), child_transclude, None, None, None)?
            }
            None => compile_nodes(
                core,
                &NodeList::new(node.children()),
                transclude.clone(),
                None,
                None,
                None,
            )?,
        };

        if node_link.is_some() || child_link.is_some() {
            entries.push(LinkEntry {
                index,
                node_link,
                child_link,
            });
        }
    }

    if entries.is_empty() {
        return Ok(None);
    }
    Ok(Some(Rc::new(CompositeLinkFn {
        entries,
        transclude,
    })))
}

impl CompositeLinkFn {
    /// Links `nodes`, which must have the shape of the compiled list.
    pub(crate) fn link(
        &self,
        core: &Rc<CompilerCore>,
        scope: &Scope,
        nodes: &NodeList,
        parent_bound: Option<Rc<BoundTranscludeFn>>,
    ) -> Result<()> {
        // Linking may add or remove siblings; positions refer to the list as
        // it was before any of them ran.
        let stable = nodes.to_vec();

        for entry in &self.entries {
            let Some(node) = stable.get(entry.index) else {
                continue;
            };
            match &entry.node_link {
                Some(node_link) => {
                    let child_scope = if node_link.scope {
                        let child = scope.new_child(false);
                        core.add_scope_info(node, &child, false, false);
                        child
                    } else {
                        scope.clone()
                    };

                    let bound = if node_link.transclude_on_this_element {
                        node_link.transclude.as_ref().map(|transclude| {
                            BoundTranscludeFn::create(scope, transclude, parent_bound.clone())
                        })
                    } else if !node_link.template_on_this_element && parent_bound.is_some() {
                        parent_bound.clone()
                    } else if parent_bound.is_none() {
                        self.transclude
                            .as_ref()
                            .map(|transclude| BoundTranscludeFn::create(scope, transclude, None))
                    } else {
                        None
                    };

                    node_link.link(
                        core,
                        entry.child_link.as_ref(),
                        &child_scope,
                        node,
                        nodes,
                        bound,
                    )?;
                }
                None => {
                    if let Some(child_link) = &entry.child_link {
                        child_link.link(
                            core,
                            scope,
                            &NodeList::new(node.children()),
                            parent_bound.clone(),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}
