//! Applying the collected directives of one node.
//!
//! Directives are visited in priority order. Each may claim a scope, a
//! controller, transclusion and a template; claims that conflict fail with
//! `multidir`. A `terminal` directive stops lower priorities; element
//! transclusion does the same and moves the element into a transclusion
//! function. A `templateUrl` directive hands the rest of the list to the
//! delayed path.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::attributes::Attributes;
use crate::directive::{CompileArgs, Directive, LinkFns, ScopeRequest, TranscludeMode};
use crate::dom::{NodeList, NodeRef};
use crate::error::{Error, Result};
use crate::matcher::{collect_directives, directive_normalize};
use crate::template::{mark_directive_scope, merge_template_attributes, replace_root, resolve_template};

use super::delayed::compile_template_url;
use super::node_link::{LinkFnEntry, NodeLink, NodeLinkFn, NodeLinkKind};
use super::{replace_with, CompilerCore, TranscludeFn};

/// State carried into a later apply pass of the same node: the resumed pass
/// after a `templateUrl` arrives, or the first node of a transclusion.
#[derive(Clone, Default)]
pub(crate) struct CompileContext {
    pub(crate) controller_directives: Option<IndexMap<String, Rc<Directive>>>,
    pub(crate) new_scope_directive: Option<Rc<Directive>>,
    pub(crate) new_isolate_scope_directive: Option<Rc<Directive>>,
    pub(crate) template_directive: Option<Rc<Directive>>,
    pub(crate) non_tlb_transclude_directive: Option<Rc<Directive>>,
    pub(crate) has_element_transclude_directive: bool,
    /// Link the compiled content in a fresh child of the parent scope.
    pub(crate) needs_new_scope: bool,
}

fn assert_no_duplicate(
    what: &str,
    previous: Option<&Rc<Directive>>,
    directive: &Directive,
    element: &NodeRef,
) -> Result<()> {
    match previous {
        Some(previous) => Err(Error::MultipleDirectives {
            first: previous.name.clone(),
            second: directive.name.clone(),
            what: what.to_string(),
            element: element.starting_tag(),
        }),
        None => Ok(()),
    }
}

fn claims_template_replacement(directive: &Directive) -> bool {
    directive.replace && (directive.template.is_some() || directive.template_url.is_some())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_directives_to_node(
    core: &Rc<CompilerCore>,
    mut directives: Vec<Rc<Directive>>,
    compile_node: &NodeRef,
    template_attrs: &Attributes,
    transclude: Option<TranscludeFn>,
    root_list: &NodeList,
    original_replace_directive: Option<Rc<Directive>>,
    mut pre_links: Vec<LinkFnEntry>,
    mut post_links: Vec<LinkFnEntry>,
    context: Option<CompileContext>,
) -> Result<Rc<NodeLinkFn>> {
    let context = context.unwrap_or_default();
    let mut new_scope_directive = context.new_scope_directive;
    let mut new_isolate_scope_directive = context.new_isolate_scope_directive;
    let mut controller_directives = context.controller_directives;
    let mut template_directive = context.template_directive;
    let mut non_tlb_transclude_directive = context.non_tlb_transclude_directive;
    let mut has_element_transclude_directive = context.has_element_transclude_directive;
    let mut has_transclude_directive = false;
    let mut has_template = false;
    let mut terminal = false;
    let mut terminal_priority: Option<i32> = None;
    let mut replace_directive = original_replace_directive;
    let mut child_transclude = transclude.clone();
    let mut scanned_for_multiple_transclusion = false;
    let mut eager = false;
    let mut delayed = None;

    let mut compile_node = compile_node.clone();
    template_attrs.set_element(&compile_node);

    let mut i = 0;
    while i < directives.len() {
        let directive = Rc::clone(&directives[i]);
        if terminal_priority.is_some_and(|p| p > directive.priority) {
            break;
        }

        // ─── scope ───
        if directive.scope != ScopeRequest::None {
            if directive.template_url.is_none() {
                if directive.requests_isolate_scope() {
                    assert_no_duplicate(
                        "new/isolated scope",
                        new_isolate_scope_directive.as_ref().or(new_scope_directive.as_ref()),
                        &directive,
                        &compile_node,
                    )?;
                    new_isolate_scope_directive = Some(Rc::clone(&directive));
                } else {
                    assert_no_duplicate(
                        "new/isolated scope",
                        new_isolate_scope_directive.as_ref(),
                        &directive,
                        &compile_node,
                    )?;
                }
            }
            new_scope_directive.get_or_insert_with(|| Rc::clone(&directive));
        }

        if !scanned_for_multiple_transclusion
            && (claims_template_replacement(&directive) || directive.transclude.is_some())
        {
            eager = directives[i + 1..]
                .iter()
                .any(|candidate| candidate.transclude.is_some() || claims_template_replacement(candidate));
            scanned_for_multiple_transclusion = true;
        }

        // ─── controller ───
        if directive.template_url.is_none() && directive.controller.is_some() {
            let registered = controller_directives.get_or_insert_with(IndexMap::new);
            assert_no_duplicate(
                &format!("'{}' controller", directive.name),
                registered.get(&directive.name),
                &directive,
                &compile_node,
            )?;
            registered.insert(directive.name.clone(), Rc::clone(&directive));
        }

        // ─── transclusion ───
        if directive.transclude.is_some() {
            has_transclude_directive = true;
            assert_no_duplicate(
                "transclusion",
                non_tlb_transclude_directive.as_ref(),
                &directive,
                &compile_node,
            )?;
            non_tlb_transclude_directive = Some(Rc::clone(&directive));

            if directive.transclude == TranscludeMode::Element {
                has_element_transclude_directive = true;
                terminal_priority = Some(directive.priority);
                let template = compile_node.clone();
                let comment = core.create_comment(&directive.name, &template_attrs.get(&directive.name));
                template_attrs.set_element(&comment);
                replace_with(root_list, &template, &comment);
                compile_node = comment;
                child_transclude = Some(core.compilation_generator(
                    eager,
                    NodeList::new(vec![template]),
                    transclude.clone(),
                    terminal_priority,
                    replace_directive.as_ref().map(|d| d.name.clone()),
                    Some(CompileContext {
                        non_tlb_transclude_directive: non_tlb_transclude_directive.clone(),
                        ..CompileContext::default()
                    }),
                )?);
            } else {
                let (content, slots) =
                    capture_content(core, eager, &compile_node, &directive.transclude, &transclude)?;
                compile_node.empty();
                let generated = core.compilation_generator(
                    eager,
                    NodeList::new(content),
                    transclude.clone(),
                    None,
                    None,
                    Some(CompileContext {
                        needs_new_scope: directive.marked_isolate_scope || directive.marked_new_scope,
                        ..CompileContext::default()
                    }),
                )?;
                generated.set_slots(slots);
                child_transclude = Some(generated);
            }
        }

        // ─── inline template ───
        if let Some(source) = &directive.template {
            has_template = true;
            assert_no_duplicate("template", template_directive.as_ref(), &directive, &compile_node)?;
            template_directive = Some(Rc::clone(&directive));

            let markup = resolve_template(core, source, &compile_node, template_attrs)?;
            let markup = core.interpolator.denormalize_template(&markup);

            if directive.replace {
                replace_directive = Some(Rc::clone(&directive));
                let root = replace_root(&markup, &directive.name, "")?;
                replace_with(root_list, &compile_node, &root);
                compile_node = root;
                template_attrs.set_element(&compile_node);

                let root_attrs = Attributes::new(&compile_node, Rc::clone(&core.handler));
                let mut template_directives =
                    collect_directives(core, &compile_node, &root_attrs, None, None)?;
                if new_isolate_scope_directive.is_some() || new_scope_directive.is_some() {
                    mark_directive_scope(
                        &mut template_directives,
                        new_isolate_scope_directive.is_some(),
                        new_scope_directive.is_some(),
                    );
                }
                let unprocessed = directives.split_off(i + 1);
                directives.extend(template_directives);
                directives.extend(unprocessed);
                merge_template_attributes(template_attrs, &root_attrs);
            } else {
                compile_node.set_inner_html(&markup)?;
            }
        }

        // ─── template url / compile ───
        if directive.template_url.is_some() {
            has_template = true;
            assert_no_duplicate("template", template_directive.as_ref(), &directive, &compile_node)?;
            template_directive = Some(Rc::clone(&directive));
            if directive.replace {
                replace_directive = Some(Rc::clone(&directive));
            }

            let remaining = directives.split_off(i);
            delayed = Some(compile_template_url(
                core,
                remaining,
                &compile_node,
                template_attrs,
                root_list,
                if has_transclude_directive {
                    child_transclude.clone()
                } else {
                    None
                },
                std::mem::take(&mut pre_links),
                std::mem::take(&mut post_links),
                CompileContext {
                    controller_directives: controller_directives.clone(),
                    new_scope_directive: new_scope_directive
                        .clone()
                        .filter(|d| !Rc::ptr_eq(d, &directive)),
                    new_isolate_scope_directive: new_isolate_scope_directive.clone(),
                    template_directive: template_directive.clone(),
                    non_tlb_transclude_directive: non_tlb_transclude_directive.clone(),
                    ..CompileContext::default()
                },
            )?);
        } else {
            let link = match &directive.compile {
                Some(compile) => {
                    let args = CompileArgs {
                        element: compile_node.clone(),
                        attrs: template_attrs.clone(),
                        transclude: child_transclude.clone(),
                        core: Rc::clone(core),
                    };
                    match compile(&args) {
                        Ok(link) => Some(link),
                        Err(e) => {
                            core.handler.handle(&e, &compile_node.starting_tag());
                            None
                        }
                    }
                }
                None if !directive.link.is_empty() => Some(directive.link.clone()),
                None => None,
            };
            if let Some(link) = link {
                let isolate_scope = new_isolate_scope_directive
                    .as_ref()
                    .is_some_and(|d| Rc::ptr_eq(d, &directive))
                    || directive.marked_isolate_scope;
                add_link_fns(&mut pre_links, &mut post_links, link, &directive, isolate_scope);
            }
        }

        if directive.terminal {
            terminal = true;
            terminal_priority = Some(terminal_priority.map_or(directive.priority, |p| p.max(directive.priority)));
        }
        i += 1;
    }

    let kind = match delayed {
        Some(delayed) => NodeLinkKind::Delayed(delayed),
        None => NodeLinkKind::Sync(NodeLink {
            compile_node: compile_node.clone(),
            template_attrs: template_attrs.clone(),
            pre_links,
            post_links,
            new_isolate_scope_directive,
            new_scope_directive: new_scope_directive.clone(),
            controller_directives,
            template_directive,
        }),
    };

    Ok(Rc::new(NodeLinkFn {
        scope: new_scope_directive.is_some_and(|d| d.requests_new_scope()),
        transclude_on_this_element: has_transclude_directive,
        template_on_this_element: has_template,
        terminal,
        transclude: child_transclude,
        has_element_transclude_directive,
        kind,
    }))
}

fn add_link_fns(
    pre_links: &mut Vec<LinkFnEntry>,
    post_links: &mut Vec<LinkFnEntry>,
    link: LinkFns,
    directive: &Directive,
    isolate_scope: bool,
) {
    let entry = |func| LinkFnEntry {
        func,
        require: directive.require.clone(),
        directive_name: directive.name.clone(),
        isolate_scope,
    };
    if let Some(pre) = link.pre {
        pre_links.push(entry(pre));
    }
    if let Some(post) = link.post {
        post_links.push(entry(post));
    }
}

/// Detaches the content of `node` for content transclusion. With slots,
/// children whose normalized node name matches a slot selector go to that
/// slot; everything else is the default content.
fn capture_content(
    core: &Rc<CompilerCore>,
    eager: bool,
    node: &NodeRef,
    mode: &TranscludeMode,
    transclude: &Option<TranscludeFn>,
) -> Result<(Vec<NodeRef>, IndexMap<String, Option<TranscludeFn>>)> {
    let mut slots = IndexMap::new();

    let TranscludeMode::Slots(declared) = mode else {
        let content = node.deep_clone().children();
        for child in &content {
            child.remove();
        }
        return Ok((content, slots));
    };

    let mut selectors = HashMap::new();
    let mut filled = IndexMap::new();
    for (slot, selector) in declared {
        let optional = selector.starts_with('?');
        let selector = selector.trim_start_matches('?');
        selectors.insert(selector.to_string(), slot.clone());
        filled.insert(slot.clone(), optional);
    }

    let mut content = Vec::new();
    let mut slot_content: IndexMap<String, Vec<NodeRef>> = IndexMap::new();
    for child in node.children() {
        child.remove();
        match selectors.get(&directive_normalize(child.node_name())) {
            Some(slot) => {
                filled.insert(slot.clone(), true);
                slot_content.entry(slot.clone()).or_default().push(child);
            }
            None => content.push(child),
        }
    }

    if let Some((slot, _)) = filled.iter().find(|(_, filled)| !**filled) {
        return Err(Error::RequiredSlot { slot: slot.clone() });
    }

    for slot in declared.keys() {
        let compiled = match slot_content.shift_remove(slot) {
            Some(nodes) => Some(core.compilation_generator(
                eager,
                NodeList::new(nodes),
                transclude.clone(),
                None,
                None,
                None,
            )?),
            None => None,
        };
        slots.insert(slot.clone(), compiled);
    }

    Ok((content, slots))
}
