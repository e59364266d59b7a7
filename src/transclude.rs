//! Transclusion
//!
//! [`BoundTranscludeFn`] ties a compiled transclusion (the captured content
//! or element) to the scope it was defined in. [`Transclude`] is the handle
//! directives receive: it additionally knows the element it belongs to, the
//! controllers to expose to element-transcluded clones, and the slots.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::attributes::Attributes;
use crate::compiler::{CloneAttachFn, LinkOptions, TranscludeFn};
use crate::controller::SharedControllers;
use crate::directive::{CompileArgs, CompileFn, DirectiveDefinition, LinkFns};
use crate::dom::{NodeList, NodeRef};
use crate::error::{Error, Result};
use crate::scope::Scope;

// ═══════════════════════════════════════════════════════════════════════════════
// BOUND TRANSCLUDE FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

pub struct BoundTranscludeFn {
    transclude: TranscludeFn,
    scope: Scope,
    previous: Option<Rc<BoundTranscludeFn>>,
    /// `None` marks a declared slot that no content filled.
    slots: IndexMap<String, Option<Rc<BoundTranscludeFn>>>,
}

impl BoundTranscludeFn {
    pub(crate) fn create(
        scope: &Scope,
        transclude: &TranscludeFn,
        previous: Option<Rc<BoundTranscludeFn>>,
    ) -> Rc<Self> {
        let slots = transclude
            .slots()
            .into_iter()
            .map(|(name, slot)| {
                let bound = slot.map(|slot| BoundTranscludeFn::create(scope, &slot, previous.clone()));
                (name, bound)
            })
            .collect();
        Rc::new(BoundTranscludeFn {
            transclude: Rc::clone(transclude),
            scope: scope.clone(),
            previous,
            slots,
        })
    }

    /// Links the transcluded content. Without an explicit scope a new one is
    /// created that reads through the defining scope and is destroyed with
    /// `containing` (or the defining scope).
    pub(crate) fn call(
        &self,
        scope: Option<&Scope>,
        clone_attach: Option<CloneAttachFn>,
        controllers: Option<SharedControllers>,
        future_parent: Option<NodeRef>,
        containing: Option<&Scope>,
    ) -> Result<NodeList> {
        let scope = match scope {
            Some(scope) => scope.clone(),
            None => self
                .scope
                .new_transcluded(containing.unwrap_or(&self.scope)),
        };
        let options = LinkOptions {
            parent_bound_transclude: self.previous.clone(),
            transclude_controllers: controllers,
            future_parent_element: future_parent,
        };
        self.transclude.link(&scope, clone_attach, options)
    }

    pub(crate) fn slot(&self, name: &str) -> Option<&Option<Rc<BoundTranscludeFn>>> {
        self.slots.get(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTIVE-FACING HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

struct TranscludeInner {
    bound: Rc<BoundTranscludeFn>,
    element: NodeRef,
    element_transclusion: bool,
    controllers: SharedControllers,
    scope_to_child: Scope,
}

/// `$transclude` as seen by controllers and link functions.
#[derive(Clone)]
pub struct Transclude(Rc<TranscludeInner>);

impl Transclude {
    pub(crate) fn new(
        bound: Rc<BoundTranscludeFn>,
        element: &NodeRef,
        element_transclusion: bool,
        controllers: SharedControllers,
        scope_to_child: &Scope,
    ) -> Self {
        Transclude(Rc::new(TranscludeInner {
            bound,
            element: element.clone(),
            element_transclusion,
            controllers,
            scope_to_child: scope_to_child.clone(),
        }))
    }

    /// Links the transcluded content.
    ///
    /// * `scope`: scope to link against; defaults to a fresh child of the
    ///   defining scope.
    /// * `clone_attach`: when given, the content is cloned for this call and
    ///   the callback receives the clone before it is linked.
    /// * `future_parent`: where the clone will be attached; defaults to the
    ///   element (or its parent, for element transclusion).
    /// * `slot`: named slot to transclude instead of the default content.
    ///
    /// A declared slot that nothing filled yields an empty list. An unknown
    /// slot is a `noslot` error.
    pub fn transclude(
        &self,
        scope: Option<&Scope>,
        clone_attach: Option<CloneAttachFn>,
        future_parent: Option<&NodeRef>,
        slot: Option<&str>,
    ) -> Result<NodeList> {
        let inner = &self.0;
        let controllers = inner
            .element_transclusion
            .then(|| Rc::clone(&inner.controllers));
        let future_parent = match future_parent {
            Some(parent) => Some(parent.clone()),
            None if inner.element_transclusion => inner.element.parent(),
            None => Some(inner.element.clone()),
        };

        let bound = match slot {
            None => Rc::clone(&inner.bound),
            Some(name) => match inner.bound.slot(name) {
                Some(Some(bound)) => Rc::clone(bound),
                Some(None) => return Ok(NodeList::default()),
                None => {
                    return Err(Error::NoSlot {
                        slot: name.to_string(),
                        element: inner.element.starting_tag(),
                    })
                }
            },
        };
        bound.call(
            scope,
            clone_attach,
            controllers,
            future_parent,
            Some(&inner.scope_to_child),
        )
    }

    /// Clones the default content into a new transcluded scope and hands the
    /// clone to `attach`.
    pub fn clone_attach(&self, attach: impl Fn(&NodeList, &Scope) + 'static) -> Result<NodeList> {
        self.transclude(None, Some(Rc::new(attach)), None, None)
    }

    /// Like [`Transclude::clone_attach`] with an explicit scope.
    pub fn clone_attach_with_scope(
        &self,
        scope: &Scope,
        attach: impl Fn(&NodeList, &Scope) + 'static,
    ) -> Result<NodeList> {
        self.transclude(Some(scope), Some(Rc::new(attach)), None, None)
    }

    pub fn is_slot_filled(&self, slot: &str) -> bool {
        matches!(self.0.bound.slot(slot), Some(Some(_)))
    }
}

impl fmt::Debug for Transclude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transclude")
            .field("element", &self.0.element.starting_tag())
            .field("element_transclusion", &self.0.element_transclusion)
            .field("slots", &self.0.bound.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSCLUSION OUTLET
// ═══════════════════════════════════════════════════════════════════════════════

/// Definition of a directive that places the transcluded content of the
/// nearest transcluding ancestor inside its own element.
///
/// The slot comes from the directive's attribute value, or from a
/// `<name>Slot` attribute when used as an element. An empty value, or one
/// naming the attribute itself, selects the default content. The element's
/// own children are fallback content: they are discarded when the slot yields
/// anything beyond whitespace, and linked in place otherwise.
pub fn transclusion_outlet(name: &str) -> DirectiveDefinition {
    let name = name.to_string();
    let compile: CompileFn = Rc::new(move |args: &CompileArgs| {
        let fallback = if args.element.children().is_empty() {
            None
        } else {
            Some(args.take_contents()?)
        };
        let name = name.clone();
        Ok(LinkFns::post(move |ctx| {
            let transclude = ctx.transclude.as_ref().ok_or_else(|| Error::Orphan {
                element: ctx.element.starting_tag(),
            })?;
            let slot = outlet_slot(&ctx.attrs, &name);

            let placed = Rc::new(Cell::new(false));
            let element = ctx.element.clone();
            let flag = Rc::clone(&placed);
            transclude.transclude(
                None,
                Some(Rc::new(move |clone: &NodeList, scope: &Scope| {
                    if clone.to_vec().iter().any(is_content) {
                        for node in clone.to_vec() {
                            element.append_child(&node);
                        }
                        flag.set(true);
                    } else {
                        scope.destroy();
                    }
                })),
                None,
                slot.as_deref(),
            )?;

            if !placed.get() {
                if let Some(fallback) = &fallback {
                    let element = ctx.element.clone();
                    fallback.link_clone(&ctx.scope, move |clone, _| {
                        for node in clone.to_vec() {
                            element.append_child(&node);
                        }
                    })?;
                }
            }
            Ok(())
        }))
    });

    DirectiveDefinition {
        restrict: Some("EAC".to_string()),
        terminal: true,
        compile: Some(compile),
        ..Default::default()
    }
}

fn outlet_slot(attrs: &Attributes, name: &str) -> Option<String> {
    let own = attrs
        .get_str(name)
        .filter(|value| attrs.attr_name(name).as_deref() != Some(value.as_str()));
    own.filter(|value| !value.is_empty())
        .or_else(|| attrs.get_str(&format!("{name}Slot")))
        .filter(|value| !value.is_empty())
}

/// Comments and elements count; text only when it is not blank.
fn is_content(node: &NodeRef) -> bool {
    !node.is_text() || !node.text_content().trim().is_empty()
}
