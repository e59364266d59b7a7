//! Directive Matching
//!
//! Finds the directives that apply to one node. Sources are visited in a
//! fixed order: the tag name, each attribute (DOM order), each class token,
//! and for comments a `directive: name args` marker. Attribute values and
//! text nodes containing interpolations additionally get a compiler-generated
//! interpolation directive.

use std::rc::Rc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::attributes::Attributes;
use crate::compiler::CompilerCore;
use crate::directive::{by_priority, CompileArgs, CompileFn, Directive, LinkFns};
use crate::dom::{NodeKind, NodeRef};
use crate::error::{Error, Result};
use crate::sanitize::TrustPolicy;
use crate::scope::Scope;
use crate::value::Value;

lazy_static! {
    static ref PREFIX_RE: Regex = Regex::new(r"(?i)^((?:x|data)[:\-_])").unwrap();
    static ref SPECIAL_CHARS_RE: Regex = Regex::new(r"[:\-_]+(.)").unwrap();
    static ref NG_ATTR_BINDING_RE: Regex = Regex::new(r"^ngAttr[A-Z]").unwrap();
    static ref NG_ATTR_UNDERSCORE_RE: Regex = Regex::new(r"_(.)").unwrap();
    static ref EVENT_HANDLER_ATTR_RE: Regex = Regex::new(r"^(on[a-z]+|formaction)$").unwrap();
    static ref CLASS_DIRECTIVE_RE: Regex = Regex::new(r"(([\w\-]+)(?::([^;]+))?;?)").unwrap();
    static ref COMMENT_DIRECTIVE_RE: Regex =
        Regex::new(r"^\s*directive:\s*([\w\-]+)\s+(.*)$").unwrap();
}

const ALL_OR_NOTHING_ATTRS: &[&str] = &["ngSrc", "ngSrcset", "src", "srcset"];
const BOOLEAN_ATTRS: &[&str] = &[
    "multiple", "selected", "checked", "disabled", "readonly", "required", "open",
];
const BOOLEAN_ELEMENTS: &[&str] = &[
    "input", "select", "option", "textarea", "button", "form", "details",
];

pub const ATTR_INTERPOLATE_DIRECTIVE: &str = "$$attrInterpolate";
pub const TEXT_INTERPOLATE_DIRECTIVE: &str = "$$textInterpolate";

/// Canonical directive name: strips `x-`/`data-` and camel-cases at `:`, `-`
/// and `_` separators. `data-ng-model`, `x:ng:model` and `ng_model` all
/// become `ngModel`.
pub fn directive_normalize(name: &str) -> String {
    let stripped = PREFIX_RE.replace(name, "");
    SPECIAL_CHARS_RE
        .replace_all(&stripped, |caps: &regex::Captures| caps[1].to_uppercase())
        .into_owned()
}

fn is_boolean_attr(node: &NodeRef, key: &str) -> bool {
    BOOLEAN_ATTRS.contains(&key) && BOOLEAN_ELEMENTS.contains(&node.tag_name())
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects and sorts the directives for `node`, filling `attrs` as a side
/// effect. Only directives with priority strictly below `max_priority` are
/// taken when it is set.
pub(crate) fn collect_directives(
    core: &Rc<CompilerCore>,
    node: &NodeRef,
    attrs: &Attributes,
    max_priority: Option<i32>,
    ignore_directive: Option<&str>,
) -> Result<Vec<Rc<Directive>>> {
    let mut directives = Vec::new();

    match node.kind() {
        NodeKind::Element => {
            let tag = directive_normalize(node.node_name());
            add_directive(core, &mut directives, &tag, 'E', max_priority, ignore_directive)?;

            for (raw_name, value) in node.attributes() {
                let mut name = raw_name.clone();
                let mut normalized = directive_normalize(&raw_name.to_ascii_lowercase());
                let is_ng_attr = NG_ATTR_BINDING_RE.is_match(&normalized);
                if is_ng_attr {
                    let unprefixed = PREFIX_RE.replace(&raw_name, "").to_ascii_lowercase();
                    name = NG_ATTR_UNDERSCORE_RE
                        .replace_all(&unprefixed[8..], |caps: &regex::Captures| {
                            caps[1].to_uppercase()
                        })
                        .into_owned();
                    normalized = directive_normalize(&name.to_ascii_lowercase());
                }

                attrs.set_attr_name(&normalized, &name);
                if is_ng_attr || !attrs.has(&normalized) {
                    let stored = if is_boolean_attr(node, &normalized) {
                        Value::Bool(true)
                    } else {
                        Value::String(value.clone())
                    };
                    attrs.insert(&normalized, stored);
                }

                add_attr_interpolate_directive(
                    core,
                    node,
                    &mut directives,
                    &value,
                    &normalized,
                    is_ng_attr,
                )?;
                add_directive(
                    core,
                    &mut directives,
                    &normalized,
                    'A',
                    max_priority,
                    ignore_directive,
                )?;
            }

            if node.tag_name() == "input" && node.attr("type").as_deref() == Some("hidden") {
                node.set_attr("autocomplete", "off");
            }

            if core.config.css_class_directives_enabled {
                let class_name = node.attr("class").unwrap_or_default();
                for caps in CLASS_DIRECTIVE_RE.captures_iter(&class_name) {
                    let normalized = directive_normalize(&caps[2]);
                    if add_directive(
                        core,
                        &mut directives,
                        &normalized,
                        'C',
                        max_priority,
                        ignore_directive,
                    )? {
                        let value = caps
                            .get(3)
                            .map(|m| Value::String(m.as_str().trim().to_string()))
                            .unwrap_or_default();
                        attrs.insert(&normalized, value);
                    }
                }
            }
        }
        NodeKind::Text => {
            add_text_interpolate_directive(core, &mut directives, &node.value())?;
        }
        NodeKind::Comment => {
            if core.config.comment_directives_enabled {
                let text = node.value();
                if let Some(caps) = COMMENT_DIRECTIVE_RE.captures(&text) {
                    let normalized = directive_normalize(&caps[1]);
                    if add_directive(
                        core,
                        &mut directives,
                        &normalized,
                        'M',
                        max_priority,
                        ignore_directive,
                    )? {
                        attrs.insert(&normalized, Value::String(caps[2].trim().to_string()));
                    }
                }
            }
        }
        NodeKind::Fragment => {}
    }

    directives.sort_by(by_priority);
    tracing::trace!(
        node = %node.starting_tag(),
        count = directives.len(),
        "collected directives"
    );
    Ok(directives)
}

/// Adds every registration of `name` usable at `location`. Returns whether
/// at least one matched.
fn add_directive(
    core: &Rc<CompilerCore>,
    out: &mut Vec<Rc<Directive>>,
    name: &str,
    location: char,
    max_priority: Option<i32>,
    ignore_directive: Option<&str>,
) -> Result<bool> {
    if Some(name) == ignore_directive || !core.registry.has(name) {
        return Ok(false);
    }
    let mut matched = false;
    for directive in core.registry.lookup(name, core.handler.as_ref())?.iter() {
        let below_max = max_priority.map_or(true, |max| max > directive.priority);
        if below_max && directive.restrict.contains(location) {
            out.push(Rc::clone(directive));
            matched = true;
        }
    }
    Ok(matched)
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPOLATION DIRECTIVES
// ═══════════════════════════════════════════════════════════════════════════════

fn add_attr_interpolate_directive(
    core: &Rc<CompilerCore>,
    node: &NodeRef,
    out: &mut Vec<Rc<Directive>>,
    value: &str,
    name: &str,
    is_ng_attr: bool,
) -> Result<()> {
    let trusted_context = TrustPolicy::context_for(node.tag_name(), name);
    let all_or_nothing = ALL_OR_NOTHING_ATTRS.contains(&name) || is_ng_attr;
    let Some(interpolation) =
        core.interpolator
            .interpolate(value, !is_ng_attr, trusted_context, all_or_nothing)?
    else {
        return Ok(());
    };

    if !is_ng_attr && EVENT_HANDLER_ATTR_RE.is_match(name) {
        return Err(Error::DomEvents {
            attribute: name.to_string(),
        });
    }

    let interpolator = Rc::clone(&core.interpolator);
    let name = name.to_string();
    let compiled_value = value.to_string();

    let compile: CompileFn = Rc::new(move |_: &CompileArgs| {
        let interpolator = Rc::clone(&interpolator);
        let name = name.clone();
        let compiled_value = compiled_value.clone();
        let interpolation = Rc::clone(&interpolation);

        Ok(LinkFns::pre(move |ctx| {
            let attrs = &ctx.attrs;
            // Another directive may have rewritten the attribute since compile.
            let interpolation = match attrs.get(&name) {
                Value::String(current) if current != compiled_value => interpolator
                    .interpolate(&current, true, trusted_context, all_or_nothing)?,
                Value::String(_) => Some(Rc::clone(&interpolation)),
                _ => None,
            };
            let Some(interpolation) = interpolation else {
                return Ok(());
            };

            attrs.insert(&name, interpolation.eval(&ctx.scope)?);
            attrs.mark_interpolated(&name);

            let target = attrs.clone();
            let key = name.clone();
            interpolation.watch(
                &ctx.scope,
                Rc::new(move |new: &Value, old: &Value, _: &Scope| {
                    if key == "class" && !new.same_value(old) {
                        target.update_class(&new.to_display_string(), &old.to_display_string());
                    } else {
                        target.set(&key, new.clone(), true, None);
                    }
                    Ok(())
                }),
            );
            Ok(())
        }))
    });

    out.push(Rc::new(Directive::synthetic(
        ATTR_INTERPOLATE_DIRECTIVE,
        100,
        compile,
    )));
    Ok(())
}

fn add_text_interpolate_directive(
    core: &Rc<CompilerCore>,
    out: &mut Vec<Rc<Directive>>,
    text: &str,
) -> Result<()> {
    let Some(interpolation) = core.interpolator.interpolate(text, true, None, false)? else {
        return Ok(());
    };
    let debug_info = core.config.debug_info_enabled;

    let compile: CompileFn = Rc::new(move |args: &CompileArgs| {
        let compile_parent = args.element.parent().filter(NodeRef::is_element);
        if let (Some(parent), true) = (&compile_parent, debug_info) {
            parent.add_class("ng-binding");
        }
        let has_compile_parent = compile_parent.is_some();
        let interpolation = Rc::clone(&interpolation);

        Ok(LinkFns::post(move |ctx| {
            if let (Some(parent), true) = (ctx.element.parent().filter(NodeRef::is_element), debug_info) {
                if !has_compile_parent {
                    parent.add_class("ng-binding");
                }
                let bindings = parent
                    .data("$binding")
                    .unwrap_or_else(|| Value::array(Vec::new()));
                for expression in interpolation.expressions() {
                    let length = bindings.get("length").to_number() as usize;
                    bindings.set(&length.to_string(), Value::String(expression));
                }
                parent.set_data("$binding", bindings);
            }
            let node = ctx.element.clone();
            interpolation.watch(
                &ctx.scope,
                Rc::new(move |value: &Value, _: &Value, _: &Scope| {
                    node.set_value(&value.to_display_string());
                    Ok(())
                }),
            );
            Ok(())
        }))
    });

    out.push(Rc::new(Directive::synthetic(
        TEXT_INTERPOLATE_DIRECTIVE,
        0,
        compile,
    )));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_normalize() {
        assert_eq!(directive_normalize("ng-model"), "ngModel");
        assert_eq!(directive_normalize("data-ng-model"), "ngModel");
        assert_eq!(directive_normalize("x:ng:model"), "ngModel");
        assert_eq!(directive_normalize("ng_model"), "ngModel");
        assert_eq!(directive_normalize("DATA-foo"), "foo");
        assert_eq!(directive_normalize("my--dir"), "myDir");
        assert_eq!(directive_normalize("plain"), "plain");
    }

    #[test]
    fn test_class_and_comment_patterns() {
        let found: Vec<(String, Option<String>)> = CLASS_DIRECTIVE_RE
            .captures_iter("a b:1; c-d: x y ;")
            .map(|c| (c[2].to_string(), c.get(3).map(|m| m.as_str().trim().to_string())))
            .collect();
        assert_eq!(
            found,
            vec![
                ("a".to_string(), None),
                ("b".to_string(), Some("1".to_string())),
                ("c-d".to_string(), Some("x y".to_string())),
            ]
        );

        let caps = COMMENT_DIRECTIVE_RE
            .captures(" directive: my-dir some value ")
            .unwrap();
        assert_eq!(&caps[1], "my-dir");
        assert_eq!(caps[2].trim(), "some value");
    }

    #[test]
    fn test_event_handler_pattern() {
        assert!(EVENT_HANDLER_ATTR_RE.is_match("onclick"));
        assert!(EVENT_HANDLER_ATTR_RE.is_match("formaction"));
        assert!(!EVENT_HANDLER_ATTR_RE.is_match("onClick"));
    }
}
