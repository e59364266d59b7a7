//! Template Resolution
//!
//! Turns a directive's `template`/`templateUrl` source into markup and
//! implements the `replace: true` rules: the markup must reduce to a single
//! element root, and the original element's attributes are merged onto it.

use std::rc::Rc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::attributes::Attributes;
use crate::compiler::CompilerCore;
use crate::directive::{Directive, TemplateSource};
use crate::dom::NodeRef;
use crate::error::{Error, Result};
use crate::parse::parse_html;
use crate::value::Value;

lazy_static! {
    static ref HTML_RE: Regex = Regex::new(r"<|&#?\w+;").unwrap();
}

/// Evaluates a template source against the element being compiled.
pub(crate) fn resolve_template(
    core: &CompilerCore,
    source: &TemplateSource,
    element: &NodeRef,
    attrs: &Attributes,
) -> Result<String> {
    match source {
        TemplateSource::Markup(markup) => Ok(markup.clone()),
        TemplateSource::Function(f) => f(element, attrs),
        TemplateSource::Injectable(injectable) => {
            let locals = Value::object_from([
                ("$element", Value::host(element.clone())),
                ("$attrs", Value::host(attrs.clone())),
            ]);
            let result = core
                .injector
                .invoke(injectable, &Value::Undefined, Some(&locals))?;
            Ok(result.to_display_string())
        }
    }
}

/// Parses a `replace` template and returns its only element root. Comments
/// and whitespace-only text around the root are ignored.
pub(crate) fn replace_root(markup: &str, directive: &str, url: &str) -> Result<NodeRef> {
    let trimmed = markup.trim();
    let mut nodes = if HTML_RE.is_match(trimmed) {
        parse_html(trimmed)?
    } else {
        Vec::new()
    };
    if nodes.len() > 1 {
        nodes.retain(|node| {
            !(node.is_comment() || (node.is_text() && node.value().trim().is_empty()))
        });
    }
    match nodes.as_slice() {
        [root] if root.is_element() => Ok(root.clone()),
        _ => Err(Error::TemplateRoot {
            directive: directive.to_string(),
            template: url.to_string(),
        }),
    }
}

/// Copies attributes of the original element (`dst`) and of the template
/// root (`src`) together. Conflicting `class` values are joined with a
/// space, `style` values with `;`, the original element's value first.
pub(crate) fn merge_template_attributes(dst: &Attributes, src: &Attributes) {
    for key in dst.keys() {
        if key.starts_with('$') {
            continue;
        }
        let mut value = dst.get(&key);
        let incoming = src.get(&key);
        if incoming.truthy() && !incoming.strict_eq(&value) {
            value = match &value {
                Value::String(existing) if !existing.is_empty() => {
                    let separator = if key == "style" { ";" } else { " " };
                    Value::String(format!(
                        "{}{}{}",
                        existing,
                        separator,
                        incoming.to_display_string()
                    ))
                }
                _ => incoming,
            };
        }
        let spelling = src.attr_name(&key);
        dst.set(&key, value, true, spelling.as_deref());
    }

    for key in src.keys() {
        if dst.has(&key) || key.starts_with('$') {
            continue;
        }
        dst.insert(&key, src.get(&key));
        if key != "class" && key != "style" {
            match src.attr_name(&key) {
                Some(name) => dst.set_attr_name(&key, &name),
                None => dst.remove_attr_name(&key),
            }
        }
    }
}

/// Derives copies of `directives` that remember they were collected from the
/// template of a new-scope or isolate-scope directive.
pub(crate) fn mark_directive_scope(
    directives: &mut [Rc<Directive>],
    isolate_scope: bool,
    new_scope: bool,
) {
    for directive in directives.iter_mut() {
        let mut marked = Directive::clone(directive);
        marked.marked_isolate_scope = isolate_scope;
        marked.marked_new_scope = new_scope;
        *directive = Rc::new(marked);
    }
}
