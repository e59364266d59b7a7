//! Interpolation
//!
//! Compiles text such as `Hello {{name}}!` into an [`Interpolation`]: a list
//! of literal and expression parts that renders to a string against a scope.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::expr::{Expression, ExpressionParser};
use crate::scope::{Scope, WatchHandle, WatchListener};
use crate::sanitize::{TrustPolicy, TrustedContext};
use crate::value::Value;

enum Part {
    Text(String),
    Expr(Rc<dyn Expression>),
}

/// A compiled interpolation.
pub struct Interpolation {
    source: String,
    parts: Vec<Part>,
    all_or_nothing: bool,
    trusted_context: Option<TrustedContext>,
    trust: Rc<TrustPolicy>,
}

impl Interpolation {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Source text of every embedded expression.
    pub fn expressions(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Expr(e) => Some(e.source().to_string()),
                Part::Text(_) => None,
            })
            .collect()
    }

    /// Renders against `scope`. With all-or-nothing set, any `undefined`
    /// expression makes the whole result `undefined`.
    pub fn eval(&self, scope: &Scope) -> Result<Value> {
        let mut out = String::new();
        let mut expression_count = 0;
        let mut single = Value::Undefined;

        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr(expr) => {
                    let value = expr.eval(scope, None)?;
                    if self.all_or_nothing && value.is_undefined() {
                        return Ok(Value::Undefined);
                    }
                    expression_count += 1;
                    single = value.clone();
                    out.push_str(&value.to_display_string());
                }
            }
        }

        match self.trusted_context {
            // A lone expression keeps its trusted wrapper; concatenations
            // are checked as plain strings.
            Some(context) if self.parts.len() == 1 && expression_count == 1 => {
                self.trust.get_trusted(context, &single)
            }
            Some(context) => self.trust.get_trusted(context, &Value::String(out)),
            None => Ok(Value::String(out)),
        }
    }

    /// Watches the rendered value.
    pub fn watch(self: &Rc<Self>, scope: &Scope, listener: WatchListener) -> WatchHandle {
        let this = Rc::clone(self);
        scope.watch(move |s| this.eval(s), Some(listener), false)
    }
}

/// Interpolation compiler with configurable delimiters.
pub struct Interpolator {
    start: String,
    end: String,
    parser: Rc<dyn ExpressionParser>,
    trust: Rc<TrustPolicy>,
}

impl Interpolator {
    pub fn new(
        start: &str,
        end: &str,
        parser: Rc<dyn ExpressionParser>,
        trust: Rc<TrustPolicy>,
    ) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
            parser,
            trust,
        }
    }

    pub fn start_symbol(&self) -> &str {
        &self.start
    }

    pub fn end_symbol(&self) -> &str {
        &self.end
    }

    fn escaped(symbol: &str) -> String {
        symbol.chars().flat_map(|c| ['\\', c]).collect()
    }

    fn unescape(&self, text: &str) -> String {
        text.replace(&Self::escaped(&self.start), &self.start)
            .replace(&Self::escaped(&self.end), &self.end)
    }

    /// Compiles `text`. Returns `None` when `must_have_expression` is set and
    /// the text contains no expression.
    pub fn interpolate(
        &self,
        text: &str,
        must_have_expression: bool,
        trusted_context: Option<TrustedContext>,
        all_or_nothing: bool,
    ) -> Result<Option<Rc<Interpolation>>> {
        let mut parts = Vec::new();
        let mut has_expression = false;
        let mut index = 0;

        while index < text.len() {
            let Some(start) = text[index..].find(&self.start).map(|i| i + index) else {
                break;
            };
            let after_start = start + self.start.len();
            let Some(end) = text[after_start..].find(&self.end).map(|i| i + after_start) else {
                break;
            };
            if start > index {
                parts.push(Part::Text(self.unescape(&text[index..start])));
            }
            let source = &text[after_start..end];
            let expr = self.parser.parse(source).map_err(|e| match e {
                Error::Parse { message, .. } => Error::Parse {
                    expression: text.to_string(),
                    message,
                },
                other => other,
            })?;
            parts.push(Part::Expr(expr));
            has_expression = true;
            index = end + self.end.len();
        }

        if index < text.len() {
            parts.push(Part::Text(self.unescape(&text[index..])));
        }

        if must_have_expression && !has_expression {
            return Ok(None);
        }

        Ok(Some(Rc::new(Interpolation {
            source: text.to_string(),
            parts,
            all_or_nothing,
            trusted_context,
            trust: Rc::clone(&self.trust),
        })))
    }

    /// Rewrites default `{{`/`}}` delimiters in directive templates to the
    /// configured ones.
    pub fn denormalize_template(&self, template: &str) -> String {
        if self.start == "{{" && self.end == "}}" {
            return template.to_string();
        }
        template.replace("{{", &self.start).replace("}}", &self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoggingExceptionHandler;
    use crate::expr::Parser;

    fn interpolator(start: &str, end: &str) -> Interpolator {
        Interpolator::new(
            start,
            end,
            Rc::new(Parser::new()),
            Rc::new(TrustPolicy::default()),
        )
    }

    fn scope() -> Scope {
        Scope::root(Rc::new(LoggingExceptionHandler), 10)
    }

    #[test]
    fn test_renders_parts() {
        let scope = scope();
        scope.set("name", Value::from("Misko"));
        let interp = interpolator("{{", "}}")
            .interpolate("Greet {{name}}!", true, None, false)
            .unwrap()
            .unwrap();
        assert_eq!(interp.eval(&scope).unwrap(), Value::from("Greet Misko!"));
        assert_eq!(interp.expressions(), vec!["name"]);
    }

    #[test]
    fn test_must_have_expression() {
        let i = interpolator("{{", "}}");
        assert!(i.interpolate("plain", true, None, false).unwrap().is_none());
        assert!(i.interpolate("plain", false, None, false).unwrap().is_some());
    }

    #[test]
    fn test_all_or_nothing() {
        let scope = scope();
        let interp = interpolator("{{", "}}")
            .interpolate("a{{missing}}", true, None, true)
            .unwrap()
            .unwrap();
        assert_eq!(interp.eval(&scope).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_custom_symbols() {
        let scope = scope();
        scope.set("x", Value::from(1));
        let i = interpolator("[[", "]]");
        let interp = i.interpolate("[[x]] {{x}}", true, None, false).unwrap().unwrap();
        assert_eq!(interp.eval(&scope).unwrap(), Value::from("1 {{x}}"));
        assert_eq!(i.denormalize_template("<b>{{a}}</b>"), "<b>[[a]]</b>");
    }

    #[test]
    fn test_trusted_context_rejects_untrusted() {
        let scope = scope();
        scope.set("url", Value::from("http://evil.com/x"));
        let interp = interpolator("{{", "}}")
            .interpolate("{{url}}", true, Some(TrustedContext::ResourceUrl), false)
            .unwrap()
            .unwrap();
        assert_eq!(interp.eval(&scope).unwrap_err().code(), "insecurl");
    }
}
