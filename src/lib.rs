//! # Directive Compiler
//!
//! Compiles element trees annotated with directives (by tag, attribute,
//! class or comment) into link functions, and links them to scopes.
//!
//! ## Ground Rules
//!
//! 1. **Ordering**: directives on a node run by priority (descending), then
//!    name, then registration order. Pre-links run in that order, post-links
//!    in reverse, children in between.
//!
//! 2. **One owner per concern**: at most one directive per node may request
//!    an isolate scope, a template, or transclusion. Violations are `multidir`
//!    errors raised while compiling.
//!
//! 3. **Terminal**: a terminal directive stops directives of lower priority on
//!    its node and the compilation of the node's children.
//!
//! 4. **Scopes**: `scope: true` gets a child scope, `scope: {...}` an isolate
//!    scope whose bindings (`@`, `=`, `<`, `&`) are wired to the parent scope.
//!    Transcluded content links against a scope that reads through the scope
//!    it was defined in.
//!
//! 5. **Errors**: structural problems are returned; errors in user callbacks
//!    and in asynchronous template loading are reported to the
//!    [`ExceptionHandler`] and do not stop the surrounding work.

mod attributes;
mod bindings;
mod compiler;
mod config;
mod controller;
mod directive;
mod dom;
mod error;
mod expr;
mod injector;
mod interpolate;
mod loader;
mod matcher;
mod parse;
mod registry;
mod sanitize;
mod scope;
mod template;
mod transclude;
mod value;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod compile_tests;


#[cfg(test)]
mod controller_tests;

#[cfg(test)]
mod transclusion_tests;


pub use attributes::{snake_case, Attributes, ObserverFn, ObserverHandle};
pub use bindings::simple_change;
pub use compiler::{
    CloneAttachFn, Compiler, CompilerBuilder, LinkFunction, LinkOptions, TranscludeFn,
};
pub use config::CompilerConfig;
pub use controller::ControllerLocals;
pub use directive::{
    BindToController, BindingMode, BindingSpec, CompileArgs, CompileFn, ComponentDefinition,
    ControllerFactory, ControllerSpec, Directive, DirectiveDefinition, LinkContext, LinkFn,
    LinkFns, Require, ScopeRequest, TemplateSource, TranscludeMode,
};
pub use dom::{NodeKind, NodeList, NodeRef};
pub use error::{CollectingExceptionHandler, Error, ExceptionHandler, LoggingExceptionHandler, Result};
pub use expr::{Expression, ExpressionParser, Parser};
pub use injector::{ControllerRegistry, Injector, ServiceRegistry};
pub use interpolate::{Interpolation, Interpolator};
pub use loader::{CachedTemplateLoader, TemplateCache, TemplateFetch, TemplateLoader};
pub use matcher::directive_normalize;
pub use parse::{parse_html, parse_node_list};
pub use registry::{parse_controller_expression, Registry};
pub use sanitize::{TrustPolicy, TrustedContext, TrustedValue, UrlSanitizer};
pub use scope::{Scope, WatchGetter, WatchHandle, WatchListener};
pub use transclude::{transclusion_outlet, BoundTranscludeFn, Transclude};
pub use value::{Injectable, NativeFn, ObjectMap, Value};
