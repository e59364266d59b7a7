//! Directive Definitions
//!
//! [`DirectiveDefinition`] is what callers register. The [`crate::Registry`]
//! turns each definition into an immutable [`Directive`] with its bindings
//! parsed, its `restrict` resolved and its default `require` filled in.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::attributes::Attributes;
use crate::compiler::{CompilerCore, TranscludeFn};
use crate::controller::ControllerLocals;
use crate::dom::{NodeList, NodeRef};
use crate::error::Result;
use crate::scope::Scope;
use crate::transclude::Transclude;
use crate::value::{Injectable, Value};

// ═══════════════════════════════════════════════════════════════════════════════
// LINK & COMPILE FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a link function receives.
#[derive(Clone)]
pub struct LinkContext {
    pub scope: Scope,
    pub element: NodeRef,
    pub attrs: Attributes,
    /// Result of resolving the directive's `require`: a controller instance,
    /// an array, an object, or `undefined` when nothing is required.
    pub controllers: Value,
    pub transclude: Option<Transclude>,
}

pub type LinkFn = Rc<dyn Fn(&LinkContext) -> Result<()>>;

#[derive(Clone, Default)]
pub struct LinkFns {
    pub pre: Option<LinkFn>,
    pub post: Option<LinkFn>,
}

impl LinkFns {
    pub fn post(f: impl Fn(&LinkContext) -> Result<()> + 'static) -> Self {
        Self {
            pre: None,
            post: Some(Rc::new(f)),
        }
    }

    pub fn pre(f: impl Fn(&LinkContext) -> Result<()> + 'static) -> Self {
        Self {
            pre: Some(Rc::new(f)),
            post: None,
        }
    }

    pub fn pre_post(
        pre: impl Fn(&LinkContext) -> Result<()> + 'static,
        post: impl Fn(&LinkContext) -> Result<()> + 'static,
    ) -> Self {
        Self {
            pre: Some(Rc::new(pre)),
            post: Some(Rc::new(post)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_none() && self.post.is_none()
    }
}

/// Arguments of a directive's `compile` function.
pub struct CompileArgs {
    pub element: NodeRef,
    pub attrs: Attributes,
    /// Transclusion function for the content captured on this element.
    pub transclude: Option<TranscludeFn>,
    pub(crate) core: Rc<CompilerCore>,
}

impl CompileArgs {
    /// Compiles the element's children on their own and detaches them, so a
    /// link function can decide later whether to clone them back in.
    pub fn take_contents(&self) -> Result<TranscludeFn> {
        let contents = NodeList::new(self.element.children());
        let link = self.core.compile(&contents, None, None, None, None)?;
        self.element.empty();
        Ok(link)
    }
}

pub type CompileFn = Rc<dyn Fn(&CompileArgs) -> Result<LinkFns>>;

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITION FIELDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ScopeRequest {
    #[default]
    None,
    /// `scope: true`
    New,
    /// `scope: {...}`, binding name → definition (`@`, `=?attr`, `<`, `&`).
    Isolate(IndexMap<String, String>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum BindToController {
    #[default]
    Off,
    /// Move the isolate scope bindings onto the controller.
    On,
    Bindings(IndexMap<String, String>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum TranscludeMode {
    #[default]
    None,
    Content,
    Element,
    /// Slot name → element selector, `?`-prefixed when optional.
    Slots(IndexMap<String, String>),
}

impl TranscludeMode {
    pub fn is_some(&self) -> bool {
        !matches!(self, TranscludeMode::None)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Require {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
    Map(IndexMap<String, String>),
}

impl Require {
    pub fn is_none(&self) -> bool {
        matches!(self, Require::None)
    }
}

pub type ControllerFactory = Rc<dyn Fn(&ControllerLocals, &Value) -> Result<Value>>;

#[derive(Clone)]
pub enum ControllerSpec {
    /// Called with the locals and the pre-created instance as `this`.
    Factory(ControllerFactory),
    /// `"Name"` or `"Name as alias"`, resolved through the controller registry.
    Named(String),
    Injectable(Rc<Injectable>),
    /// `'@'`: the name comes from the directive's own attribute value.
    FromAttribute,
}

impl ControllerSpec {
    pub fn factory(f: impl Fn(&ControllerLocals, &Value) -> Result<Value> + 'static) -> Self {
        ControllerSpec::Factory(Rc::new(f))
    }

    pub fn named(name: &str) -> Self {
        ControllerSpec::Named(name.to_string())
    }

    pub fn injectable(injectable: Injectable) -> Self {
        ControllerSpec::Injectable(Rc::new(injectable))
    }
}

impl fmt::Debug for ControllerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerSpec::Factory(_) => write!(f, "Factory"),
            ControllerSpec::Named(name) => write!(f, "Named({:?})", name),
            ControllerSpec::Injectable(i) => write!(f, "Injectable({:?})", i.deps),
            ControllerSpec::FromAttribute => write!(f, "FromAttribute"),
        }
    }
}

#[derive(Clone)]
pub enum TemplateSource {
    Markup(String),
    Function(Rc<dyn Fn(&NodeRef, &Attributes) -> Result<String>>),
    /// Invoked with `$element` and `$attrs` locals.
    Injectable(Rc<Injectable>),
}

impl TemplateSource {
    pub fn markup(markup: &str) -> Self {
        TemplateSource::Markup(markup.to_string())
    }

    pub fn function(f: impl Fn(&NodeRef, &Attributes) -> Result<String> + 'static) -> Self {
        TemplateSource::Function(Rc::new(f))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
pub struct DirectiveDefinition {
    pub priority: i32,
    pub terminal: bool,
    /// Any of `E`, `A`, `C`, `M`. Defaults to `EA`.
    pub restrict: Option<String>,
    pub scope: ScopeRequest,
    pub bind_to_controller: BindToController,
    pub controller: Option<ControllerSpec>,
    pub controller_as: Option<String>,
    pub require: Require,
    pub template: Option<TemplateSource>,
    pub template_url: Option<TemplateSource>,
    pub replace: bool,
    pub transclude: TranscludeMode,
    pub compile: Option<CompileFn>,
    pub link: LinkFns,
}

/// Shorthand for an element directive with an isolate scope whose bindings
/// live on a `$ctrl` controller.
#[derive(Clone, Default)]
pub struct ComponentDefinition {
    pub controller: Option<ControllerSpec>,
    pub controller_as: Option<String>,
    pub template: Option<TemplateSource>,
    pub template_url: Option<TemplateSource>,
    pub bindings: IndexMap<String, String>,
    pub transclude: TranscludeMode,
    pub require: Require,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    /// `@`
    Interpolated,
    /// `=`
    TwoWay,
    /// `<`
    OneWay,
    /// `&`
    Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingSpec {
    /// Property written on the scope or controller.
    pub property: String,
    /// Normalized attribute the value is read from.
    pub attr_name: String,
    pub mode: BindingMode,
    /// `=*`: shallow collection watch.
    pub collection: bool,
    pub optional: bool,
    pub definition: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FINALIZED DIRECTIVE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct Directive {
    pub name: String,
    /// Registration order among directives sharing `name`.
    pub index: usize,
    pub priority: i32,
    pub terminal: bool,
    pub restrict: String,
    pub scope: ScopeRequest,
    pub isolate_bindings: Vec<BindingSpec>,
    pub controller_bindings: Vec<BindingSpec>,
    /// Bindings and required controllers land on the controller instance.
    pub binds_to_controller: bool,
    pub controller: Option<ControllerSpec>,
    pub controller_as: Option<String>,
    pub require: Require,
    pub template: Option<TemplateSource>,
    pub template_url: Option<TemplateSource>,
    pub replace: bool,
    pub transclude: TranscludeMode,
    pub compile: Option<CompileFn>,
    pub link: LinkFns,
    /// Collected from a `replace` template of an isolate-scope directive.
    pub(crate) marked_isolate_scope: bool,
    /// Collected from a `replace` template of a new-scope directive.
    pub(crate) marked_new_scope: bool,
    /// Set on the synchronous stand-in for a `templateUrl` directive.
    pub(crate) original: Option<Rc<Directive>>,
}

impl Directive {
    /// Bare directive for compiler-generated behavior (interpolation).
    pub(crate) fn synthetic(name: &str, priority: i32, compile: CompileFn) -> Self {
        Directive {
            name: name.to_string(),
            index: 0,
            priority,
            terminal: false,
            restrict: String::new(),
            scope: ScopeRequest::None,
            isolate_bindings: Vec::new(),
            controller_bindings: Vec::new(),
            binds_to_controller: false,
            controller: None,
            controller_as: None,
            require: Require::None,
            template: None,
            template_url: None,
            replace: false,
            transclude: TranscludeMode::None,
            compile: Some(compile),
            link: LinkFns::default(),
            marked_isolate_scope: false,
            marked_new_scope: false,
            original: None,
        }
    }

    pub fn requests_isolate_scope(&self) -> bool {
        matches!(self.scope, ScopeRequest::Isolate(_))
    }

    pub fn requests_new_scope(&self) -> bool {
        matches!(self.scope, ScopeRequest::New)
    }

    /// True for the stand-in of a `templateUrl` directive whose template has
    /// been fetched.
    pub fn is_template_url_derived(&self) -> bool {
        self.original.is_some()
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directive")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("restrict", &self.restrict)
            .finish()
    }
}

/// Sort order: priority descending, then name, then registration index.
pub fn by_priority(a: &Rc<Directive>, b: &Rc<Directive>) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.index.cmp(&b.index))
}
