//! Error Model for the Directive Compiler
//!
//! Two families of failures exist:
//!
//! 1. **Structural** errors are returned from `compile` / `link` and abort the
//!    operation (`multidir`, `ctreq`, `tplrt`, ...).
//! 2. **Reported** errors are handed to the [`ExceptionHandler`] collaborator and
//!    execution continues (template fetch failures, throwing callbacks,
//!    `nonassign`, `insecurl`, ...).
//!
//! Every variant carries a stable short code, available through [`Error::code`].

use std::cell::RefCell;
use std::rc::Rc;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_MULTIPLE_DIRECTIVES: &str = "multidir";
pub const ERR_CONTROLLER_REQUIRED: &str = "ctreq";
pub const ERR_NO_CONTROLLER: &str = "noctrl";
pub const ERR_NO_IDENTIFIER: &str = "noident";
pub const ERR_TEMPLATE_ROOT: &str = "tplrt";
pub const ERR_DOM_EVENTS: &str = "nodomevents";
pub const ERR_REQUIRED_SLOT: &str = "reqslot";
pub const ERR_NO_SLOT: &str = "noslot";
pub const ERR_ORPHAN: &str = "orphan";
pub const ERR_MULTI_LINK: &str = "multilink";
pub const ERR_NON_ASSIGNABLE: &str = "nonassign";
pub const ERR_INSECURE_URL: &str = "insecurl";
pub const ERR_TEMPLATE_LOAD: &str = "tpload";
pub const ERR_BAD_RESTRICT: &str = "badrestrict";
pub const ERR_ISOLATE_BINDING: &str = "iscp";
pub const ERR_BAD_DIRECTIVE_NAME: &str = "baddir";
pub const ERR_CONTROLLER_REGISTRY: &str = "ctrlreg";
pub const ERR_INFINITE_DIGEST: &str = "infdig";
pub const ERR_INFINITE_CHANGES: &str = "infchng";
pub const ERR_IN_PROGRESS: &str = "inprog";
pub const ERR_PARSE: &str = "parse";
pub const ERR_UNKNOWN_PROVIDER: &str = "unpr";
pub const ERR_CALLBACK: &str = "callback";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Multiple directives [{first}, {second}] asking for {what} on: {element}")]
    MultipleDirectives {
        first: String,
        second: String,
        what: String,
        element: String,
    },

    #[error("Controller '{controller}', required by directive '{directive}', can't be found!")]
    ControllerRequired { controller: String, directive: String },

    #[error("Cannot bind to controller without directive '{directive}'s controller.")]
    NoController { directive: String },

    #[error("Cannot bind to controller without identifier for directive '{directive}'.")]
    NoIdentifier { directive: String },

    #[error("Template for directive '{directive}' must have exactly one root element. {template}")]
    TemplateRoot { directive: String, template: String },

    #[error("Interpolations for HTML DOM event attributes are disallowed ('{attribute}').")]
    DomEvents { attribute: String },

    #[error("Required transclusion slot '{slot}' was not filled.")]
    RequiredSlot { slot: String },

    #[error("No parent directive that requires a transclusion with slot name '{slot}'. Element: {element}")]
    NoSlot { slot: String, element: String },

    #[error("Transclusion outlet used without a parent directive that requires a transclusion. Element: {element}")]
    Orphan { element: String },

    #[error("This element has already been linked.")]
    MultiLink,

    #[error("Expression '{expression}' in attribute '{attribute}' used with directive '{directive}' is non-assignable!")]
    NonAssignable {
        expression: String,
        attribute: String,
        directive: String,
    },

    #[error("Blocked loading resource from url not allowed by trust policy: {url}")]
    InsecureUrl { url: String },

    #[error("Failed to load template: {url} ({reason})")]
    TemplateLoad { url: String, reason: String },

    #[error("Restrict property '{restrict}' of directive '{directive}' is invalid")]
    BadRestrict { restrict: String, directive: String },

    #[error("Invalid {kind} for directive '{directive}'. Definition: {{... {binding}: '{definition}' ...}}")]
    IsolateBinding {
        kind: String,
        directive: String,
        binding: String,
        definition: String,
    },

    #[error("Directive/Component name '{name}' is invalid: {reason}")]
    BadDirectiveName { name: String, reason: String },

    #[error("The controller with the name '{name}' is not registered.")]
    ControllerRegistry { name: String },

    #[error("{ttl} digest() iterations reached. Aborting!")]
    InfiniteDigest { ttl: u32 },

    #[error("{ttl} $onChanges() iterations reached. Aborting!")]
    InfiniteChanges { ttl: u32 },

    #[error("{phase} already in progress")]
    InProgress { phase: String },

    #[error("Syntax error in expression '{expression}': {message}")]
    Parse { expression: String, message: String },

    #[error("Unknown provider: {name}")]
    UnknownProvider { name: String },

    /// A user supplied callback (link fn, hook, listener) failed.
    #[error("{0}")]
    Callback(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::MultipleDirectives { .. } => ERR_MULTIPLE_DIRECTIVES,
            Error::ControllerRequired { .. } => ERR_CONTROLLER_REQUIRED,
            Error::NoController { .. } => ERR_NO_CONTROLLER,
            Error::NoIdentifier { .. } => ERR_NO_IDENTIFIER,
            Error::TemplateRoot { .. } => ERR_TEMPLATE_ROOT,
            Error::DomEvents { .. } => ERR_DOM_EVENTS,
            Error::RequiredSlot { .. } => ERR_REQUIRED_SLOT,
            Error::NoSlot { .. } => ERR_NO_SLOT,
            Error::Orphan { .. } => ERR_ORPHAN,
            Error::MultiLink => ERR_MULTI_LINK,
            Error::NonAssignable { .. } => ERR_NON_ASSIGNABLE,
            Error::InsecureUrl { .. } => ERR_INSECURE_URL,
            Error::TemplateLoad { .. } => ERR_TEMPLATE_LOAD,
            Error::BadRestrict { .. } => ERR_BAD_RESTRICT,
            Error::IsolateBinding { .. } => ERR_ISOLATE_BINDING,
            Error::BadDirectiveName { .. } => ERR_BAD_DIRECTIVE_NAME,
            Error::ControllerRegistry { .. } => ERR_CONTROLLER_REGISTRY,
            Error::InfiniteDigest { .. } => ERR_INFINITE_DIGEST,
            Error::InfiniteChanges { .. } => ERR_INFINITE_CHANGES,
            Error::InProgress { .. } => ERR_IN_PROGRESS,
            Error::Parse { .. } => ERR_PARSE,
            Error::UnknownProvider { .. } => ERR_UNKNOWN_PROVIDER,
            Error::Callback(_) => ERR_CALLBACK,
        }
    }

    /// Shorthand used by link functions and hooks to signal failure.
    pub fn callback(message: impl Into<String>) -> Self {
        Error::Callback(message.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ═══════════════════════════════════════════════════════════════════════════════
// EXCEPTION HANDLER COLLABORATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Sink for non-fatal errors. `context` is usually the opening tag of the
/// element being processed, or empty.
pub trait ExceptionHandler {
    fn handle(&self, error: &Error, context: &str);
}

/// Default handler: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionHandler;

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle(&self, error: &Error, context: &str) {
        tracing::error!(code = error.code(), context = %context, "{}", error);
    }
}

/// Records every reported error. Useful for embedding hosts that surface
/// errors in their own UI, and for tests.
#[derive(Debug, Default, Clone)]
pub struct CollectingExceptionHandler {
    errors: Rc<RefCell<Vec<(Error, String)>>>,
}

impl CollectingExceptionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<Error> {
        self.errors.borrow().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.errors.borrow().iter().map(|(e, _)| e.code()).collect()
    }

    pub fn contexts(&self) -> Vec<String> {
        self.errors.borrow().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn clear(&self) {
        self.errors.borrow_mut().clear();
    }
}

impl ExceptionHandler for CollectingExceptionHandler {
    fn handle(&self, error: &Error, context: &str) {
        tracing::debug!(code = error.code(), "collected reported error");
        self.errors
            .borrow_mut()
            .push((error.clone(), context.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::MultiLink.code(), "multilink");
        assert_eq!(
            Error::RequiredSlot {
                slot: "title".to_string()
            }
            .code(),
            "reqslot"
        );
        assert_eq!(Error::callback("boom").code(), "callback");
    }

    #[test]
    fn test_collecting_handler_keeps_order() {
        let handler = CollectingExceptionHandler::new();
        handler.handle(&Error::callback("first"), "<div>");
        handler.handle(&Error::MultiLink, "");
        assert_eq!(handler.codes(), vec!["callback", "multilink"]);
        assert_eq!(handler.contexts()[0], "<div>");
    }
}
