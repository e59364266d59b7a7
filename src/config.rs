use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ERR_PARSE};

/// Compiler-wide settings, fixed once the [`crate::Compiler`] is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Opening interpolation delimiter.
    pub start_symbol: String,
    /// Closing interpolation delimiter.
    pub end_symbol: String,
    /// Maximum number of dirty-checking passes per digest.
    pub digest_ttl: u32,
    /// Maximum nesting of `$onChanges` flushes.
    pub on_changes_ttl: u32,
    /// Add `ng-scope` / `ng-isolate-scope` / `ng-binding` classes and node data.
    pub debug_info_enabled: bool,
    pub comment_directives_enabled: bool,
    pub css_class_directives_enabled: bool,
    /// Absolute URL prefixes accepted as trusted resource URLs.
    /// Relative URLs are always trusted.
    pub trusted_resource_url_prefixes: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            start_symbol: "{{".to_string(),
            end_symbol: "}}".to_string(),
            digest_ttl: 10,
            on_changes_ttl: 10,
            debug_info_enabled: true,
            comment_directives_enabled: true,
            css_class_directives_enabled: true,
            trusted_resource_url_prefixes: Vec::new(),
        }
    }
}

impl CompilerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CompilerConfig = serde_json::from_str(json).map_err(|e| Error::Parse {
            expression: "<compiler config>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.start_symbol.is_empty() || self.end_symbol.is_empty() {
            return Err(Error::Parse {
                expression: "<compiler config>".to_string(),
                message: format!("{}: interpolation symbols must not be empty", ERR_PARSE),
            });
        }
        Ok(())
    }

    /// True when custom interpolation delimiters are configured.
    pub fn has_custom_symbols(&self) -> bool {
        self.start_symbol != "{{" || self.end_symbol != "}}"
    }
}
