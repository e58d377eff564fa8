//! Namespace rewriting for configuration documents.

use crate::errors::FixtureError;
use regex::Regex;
use std::sync::LazyLock;

/// `{{ .Namespace }}` with optional inner whitespace.
#[allow(clippy::expect_used)]
static NAMESPACE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.Namespace\s*\}\}").expect("namespace placeholder pattern is valid")
});

/// Any remaining template action.
#[allow(clippy::expect_used)]
static TEMPLATE_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{[^}]*\}\}").expect("template action pattern is valid")
});

/// DNS-1123 label, the format Kubernetes requires for namespace names.
#[allow(clippy::expect_used)]
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("DNS label pattern is valid")
});

/// A namespace that configuration documents can be rewritten into.
pub trait Namespace: Send + Sync {
    /// Namespace name.
    fn name(&self) -> &str;

    /// Substitute namespace placeholders in `document`.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Namespace`] if the document cannot be
    /// rewritten.
    fn apply(&self, document: &str) -> Result<String, FixtureError>;
}

/// Rewrites `{{ .Namespace }}` placeholders with a fixed namespace name.
///
/// Only the namespace placeholder is understood; a document carrying any
/// other template action is rejected rather than written half-rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateNamespace {
    name: String,
}

impl TemplateNamespace {
    /// # Errors
    ///
    /// Returns [`FixtureError::Namespace`] if `name` is not a valid
    /// Kubernetes namespace name.
    pub fn new(name: impl Into<String>) -> Result<Self, FixtureError> {
        let name = name.into();
        if !DNS_LABEL.is_match(&name) {
            return Err(FixtureError::Namespace(format!(
                "'{}' is not a valid namespace name",
                name
            )));
        }
        Ok(Self { name })
    }
}

impl Namespace for TemplateNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, document: &str) -> Result<String, FixtureError> {
        let rendered = NAMESPACE_PLACEHOLDER.replace_all(document, self.name.as_str());

        if let Some(action) = TEMPLATE_ACTION.find(&rendered) {
            return Err(FixtureError::Namespace(format!(
                "unsupported template expression '{}'",
                action.as_str()
            )));
        }

        Ok(rendered.into_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_all_placeholders() {
        let ns = TemplateNamespace::new("team-a").unwrap();
        let doc = "metadata:\n  namespace: {{ .Namespace }}\nspec:\n  host: svc.{{.Namespace}}.svc\n";
        assert_eq!(
            ns.apply(doc).unwrap(),
            "metadata:\n  namespace: team-a\nspec:\n  host: svc.team-a.svc\n"
        );
    }

    #[test]
    fn test_document_without_placeholders_unchanged() {
        let ns = TemplateNamespace::new("team-a").unwrap();
        assert_eq!(ns.apply("kind: Foo\n").unwrap(), "kind: Foo\n");
    }

    #[test]
    fn test_unknown_template_action_rejected() {
        let ns = TemplateNamespace::new("team-a").unwrap();
        let err = ns.apply("name: {{ .Name }}\n").unwrap_err();
        assert!(matches!(err, FixtureError::Namespace(ref m) if m.contains(".Name")));
    }

    #[test]
    fn test_invalid_namespace_name_rejected() {
        for bad in ["", "Team-A", "-leading", "trailing-", "has_underscore"] {
            assert!(TemplateNamespace::new(bad).is_err(), "'{}' should be rejected", bad);
        }
        assert_eq!(TemplateNamespace::new("a1-b2").unwrap().name(), "a1-b2");
    }
}
