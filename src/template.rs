use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Placeholders a query template may reference.
const KNOWN_VARIABLES: &[&str] = &["service_tree"];

// `{{` and `}}` are escaped braces, `{name}` is a placeholder.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("valid regex"));

fn render(template: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;

    for caps in TOKEN_RE.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        result.push_str(&template[last..whole.start()]);
        last = whole.end();

        match (whole.as_str(), caps.get(1)) {
            ("{{", _) => result.push('{'),
            ("}}", _) => result.push('}'),
            (_, Some(name)) => {
                let name = name.as_str().trim();
                if name.is_empty() {
                    return Err(Error::Template("empty placeholder {}".to_string()));
                }
                if !KNOWN_VARIABLES.contains(&name) {
                    return Err(Error::Template(format!("unknown placeholder: {{{name}}}")));
                }
                match lookup(name) {
                    Some(value) => result.push_str(&value),
                    None => {
                        return Err(Error::Template(format!(
                            "missing value for placeholder: {name}"
                        )));
                    }
                }
            }
            _ => result.push_str(whole.as_str()),
        }
    }

    result.push_str(&template[last..]);
    Ok(result)
}

/// Characters that would end or escape a KQL string literal.
const FORBIDDEN_IN_SERVICE_TREE: &[char] = &['\'', '"', '\\'];

/// The service tree is pasted verbatim into quoted literals, so it must not
/// contain quotes or backslashes.
pub fn check_service_tree(service_tree: &str) -> Result<()> {
    match service_tree.chars().find(|c| FORBIDDEN_IN_SERVICE_TREE.contains(c)) {
        Some(c) => Err(Error::Template(format!(
            "service tree must not contain {c:?}: {service_tree}"
        ))),
        None => Ok(()),
    }
}

/// Substitute the service tree into a query template.
pub fn render_query(template: &str, service_tree: &str) -> Result<String> {
    check_service_tree(service_tree)?;
    render(template, |name| {
        (name == "service_tree").then(|| service_tree.to_string())
    })
}

/// Check that a template only uses known placeholders.
pub fn validate_template(template: &str) -> Result<()> {
    render(template, |_| Some(String::new())).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_service_tree() {
        let query = render_query(
            "Incidents | where OwningService == '{service_tree}' | take 50",
            "Contoso Storage",
        )
        .unwrap();
        assert_eq!(
            query,
            "Incidents | where OwningService == 'Contoso Storage' | take 50"
        );
    }

    #[test]
    fn test_multiple_occurrences_and_whitespace() {
        let query = render_query("{service_tree}/{ service_tree }", "a").unwrap();
        assert_eq!(query, "a/a");
    }

    #[test]
    fn test_escaped_braces() {
        let query = render_query(
            "print d = dynamic({{\"tree\": \"{service_tree}\"}})",
            "x",
        )
        .unwrap();
        assert_eq!(query, "print d = dynamic({\"tree\": \"x\"})");
    }

    #[test]
    fn test_no_placeholders() {
        assert_eq!(render_query("Alerts | take 5", "x").unwrap(), "Alerts | take 5");
        assert_eq!(render_query("", "x").unwrap(), "");
    }

    #[test]
    fn test_unknown_placeholder() {
        let err = render_query("where a == '{team}'", "x").unwrap_err();
        assert!(err.to_string().contains("unknown placeholder: {team}"));
    }

    #[test]
    fn test_empty_placeholder() {
        let err = validate_template("where a == '{}'").unwrap_err();
        assert!(err.to_string().contains("empty placeholder"));
    }

    #[test]
    fn test_stray_braces_kept() {
        assert_eq!(render_query("a } b {", "x").unwrap(), "a } b {");
    }

    #[test]
    fn test_service_tree_with_quote_rejected() {
        let err = render_query("T | where S == '{service_tree}'", "O'Brien").unwrap_err();
        assert!(err.to_string().contains("must not contain '\\''"));
        assert!(render_query("T", "a\\b").is_err());
        assert!(render_query("T", "say \"hi\"").is_err());
        assert!(check_service_tree("Contoso Storage (West)").is_ok());
    }

    #[test]
    fn test_validate_template() {
        assert!(validate_template("T | where S == '{service_tree}'").is_ok());
        assert!(validate_template("T | where S == '{tree}'").is_err());
    }
}
