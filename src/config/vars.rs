//! Environment variable interpolation for config files.
//!
//! Recognised forms:
//! - `$VAR` and `${VAR}` are replaced by the variable, which must be set
//! - `${VAR:-fallback}` uses the fallback when VAR is unset or empty
//! - `${VAR-fallback}` uses the fallback only when VAR is unset
//! - `$$` is a literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?: (?P<op>:?-) (?P<fallback>[^}]*) )?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("static interpolation pattern compiles")
});

/// Interpolate against the process environment.
///
/// Every problem is collected so a single run reports all missing variables.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate using `lookup` to resolve variable names.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut problems = Vec::new();

    let text = REFERENCE.replace_all(input, |caps: &Captures| {
        if caps.name("escape").is_some() {
            return "$".to_string();
        }

        let original = caps.get(0).map_or("", |m| m.as_str());
        let Some(name) = caps.name("braced").or_else(|| caps.name("bare")) else {
            return original.to_string();
        };
        let name = name.as_str();
        let fallback = caps.name("fallback").map(|m| m.as_str());
        let empty_uses_fallback = caps.name("op").is_some_and(|m| m.as_str() == ":-");

        match lookup(name) {
            Some(value) if value.contains(['\n', '\r']) => {
                problems.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                original.to_string()
            }
            Some(value) if value.is_empty() && empty_uses_fallback => {
                fallback.unwrap_or_default().to_string()
            }
            Some(value) => value,
            None => match fallback {
                Some(fallback) => fallback.to_string(),
                None => {
                    problems.push(format!("environment variable '{name}' is not set"));
                    original.to_string()
                }
            },
        }
    });

    if problems.is_empty() {
        Ok(text.into_owned())
    } else {
        Err(problems)
    }
}
