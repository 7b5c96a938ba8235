//! Prompt template rendering.
//!
//! Role system prompts are plain strings with `${placeholder}` slots. The
//! engine substitutes the run-scoped values; unknown placeholders are left
//! intact so a typo is visible in the rendered prompt instead of silently
//! vanishing.

use std::collections::HashMap;

/// Substitute `${key}` placeholders from the variable map.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z0-9_]+)\}").unwrap();
    re.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        vars.get(key)
            .cloned()
            .unwrap_or_else(|| format!("${{{}}}", key))
    })
    .to_string()
}
