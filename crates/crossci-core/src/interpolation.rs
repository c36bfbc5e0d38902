//! `${{ ... }}` expression interpolation.

use crate::event::Event;
use crate::ids::RunId;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*(.*?)\s*\}\}").expect("expression pattern is valid")
});

/// Context for expression interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// `github.*` values describing the triggering event and run.
    pub github: HashMap<String, String>,
    /// `env.*` values.
    pub env: HashMap<String, String>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for one run of `workflow` triggered by `event`.
    pub fn for_event(event: &Event, workflow: &str, run_id: RunId) -> Self {
        let mut github = HashMap::new();
        github.insert("event_name".to_string(), event.kind.to_string());
        github.insert("ref".to_string(), event.git_ref.clone());
        github.insert("ref_name".to_string(), event.ref_name().to_string());
        github.insert("workflow".to_string(), workflow.to_string());
        github.insert("run_id".to_string(), run_id.to_string());
        if let Some(head) = &event.head_ref {
            github.insert("head_ref".to_string(), head.clone());
        }
        if let Some(base) = &event.base_ref {
            github.insert("base_ref".to_string(), base.clone());
        }
        if let Some(sha) = &event.sha {
            github.insert("sha".to_string(), sha.clone());
        }
        Self {
            github,
            env: HashMap::new(),
        }
    }

    pub fn with_job(mut self, job_id: &str) -> Self {
        self.github.insert("job".to_string(), job_id.to_string());
        self
    }

    pub fn with_env(mut self, env: &HashMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Interpolate expressions in a string.
    ///
    /// Supports:
    /// - `${{ github.ref }}` and the other `github.*` keys
    /// - `${{ env.VAR }}` - workflow/job env, then the process environment
    /// - `${{ 'literal' }}` - quoted literal
    /// - `${{ a || b }}` - first non-empty operand
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str());
                self.evaluate(expr)
            })
            .into_owned()
    }

    /// Evaluate an expression body (without the `${{ }}` wrapper).
    pub fn evaluate(&self, expr: &str) -> String {
        split_alternatives(expr)
            .into_iter()
            .map(|operand| self.resolve_operand(operand.trim()))
            .find(|value| !value.is_empty())
            .unwrap_or_default()
    }

    fn resolve_operand(&self, operand: &str) -> String {
        if let Some(literal) = operand
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
        {
            return literal.replace("''", "'");
        }

        if let Some(key) = operand.strip_prefix("github.") {
            return self.github.get(key).cloned().unwrap_or_default();
        }

        if let Some(var_name) = operand.strip_prefix("env.") {
            return self
                .env
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_default();
        }

        String::new()
    }
}

/// Split on `||` outside single-quoted literals.
fn split_alternatives(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    let bytes = expr.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b'|' if !in_quote && bytes.get(i + 1) == Some(&b'|') => {
                parts.push(&expr[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&expr[start..]);
    parts
}
