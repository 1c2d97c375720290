//! Environment expansion and argument templating applied when a spinner is
//! prepared. Expansion always runs before templating.

use crate::domain::{duration, Step};
use crate::error::{Result, RunnerError};
use handlebars::Handlebars;
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\{([^}]*)\}|([A-Za-z0-9_]+))").expect("valid env regex")
    })
}

/// Replace `${VAR}` and `$VAR` from the process environment.
/// Unset variables expand to an empty string.
pub fn expand_env(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Replace `${VAR}` and `$VAR` using `lookup`
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    env_pattern()
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// Renders argument templates with a step as the data context
pub struct ArgRenderer {
    registry: Handlebars<'static>,
    context: Value,
    step: String,
}

impl ArgRenderer {
    pub fn new(step: &Step, timeout: Duration) -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);

        let context = json!({
            "name": step.name,
            "command": step.command,
            "args": step.args,
            "workdir": step.workdir.clone().unwrap_or_default(),
            "timeout": duration::format_duration(timeout),
            "stopOnFail": step.stop_on_fail,
            "probe": step.probe.as_ref().map(|p| json!({
                "command": p.command,
                "args": p.args,
            })),
        });

        Self {
            registry,
            context,
            step: step.name.clone(),
        }
    }

    /// Render one argument; arguments without `{{` pass through untouched
    pub fn render(&self, arg: &str) -> Result<String> {
        if !arg.contains("{{") {
            return Ok(arg.to_string());
        }
        self.registry
            .render_template(arg, &self.context)
            .map_err(|e| RunnerError::Template {
                step: self.step.clone(),
                message: e.to_string(),
            })
    }

    /// Render every argument, preserving order and count
    pub fn render_all(&self, args: &[String]) -> Result<Vec<String>> {
        args.iter().map(|arg| self.render(arg)).collect()
    }
}
