//! Script rendering
//!
//! Turns a template (job body, prologue, epilogue or auxiliary script) into
//! the text that is written out and executed:
//!
//! 1. an interpreter line from the `shell` attribute replaces any `#!` line
//!    the template starts with
//! 2. for the job script only, the backend's resource header lines, each
//!    behind the backend's directive prefix, then a blank line
//! 3. `$CLUSTERJOB_*` placeholders become the scheduler's own variables
//! 4. `{name}` placeholders are filled from the resources, then the job's
//!    own attributes and variables, then the defaults
//!
//! `{{` and `}}` produce literal braces. A brace directly after `$` belongs
//! to the shell (`${HOME}`) and is never treated as a placeholder, and
//! braces around anything that is not an identifier (`{1..10}`, `{ cmd; }`)
//! are left alone.

use std::collections::BTreeMap;

use clusterjob_backends::{BackendError, ResourceMap, SchedulerBackend};

use crate::config::{AttributeOverrides, JobDefaults};

/// Rendering errors
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Unresolved placeholder '{{{name}}}' on line {line}")]
    UnresolvedPlaceholder { name: String, line: usize },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The three lookup tiers for `{name}` placeholders
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    /// Tier 1: the job's resources
    pub resources: &'a ResourceMap,
    /// Tier 2: attributes set on the job itself
    pub overrides: &'a AttributeOverrides,
    /// Tier 2: template variables set on the job itself
    pub variables: &'a BTreeMap<String, String>,
    /// Tier 2: rootdir joined with workdir, from the resolved attributes
    pub fulldir: &'a str,
    /// Tier 3: process-wide defaults
    pub defaults: &'a JobDefaults,
}

impl<'a> TemplateContext<'a> {
    /// Resolve a placeholder name through the tiers in order
    pub fn lookup(&self, name: &str) -> Option<String> {
        if let Some(value) = self.resources.get(name) {
            return Some(value.to_string());
        }
        if let Some(value) = self.overrides.lookup(name) {
            return Some(value);
        }
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        if name == "fulldir" {
            return Some(self.fulldir.to_string());
        }
        if let Some(value) = self.defaults.resources.get(name) {
            return Some(value.to_string());
        }
        if let Some(value) = self.defaults.variables.get(name) {
            return Some(value.clone());
        }
        self.defaults.attributes.lookup(name)
    }
}

/// Renders scripts for one backend and one job
pub struct ScriptRenderer<'a> {
    backend: &'a dyn SchedulerBackend,
    shell: &'a str,
    context: TemplateContext<'a>,
}

impl<'a> ScriptRenderer<'a> {
    pub fn new(backend: &'a dyn SchedulerBackend, shell: &'a str, context: TemplateContext<'a>) -> Self {
        Self {
            backend,
            shell,
            context,
        }
    }

    /// Render `template`. With `primary` the resource header is included.
    pub fn render(&self, template: &str, primary: bool) -> Result<String, RenderError> {
        let mut body = strip_interpreter_line(template);

        let mut lines = vec![format!("#!{}", self.shell)];
        if primary {
            let prefix = self.backend.prefix();
            for option in self.backend.resource_header_lines(self.context.resources)? {
                lines.push(format!("{} {}", prefix, option));
            }
            // The separator absorbs one blank line the body opens with
            lines.push(String::new());
            body = body.strip_prefix('\n').unwrap_or(body);
        }

        let body = self.backend.rewrite_environment_placeholders(body);
        let body = resolve_placeholders(&body, |name| self.context.lookup(name))?;

        let mut rendered = lines.join("\n");
        rendered.push('\n');
        rendered.push_str(&body);
        Ok(rendered)
    }
}

/// Drop a leading `#!` line
fn strip_interpreter_line(template: &str) -> &str {
    if template.starts_with("#!") {
        match template.find('\n') {
            Some(end) => &template[end + 1..],
            None => "",
        }
    } else {
        template
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Substitute `{name}` placeholders; any identifier that does not resolve
/// is an error.
pub fn resolve_placeholders<F>(text: &str, lookup: F) -> Result<String, RenderError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut line = 1;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        if rest.starts_with("{{") {
            out.push('{');
            i += 2;
            prev = Some('{');
            continue;
        }
        if rest.starts_with("}}") {
            out.push('}');
            i += 2;
            prev = Some('}');
            continue;
        }
        let Some(c) = rest.chars().next() else { break };
        if c == '{' && prev != Some('$') {
            if let Some(end) = rest.find('}') {
                let name = &rest[1..end];
                if is_identifier(name) {
                    let value = lookup(name).ok_or_else(|| RenderError::UnresolvedPlaceholder {
                        name: name.to_string(),
                        line,
                    })?;
                    out.push_str(&value);
                    i += end + 1;
                    prev = Some('}');
                    continue;
                }
            }
        }
        if c == '\n' {
            line += 1;
        }
        out.push(c);
        i += c.len_utf8();
        prev = Some(c);
    }
    Ok(out)
}
