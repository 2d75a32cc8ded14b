//! Environment variable interpolation for config files.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}` substitutes the variable, erroring if unset
//! - `${VAR:-default}` uses the default when VAR is unset or empty
//! - `${VAR-default}` uses the default only when VAR is unset
//! - `$$` escapes a literal `$`
//!
//! Errors accumulate instead of failing fast, so one run reports every
//! problem in the document at once. A token that fails to resolve is left
//! verbatim in the output, which keeps the surrounding YAML inspectable.

use std::env;

/// Result of interpolating a config document.
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What to do when a variable is unset (or empty, for the `:-` form).
#[derive(Debug, Clone, Copy)]
enum Fallback<'a> {
    /// No default: an unset variable is an error.
    Required,
    /// `${VAR-default}`: default only when the variable is unset.
    IfUnset(&'a str),
    /// `${VAR:-default}`: default when the variable is unset or empty.
    IfUnsetOrEmpty(&'a str),
}

/// Interpolate environment variables in `input`.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut text = String::with_capacity(input.len());
    let mut errors = Vec::new();

    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        text.push_str(&rest[..pos]);
        let token = &rest[pos..];
        let consumed = expand_token(token, &mut text, &mut errors);
        rest = &token[consumed..];
    }
    text.push_str(rest);

    InterpolationResult { text, errors }
}

/// Expand the `$`-token at the start of `token` into `out`.
/// Returns how many bytes of `token` were consumed.
fn expand_token(token: &str, out: &mut String, errors: &mut Vec<String>) -> usize {
    let after_dollar = &token[1..];

    // `$$` escape.
    if after_dollar.starts_with('$') {
        out.push('$');
        return 2;
    }

    // `${NAME}` / `${NAME:-default}` / `${NAME-default}`.
    if let Some(body_and_rest) = after_dollar.strip_prefix('{') {
        let Some(close) = body_and_rest.find('}') else {
            errors.push("unterminated '${' expression in config".to_owned());
            out.push_str(token);
            return token.len();
        };
        let consumed = 2 + close + 1; // "${" + body + "}"
        let raw = &token[..consumed];
        match split_braced(&body_and_rest[..close]) {
            Some((name, fallback)) => resolve(name, fallback, raw, out, errors),
            None => {
                errors.push(format!("malformed interpolation '{raw}'"));
                out.push_str(raw);
            }
        }
        return consumed;
    }

    // Bare `$NAME`.
    let len = name_len(after_dollar);
    if len == 0 {
        // A lone `$` (e.g. "cost: $5") is not an interpolation.
        out.push('$');
        return 1;
    }
    let raw = &token[..1 + len];
    resolve(&after_dollar[..len], Fallback::Required, raw, out, errors);
    1 + len
}

/// Split a braced body into the variable name and its fallback mode.
/// Returns `None` when the body is not a valid expression.
fn split_braced(body: &str) -> Option<(&str, Fallback<'_>)> {
    let len = name_len(body);
    if len == 0 {
        return None;
    }
    let (name, tail) = body.split_at(len);
    if tail.is_empty() {
        Some((name, Fallback::Required))
    } else if let Some(default) = tail.strip_prefix(":-") {
        Some((name, Fallback::IfUnsetOrEmpty(default)))
    } else if let Some(default) = tail.strip_prefix('-') {
        Some((name, Fallback::IfUnset(default)))
    } else {
        None
    }
}

/// Length of the leading variable name: `[A-Za-z_]` then `[A-Za-z0-9_]*`.
fn name_len(s: &str) -> usize {
    let mut len = 0;
    for b in s.bytes() {
        let valid = b == b'_'
            || b.is_ascii_alphabetic()
            || (len > 0 && b.is_ascii_digit());
        if !valid {
            break;
        }
        len += 1;
    }
    len
}

/// Look `name` up in the environment and write the substitution (or the
/// raw token, on failure) into `out`.
fn resolve(
    name: &str,
    fallback: Fallback<'_>,
    raw: &str,
    out: &mut String,
    errors: &mut Vec<String>,
) {
    match env::var(name) {
        Ok(value) => {
            // A value spanning lines could smuggle extra YAML keys into
            // the document.
            if value.contains('\n') || value.contains('\r') {
                errors.push(format!(
                    "value of environment variable '{name}' spans multiple lines"
                ));
                out.push_str(raw);
                return;
            }
            if value.is_empty() {
                if let Fallback::IfUnsetOrEmpty(default) = fallback {
                    out.push_str(default);
                    return;
                }
            }
            out.push_str(&value);
        }
        Err(_) => match fallback {
            Fallback::IfUnset(default) | Fallback::IfUnsetOrEmpty(default) => {
                out.push_str(default);
            }
            Fallback::Required => {
                errors.push(format!(
                    "config references unset environment variable '{name}'"
                ));
                out.push_str(raw);
            }
        },
    }
}
