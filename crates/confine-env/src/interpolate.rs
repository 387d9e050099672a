//! `$NAME` substitution in argument vectors
//!
//! - `${NAME}` is replaced inline, by the empty string when unset.
//! - An argument that is exactly `$NAME` is replaced by the value split on
//!   whitespace; it disappears when the variable is unset or blank.
//! - `$$` stands for a literal `$`.

use crate::environment::Environment;

/// Expand variable references in every argument.
pub fn expand_argv(argv: &[String], env: &Environment) -> Vec<String> {
    let mut out = Vec::with_capacity(argv.len());

    for arg in argv {
        if let Some(name) = whole_word_reference(arg) {
            if let Some(value) = env.get(name) {
                out.extend(value.split_whitespace().map(str::to_string));
            }
            continue;
        }
        out.push(expand_inline(arg, env));
    }

    out
}

fn whole_word_reference(arg: &str) -> Option<&str> {
    let name = arg.strip_prefix('$')?;
    (!name.is_empty() && name.chars().all(is_name_char)).then_some(name)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn expand_inline(arg: &str, env: &Environment) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];

        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(braced) = tail.strip_prefix('{')
            && let Some(end) = braced.find('}')
        {
            out.push_str(env.get(&braced[..end]).unwrap_or(""));
            rest = &braced[end + 1..];
        } else {
            out.push('$');
            rest = tail;
        }
    }

    out.push_str(rest);
    out
}
