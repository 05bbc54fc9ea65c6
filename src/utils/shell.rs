//! Shell quoting utilities.
//!
//! The wrapped command is a single string handed to a shell, so every
//! embedded value flows through [`quote`]. Nothing else in the crate is
//! allowed to concatenate untrusted strings into shell syntax.

/// A token destined for the final shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellToken {
    /// An ordinary argument, quoted as needed.
    Literal(String),
    /// A shell operator (`--`, `&&`, `;`, ...) emitted verbatim so it keeps
    /// its syntactic role.
    Operator(&'static str),
}

impl ShellToken {
    pub fn lit(s: impl Into<String>) -> Self {
        ShellToken::Literal(s.into())
    }
}

/// Characters that force some form of quoting when present in a literal.
fn is_shell_meta(c: char) -> bool {
    matches!(
        c,
        '|' | '&'
            | ';'
            | '('
            | ')'
            | '<'
            | '>'
            | '`'
            | '$'
            | '*'
            | '?'
            | '['
            | ']'
            | '#'
            | '{'
            | '}'
            | '!'
    )
}

/// Quote a single literal for inclusion in a shell command string.
///
/// Empty tokens become `''`. Tokens with whitespace, `"` or `\` but no
/// single quote use single quoting. Tokens containing `'` use double
/// quoting with `"` `\` `$` `` ` `` `!` backslash-escaped. Anything else
/// with metacharacters gets per-character backslash escaping.
pub fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    let has_single = s.contains('\'');
    let needs_strong = s.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\');

    if needs_strong && !has_single {
        return format!("'{s}'");
    }

    if has_single {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('"');
        for c in s.chars() {
            if matches!(c, '"' | '\\' | '$' | '`' | '!') {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
        return out;
    }

    if s.chars().any(is_shell_meta) {
        let mut out = String::with_capacity(s.len() * 2);
        for c in s.chars() {
            if is_shell_meta(c) {
                out.push('\\');
            }
            out.push(c);
        }
        return out;
    }

    s.to_string()
}

/// Join tokens into a shell-interpretable string.
pub fn join_tokens<'a, I>(tokens: I) -> String
where
    I: IntoIterator<Item = &'a ShellToken>,
{
    tokens
        .into_iter()
        .map(|t| match t {
            ShellToken::Literal(s) => quote(s),
            ShellToken::Operator(op) => (*op).to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote and join plain strings (every element treated as a literal).
pub fn join_args<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|s| quote(s.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
