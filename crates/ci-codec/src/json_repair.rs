//! Fault-tolerant JSON preprocessing for PE bodies emitted by embedded
//! devices that do not produce strictly conforming JSON.
//!
//! The decoder always tries strict `serde_json` parsing first; this module
//! is only invoked on failure, and only to produce a second attempt.

/// Result of a preprocessing pass: the repaired text and whether anything
/// was actually changed.
pub struct Preprocessed {
    pub text: String,
    pub changed: bool,
}

/// Run the full repair pipeline: strip comments, drop trailing commas,
/// normalise quoting, escape stray control bytes inside strings (unless the
/// input looks pretty-printed), and quote bare identifier keys.
pub fn preprocess(input: &str) -> Preprocessed {
    let looks_pretty = looks_pretty_printed(input);

    let mut text = strip_comments(input);
    text = remove_trailing_commas(&text);
    text = single_to_double_quotes(&text);
    if !looks_pretty {
        text = escape_control_bytes_in_strings(&text);
    }
    text = quote_bare_keys(&text);

    let changed = text != input;
    Preprocessed { text, changed }
}

/// Conservative heuristic: input is "already pretty-printed" when it
/// contains at least one newline and at least one line begins with leading
/// whitespace. Undershoots deliberately (see DESIGN.md) rather than risk
/// corrupting structural whitespace.
fn looks_pretty_printed(input: &str) -> bool {
    if !input.contains('\n') {
        return false;
    }
    input
        .lines()
        .any(|line| line.starts_with(' ') || line.starts_with('\t'))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum StrState {
    Normal,
    InDouble,
    InSingle,
}

/// (a) Strip `//` and `/* … */` comments, tracking string-literal
/// boundaries (both quote kinds, since single-quote conversion hasn't run
/// yet) with backslash-aware escaping.
fn strip_comments(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut state = StrState::Normal;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match state {
            StrState::Normal => {
                if c == '"' {
                    state = StrState::InDouble;
                    out.push(c);
                    i += 1;
                } else if c == '\'' {
                    state = StrState::InSingle;
                    out.push(c);
                    i += 1;
                } else if c == '/' && chars.get(i + 1) == Some(&'/') {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                } else if c == '/' && chars.get(i + 1) == Some(&'*') {
                    i += 2;
                    while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                        i += 1;
                    }
                    i = (i + 2).min(chars.len());
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            StrState::InDouble | StrState::InSingle => {
                out.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                let closes = (state == StrState::InDouble && c == '"')
                    || (state == StrState::InSingle && c == '\'');
                if closes {
                    state = StrState::Normal;
                }
                i += 1;
            }
        }
    }
    out
}

/// (b) Remove commas immediately preceding (modulo whitespace) a `]` or `}`.
fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut state = StrState::Normal;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match state {
            StrState::Normal => {
                if c == '"' {
                    state = StrState::InDouble;
                    out.push(c);
                } else if c == '\'' {
                    state = StrState::InSingle;
                    out.push(c);
                } else if c == ',' {
                    let mut j = i + 1;
                    while j < chars.len() && chars[j].is_whitespace() {
                        j += 1;
                    }
                    if j < chars.len() && (chars[j] == ']' || chars[j] == '}') {
                        // drop the comma; keep any whitespace that followed it
                    } else {
                        out.push(c);
                    }
                } else {
                    out.push(c);
                }
                i += 1;
            }
            StrState::InDouble | StrState::InSingle => {
                out.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                let closes = (state == StrState::InDouble && c == '"')
                    || (state == StrState::InSingle && c == '\'');
                if closes {
                    state = StrState::Normal;
                }
                i += 1;
            }
        }
    }
    out
}

/// (c) Convert single-quoted strings to double-quoted, escaping any literal
/// double quotes found inside them.
fn single_to_double_quotes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut state = StrState::Normal;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match state {
            StrState::Normal => {
                if c == '"' {
                    state = StrState::InDouble;
                    out.push(c);
                } else if c == '\'' {
                    state = StrState::InSingle;
                    out.push('"');
                } else {
                    out.push(c);
                }
                i += 1;
            }
            StrState::InDouble => {
                out.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == '"' {
                    state = StrState::Normal;
                }
                i += 1;
            }
            StrState::InSingle => {
                if c == '\\' && i + 1 < chars.len() {
                    out.push(c);
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == '\'' {
                    out.push('"');
                    state = StrState::Normal;
                } else if c == '"' {
                    out.push('\\');
                    out.push('"');
                } else {
                    out.push(c);
                }
                i += 1;
            }
        }
    }
    out
}

/// (d) Escape bare `\t`, `\r`, `\n` control bytes that appear inside
/// (double-quoted) string literals. Only called when the input is judged
/// compact; pretty-printed input is skipped entirely by the caller.
fn escape_control_bytes_in_strings(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            if c == '\\' && i + 1 < chars.len() {
                out.push(c);
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            match c {
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                '\n' => out.push_str("\\n"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
        i += 1;
    }
    out
}

/// (e) Quote bare identifier-shaped object keys, e.g. `{foo: 1}` -> `{"foo": 1}`.
fn quote_bare_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut state = StrState::Normal;
    let mut i = 0;
    // Tracks whether the last significant (non-whitespace) character emitted
    // outside a string was '{' or ',', i.e. we are in key position.
    let mut last_significant: Option<char> = None;
    while i < chars.len() {
        let c = chars[i];
        match state {
            StrState::Normal => {
                if c == '"' {
                    state = StrState::InDouble;
                    out.push(c);
                    last_significant = None;
                    i += 1;
                    continue;
                }
                if c == '\'' {
                    state = StrState::InSingle;
                    out.push(c);
                    last_significant = None;
                    i += 1;
                    continue;
                }
                if (c.is_alphabetic() || c == '_')
                    && matches!(last_significant, Some('{') | Some(','))
                {
                    let start = i;
                    let mut j = i;
                    while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                        j += 1;
                    }
                    let mut k = j;
                    while k < chars.len() && chars[k].is_whitespace() {
                        k += 1;
                    }
                    if k < chars.len() && chars[k] == ':' {
                        let ident: String = chars[start..j].iter().collect();
                        out.push('"');
                        out.push_str(&ident);
                        out.push('"');
                        i = j;
                        continue;
                    }
                }
                out.push(c);
                if !c.is_whitespace() {
                    last_significant = Some(c);
                }
                i += 1;
            }
            StrState::InDouble | StrState::InSingle => {
                out.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                let closes = (state == StrState::InDouble && c == '"')
                    || (state == StrState::InSingle && c == '\'');
                if closes {
                    state = StrState::Normal;
                    last_significant = None;
                }
                i += 1;
            }
        }
    }
    out
}
