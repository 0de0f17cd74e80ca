/// Split free-form input on whitespace and single-quote every token so the
/// result can be spliced into a `sh -c` command line without breaking out of
/// the quoting. Embedded single quotes become `'\''`.
pub fn quote_tokens(input: &str) -> Vec<String> {
    input.split_whitespace().map(quote).collect()
}

/// Single-quote one token for a POSIX shell.
pub fn quote(token: &str) -> String {
    let mut out = String::with_capacity(token.len() + 2);
    out.push('\'');
    for c in token.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Space-joined form of [`quote_tokens`], ready for a command line.
pub fn escape(input: &str) -> String {
    quote_tokens(input).join(" ")
}
