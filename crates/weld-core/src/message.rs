//! Message text utilities: prefix stripping and shell-like tokenization.

/// Strips the first matching global command prefix from `text`.
///
/// Prefixes are tried in order; the empty prefix matches everything and can
/// be used to make the prefix optional. Returns the remainder after the
/// prefix, or `None` when no prefix matches.
pub fn strip_prefix<'a>(text: &'a str, prefixes: &[String]) -> Option<&'a str> {
    prefixes.iter().find_map(|p| text.strip_prefix(p.as_str()))
}

/// Shell-like argument splitting.
///
/// Handles:
/// - Whitespace-separated arguments
/// - Quoted strings (single and double quotes)
/// - Backslash escapes within double quotes
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    // A word is "open" once it has consumed any character, so quoted empty
    // strings produce an (empty) argument.
    let mut open = false;
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match (ch, quote) {
            ('\\', Some('"')) => escape_next = true,
            (q @ ('\'' | '"'), None) => {
                quote = Some(q);
                open = true;
            }
            (q, Some(active)) if q == active => quote = None,
            (' ' | '\t', None) => {
                if open {
                    args.push(std::mem::take(&mut current));
                    open = false;
                }
            }
            _ => {
                current.push(ch);
                open = true;
            }
        }
    }

    if open {
        args.push(current);
    }

    args
}
