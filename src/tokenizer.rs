//! Quote-aware splitting of delimited TQL output lines.
//!
//! TQL separates columns with a single character (a pipe by default) and
//! wraps values containing that character in double quotes. Splitting follows
//! POSIX shell quoting, except that the field separator is the delimiter and
//! consecutive delimiters yield empty fields instead of collapsing.

/// Split `line` into fields on `delimiter`.
///
/// - `"a|b"|c` → `["a|b", "c"]`
/// - `a||b` → `["a", "", "b"]`, `a|` → `["a", ""]`
/// - outside quotes `\x` is `x`; inside quotes only `\"` and `\\` are escapes
/// - an unbalanced quote or dangling backslash never fails: whatever remains
///   becomes part of the trailing field
/// - an empty line has no fields
pub fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    if line.is_empty() {
        return Vec::new();
    }

    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => in_quotes = false,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => field.push(next),
                    Some(other) => {
                        field.push('\\');
                        field.push(other);
                    }
                    None => field.push('\\'),
                },
                _ => field.push(c),
            }
        } else if c == delimiter {
            fields.push(std::mem::take(&mut field));
        } else {
            match c {
                '"' => in_quotes = true,
                '\\' => match chars.next() {
                    Some(next) => field.push(next),
                    None => field.push('\\'),
                },
                _ => field.push(c),
            }
        }
    }

    fields.push(field);
    fields
}

/// Join fields with `delimiter`, quoting where `split_fields` needs it to
/// reproduce the same values.
pub fn join_fields<S: AsRef<str>>(fields: &[S], delimiter: char) -> String {
    let only_field = fields.len() == 1;
    let mut line = String::new();

    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(delimiter);
        }
        let field = field.as_ref();
        let needs_quotes = field.contains(delimiter)
            || field.contains('"')
            || field.contains('\\')
            || (only_field && field.is_empty());

        if needs_quotes {
            line.push('"');
            for c in field.chars() {
                if c == '"' || c == '\\' {
                    line.push('\\');
                }
                line.push(c);
            }
            line.push('"');
        } else {
            line.push_str(field);
        }
    }

    line
}
