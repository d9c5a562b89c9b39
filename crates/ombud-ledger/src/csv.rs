//! Minimal RFC-4180-style row parsing and writing for the ledger file.
//!
//! Fields containing commas, quotes, or newlines are quoted; embedded
//! quotes are doubled. Record separators are plain `\n` (a trailing `\r`
//! from CRLF files is stripped by the caller's line iteration).

/// Split one line into fields, honoring quoted sections.
pub(crate) fn parse_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    fields.push(field);
    fields
}

/// Render fields as one CSV line (no trailing newline).
pub(crate) fn write_row(fields: &[&str]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields() {
        assert_eq!(parse_row("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(write_row(&["a", "b", "c"]), "a,b,c");
    }

    #[test]
    fn empty_fields_preserved() {
        assert_eq!(parse_row("C1,,456,"), vec!["C1", "", "456", ""]);
        assert_eq!(write_row(&["C1", "", "456", ""]), "C1,,456,");
    }

    #[test]
    fn quoted_comma() {
        assert_eq!(
            parse_row(r#"C1,789,456,"Patel, Asha""#),
            vec!["C1", "789", "456", "Patel, Asha"]
        );
        assert_eq!(
            write_row(&["C1", "789", "456", "Patel, Asha"]),
            r#"C1,789,456,"Patel, Asha""#
        );
    }

    #[test]
    fn doubled_quotes() {
        assert_eq!(parse_row(r#""say ""hi""",x"#), vec![r#"say "hi""#, "x"]);
        assert_eq!(write_row(&[r#"say "hi""#, "x"]), r#""say ""hi""",x"#);
    }

    #[test]
    fn round_trip_arbitrary_fields() {
        let fields = ["C9", "12", "34", "Name, with \"quotes\""];
        let line = write_row(&fields);
        assert_eq!(parse_row(&line), fields);
    }

    #[test]
    fn single_column_row() {
        assert_eq!(parse_row("C1"), vec!["C1"]);
    }
}
