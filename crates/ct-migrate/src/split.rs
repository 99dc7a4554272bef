//! Multi-statement splitting for migration files.

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Split `sql` on top-level `;`.
///
/// Semicolons inside quoted strings, backtick identifiers and comments do not
/// split. Fragments that contain only whitespace or comments are dropped.
///
/// ```
/// let parts = ct_migrate::split_statements("CREATE TABLE a (x String DEFAULT ';'); -- done;\nSELECT 1;");
/// assert_eq!(parts, vec!["CREATE TABLE a (x String DEFAULT ';')", "-- done;\nSELECT 1"]);
/// ```
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut state = State::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                ';' => {
                    flush(&mut statements, &mut current, has_code);
                    has_code = false;
                    continue;
                }
                '\'' | '"' | '`' => {
                    state = State::Quoted(c);
                    has_code = true;
                }
                '-' if chars.peek() == Some(&'-') => state = State::LineComment,
                '/' if chars.peek() == Some(&'*') => {
                    current.push(c);
                    if let Some(star) = chars.next() {
                        current.push(star);
                    }
                    state = State::BlockComment;
                    continue;
                }
                c if !c.is_whitespace() => has_code = true,
                _ => {}
            },
            State::Quoted(quote) => {
                if c == '\\' {
                    current.push(c);
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                    continue;
                }
                if c == quote {
                    state = State::Code;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    current.push(c);
                    if let Some(slash) = chars.next() {
                        current.push(slash);
                    }
                    state = State::Code;
                    continue;
                }
            }
        }
        current.push(c);
    }

    flush(&mut statements, &mut current, has_code);
    statements
}

fn flush(statements: &mut Vec<String>, current: &mut String, has_code: bool) {
    let trimmed = current.trim();
    if has_code && !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_statement_without_terminator() {
        assert_eq!(split_statements("SELECT 1"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_multiple_statements() {
        let sql = "CREATE TABLE a (x UInt8) ENGINE = Memory;\n\nCREATE TABLE b (y UInt8) ENGINE = Memory;\n";
        assert_eq!(
            split_statements(sql),
            vec![
                "CREATE TABLE a (x UInt8) ENGINE = Memory",
                "CREATE TABLE b (y UInt8) ENGINE = Memory"
            ]
        );
    }

    #[test]
    fn test_semicolons_in_quotes_and_identifiers() {
        let sql = r#"INSERT INTO `we;ird` VALUES ('a;b', "c;d", 'it\'s;');SELECT 2"#;
        let parts = split_statements(sql);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], r#"INSERT INTO `we;ird` VALUES ('a;b', "c;d", 'it\'s;')"#);
    }

    #[test]
    fn test_comments_do_not_split() {
        let sql = "/* header; still header */ SELECT 1; -- trailing; comment\n";
        assert_eq!(split_statements(sql), vec!["/* header; still header */ SELECT 1"]);
    }

    #[test]
    fn test_comment_only_input_is_empty() {
        assert!(split_statements("-- nothing here;\n/* or here */").is_empty());
        assert!(split_statements("  ;  ; ").is_empty());
    }
}
