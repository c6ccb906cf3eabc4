use crate::error::{Result, fmt_error};

/// What a validated name is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameKind {
    Table,
    Column,
}

impl NameKind {
    fn descr(self) -> &'static str {
        match self {
            NameKind::Table => "table",
            NameKind::Column => "column",
        }
    }
}

/// Checks a table, symbol or column name before it is written.
pub(crate) fn validate_name(name: &str, kind: NameKind, max_len: usize) -> Result<()> {
    let descr = kind.descr();
    if name.is_empty() {
        return Err(fmt_error!(InvalidName, "{descr} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(fmt_error!(
            InvalidName,
            "{descr} name is too long: [name = {name}, maxNameLength={max_len}]"
        ));
    }

    let chars: Vec<char> = name.chars().collect();
    for (index, &c) in chars.iter().enumerate() {
        let illegal = match c {
            '.' => match kind {
                NameKind::Column => true,
                NameKind::Table => {
                    index == 0 || index == chars.len() - 1 || chars[index - 1] == '.'
                }
            },
            '-' => kind == NameKind::Column,
            _ => is_reserved(c),
        };
        if illegal {
            return Err(fmt_error!(
                InvalidName,
                "{descr} name contains an illegal char at position {index}: {c:?} [name = {name:?}]"
            ));
        }
    }
    Ok(())
}

fn is_reserved(c: char) -> bool {
    matches!(
        c,
        '?' | ',' | '\'' | '"' | '\\' | '/' | ':' | ')' | '(' | '+' | '*' | '%' | '~'
            | '\u{0}'..='\u{1f}'
            | '\u{7f}'
            | '\u{feff}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["trades", "my table", "x.y", "cpu_load", "Ünïcode"] {
            validate_name(name, NameKind::Table, 127).unwrap();
        }
        for name in ["price", "my int field", "Ünïcode"] {
            validate_name(name, NameKind::Column, 127).unwrap();
        }
    }

    #[test]
    fn rejects_reserved_chars() {
        for name in ["a?b", "a,b", "a/b", "a\nb", "a\rb", "a\"b", "a\u{feff}", "a~", "a\u{7f}"] {
            let err = validate_name(name, NameKind::Table, 127).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidName);
            assert!(err.msg().contains("name contains an illegal char"), "{name:?}");
        }
    }

    #[test]
    fn rejects_control_chars() {
        for c in ['\u{1}', '\u{f}', '\u{10}', '\u{1b}', '\u{1f}'] {
            let name = format!("a{c}b");
            assert!(validate_name(&name, NameKind::Table, 127).is_err(), "{c:?}");
            assert!(validate_name(&name, NameKind::Column, 127).is_err(), "{c:?}");
        }
        validate_name("a\u{20}b", NameKind::Column, 127).unwrap();
    }

    #[test]
    fn dot_rules_differ_by_kind() {
        validate_name("file.csv", NameKind::Table, 127).unwrap();
        for name in [".hidden", "trailing.", "double..dot"] {
            assert!(validate_name(name, NameKind::Table, 127).is_err(), "{name}");
        }
        assert!(validate_name("a.b", NameKind::Column, 127).is_err());
    }

    #[test]
    fn dash_is_only_allowed_in_table_names() {
        validate_name("my-table", NameKind::Table, 127).unwrap();
        assert!(validate_name("my-column", NameKind::Column, 127).is_err());
    }

    #[test]
    fn rejects_empty_and_long_names() {
        let err = validate_name("", NameKind::Column, 127).unwrap_err();
        assert_eq!(err.msg(), "column name cannot be empty");

        let err = validate_name("abcdef", NameKind::Table, 4).unwrap_err();
        assert_eq!(
            err.msg(),
            "table name is too long: [name = abcdef, maxNameLength=4]"
        );
    }
}
