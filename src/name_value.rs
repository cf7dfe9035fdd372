//! Name-value argument lists.
//!
//! Function arguments and request options are written as comma separated `name=value` pairs or
//! bare keywords, e.g. `shot=12345, /verbose, units='m'`.

use crate::error::ParseError;

use serde::{Deserialize, Serialize};

/// A single name-value argument.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NameValue {
    /// The original text of the pair
    pub pair: String,
    pub name: String,
    pub value: String,
}

impl NameValue {
    /// Returns whether the argument was given as a bare keyword.
    pub fn is_keyword(&self) -> bool {
        assignments(&self.pair).is_empty()
    }
}

/// Byte offsets of the `=` signs in `token` that are not inside quotes, brackets or parentheses.
fn assignments(token: &str) -> Vec<usize> {
    let mut found = vec![];
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    for (i, c) in token.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth -= 1,
            (None, '=') if depth == 0 => found.push(i),
            _ => {}
        }
    }
    found
}

/// Split `text` on commas that are not inside quotes, brackets or parentheses.
fn split_items(text: &str) -> Vec<&str> {
    let mut items = vec![];
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth -= 1,
            (None, ',') if depth == 0 => {
                items.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&text[start..]);
    items
}

/// Remove one level of surrounding quotes.
fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|text| text.strip_suffix(quote))
        {
            return inner;
        }
    }
    text
}

/// Parse a single `name=value`, `name` or `/name` token.
fn parse_token(token: &str, strip: bool) -> Result<NameValue, ParseError> {
    let (name, value) = match assignments(token).as_slice() {
        [] => (token.strip_prefix('/').unwrap_or(token), "true"),
        [i] => (token[..*i].trim(), token[i + 1..].trim()),
        _ => return Err(ParseError::InvalidToken(token.to_string())),
    };
    if name.is_empty() {
        return Err(ParseError::InvalidToken(token.to_string()));
    }
    let value = if strip { strip_quotes(value) } else { value };
    Ok(NameValue {
        pair: token.to_string(),
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Parse a comma separated list of name-value arguments.
///
/// Bare keywords, with or without a leading `/`, take the value `true`. When `strip` is set,
/// surrounding single or double quotes are removed from values.
pub fn parse_name_values(text: &str, strip: bool) -> Result<Vec<NameValue>, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(vec![]);
    }
    if text.starts_with('=') || text.ends_with('=') {
        return Err(ParseError::NameValueSyntax(text.to_string()));
    }
    split_items(text)
        .into_iter()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| parse_token(token, strip))
        .collect()
}

/// Replace `$` placeholders in argument values with values taken from the pass text.
///
/// The pass text is itself a name-value list. `$` takes the next positional value, `$N` the
/// N-th value (counting from 1) and `$name` the value named `name`.
pub fn substitute_placeholders(
    name_values: &mut [NameValue],
    tpass: &str,
) -> Result<(), ParseError> {
    if !name_values.iter().any(|nv| nv.value.starts_with('$')) {
        return Ok(());
    }
    let substitutes = parse_name_values(tpass, true)?;
    let positional: Vec<&str> = substitutes
        .iter()
        .map(|nv| {
            if nv.is_keyword() {
                nv.name.as_str()
            } else {
                nv.value.as_str()
            }
        })
        .collect();
    let mut next = 0;
    for nv in name_values.iter_mut() {
        let Some(placeholder) = nv.value.strip_prefix('$') else {
            continue;
        };
        let substitute = if placeholder.is_empty() {
            next += 1;
            positional.get(next - 1).copied()
        } else if let Ok(index) = placeholder.parse::<usize>() {
            index.checked_sub(1).and_then(|i| positional.get(i).copied())
        } else {
            substitutes
                .iter()
                .find(|s| !s.is_keyword() && s.name.eq_ignore_ascii_case(placeholder))
                .map(|s| s.value.as_str())
        };
        match substitute {
            Some(value) => nv.value = value.to_string(),
            None => return Err(ParseError::UnmatchedPlaceholder(nv.value.clone())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(name_values: &[NameValue]) -> Vec<(&str, &str)> {
        name_values
            .iter()
            .map(|nv| (nv.name.as_str(), nv.value.as_str()))
            .collect()
    }

    #[test]
    fn parse_empty() {
        assert_eq!(Vec::<NameValue>::new(), parse_name_values("  ", false).unwrap());
    }

    #[test]
    fn parse_pairs_and_keywords() {
        let name_values = parse_name_values(" shot = 12345, /verbose, debug ", false).unwrap();
        assert_eq!(
            vec![("shot", "12345"), ("verbose", "true"), ("debug", "true")],
            pairs(&name_values)
        );
        assert!(name_values[1].is_keyword());
        assert!(!name_values[0].is_keyword());
    }

    #[test]
    fn parse_strip_quotes() {
        let name_values = parse_name_values(r#"units='m', label="a, b""#, true).unwrap();
        assert_eq!(vec![("units", "m"), ("label", "a, b")], pairs(&name_values));
        let name_values = parse_name_values("units='m'", false).unwrap();
        assert_eq!(vec![("units", "'m'")], pairs(&name_values));
    }

    #[test]
    fn parse_brackets_not_split() {
        let name_values = parse_name_values(r#""efm::ip", [0:10, *], reform"#, true).unwrap();
        assert_eq!(3, name_values.len());
        assert_eq!("[0:10, *]", name_values[1].name);
    }

    #[test]
    fn parse_comparisons_not_split() {
        let name_values =
            parse_name_values(r#""efm::ip", [>=1.0e5], [~=2], label='a=b'"#, true).unwrap();
        assert_eq!(
            vec![
                ("\"efm::ip\"", "true"),
                ("[>=1.0e5]", "true"),
                ("[~=2]", "true"),
                ("label", "a=b")
            ],
            pairs(&name_values)
        );
        assert!(name_values[1].is_keyword());
        assert!(name_values[2].is_keyword());
        assert!(!name_values[3].is_keyword());

        let name_values = parse_name_values("function=minimum(axis=1)", false).unwrap();
        assert_eq!(vec![("function", "minimum(axis=1)")], pairs(&name_values));
    }

    #[test]
    fn parse_too_many_equals() {
        assert_eq!(
            Err(ParseError::InvalidToken("a=b=c".to_string())),
            parse_name_values("a=b=c", false)
        );
    }

    #[test]
    fn parse_leading_or_trailing_equals() {
        assert_eq!(
            Err(ParseError::NameValueSyntax("=a".to_string())),
            parse_name_values("=a", false)
        );
        assert_eq!(
            Err(ParseError::NameValueSyntax("a=".to_string())),
            parse_name_values("a=", false)
        );
    }

    #[test]
    fn substitute_positional_numbered_and_named() {
        let mut name_values = parse_name_values("a=$, b=$, c=$1, d=$run", false).unwrap();
        substitute_placeholders(&mut name_values, "x, y, run=7").unwrap();
        assert_eq!(
            vec![("a", "x"), ("b", "y"), ("c", "x"), ("d", "7")],
            pairs(&name_values)
        );
    }

    #[test]
    fn substitute_unmatched() {
        let mut name_values = parse_name_values("a=$3", false).unwrap();
        assert_eq!(
            Err(ParseError::UnmatchedPlaceholder("$3".to_string())),
            substitute_placeholders(&mut name_values, "x")
        );
    }

    #[test]
    fn substitute_nothing_to_do() {
        let mut name_values = parse_name_values("a=1", false).unwrap();
        substitute_placeholders(&mut name_values, "=invalid").unwrap();
        assert_eq!(vec![("a", "1")], pairs(&name_values));
    }
}
