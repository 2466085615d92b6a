//! Narrow structural model of a source file: function boundaries, docstring
//! presence, and debt-marker comment lines. Deliberately not a compiler AST.

/// Annotation the TODO-completion transform appends to a marker line.
pub const COMPLETION_ANNOTATION: &str = "[recast: completion scheduled]";

/// A `def name(params):`-style function with an indentation-delimited body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionShape {
    pub name: String,
    pub params: Vec<String>,
    /// Zero-based index of the signature line.
    pub signature_line: usize,
    /// Zero-based index of the first body line.
    pub body_start: usize,
    /// Exclusive end of the body (trailing blank lines excluded).
    pub body_end: usize,
    /// Column of the `def` keyword.
    pub indent: usize,
    pub has_docstring: bool,
}

impl FunctionShape {
    pub fn body_len(&self) -> usize {
        self.body_end.saturating_sub(self.body_start)
    }
}

/// A comment line carrying a case-insensitive TODO/FIXME token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerLine {
    /// Zero-based line index.
    pub line: usize,
    pub text: String,
    /// Already carries the completion annotation.
    pub annotated: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceShape {
    pub functions: Vec<FunctionShape>,
    pub markers: Vec<MarkerLine>,
}

impl SourceShape {
    pub fn parse(source: &str) -> SourceShape {
        let lines: Vec<&str> = source.lines().collect();
        let mut functions = Vec::new();
        let mut markers = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            if let Some((name, params, indent)) = parse_signature(line) {
                let (body_start, body_end) = body_range(&lines, index, indent);
                let has_docstring = lines
                    .get(body_start)
                    .map(|first| {
                        let trimmed = first.trim_start();
                        trimmed.starts_with("\"\"\"") || trimmed.starts_with("'''")
                    })
                    .unwrap_or(false)
                    && body_start < body_end;
                functions.push(FunctionShape {
                    name,
                    params,
                    signature_line: index,
                    body_start,
                    body_end,
                    indent,
                    has_docstring,
                });
            }
            if let Some(comment) = comment_text(line) {
                if has_marker_token(comment) {
                    markers.push(MarkerLine {
                        line: index,
                        text: (*line).to_string(),
                        annotated: line.contains(COMPLETION_ANNOTATION),
                    });
                }
            }
        }

        SourceShape { functions, markers }
    }

    pub fn undocumented_function(&self) -> Option<&FunctionShape> {
        self.functions.iter().find(|f| !f.has_docstring)
    }

    pub fn oversized_function(&self, min_body_lines: usize) -> Option<&FunctionShape> {
        self.functions.iter().find(|f| f.body_len() > min_body_lines)
    }

    pub fn unannotated_markers(&self) -> impl Iterator<Item = &MarkerLine> {
        self.markers.iter().filter(|m| !m.annotated)
    }
}

/// Recognize `def name(params):` with an optional trailing comment.
fn parse_signature(line: &str) -> Option<(String, Vec<String>, usize)> {
    let indent = line.len() - line.trim_start().len();
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("def ")?;
    let open = rest.find('(')?;
    let name = rest[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let close = matching_paren(rest, open)?;
    let after = rest[close + 1..].trim_start();
    let after = after.strip_prefix(':')?;
    let after = after.trim_start();
    if !(after.is_empty() || after.starts_with('#')) {
        return None;
    }
    let params = rest[open + 1..close]
        .split(',')
        .map(param_name)
        .filter(|p| !p.is_empty())
        .collect();
    Some((name.to_string(), params, indent))
}

/// Index of the parenthesis closing the one at `open`.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, ch) in text[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip type annotations, defaults, and unpacking stars from a parameter.
fn param_name(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.trim_start_matches('*');
    let end = raw
        .find(|c| c == ':' || c == '=')
        .unwrap_or(raw.len());
    raw[..end].trim().to_string()
}

/// Body = following lines indented deeper than the signature; interior blank
/// lines are part of the body, trailing ones are not.
fn body_range(lines: &[&str], signature_line: usize, indent: usize) -> (usize, usize) {
    let body_start = signature_line + 1;
    let mut body_end = body_start;
    let mut cursor = body_start;
    while cursor < lines.len() {
        let line = lines[cursor];
        if line.trim().is_empty() {
            cursor += 1;
            continue;
        }
        let line_indent = line.len() - line.trim_start().len();
        if line_indent <= indent {
            break;
        }
        cursor += 1;
        body_end = cursor;
    }
    (body_start, body_end)
}

/// The comment portion of a line, for `#` and `//` comment syntaxes.
/// Comment starters inside string literals do not count.
fn comment_text(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        match quote {
            Some(open) => {
                if byte == b'\\' {
                    index += 1;
                } else if byte == open {
                    quote = None;
                }
            }
            None => match byte {
                b'\'' | b'"' => quote = Some(byte),
                b'#' => return Some(&line[index..]),
                b'/' if bytes.get(index + 1) == Some(&b'/') => return Some(&line[index..]),
                _ => {}
            },
        }
        index += 1;
    }
    None
}

fn has_marker_token(comment: &str) -> bool {
    let upper = comment.to_ascii_uppercase();
    for token in ["TODO", "FIXME"] {
        let mut search = upper.as_str();
        let mut offset = 0;
        while let Some(pos) = search.find(token) {
            let start = offset + pos;
            let end = start + token.len();
            let before_ok = start == 0
                || !upper.as_bytes()[start - 1].is_ascii_alphanumeric();
            let after_ok = end >= upper.len()
                || !upper.as_bytes()[end].is_ascii_alphanumeric();
            if before_ok && after_ok {
                return true;
            }
            offset = end;
            search = &upper[offset..];
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_functions_and_docstrings() {
        let source = "def documented(x):\n    \"\"\"Says hi.\"\"\"\n    return x\n\ndef bare(a, b=1, *rest):\n    return a\n";
        let shape = SourceShape::parse(source);
        assert_eq!(shape.functions.len(), 2);
        assert!(shape.functions[0].has_docstring);
        assert!(!shape.functions[1].has_docstring);
        assert_eq!(shape.functions[1].params, vec!["a", "b", "rest"]);
        assert_eq!(shape.undocumented_function().unwrap().name, "bare");
    }

    #[test]
    fn body_excludes_trailing_blank_lines() {
        let source = "def f(x):\n    a = 1\n\n    return a\n\n\nvalue = 2\n";
        let shape = SourceShape::parse(source);
        let f = &shape.functions[0];
        assert_eq!(f.body_start, 1);
        assert_eq!(f.body_end, 4);
        assert_eq!(f.body_len(), 3);
    }

    #[test]
    fn finds_todo_and_fixme_markers_case_insensitively() {
        let source = "x = 1  # todo fix this\n# FIXME: broken\n// TODO port\nuntodo = 1\n";
        let shape = SourceShape::parse(source);
        assert_eq!(shape.markers.len(), 3);
        assert!(shape.markers.iter().all(|m| !m.annotated));
    }

    #[test]
    fn annotated_markers_are_flagged() {
        let source = format!("# TODO later  {COMPLETION_ANNOTATION}\n");
        let shape = SourceShape::parse(&source);
        assert_eq!(shape.markers.len(), 1);
        assert!(shape.markers[0].annotated);
        assert_eq!(shape.unannotated_markers().count(), 0);
    }

    #[test]
    fn marker_tokens_inside_string_literals_are_not_markers() {
        let source = concat!(
            "message = \"# TODO not a comment\"\n",
            "url = 'https://example.com/todo'\n",
            "label = \"done\"  # TODO real marker\n",
        );
        let shape = SourceShape::parse(source);
        assert_eq!(shape.markers.len(), 1);
        assert_eq!(shape.markers[0].line, 2);
    }

    #[test]
    fn marker_token_must_stand_alone() {
        assert!(!has_marker_token("# mastodon"));
        assert!(!has_marker_token("# untodoable"));
        assert!(has_marker_token("# TODO(owner): later"));
    }
}
