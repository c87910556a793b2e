// Placeholder Lexer
// Splits template strings into literal text, ${static} and ?{dynamic} placeholders

/// Separator between a dynamic key and the scope it redirects to
pub const REDIRECT: &str = "->";

/// One piece of a template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text
    Text(String),
    /// `${key}`: value looked up in the configuration
    Static(String),
    /// `?{key}` or `?{key->scope}`: value found in the filesystem
    Dynamic(DynamicRef),
}

/// Target of a dynamic placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRef {
    /// Key whose pattern is searched for
    pub key: String,
    /// Scope that replaces the current value as search context
    pub scope: Option<String>,
}

impl DynamicRef {
    fn parse(inner: &str) -> Self {
        match inner.split_once(REDIRECT) {
            Some((key, scope)) => Self {
                key: key.to_string(),
                scope: Some(scope.to_string()),
            },
            None => Self {
                key: inner.to_string(),
                scope: None,
            },
        }
    }
}

/// Key of the leftmost closed `${key}` placeholder, if any.
///
/// Only static markers are considered, so a static placeholder nested in a
/// dynamic one (`?{${KEY}}`) is found before the dynamic one closes.
pub fn first_static(input: &str) -> Option<&str> {
    let start = input.find("${")? + 2;
    let end = input[start..].find('}')? + start;
    Some(&input[start..end])
}

/// Extract all segments from a template string.
///
/// A placeholder runs from its opening `${` or `?{` to the first `}`.
/// An opening marker with no closing brace is kept as literal text.
pub fn extract_placeholders(input: &str) -> Vec<Segment> {
    let mut results = Vec::new();
    let mut current_pos = 0;
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut text = String::new();

    while current_pos < len {
        let opens = current_pos + 1 < len
            && (chars[current_pos] == '$' || chars[current_pos] == '?')
            && chars[current_pos + 1] == '{';

        if opens {
            if let Some(end) = find_closing(&chars, current_pos + 2) {
                if !text.is_empty() {
                    results.push(Segment::Text(std::mem::take(&mut text)));
                }

                let inner: String = chars[current_pos + 2..end].iter().collect();
                if chars[current_pos] == '$' {
                    results.push(Segment::Static(inner));
                } else {
                    results.push(Segment::Dynamic(DynamicRef::parse(&inner)));
                }
                current_pos = end + 1;
                continue;
            }
        }

        text.push(chars[current_pos]);
        current_pos += 1;
    }

    if !text.is_empty() {
        results.push(Segment::Text(text));
    }

    results
}

fn find_closing(chars: &[char], start: usize) -> Option<usize> {
    chars[start..]
        .iter()
        .position(|&c| c == '}')
        .map(|offset| start + offset)
}
