use crate::config::RouterOptions;
use crate::error::BuildError;
use regex::Regex;
use std::borrow::Cow;

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Variable { name: String, constraint: Option<Regex> },
    /// Trailing catch-all, bound under its name (`*` when anonymous).
    Glob(String),
}

/// A compiled path pattern.
///
/// Supported syntax, per segment: literals, `:name`, `{name}`, `{name:regex}`, and a trailing
/// `*` or `*name` matching the rest of the path.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    segments: Vec<Segment>,
    options: RouterOptions,
}

impl PathPattern {
    pub fn compile(pattern: &str, options: RouterOptions) -> Result<Self, BuildError> {
        if !pattern.starts_with('/') {
            return Err(BuildError::invalid_pattern(pattern, "must start with '/'"));
        }

        let raw_segments = split(pattern);
        let mut segments = Vec::with_capacity(raw_segments.len());
        for (index, raw) in raw_segments.iter().enumerate() {
            let segment = compile_segment(pattern, raw)?;
            if matches!(segment, Segment::Glob(_)) && index + 1 != raw_segments.len() {
                return Err(BuildError::invalid_pattern(pattern, "a glob must be the last segment"));
            }
            segments.push(segment);
        }

        Ok(Self { pattern: pattern.to_string(), segments, options })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern ends with a catch-all segment.
    pub fn has_glob(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Glob(_)))
    }

    /// Matches a request path, returning the percent-decoded variables.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let path = match path {
            "/" => path,
            _ if self.options.ignore_trailing_slash => path.strip_suffix('/').unwrap_or(path),
            _ => path,
        };
        let parts = split(path);
        let mut variables = Vec::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Glob(name) => {
                    let rest = parts.get(index..).unwrap_or_default().join("/");
                    variables.push((name.clone(), decode(&rest).into_owned()));
                    return Some(variables);
                }
                Segment::Literal(literal) => {
                    let part = parts.get(index)?;
                    let same = if self.options.ignore_case { literal.eq_ignore_ascii_case(part) } else { literal == part };
                    if !same {
                        return None;
                    }
                }
                Segment::Variable { name, constraint } => {
                    let part = parts.get(index).filter(|part| !part.is_empty())?;
                    let value = decode(part);
                    if constraint.as_ref().is_some_and(|regex| !regex.is_match(&value)) {
                        return None;
                    }
                    variables.push((name.clone(), value.into_owned()));
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(variables)
    }
}

fn split(path: &str) -> Vec<&str> {
    match path.strip_prefix('/').unwrap_or(path) {
        "" => Vec::new(),
        rest => rest.split('/').collect(),
    }
}

fn decode(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

fn compile_segment(pattern: &str, raw: &str) -> Result<Segment, BuildError> {
    if let Some(name) = raw.strip_prefix('*') {
        let name = if name.is_empty() { "*" } else { name };
        return Ok(Segment::Glob(name.to_string()));
    }

    if let Some(name) = raw.strip_prefix(':') {
        if name.is_empty() {
            return Err(BuildError::invalid_pattern(pattern, "empty variable name"));
        }
        return Ok(Segment::Variable { name: name.to_string(), constraint: None });
    }

    if let Some(inner) = raw.strip_prefix('{') {
        let inner = inner.strip_suffix('}').ok_or_else(|| BuildError::invalid_pattern(pattern, format!("unclosed '{{' in {raw}")))?;
        let (name, constraint) = match inner.split_once(':') {
            Some((name, regex)) => {
                let regex = Regex::new(&format!("^(?:{regex})$"))
                    .map_err(|e| BuildError::invalid_pattern(pattern, format!("invalid regex for {name}: {e}")))?;
                (name, Some(regex))
            }
            None => (inner, None),
        };
        if name.is_empty() {
            return Err(BuildError::invalid_pattern(pattern, "empty variable name"));
        }
        return Ok(Segment::Variable { name: name.to_string(), constraint });
    }

    if raw.contains(['{', '}']) {
        return Err(BuildError::invalid_pattern(pattern, format!("unexpected brace in {raw}")));
    }
    Ok(Segment::Literal(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(pattern: &str) -> PathPattern {
        PathPattern::compile(pattern, RouterOptions::default()).unwrap()
    }

    fn vars(pairs: &[(&str, &str)]) -> Option<Vec<(String, String)>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn test_literal() {
        let pattern = compile("/users/list");
        assert_eq!(pattern.matches("/users/list"), vars(&[]));
        assert_eq!(pattern.matches("/users"), None);
        assert_eq!(pattern.matches("/users/list/"), None);
        assert_eq!(pattern.matches("/Users/list"), None);
    }

    #[test]
    fn test_root() {
        let pattern = compile("/");
        assert_eq!(pattern.matches("/"), vars(&[]));
        assert_eq!(pattern.matches("/a"), None);
    }

    #[test]
    fn test_variables() {
        assert_eq!(compile("/users/:id").matches("/users/42"), vars(&[("id", "42")]));
        assert_eq!(compile("/users/{id}/posts").matches("/users/a%20b/posts"), vars(&[("id", "a b")]));
        assert_eq!(compile("/users/{id}").matches("/users/"), None);
    }

    #[test]
    fn test_regex_constraint() {
        let pattern = compile("/items/{id:[0-9]+}");
        assert_eq!(pattern.matches("/items/12"), vars(&[("id", "12")]));
        assert_eq!(pattern.matches("/items/12a"), None);
    }

    #[test]
    fn test_globs() {
        let anonymous = compile("/assets/*");
        assert!(anonymous.has_glob());
        assert_eq!(anonymous.matches("/assets/js/app.js"), vars(&[("*", "js/app.js")]));
        assert_eq!(anonymous.matches("/assets"), vars(&[("*", "")]));
        assert_eq!(anonymous.matches("/other/app.js"), None);

        assert_eq!(compile("/files/*path").matches("/files/a/b"), vars(&[("path", "a/b")]));
        assert!(!compile("/files/:name").has_glob());
    }

    #[test]
    fn test_options() {
        let options = RouterOptions { ignore_case: true, ignore_trailing_slash: true };
        let pattern = PathPattern::compile("/Users/:id", options).unwrap();
        assert_eq!(pattern.matches("/users/7/"), vars(&[("id", "7")]));
    }

    #[test]
    fn test_invalid_patterns() {
        for pattern in ["users", "/a/*/b", "/{id", "/:", "/{:x}", "/{id:[}", "/a{b}"] {
            assert!(
                matches!(PathPattern::compile(pattern, RouterOptions::default()), Err(BuildError::InvalidPattern { .. })),
                "{pattern} should be rejected"
            );
        }
    }
}
