use std::collections::HashMap;
use std::fmt::Write as _;

use super::ir::Segment;

/// Casing rule applied to member segments that have no explicit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStyle {
    AsIs,
    Lower,
    Camel,
    Snake,
    Kebab,
}

/// How an `Index` segment renders into the dotted wire path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayIndexing {
    /// `a[0].b`
    Bracket,
    /// `a.0.b`
    Dot,
}

/// Resolves an IR field path to the dotted JSON path CouchDB expects,
/// applying case folding, per-member overrides and array-index rendering.
#[derive(Debug, Clone)]
pub struct PropertyPolicy {
    pub case_style: CaseStyle,
    pub overrides: HashMap<String, String>,
    pub array_indexing: ArrayIndexing,
}

impl Default for PropertyPolicy {
    fn default() -> Self {
        Self {
            case_style: CaseStyle::AsIs,
            overrides: HashMap::new(),
            array_indexing: ArrayIndexing::Bracket,
        }
    }
}

impl PropertyPolicy {
    pub fn new(case_style: CaseStyle, overrides: HashMap<String, String>) -> Self {
        Self {
            case_style,
            overrides,
            array_indexing: ArrayIndexing::Bracket,
        }
    }

    pub fn resolve(&self, path: &[Segment]) -> String {
        let mut out = String::new();
        let mut fq = String::new();
        for (i, seg) in path.iter().enumerate() {
            match seg {
                Segment::Member(name) => {
                    if i > 0 {
                        fq.push('.');
                        out.push('.');
                    }
                    fq.push_str(name);
                    let wire = self
                        .overrides
                        .get(&fq)
                        .cloned()
                        .unwrap_or_else(|| apply_case(name, self.case_style));
                    out.push_str(&wire);
                }
                Segment::Index(idx) => {
                    let _ = write!(fq, "[{idx}]");
                    match self.array_indexing {
                        ArrayIndexing::Bracket => {
                            let _ = write!(out, "[{idx}]");
                        }
                        ArrayIndexing::Dot => {
                            if i > 0 {
                                out.push('.');
                            }
                            let _ = write!(out, "{idx}");
                        }
                    }
                }
            }
        }
        out
    }
}

fn apply_case(member: &str, style: CaseStyle) -> String {
    match style {
        CaseStyle::AsIs => member.to_string(),
        CaseStyle::Lower => member.to_lowercase(),
        CaseStyle::Camel => to_camel(member),
        CaseStyle::Snake => to_separated(member, '_'),
        CaseStyle::Kebab => to_separated(member, '-'),
    }
}

fn words(member: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in member.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn to_camel(member: &str) -> String {
    let parts = words(member);
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            out.push_str(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

fn to_separated(member: &str, sep: char) -> String {
    words(member).join(&sep.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_from_snake() {
        assert_eq!(apply_case("user_name", CaseStyle::Camel), "userName");
    }

    #[test]
    fn snake_case_from_camel() {
        assert_eq!(apply_case("userName", CaseStyle::Snake), "user_name");
    }

    #[test]
    fn resolve_applies_override_on_fully_qualified_member() {
        let mut overrides = HashMap::new();
        overrides.insert("id".to_string(), "_id".to_string());
        let policy = PropertyPolicy::new(CaseStyle::Camel, overrides);
        let path = vec![Segment::Member("id".to_string())];
        assert_eq!(policy.resolve(&path), "_id");
    }

    #[test]
    fn resolve_renders_bracket_array_index() {
        let policy = PropertyPolicy::default();
        let path = vec![
            Segment::Member("friends".to_string()),
            Segment::Index(0),
            Segment::Member("name".to_string()),
        ];
        assert_eq!(policy.resolve(&path), "friends[0].name");
    }

    #[test]
    fn resolve_renders_dot_array_index() {
        let mut policy = PropertyPolicy::default();
        policy.array_indexing = ArrayIndexing::Dot;
        let path = vec![Segment::Member("friends".to_string()), Segment::Index(0)];
        assert_eq!(policy.resolve(&path), "friends.0");
    }
}
