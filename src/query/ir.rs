use serde_json::Value;

/// One segment of a field-access path: a named member, or an array index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Member(String),
    Index(u32),
}

/// JSON value kind, for the `TypeIs` predicate's `$type` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JsonType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnaryOp {
    Not,
}

/// Sort direction for a collapsed `Sort` pipeline term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Pipeline stage operators, per spec.md §3's `Pipeline` node.
///
/// `OrderBy`/`ThenBy`/`OrderByDesc`/`ThenByDesc` are the builder-facing
/// surface; the optimizer collapses a chain of them into a single `Sort`
/// before translation (spec.md §4.B rewrite 7).
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    Where(Box<Expr>),
    OrderBy(Vec<Segment>),
    ThenBy(Vec<Segment>),
    OrderByDesc(Vec<Segment>),
    ThenByDesc(Vec<Segment>),
    Sort(Vec<(Vec<Segment>, SortDirection)>),
    Skip(i64),
    Take(i64),
    Select(Vec<Vec<Segment>>),
    UseBookmark(String),
    UseIndex(Vec<String>),
    WithReadQuorum(i64),
    UpdateIndex(bool),
    FromStable(bool),
}

/// A comparable, immutable constant value carried by `Const` and by the
/// value lists of `In`/`NotIn`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstValue(pub Value);

/// The expression IR: a typed, immutable tree of query nodes captured from
/// user code through `query::builder`.
///
/// Two IRs are semantically equal iff they have identical shape modulo
/// commutativity of `And`/`Or` — see `query::fingerprint` for the canonical
/// hash used as the cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(ConstValue),
    Field(Vec<Segment>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    In(Vec<Segment>, Vec<ConstValue>),
    NotIn(Vec<Segment>, Vec<ConstValue>),
    Exists(Vec<Segment>, bool),
    TypeIs(Vec<Segment>, JsonType),
    RegexMatch(Vec<Segment>, String),
    ElemMatch(Vec<Segment>, Box<Expr>),
    AllMatch(Vec<Segment>, Box<Expr>),
    Pipeline(PipelineOp, Box<Expr>),
    /// The terminal source of a pipeline tree — "all documents".
    Source,
}

impl Expr {
    pub fn field(path: impl Into<FieldPath>) -> Expr {
        Expr::Field(path.into().0)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::Binary(BinaryOp::And, Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Binary(BinaryOp::Or, Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Expr {
        Expr::Unary(UnaryOp::Not, Box::new(self))
    }
}

/// A parsed dotted/bracketed field path, e.g. `age` or `friends[0].name`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath(pub Vec<Segment>);

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        let mut segments = Vec::new();
        for part in s.split('.') {
            if let Some(idx_str) = part
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                if let Ok(idx) = idx_str.parse::<u32>() {
                    segments.push(Segment::Index(idx));
                    continue;
                }
            }
            segments.push(Segment::Member(part.to_string()));
        }
        FieldPath(segments)
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        FieldPath::from(s.as_str())
    }
}
