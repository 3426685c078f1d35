use serde::Serialize;
use serde_json::Value;

use super::ir::{
    BinaryOp, ConstValue, Expr, FieldPath, JsonType, PipelineOp, Segment,
};

/// A field reference, the entry point into the predicate builder DSL:
/// `Field::new("age").ge(18).and(Field::new("active").eq(true))`.
#[derive(Debug, Clone)]
pub struct Field(Vec<Segment>);

impl Field {
    pub fn new(path: impl Into<FieldPath>) -> Self {
        Field(path.into().0)
    }

    fn expr(&self) -> Expr {
        Expr::Field(self.0.clone())
    }

    fn cmp(&self, op: BinaryOp, value: impl Serialize) -> Predicate {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        Predicate(Expr::Binary(
            op,
            Box::new(self.expr()),
            Box::new(Expr::Const(ConstValue(value))),
        ))
    }

    pub fn eq(&self, value: impl Serialize) -> Predicate {
        self.cmp(BinaryOp::Eq, value)
    }

    pub fn ne(&self, value: impl Serialize) -> Predicate {
        self.cmp(BinaryOp::Ne, value)
    }

    pub fn lt(&self, value: impl Serialize) -> Predicate {
        self.cmp(BinaryOp::Lt, value)
    }

    pub fn le(&self, value: impl Serialize) -> Predicate {
        self.cmp(BinaryOp::Le, value)
    }

    pub fn gt(&self, value: impl Serialize) -> Predicate {
        self.cmp(BinaryOp::Gt, value)
    }

    pub fn ge(&self, value: impl Serialize) -> Predicate {
        self.cmp(BinaryOp::Ge, value)
    }

    pub fn exists(&self, present: bool) -> Predicate {
        Predicate(Expr::Exists(self.0.clone(), present))
    }

    pub fn is_type(&self, ty: JsonType) -> Predicate {
        Predicate(Expr::TypeIs(self.0.clone(), ty))
    }

    pub fn regex(&self, pattern: impl Into<String>) -> Predicate {
        Predicate(Expr::RegexMatch(self.0.clone(), pattern.into()))
    }

    pub fn is_in(&self, values: Vec<impl Serialize>) -> Predicate {
        let values = values
            .into_iter()
            .map(|v| ConstValue(serde_json::to_value(v).unwrap_or(Value::Null)))
            .collect();
        Predicate(Expr::In(self.0.clone(), values))
    }

    pub fn not_in(&self, values: Vec<impl Serialize>) -> Predicate {
        let values = values
            .into_iter()
            .map(|v| ConstValue(serde_json::to_value(v).unwrap_or(Value::Null)))
            .collect();
        Predicate(Expr::NotIn(self.0.clone(), values))
    }

    pub fn elem_match(&self, predicate: Predicate) -> Predicate {
        Predicate(Expr::ElemMatch(self.0.clone(), Box::new(predicate.0)))
    }

    pub fn all_match(&self, predicate: Predicate) -> Predicate {
        Predicate(Expr::AllMatch(self.0.clone(), Box::new(predicate.0)))
    }
}

/// A boolean expression over one or more fields, combinable with `and`/`or`/`not`.
#[derive(Debug, Clone)]
pub struct Predicate(Expr);

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate(self.0.and(other.0))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate(self.0.or(other.0))
    }

    pub fn not(self) -> Predicate {
        Predicate(self.0.not())
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }
}

/// Chainable query pipeline, built stage-by-stage the way the teacher builds
/// `MangoQuery`/`IndexData` (`.field(value).field(value)`), but threading an
/// `Expr` instead of a struct.
#[derive(Debug, Clone)]
pub struct Query(Expr);

impl Query {
    pub fn new() -> Self {
        Query(Expr::Source)
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::Where(Box::new(predicate.0)), Box::new(self.0));
        self
    }

    pub fn order_by(mut self, field: impl Into<FieldPath>) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::OrderBy(field.into().0), Box::new(self.0));
        self
    }

    pub fn then_by(mut self, field: impl Into<FieldPath>) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::ThenBy(field.into().0), Box::new(self.0));
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<FieldPath>) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::OrderByDesc(field.into().0), Box::new(self.0));
        self
    }

    pub fn then_by_desc(mut self, field: impl Into<FieldPath>) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::ThenByDesc(field.into().0), Box::new(self.0));
        self
    }

    pub fn skip(mut self, n: i64) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::Skip(n), Box::new(self.0));
        self
    }

    pub fn take(mut self, n: i64) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::Take(n), Box::new(self.0));
        self
    }

    pub fn select(mut self, fields: Vec<impl Into<FieldPath>>) -> Self {
        let fields = fields.into_iter().map(|f| f.into().0).collect();
        self.0 = Expr::Pipeline(PipelineOp::Select(fields), Box::new(self.0));
        self
    }

    pub fn use_bookmark(mut self, bookmark: impl Into<String>) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::UseBookmark(bookmark.into()), Box::new(self.0));
        self
    }

    pub fn use_index(mut self, index: Vec<impl Into<String>>) -> Self {
        let index = index.into_iter().map(Into::into).collect();
        self.0 = Expr::Pipeline(PipelineOp::UseIndex(index), Box::new(self.0));
        self
    }

    pub fn with_read_quorum(mut self, r: i64) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::WithReadQuorum(r), Box::new(self.0));
        self
    }

    pub fn update_index(mut self, update: bool) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::UpdateIndex(update), Box::new(self.0));
        self
    }

    pub fn from_stable(mut self, stable: bool) -> Self {
        self.0 = Expr::Pipeline(PipelineOp::FromStable(stable), Box::new(self.0));
        self
    }

    pub fn into_expr(self) -> Expr {
        self.0
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::optimizer::optimize;
    use crate::query::path::PropertyPolicy;
    use crate::query::translator::translate;

    #[test]
    fn chained_query_translates_to_expected_mango_doc() {
        let query = Query::new()
            .filter(Field::new("age").ge(18).and(Field::new("active").eq(true)))
            .order_by("name")
            .skip(0)
            .take(20);
        let optimized = optimize(query.into_expr()).unwrap();
        let doc = translate(&optimized, &PropertyPolicy::default()).unwrap();
        assert_eq!(
            doc.selector,
            serde_json::json!({"age": {"$gte": 18}, "active": true})
        );
        assert_eq!(doc.skip, None);
        assert_eq!(doc.limit, Some(20));
        assert_eq!(doc.sort, Some(vec![Value::String("name".into())]));
    }
}
