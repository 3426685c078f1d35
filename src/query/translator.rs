use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Error;

use super::ir::{BinaryOp, ConstValue, Expr, JsonType, PipelineOp, SortDirection};
use super::path::PropertyPolicy;

/// The wire body posted to `/{db}/_find`. Field order here is the order
/// `serde_json` emits them in, giving the translator its byte-stable output.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MangoQueryDoc {
    pub selector: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_index: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable: Option<bool>,
}

/// Translates an already-optimized IR into a `MangoQueryDoc`, per spec.md §4.D.
pub fn translate(expr: &Expr, policy: &PropertyPolicy) -> Result<MangoQueryDoc, Error> {
    let mut doc = MangoQueryDoc {
        selector: Value::Object(Map::new()),
        ..Default::default()
    };
    let selector_expr = apply_pipeline(expr, &mut doc, policy)?;
    doc.selector = selector(&selector_expr, policy)?;
    Ok(doc)
}

/// Walks the pipeline stages outside-in, filling `doc`'s non-selector
/// fields, and returns the innermost predicate expression (or `Source`,
/// meaning "match everything").
fn apply_pipeline(expr: &Expr, doc: &mut MangoQueryDoc, policy: &PropertyPolicy) -> Result<Expr, Error> {
    match expr {
        Expr::Pipeline(op, source) => {
            let inner = apply_pipeline(source, doc, policy)?;
            match op {
                PipelineOp::Where(pred) => Ok(merge_where(inner, (**pred).clone())),
                PipelineOp::Sort(terms) => {
                    let mut direction: Option<SortDirection> = None;
                    let mut rendered = Vec::with_capacity(terms.len());
                    for (path, dir) in terms {
                        if let Some(d) = direction {
                            if d != *dir {
                                return Err(Error::UnsupportedQuery(
                                    "cannot order in different directions".into(),
                                ));
                            }
                        }
                        direction = Some(*dir);
                        let field = policy.resolve(path);
                        rendered.push(match dir {
                            SortDirection::Asc => Value::String(field),
                            SortDirection::Desc => {
                                let mut m = Map::new();
                                m.insert(field, Value::String("desc".into()));
                                Value::Object(m)
                            }
                        });
                    }
                    doc.sort = Some(rendered);
                    Ok(inner)
                }
                PipelineOp::Skip(n) => {
                    doc.skip = Some(*n);
                    Ok(inner)
                }
                PipelineOp::Take(n) => {
                    doc.limit = Some(*n);
                    Ok(inner)
                }
                PipelineOp::Select(paths) => {
                    doc.fields = Some(paths.iter().map(|p| policy.resolve(p)).collect());
                    Ok(inner)
                }
                PipelineOp::UseBookmark(bookmark) => {
                    doc.bookmark = Some(bookmark.clone());
                    Ok(inner)
                }
                PipelineOp::UseIndex(index) => {
                    doc.use_index = Some(index.clone());
                    Ok(inner)
                }
                PipelineOp::WithReadQuorum(r) => {
                    doc.r = Some(*r);
                    Ok(inner)
                }
                PipelineOp::UpdateIndex(update) => {
                    doc.update = Some(*update);
                    Ok(inner)
                }
                PipelineOp::FromStable(stable) => {
                    doc.stable = Some(*stable);
                    Ok(inner)
                }
                PipelineOp::OrderBy(_)
                | PipelineOp::ThenBy(_)
                | PipelineOp::OrderByDesc(_)
                | PipelineOp::ThenByDesc(_) => Err(Error::UnsupportedQuery(
                    "unoptimized sort chain reached the translator".into(),
                )),
            }
        }
        Expr::Source => Ok(Expr::Source),
        other => Ok(other.clone()),
    }
}

fn merge_where(existing: Expr, new_clause: Expr) -> Expr {
    match existing {
        Expr::Source => new_clause,
        other => other.and(new_clause),
    }
}

/// Renders a predicate expression as a Mango selector JSON value.
fn selector(expr: &Expr, policy: &PropertyPolicy) -> Result<Value, Error> {
    match expr {
        Expr::Source => Ok(Value::Object(Map::new())),
        Expr::Const(ConstValue(Value::Bool(true))) => Ok(Value::Object(Map::new())),
        Expr::Binary(BinaryOp::And, ..) => {
            let clauses = flatten_and(expr);
            let mut rendered = Vec::with_capacity(clauses.len());
            for clause in &clauses {
                rendered.push(selector(clause, policy)?);
            }
            merge_and(rendered)
        }
        Expr::Binary(BinaryOp::Or, ..) => {
            let clauses = flatten_or(expr);
            let mut rendered = Vec::with_capacity(clauses.len());
            for clause in &clauses {
                rendered.push(selector(clause, policy)?);
            }
            Ok(obj("$or", Value::Array(rendered)))
        }
        Expr::Binary(op, lhs, rhs) => render_binary(*op, lhs, rhs, policy),
        Expr::Unary(super::ir::UnaryOp::Not, inner) => {
            Ok(obj("$not", selector(inner, policy)?))
        }
        Expr::In(path, values) => {
            let field = policy.resolve(path);
            Ok(field_op(&field, "$in", Value::Array(values.iter().map(|v| v.0.clone()).collect())))
        }
        Expr::NotIn(path, values) => {
            let field = policy.resolve(path);
            Ok(field_op(&field, "$nin", Value::Array(values.iter().map(|v| v.0.clone()).collect())))
        }
        Expr::Exists(path, present) => {
            let field = policy.resolve(path);
            Ok(field_op(&field, "$exists", Value::Bool(*present)))
        }
        Expr::TypeIs(path, ty) => {
            let field = policy.resolve(path);
            Ok(field_op(&field, "$type", Value::String(json_type_str(*ty).into())))
        }
        Expr::RegexMatch(path, pattern) => {
            let field = policy.resolve(path);
            Ok(field_op(&field, "$regex", Value::String(pattern.clone())))
        }
        Expr::ElemMatch(path, pred) => {
            let field = policy.resolve(path);
            Ok(field_op(&field, "$elemMatch", selector(pred, policy)?))
        }
        Expr::AllMatch(path, pred) => {
            let field = policy.resolve(path);
            Ok(field_op(&field, "$allMatch", selector(pred, policy)?))
        }
        Expr::Field(_) | Expr::Const(_) => Err(Error::UnsupportedQuery(
            "a bare value or field access is not a valid selector".into(),
        )),
        Expr::Pipeline(..) => Err(Error::UnsupportedQuery(
            "nested pipeline is not a valid selector".into(),
        )),
    }
}

fn render_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, policy: &PropertyPolicy) -> Result<Value, Error> {
    let (field, value, op) = match (lhs, rhs) {
        (Expr::Field(path), Expr::Const(c)) => (policy.resolve(path), c.0.clone(), op),
        // constant on the left (`5 > age`): the field/value swap flips the
        // direction of every order-sensitive comparison.
        (Expr::Const(c), Expr::Field(path)) => (policy.resolve(path), c.0.clone(), mirror(op)),
        _ => {
            return Err(Error::UnsupportedQuery(
                "comparison must be between a field and a constant".into(),
            ))
        }
    };
    match op {
        BinaryOp::Eq => {
            if value.is_object() || value.is_null() {
                Ok(field_op(&field, "$eq", value))
            } else {
                Ok(obj(&field, value))
            }
        }
        BinaryOp::Ne => Ok(field_op(&field, "$ne", value)),
        BinaryOp::Lt => Ok(field_op(&field, "$lt", value)),
        BinaryOp::Le => Ok(field_op(&field, "$lte", value)),
        BinaryOp::Gt => Ok(field_op(&field, "$gt", value)),
        BinaryOp::Ge => Ok(field_op(&field, "$gte", value)),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled by caller"),
    }
}

/// Flips a comparison operator to the equivalent form with its operands
/// swapped: `5 > age` (`Gt(Const, Field)`) means the same as `age < 5`.
fn mirror(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

fn flatten_and(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::Binary(BinaryOp::And, a, b) => {
            let mut out = flatten_and(a);
            out.extend(flatten_and(b));
            out
        }
        other => vec![other.clone()],
    }
}

fn flatten_or(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::Binary(BinaryOp::Or, a, b) => {
            let mut out = flatten_or(a);
            out.extend(flatten_or(b));
            out
        }
        other => vec![other.clone()],
    }
}

/// `and` n-ary rule: merge into one object when every clause is a
/// single-key object keying a distinct field; otherwise emit `$and`.
fn merge_and(clauses: Vec<Value>) -> Result<Value, Error> {
    let mut keys: BTreeMap<String, ()> = BTreeMap::new();
    let all_single_distinct_key = clauses.iter().all(|c| match c.as_object() {
        Some(m) if m.len() == 1 => {
            let key = m.keys().next().unwrap().clone();
            keys.insert(key, ()).is_none()
        }
        _ => false,
    }) && keys.len() == clauses.len();

    if all_single_distinct_key {
        let mut merged = Map::new();
        for clause in clauses {
            if let Value::Object(m) = clause {
                merged.extend(m);
            }
        }
        Ok(Value::Object(merged))
    } else {
        Ok(obj("$and", Value::Array(clauses)))
    }
}

fn field_op(field: &str, op: &str, value: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(op.to_string(), value);
    let mut outer = Map::new();
    outer.insert(field.to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn obj(key: &str, value: Value) -> Value {
    let mut m = Map::new();
    m.insert(key.to_string(), value);
    Value::Object(m)
}

fn json_type_str(ty: JsonType) -> &'static str {
    ty.as_wire_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ir::{ConstValue, Expr, PipelineOp, Segment};
    use crate::query::optimizer::optimize;

    fn policy() -> PropertyPolicy {
        PropertyPolicy::default()
    }

    #[test]
    fn eq_scalar_renders_as_shorthand_object() {
        let expr = Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::field("name")),
            Box::new(Expr::Const(ConstValue(Value::from("alice")))),
        );
        let doc = translate(&expr, &policy()).unwrap();
        assert_eq!(doc.selector, serde_json::json!({"name": "alice"}));
    }

    #[test]
    fn and_with_distinct_fields_merges_into_one_object() {
        let expr = Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::field("name")),
            Box::new(Expr::Const(ConstValue(Value::from("alice")))),
        )
        .and(Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::field("age")),
            Box::new(Expr::Const(ConstValue(Value::from(30)))),
        ));
        let doc = translate(&expr, &policy()).unwrap();
        assert_eq!(doc.selector, serde_json::json!({"name": "alice", "age": 30}));
    }

    #[test]
    fn and_with_repeated_field_uses_and_operator() {
        let expr = Expr::Binary(
            BinaryOp::Gt,
            Box::new(Expr::field("age")),
            Box::new(Expr::Const(ConstValue(Value::from(10)))),
        )
        .and(Expr::Binary(
            BinaryOp::Lt,
            Box::new(Expr::field("age")),
            Box::new(Expr::Const(ConstValue(Value::from(20)))),
        ));
        let doc = translate(&expr, &policy()).unwrap();
        assert_eq!(
            doc.selector,
            serde_json::json!({"$and": [{"age": {"$gt": 10}}, {"age": {"$lt": 20}}]})
        );
    }

    #[test]
    fn skip_and_take_map_to_skip_and_limit() {
        let expr = Expr::Pipeline(
            PipelineOp::Take(10),
            Box::new(Expr::Pipeline(PipelineOp::Skip(5), Box::new(Expr::Source))),
        );
        let doc = translate(&expr, &policy()).unwrap();
        assert_eq!(doc.skip, Some(5));
        assert_eq!(doc.limit, Some(10));
    }

    #[test]
    fn elem_match_uses_dollar_elem_match() {
        let expr = Expr::ElemMatch(
            vec![Segment::Member("tags".into())],
            Box::new(Expr::Binary(
                BinaryOp::Eq,
                Box::new(Expr::field("name")),
                Box::new(Expr::Const(ConstValue(Value::from("x")))),
            )),
        );
        let doc = translate(&expr, &policy()).unwrap();
        assert_eq!(
            doc.selector,
            serde_json::json!({"tags": {"$elemMatch": {"name": "x"}}})
        );
    }

    #[test]
    fn all_match_uses_dollar_all_match_not_elem_match() {
        let expr = Expr::AllMatch(
            vec![Segment::Member("tags".into())],
            Box::new(Expr::Binary(
                BinaryOp::Eq,
                Box::new(Expr::field("name")),
                Box::new(Expr::Const(ConstValue(Value::from("x")))),
            )),
        );
        let doc = translate(&expr, &policy()).unwrap();
        assert_eq!(
            doc.selector,
            serde_json::json!({"tags": {"$allMatch": {"name": "x"}}})
        );
    }

    #[test]
    fn eq_null_translates_to_dollar_eq_null_not_missing() {
        let expr = Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::field("middleName")),
            Box::new(Expr::Const(ConstValue(Value::Null))),
        );
        let doc = translate(&optimize(expr).unwrap(), &policy()).unwrap();
        assert_eq!(doc.selector, serde_json::json!({"middleName": {"$eq": null}}));
    }

    #[test]
    fn constant_on_left_mirrors_the_comparison() {
        // `5 > age` means `age < 5`, not `age > 5`.
        let expr = Expr::Binary(
            BinaryOp::Gt,
            Box::new(Expr::Const(ConstValue(Value::from(5)))),
            Box::new(Expr::field("age")),
        );
        let doc = translate(&expr, &policy()).unwrap();
        assert_eq!(doc.selector, serde_json::json!({"age": {"$lt": 5}}));
    }

    #[test]
    fn translation_is_deterministic() {
        let expr = Expr::field("name")
            .and(Expr::field("age"))
            .not();
        let optimized = optimize(Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::field("a")),
            Box::new(Expr::Const(ConstValue(Value::from(1)))),
        ))
        .unwrap();
        let once = translate(&optimized, &policy()).unwrap();
        let twice = translate(&optimized, &policy()).unwrap();
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
        let _ = expr;
    }
}
