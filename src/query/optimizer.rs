use serde_json::Value;

use crate::error::Error;

use super::ir::{BinaryOp, ConstValue, Expr, PipelineOp, Segment, SortDirection, UnaryOp};

/// Guards against a non-terminating rewrite; no rewrite defined here should
/// ever need more than a handful of passes on a realistic query tree.
const MAX_PASSES: usize = 64;

/// Applies the rewrites of spec.md §4.B to a fixed point.
pub fn optimize(expr: Expr) -> Result<Expr, Error> {
    let mut current = expr;
    for _ in 0..MAX_PASSES {
        let (next, changed) = pass(current)?;
        if !changed {
            return collapse_sort_chain(next);
        }
        current = next;
    }
    tracing::warn!("query optimizer hit the pass cap without reaching a fixed point");
    collapse_sort_chain(current)
}

fn pass(expr: Expr) -> Result<(Expr, bool), Error> {
    match expr {
        Expr::Unary(UnaryOp::Not, inner) => rewrite_not(*inner),
        Expr::Binary(op @ (BinaryOp::And | BinaryOp::Or), a, b) => {
            let (a, ca) = pass(*a)?;
            let (b, cb) = pass(*b)?;
            if let (Expr::Const(ConstValue(va)), Expr::Const(ConstValue(vb))) = (&a, &b) {
                if let (Some(va), Some(vb)) = (va.as_bool(), vb.as_bool()) {
                    let folded = match op {
                        BinaryOp::And => va && vb,
                        BinaryOp::Or => va || vb,
                        _ => unreachable!(),
                    };
                    return Ok((Expr::Const(ConstValue(Value::Bool(folded))), true));
                }
            }
            Ok((Expr::Binary(op, Box::new(a), Box::new(b)), ca || cb))
        }
        Expr::Binary(op, a, b) => {
            let (a, ca) = pass(*a)?;
            let (b, cb) = pass(*b)?;
            if let (Expr::Const(ConstValue(va)), Expr::Const(ConstValue(vb))) = (&a, &b) {
                if let Some(folded) = fold_scalar_binary(op, va, vb) {
                    return Ok((Expr::Const(ConstValue(folded)), true));
                }
            }
            Ok((Expr::Binary(op, Box::new(a), Box::new(b)), ca || cb))
        }
        Expr::ElemMatch(path, pred) => {
            let (pred, changed) = pass(*pred)?;
            Ok((Expr::ElemMatch(path, Box::new(pred)), changed))
        }
        Expr::AllMatch(path, pred) => {
            let (pred, changed) = pass(*pred)?;
            Ok((Expr::AllMatch(path, Box::new(pred)), changed))
        }
        Expr::Pipeline(op, source) => {
            let (source, source_changed) = pass(*source)?;
            match op {
                PipelineOp::Where(inner) => {
                    let (inner, inner_changed) = pass(*inner)?;
                    if is_true(&inner) {
                        return Ok((source, true));
                    }
                    Ok((
                        Expr::Pipeline(PipelineOp::Where(Box::new(inner)), Box::new(source)),
                        source_changed || inner_changed,
                    ))
                }
                PipelineOp::Skip(0) => Ok((source, true)),
                PipelineOp::Select(ref paths) => {
                    for p in paths {
                        if p.is_empty() {
                            return Err(Error::UnsupportedQuery(
                                "Select must project fields".into(),
                            ));
                        }
                    }
                    Ok((
                        Expr::Pipeline(op, Box::new(source)),
                        source_changed,
                    ))
                }
                other => Ok((Expr::Pipeline(other, Box::new(source)), source_changed)),
            }
        }
        other => Ok((other, false)),
    }
}

fn rewrite_not(inner: Expr) -> Result<(Expr, bool), Error> {
    match inner {
        Expr::Unary(UnaryOp::Not, x) => Ok((*x, true)),
        Expr::Binary(BinaryOp::And, a, b) => Ok((
            Expr::Binary(
                BinaryOp::Or,
                Box::new(Expr::Unary(UnaryOp::Not, a)),
                Box::new(Expr::Unary(UnaryOp::Not, b)),
            ),
            true,
        )),
        Expr::Binary(BinaryOp::Or, a, b) => Ok((
            Expr::Binary(
                BinaryOp::And,
                Box::new(Expr::Unary(UnaryOp::Not, a)),
                Box::new(Expr::Unary(UnaryOp::Not, b)),
            ),
            true,
        )),
        Expr::Binary(BinaryOp::Eq, a, b) => Ok((Expr::Binary(BinaryOp::Ne, a, b), true)),
        Expr::Binary(BinaryOp::Ne, a, b) => Ok((Expr::Binary(BinaryOp::Eq, a, b), true)),
        Expr::Binary(BinaryOp::Lt, a, b) => Ok((Expr::Binary(BinaryOp::Ge, a, b), true)),
        Expr::Binary(BinaryOp::Le, a, b) => Ok((Expr::Binary(BinaryOp::Gt, a, b), true)),
        Expr::Binary(BinaryOp::Gt, a, b) => Ok((Expr::Binary(BinaryOp::Le, a, b), true)),
        Expr::Binary(BinaryOp::Ge, a, b) => Ok((Expr::Binary(BinaryOp::Lt, a, b), true)),
        other => {
            let (rewritten, changed) = pass(other)?;
            Ok((Expr::Unary(UnaryOp::Not, Box::new(rewritten)), changed))
        }
    }
}

fn fold_scalar_binary(op: BinaryOp, a: &Value, b: &Value) -> Option<Value> {
    let ord = compare_json(a, b)?;
    let result = match op {
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        BinaryOp::Lt => ord == std::cmp::Ordering::Less,
        BinaryOp::Le => ord != std::cmp::Ordering::Greater,
        BinaryOp::Gt => ord == std::cmp::Ordering::Greater,
        BinaryOp::Ge => ord != std::cmp::Ordering::Less,
        BinaryOp::And | BinaryOp::Or => return None,
    };
    Some(Value::Bool(result))
}

fn compare_json(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn is_true(expr: &Expr) -> bool {
    matches!(expr, Expr::Const(ConstValue(Value::Bool(true))))
}

/// Collapses a run of `OrderBy`/`ThenBy`/`OrderByDesc`/`ThenByDesc` pipeline
/// stages into a single canonical `Sort` term (rewrite 7). Mixed directions
/// in one run are rejected.
fn collapse_sort_chain(expr: Expr) -> Result<Expr, Error> {
    let mut terms: Vec<(Vec<Segment>, SortDirection)> = Vec::new();
    let mut cursor = expr;
    loop {
        match cursor {
            Expr::Pipeline(PipelineOp::OrderBy(path), source) => {
                push_term(&mut terms, path, SortDirection::Asc)?;
                cursor = *source;
            }
            Expr::Pipeline(PipelineOp::ThenBy(path), source) => {
                push_term(&mut terms, path, SortDirection::Asc)?;
                cursor = *source;
            }
            Expr::Pipeline(PipelineOp::OrderByDesc(path), source) => {
                push_term(&mut terms, path, SortDirection::Desc)?;
                cursor = *source;
            }
            Expr::Pipeline(PipelineOp::ThenByDesc(path), source) => {
                push_term(&mut terms, path, SortDirection::Desc)?;
                cursor = *source;
            }
            Expr::Pipeline(op, source) => {
                let source = collapse_sort_chain(*source)?;
                let node = if terms.is_empty() {
                    source
                } else {
                    terms.reverse();
                    Expr::Pipeline(PipelineOp::Sort(std::mem::take(&mut terms)), Box::new(source))
                };
                return Ok(Expr::Pipeline(op, Box::new(node)));
            }
            other => {
                if terms.is_empty() {
                    return Ok(other);
                }
                terms.reverse();
                return Ok(Expr::Pipeline(
                    PipelineOp::Sort(std::mem::take(&mut terms)),
                    Box::new(other),
                ));
            }
        }
    }
}

fn push_term(
    terms: &mut Vec<(Vec<Segment>, SortDirection)>,
    path: Vec<Segment>,
    dir: SortDirection,
) -> Result<(), Error> {
    if let Some((_, existing)) = terms.last() {
        if *existing != dir {
            return Err(Error::UnsupportedQuery(
                "cannot order in different directions".into(),
            ));
        }
    }
    terms.push((path, dir));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_negation_cancels() {
        let e = Expr::field("active").not().not();
        let optimized = optimize(e).unwrap();
        assert_eq!(optimized, Expr::field("active"));
    }

    #[test]
    fn de_morgan_on_and() {
        let e = Expr::field("a").and(Expr::field("b")).not();
        let optimized = optimize(e).unwrap();
        match optimized {
            Expr::Binary(BinaryOp::Or, left, right) => {
                assert_eq!(*left, Expr::field("a").not());
                assert_eq!(*right, Expr::field("b").not());
            }
            other => panic!("expected Or, got {:?}", other),
            #[allow(unreachable_patterns)]
            _unused => unreachable!(),
        }
    }

    #[test]
    fn not_eq_becomes_ne() {
        let e = Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::field("age")),
            Box::new(Expr::Const(ConstValue(Value::from(30)))),
        )
        .not();
        let optimized = optimize(e).unwrap();
        assert!(matches!(optimized, Expr::Binary(BinaryOp::Ne, ..)));
    }

    #[test]
    fn skip_zero_is_eliminated() {
        let e = Expr::Pipeline(PipelineOp::Skip(0), Box::new(Expr::Source));
        let optimized = optimize(e).unwrap();
        assert_eq!(optimized, Expr::Source);
    }

    #[test]
    fn where_true_is_eliminated() {
        let e = Expr::Pipeline(
            PipelineOp::Where(Box::new(Expr::Const(ConstValue(Value::Bool(true))))),
            Box::new(Expr::Source),
        );
        let optimized = optimize(e).unwrap();
        assert_eq!(optimized, Expr::Source);
    }

    #[test]
    fn order_by_then_by_collapses_to_sort() {
        let e = Expr::Pipeline(
            PipelineOp::ThenBy(vec![Segment::Member("age".into())]),
            Box::new(Expr::Pipeline(
                PipelineOp::OrderBy(vec![Segment::Member("name".into())]),
                Box::new(Expr::Source),
            )),
        );
        let optimized = optimize(e).unwrap();
        match optimized {
            Expr::Pipeline(PipelineOp::Sort(terms), _) => {
                assert_eq!(terms.len(), 2);
                assert_eq!(terms[0].0, vec![Segment::Member("name".into())]);
                assert_eq!(terms[1].0, vec![Segment::Member("age".into())]);
            }
            other => panic!("expected Sort, got {:?}", other),
        }
    }

    #[test]
    fn mixed_sort_direction_is_rejected() {
        let e = Expr::Pipeline(
            PipelineOp::ThenByDesc(vec![Segment::Member("age".into())]),
            Box::new(Expr::Pipeline(
                PipelineOp::OrderBy(vec![Segment::Member("name".into())]),
                Box::new(Expr::Source),
            )),
        );
        let err = optimize(e).unwrap_err();
        assert!(matches!(err, Error::UnsupportedQuery(_)));
    }

    #[test]
    fn select_over_non_field_is_rejected() {
        let e = Expr::Pipeline(PipelineOp::Select(vec![vec![]]), Box::new(Expr::Source));
        let err = optimize(e).unwrap_err();
        assert!(matches!(err, Error::UnsupportedQuery(_)));
    }

    #[test]
    fn eq_null_is_preserved_not_rewritten() {
        let e = Expr::Binary(
            BinaryOp::Eq,
            Box::new(Expr::field("middleName")),
            Box::new(Expr::Const(ConstValue(Value::Null))),
        );
        let optimized = optimize(e.clone()).unwrap();
        assert_eq!(optimized, e);
    }
}
