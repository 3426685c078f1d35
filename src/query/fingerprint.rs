use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::ir::{BinaryOp, ConstValue, Expr, PipelineOp, Segment};

/// Stable 128-bit structural fingerprint of an `Expr`, used as the Query
/// Compiler's cache key. Equal under commutativity of `And`/`Or`: the two
/// children of a commutative `Binary` are hashed in a canonical (sorted)
/// order rather than source order.
pub fn fingerprint(expr: &Expr) -> u128 {
    let mut lo = DefaultHasher::new();
    let mut hi = DefaultHasher::new();
    // Salt the second hasher so the two 64-bit halves aren't simply equal
    // for inputs whose hash happens to collide trivially.
    0x9E3779B97F4A7C15u64.hash(&mut hi);
    walk(expr, &mut lo, &mut hi);
    ((hi.finish() as u128) << 64) | (lo.finish() as u128)
}

fn walk(expr: &Expr, lo: &mut DefaultHasher, hi: &mut DefaultHasher) {
    discriminant(expr).hash(lo);
    discriminant(expr).hash(hi);
    match expr {
        Expr::Const(v) => hash_const(v, lo, hi),
        Expr::Field(path) => hash_path(path, lo, hi),
        Expr::Binary(op @ (BinaryOp::And | BinaryOp::Or), a, b) => {
            op.hash(lo);
            op.hash(hi);
            let fa = fingerprint(a);
            let fb = fingerprint(b);
            // Canonical (sorted) order makes `a and b` fingerprint equal to `b and a`.
            let (first, second) = if fa <= fb { (fa, fb) } else { (fb, fa) };
            first.hash(lo);
            second.hash(lo);
            first.hash(hi);
            second.hash(hi);
        }
        Expr::Binary(op, a, b) => {
            op.hash(lo);
            op.hash(hi);
            walk(a, lo, hi);
            walk(b, lo, hi);
        }
        Expr::Unary(op, operand) => {
            op.hash(lo);
            op.hash(hi);
            walk(operand, lo, hi);
        }
        Expr::In(path, values) | Expr::NotIn(path, values) => {
            hash_path(path, lo, hi);
            values.len().hash(lo);
            for v in values {
                hash_const(v, lo, hi);
            }
        }
        Expr::Exists(path, b) => {
            hash_path(path, lo, hi);
            b.hash(lo);
            b.hash(hi);
        }
        Expr::TypeIs(path, ty) => {
            hash_path(path, lo, hi);
            ty.hash(lo);
            ty.hash(hi);
        }
        Expr::RegexMatch(path, pattern) => {
            hash_path(path, lo, hi);
            pattern.hash(lo);
            pattern.hash(hi);
        }
        Expr::ElemMatch(path, pred) | Expr::AllMatch(path, pred) => {
            hash_path(path, lo, hi);
            walk(pred, lo, hi);
        }
        Expr::Pipeline(op, source) => {
            hash_pipeline_op(op, lo, hi);
            walk(source, lo, hi);
        }
        Expr::Source => {}
    }
}

fn discriminant(expr: &Expr) -> u8 {
    match expr {
        Expr::Const(_) => 0,
        Expr::Field(_) => 1,
        Expr::Binary(..) => 2,
        Expr::Unary(..) => 3,
        Expr::In(..) => 4,
        Expr::NotIn(..) => 5,
        Expr::Exists(..) => 6,
        Expr::TypeIs(..) => 7,
        Expr::RegexMatch(..) => 8,
        Expr::ElemMatch(..) => 9,
        Expr::AllMatch(..) => 10,
        Expr::Pipeline(..) => 11,
        Expr::Source => 12,
    }
}

fn hash_path(path: &[Segment], lo: &mut DefaultHasher, hi: &mut DefaultHasher) {
    path.len().hash(lo);
    path.len().hash(hi);
    for seg in path {
        seg.hash(lo);
        seg.hash(hi);
    }
}

fn hash_const(v: &ConstValue, lo: &mut DefaultHasher, hi: &mut DefaultHasher) {
    let canonical = v.0.to_string();
    canonical.hash(lo);
    canonical.hash(hi);
}

fn hash_pipeline_op(op: &PipelineOp, lo: &mut DefaultHasher, hi: &mut DefaultHasher) {
    match op {
        PipelineOp::Where(e) => {
            0u8.hash(lo);
            0u8.hash(hi);
            walk(e, lo, hi);
        }
        PipelineOp::OrderBy(p) => {
            1u8.hash(lo);
            1u8.hash(hi);
            hash_path(p, lo, hi);
        }
        PipelineOp::ThenBy(p) => {
            2u8.hash(lo);
            2u8.hash(hi);
            hash_path(p, lo, hi);
        }
        PipelineOp::OrderByDesc(p) => {
            3u8.hash(lo);
            3u8.hash(hi);
            hash_path(p, lo, hi);
        }
        PipelineOp::ThenByDesc(p) => {
            4u8.hash(lo);
            4u8.hash(hi);
            hash_path(p, lo, hi);
        }
        PipelineOp::Sort(terms) => {
            5u8.hash(lo);
            5u8.hash(hi);
            terms.len().hash(lo);
            for (p, dir) in terms {
                hash_path(p, lo, hi);
                dir.hash(lo);
                dir.hash(hi);
            }
        }
        PipelineOp::Skip(n) => {
            6u8.hash(lo);
            6u8.hash(hi);
            n.hash(lo);
            n.hash(hi);
        }
        PipelineOp::Take(n) => {
            7u8.hash(lo);
            7u8.hash(hi);
            n.hash(lo);
            n.hash(hi);
        }
        PipelineOp::Select(paths) => {
            8u8.hash(lo);
            8u8.hash(hi);
            paths.len().hash(lo);
            for p in paths {
                hash_path(p, lo, hi);
            }
        }
        PipelineOp::UseBookmark(s) => {
            9u8.hash(lo);
            9u8.hash(hi);
            s.hash(lo);
            s.hash(hi);
        }
        PipelineOp::UseIndex(idx) => {
            10u8.hash(lo);
            10u8.hash(hi);
            idx.hash(lo);
            idx.hash(hi);
        }
        PipelineOp::WithReadQuorum(n) => {
            11u8.hash(lo);
            11u8.hash(hi);
            n.hash(lo);
            n.hash(hi);
        }
        PipelineOp::UpdateIndex(b) => {
            12u8.hash(lo);
            12u8.hash(hi);
            b.hash(lo);
            b.hash(hi);
        }
        PipelineOp::FromStable(b) => {
            13u8.hash(lo);
            13u8.hash(hi);
            b.hash(lo);
            b.hash(hi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ir::Expr;

    #[test]
    fn commutative_and_has_equal_fingerprint() {
        let a = Expr::field("name").and(Expr::field("age"));
        let b = Expr::field("age").and(Expr::field("name"));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_shapes_differ() {
        let a = Expr::field("name");
        let b = Expr::field("age");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
