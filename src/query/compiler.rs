use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Error;

use super::fingerprint::fingerprint;
use super::ir::Expr;
use super::optimizer::optimize;
use super::path::PropertyPolicy;
use super::translator::{translate, MangoQueryDoc};

/// Orchestrates optimize → translate, caching translations by structural
/// fingerprint. Pure aside from the LRU bookkeeping, which is guarded by a
/// lock held only across the cache lookup/insert.
pub struct QueryCompiler {
    cache: Mutex<LruCache<u128, MangoQueryDoc>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCompiler {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn compile(&self, expr: Expr, policy: &PropertyPolicy) -> Result<MangoQueryDoc, Error> {
        let optimized = optimize(expr)?;
        let key = fingerprint(&optimized);

        if let Some(cached) = self.cache.lock().get(&key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let doc = translate(&optimized, policy)?;
        self.cache.lock().put(key, doc.clone());
        Ok(doc)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::{Field, Query};

    #[test]
    fn repeated_compile_of_same_ir_hits_cache() {
        let compiler = QueryCompiler::new(8);
        let policy = PropertyPolicy::default();
        let build = || Query::new().filter(Field::new("age").ge(18)).into_expr();

        compiler.compile(build(), &policy).unwrap();
        compiler.compile(build(), &policy).unwrap();

        assert_eq!(compiler.miss_count(), 1);
        assert_eq!(compiler.hit_count(), 1);
    }

    #[test]
    fn commutative_ir_shares_cache_entry() {
        let compiler = QueryCompiler::new(8);
        let policy = PropertyPolicy::default();

        let a = Field::new("name").eq("x").and(Field::new("age").eq(1));
        let b = Field::new("age").eq(1).and(Field::new("name").eq("x"));

        compiler
            .compile(Query::new().filter(a).into_expr(), &policy)
            .unwrap();
        compiler
            .compile(Query::new().filter(b).into_expr(), &policy)
            .unwrap();

        assert_eq!(compiler.miss_count(), 1);
        assert_eq!(compiler.hit_count(), 1);
    }
}
