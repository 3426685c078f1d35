//! The Query Pipeline: expression capture, optimization, translation to
//! Mango JSON, execution, and cached compilation (spec.md §4.A–§4.F).

pub mod builder;
pub mod compiler;
pub mod fingerprint;
pub mod ir;
pub mod optimizer;
pub mod path;
pub mod sender;
pub mod translator;

pub use builder::{Field, Predicate, Query};
pub use compiler::QueryCompiler;
pub use ir::{Expr, JsonType};
pub use path::{ArrayIndexing, CaseStyle, PropertyPolicy};
pub use sender::FindResponse;
pub use translator::MangoQueryDoc;
