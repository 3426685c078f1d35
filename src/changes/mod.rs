//! The Changes Feed Engine: normal, long-poll and continuous consumption
//! with filter negotiation, backpressure and cancellation (spec.md §4.G).

pub mod engine;
pub mod filter;
pub mod options;

pub use engine::{ChangeRev, ChangesEngine, ChangesEvent, ChangesPage};
pub use filter::ChangesFilter;
pub use options::{ChangesFeedOptions, Style};
