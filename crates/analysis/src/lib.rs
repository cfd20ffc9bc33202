//! capline analysis
//!
//! Everything that happens to a segment after its sink has exited:
//!
//! ```text
//! completed segment ──► AnalysisTrigger ──► AnalysisReport ──► ResultDispatcher
//!                       (external tool)     (lines / rows)      ├─► LinePublisher
//!                                                               ├─► DocumentStore
//!                                                               └─► ArchiveRing
//! ```
//!
//! The trigger and the sinks are traits so the pipeline can be exercised
//! with in-process fakes.

pub mod command;
pub mod csv;
mod error;
pub mod results;
mod trigger;

pub use command::CommandAnalyzer;
pub use error::{AnalysisError, Result, ResultSinkError};
pub use results::{
    ArchiveRing, DeliveryStats, DispatchMetrics, DispatchMetricsSnapshot, DocumentStore,
    LinePublisher, ResultDispatcher, ResultSink,
};
pub use trigger::{AnalysisReport, AnalysisTrigger, Documents};
