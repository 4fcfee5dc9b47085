//! 执行计划：任务种类、依赖图、构建器、复杂度分类与计划器

pub mod builder;
pub mod classifier;
pub mod graph;
pub mod planner;
pub mod types;

pub use builder::PlanBuilder;
pub use classifier::{ComplexityClassifier, ComplexitySignals};
pub use graph::PlanGraph;
pub use planner::ExecutionPlanner;
pub use types::*;
