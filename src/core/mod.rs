//! 核心编排层：调度、降级阶梯、合成、事件日志与关闭

pub mod degradation;
pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod state;
pub mod synthesizer;
pub mod task_scheduler;

pub use degradation::{Degradation, DegradationLadder, LadderStep};
pub use error::TaskError;
pub use orchestrator::Orchestrator;
pub use shutdown::{run_with_graceful_shutdown, ShutdownManager, ShutdownReason};
pub use state::{push_flag, ExecutionStep, StepLog, WarningFlag};
pub use synthesizer::{
    ResponseSynthesizer, SynthesizedResponse, CRISIS_RESPONSE, FALLBACK_RESPONSE,
};
pub use task_scheduler::{Execution, ExecutionTiming, ResultLog, TaskRunner, TaskScheduler};
