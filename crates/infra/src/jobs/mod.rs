//! Report jobs: bookkeeping and the single-flight pipeline that runs them.

pub mod processor;
pub mod service;

pub use processor::{
    INTERRUPTED, JobProcessor, PipelineStages, ProcessorError, ProcessorHandle, StageBuildError,
    StageError,
};
pub use service::JobService;
