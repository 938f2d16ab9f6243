mod job;
pub mod launcher;
mod manager;
mod params;
mod pipeline;

pub use job::{JobError, JobKind, JobStatus};
pub use manager::{JobManager, JobOutcome, JobSnapshot, RunningFlags, StoppedJob};
pub use pipeline::{normalize_city, CityPipeline, PipelineError, PipelineStart};
pub use params::{prefix_for_city, EmailParams, GmbParams, JobParams, PostcodeParams, CITY_PREFIXES};
