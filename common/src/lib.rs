/* --------- Tipos compartidos entre worker y orquestador --------- */

pub mod job;
pub mod logs;
pub mod patterns;
pub mod results;
pub mod store;
pub mod task;
pub mod worker;

pub use job::{
    JobCounters, JobId, JobInfo, JobStatus, JobStatusResponse, StartJobRequest, StartJobResponse,
    StopJobRequest, StopJobResponse,
};
pub use logs::{LogMode, LogQuery, LogQueryError};
pub use results::{AttributeMap, ProductRecord, ResultDocument, ResultMarker};
pub use task::{Category, Task};
pub use worker::{load_registry, WorkerHandle};
