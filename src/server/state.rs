use axum::extract::FromRef;

use crate::business_store::BusinessStore;
use crate::cities::CityCache;
use crate::export::ExportWriter;
use crate::jobs::{CityPipeline, JobManager};
use crate::log_tail::LogTailReader;
use crate::task_store::TaskStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedTaskStore = Arc<dyn TaskStore>;
pub type GuardedBusinessStore = Arc<dyn BusinessStore>;
pub type GuardedCityCache = Arc<CityCache>;
pub type GuardedLogReader = Arc<LogTailReader>;
pub type GuardedExportWriter = Arc<ExportWriter>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub job_manager: JobManager,
    pub city_pipeline: CityPipeline,
    pub task_store: GuardedTaskStore,
    pub business_store: GuardedBusinessStore,
    pub city_cache: GuardedCityCache,
    pub log_reader: GuardedLogReader,
    pub export_writer: GuardedExportWriter,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for JobManager {
    fn from_ref(input: &ServerState) -> Self {
        input.job_manager.clone()
    }
}

impl FromRef<ServerState> for CityPipeline {
    fn from_ref(input: &ServerState) -> Self {
        input.city_pipeline.clone()
    }
}

impl FromRef<ServerState> for GuardedTaskStore {
    fn from_ref(input: &ServerState) -> Self {
        input.task_store.clone()
    }
}

impl FromRef<ServerState> for GuardedBusinessStore {
    fn from_ref(input: &ServerState) -> Self {
        input.business_store.clone()
    }
}

impl FromRef<ServerState> for GuardedCityCache {
    fn from_ref(input: &ServerState) -> Self {
        input.city_cache.clone()
    }
}

impl FromRef<ServerState> for GuardedLogReader {
    fn from_ref(input: &ServerState) -> Self {
        input.log_reader.clone()
    }
}

impl FromRef<ServerState> for GuardedExportWriter {
    fn from_ref(input: &ServerState) -> Self {
        input.export_writer.clone()
    }
}
