use eco_tasks::workflows::submissions::{
    EventError, EventPublisher, InMemoryTaskCatalog, TaskDefinition, TaskEvent, TaskId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Emits task events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LoggingEventPublisher;

impl EventPublisher for LoggingEventPublisher {
    fn publish(&self, event: TaskEvent) -> Result<(), EventError> {
        info!(
            kind = ?event.kind,
            submission_id = %event.submission_id,
            task_id = %event.task_id,
            user_id = %event.user_id,
            payload = ?event.payload,
            "task event emitted"
        );
        Ok(())
    }
}

/// Keeps published events around so the demo can print them.
#[derive(Default, Clone)]
pub(crate) struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl EventPublisher for RecordingEventPublisher {
    fn publish(&self, event: TaskEvent) -> Result<(), EventError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| EventError::Transport("event buffer poisoned".to_string()))?;
        guard.push(event);
        Ok(())
    }
}

impl RecordingEventPublisher {
    pub(crate) fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

fn demo_task(
    id: &str,
    title: &str,
    category: &str,
    base_points: u64,
    min_confidence: Option<f64>,
) -> TaskDefinition {
    TaskDefinition {
        id: TaskId(id.to_string()),
        title: title.to_string(),
        category: category.to_string(),
        base_points,
        min_confidence,
        is_active: true,
    }
}

/// Catalog served until the task catalog service is reachable from here.
pub(crate) fn demo_catalog() -> InMemoryTaskCatalog {
    let mut retired = demo_task(
        "task-plastic-audit-2023",
        "Household plastic audit (2023 campaign)",
        "waste",
        60,
        None,
    );
    retired.is_active = false;

    InMemoryTaskCatalog::with_tasks([
        demo_task(
            "task-beach-cleanup",
            "Beach cleanup",
            "waste",
            150,
            Some(0.75),
        ),
        demo_task(
            "task-tree-planting",
            "Plant a native tree",
            "biodiversity",
            200,
            None,
        ),
        demo_task(
            "task-bike-commute",
            "Commute by bike for a week",
            "mobility",
            120,
            Some(0.6),
        ),
        demo_task(
            "task-solar-survey",
            "Rooftop solar survey",
            "energy",
            130,
            Some(0.9),
        ),
        retired,
    ])
}
