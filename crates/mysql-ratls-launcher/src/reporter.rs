//! Structured reporting for pipeline stage transitions.

use std::sync::{Arc, Mutex, PoisonError};

use launcher_config::ConfigWarning;

use crate::errors::{LaunchError, Stage};

const STAGE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stage");

/// Observer trait used to surface stage events to telemetry sinks.
pub trait StageReporter: Send + Sync {
    /// Invoked before a stage runs.
    fn stage_starting(&self, stage: Stage);

    /// Invoked after a stage completes, including with degradations.
    fn stage_finished(&self, stage: Stage);

    /// Invoked when a step degrades and its fallback is used.
    fn stage_degraded(&self, stage: Stage, reason: &str);

    /// Invoked when a stage fails fatally.
    fn stage_failed(&self, stage: Stage, error: &LaunchError);

    /// Invoked once per warning recorded during configuration resolution.
    fn config_warning(&self, warning: &ConfigWarning);
}

impl<T> StageReporter for Arc<T>
where
    T: StageReporter,
{
    fn stage_starting(&self, stage: Stage) {
        (**self).stage_starting(stage);
    }

    fn stage_finished(&self, stage: Stage) {
        (**self).stage_finished(stage);
    }

    fn stage_degraded(&self, stage: Stage, reason: &str) {
        (**self).stage_degraded(stage, reason);
    }

    fn stage_failed(&self, stage: Stage, error: &LaunchError) {
        (**self).stage_failed(stage, error);
    }

    fn config_warning(&self, warning: &ConfigWarning) {
        (**self).config_warning(warning);
    }
}

/// Default reporter that records stage events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredStageReporter;

impl StageReporter for StructuredStageReporter {
    fn stage_starting(&self, stage: Stage) {
        tracing::debug!(
            target: STAGE_TARGET,
            event = "stage_starting",
            stage = %stage,
            "stage starting"
        );
    }

    fn stage_finished(&self, stage: Stage) {
        tracing::info!(
            target: STAGE_TARGET,
            event = "stage_finished",
            stage = %stage,
            "stage finished"
        );
    }

    fn stage_degraded(&self, stage: Stage, reason: &str) {
        tracing::warn!(
            target: STAGE_TARGET,
            event = "stage_degraded",
            stage = %stage,
            reason,
            "continuing with fallback"
        );
    }

    fn stage_failed(&self, stage: Stage, error: &LaunchError) {
        tracing::error!(
            target: STAGE_TARGET,
            event = "stage_failed",
            stage = %stage,
            error = %error,
            "stage failed"
        );
    }

    fn config_warning(&self, warning: &ConfigWarning) {
        tracing::warn!(
            target: STAGE_TARGET,
            event = "config_warning",
            warning = %warning,
            "configuration warning"
        );
    }
}

/// A stage event captured by [`RecordingStageReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// A stage started.
    Starting(Stage),
    /// A stage finished.
    Finished(Stage),
    /// A step degraded.
    Degraded {
        /// Stage that degraded.
        stage: Stage,
        /// Reported cause.
        reason: String,
    },
    /// A stage failed.
    Failed {
        /// Stage that failed.
        stage: Stage,
        /// Rendered error.
        message: String,
    },
    /// A configuration warning was reported.
    Warning(String),
}

/// Reporter that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingStageReporter {
    events: Mutex<Vec<StageEvent>>,
}

impl RecordingStageReporter {
    /// Returns a copy of the recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<StageEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the reasons of every recorded degradation.
    #[must_use]
    pub fn degradations(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StageEvent::Degraded { reason, .. } => Some(reason),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: StageEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl StageReporter for RecordingStageReporter {
    fn stage_starting(&self, stage: Stage) {
        self.record(StageEvent::Starting(stage));
    }

    fn stage_finished(&self, stage: Stage) {
        self.record(StageEvent::Finished(stage));
    }

    fn stage_degraded(&self, stage: Stage, reason: &str) {
        self.record(StageEvent::Degraded {
            stage,
            reason: reason.to_owned(),
        });
    }

    fn stage_failed(&self, stage: Stage, error: &LaunchError) {
        self.record(StageEvent::Failed {
            stage,
            message: error.to_string(),
        });
    }

    fn config_warning(&self, warning: &ConfigWarning) {
        self.record(StageEvent::Warning(warning.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arc_wrapped_reporters_forward_events() {
        let inner = Arc::new(RecordingStageReporter::default());
        let shared: Arc<dyn StageReporter> = Arc::new(Arc::clone(&inner));
        shared.stage_starting(Stage::Ports);
        shared.stage_degraded(Stage::Ports, "probe unavailable");
        shared.stage_finished(Stage::Ports);
        assert_eq!(
            inner.events(),
            vec![
                StageEvent::Starting(Stage::Ports),
                StageEvent::Degraded {
                    stage: Stage::Ports,
                    reason: "probe unavailable".to_owned(),
                },
                StageEvent::Finished(Stage::Ports),
            ]
        );
        assert_eq!(inner.degradations(), ["probe unavailable"]);
    }
}
