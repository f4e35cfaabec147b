//! Scriptable submitter for exercising the queue without a backend.

use crate::{EventSubmitter, SubmitError};
use async_trait::async_trait;
use fieldops_database::OutboxEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Script {
    default: Option<SubmitError>,
    queued: VecDeque<Result<(), SubmitError>>,
    per_event: HashMap<String, SubmitError>,
    submissions: Vec<OutboxEvent>,
}

/// Records every submission and answers from a script.
///
/// Outcome precedence: a per-event failure, then the next queued outcome,
/// then the default (success unless set to fail).
#[derive(Default)]
pub struct ScriptedSubmitter {
    script: Mutex<Script>,
    delay: Option<Duration>,
}

impl ScriptedSubmitter {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing(error: SubmitError) -> Self {
        let submitter = Self::default();
        submitter.set_failure(Some(error));
        submitter
    }

    /// Sleep this long inside every `submit`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Change the default outcome. `None` means success.
    pub fn set_failure(&self, error: Option<SubmitError>) {
        self.lock().default = error;
    }

    /// Answer the next unscripted call with `outcome`.
    pub fn push_outcome(&self, outcome: Result<(), SubmitError>) {
        self.lock().queued.push_back(outcome);
    }

    /// Always fail submissions of the event with this id.
    pub fn fail_event(&self, event_id: &str, error: SubmitError) {
        self.lock().per_event.insert(event_id.to_string(), error);
    }

    pub fn submissions(&self) -> Vec<OutboxEvent> {
        self.lock().submissions.clone()
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.lock()
            .submissions
            .iter()
            .map(|event| event.id.clone())
            .collect()
    }

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventSubmitter for ScriptedSubmitter {
    async fn submit(&self, event: &OutboxEvent) -> Result<(), SubmitError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        script.submissions.push(event.clone());

        if let Some(error) = script.per_event.get(&event.id) {
            return Err(error.clone());
        }
        if let Some(outcome) = script.queued.pop_front() {
            return outcome;
        }
        match &script.default {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
