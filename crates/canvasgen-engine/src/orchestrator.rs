use std::sync::Arc;
use std::time::{Duration, Instant};

use canvasgen_contracts::config::CredentialStore;
use canvasgen_contracts::errors::{ErrorKind, GenerationError};
use canvasgen_contracts::events::EventWriter;
use canvasgen_contracts::models::ModelSelector;
use canvasgen_contracts::outcome::{NormalizedImage, PredictionHandle};
use canvasgen_contracts::request::{GenerationParams, GenerationRequest};
use serde_json::{json, Value};

use crate::adapter::{request_outcome, ProviderAdapter};
use crate::backoff::RetryPolicy;
use crate::cancel::CancellationToken;
use crate::normalize::{Classified, OutcomeClassifier};
use crate::registry::AdapterRegistry;

/// Successful orchestration, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub image: NormalizedImage,
    pub provider_id: String,
    pub model: String,
    /// Adapter calls made, initial request and status checks together.
    pub attempts: u32,
    pub retries: u32,
    pub polls: u32,
    pub prediction_id: Option<String>,
    pub delays: Vec<Duration>,
}

/// A validated request bound to its adapter and credential.
pub struct PreparedGeneration {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub request: GenerationRequest,
    api_key: String,
}

impl std::fmt::Debug for PreparedGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedGeneration")
            .field("provider", &self.adapter.id())
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Drives one generation through `REQUESTING -> POLLING / RETRY_WAIT -> done`.
///
/// Per-run state (counters, backoff, handle) lives on the stack of
/// [`Orchestrator::run`], so one orchestrator can serve concurrent callers.
pub struct Orchestrator<'a> {
    registry: &'a AdapterRegistry,
    credentials: &'a dyn CredentialStore,
    policy: &'a RetryPolicy,
    events: Option<EventWriter>,
}

struct RunState {
    started: Instant,
    attempts: u32,
    retries: u32,
    polls: u32,
    prediction_id: Option<String>,
    last_message: Option<String>,
    delays: Vec<Duration>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        registry: &'a AdapterRegistry,
        credentials: &'a dyn CredentialStore,
        policy: &'a RetryPolicy,
    ) -> Self {
        Self {
            registry,
            credentials,
            policy,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn generate(
        &self,
        prompt: &str,
        provider_id: &str,
        params: GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<GenerationReport, GenerationError> {
        let prepared = self.prepare(prompt, provider_id, params).inspect_err(|err| {
            tracing::info!(provider = provider_id, error = %err, "generation rejected");
            self.emit(
                "generation_failed",
                json!({
                    "provider": provider_id,
                    "code": err.code(),
                    "error": err.message,
                    "attempts": 0,
                }),
            );
        })?;
        self.run(&prepared, cancel)
    }

    /// Every check that needs no network. Failures here are never retried.
    pub fn prepare(
        &self,
        prompt: &str,
        provider_id: &str,
        params: GenerationParams,
    ) -> Result<PreparedGeneration, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::validation("Prompt must not be empty."));
        }
        let provider_id = provider_id.trim();
        let Some(adapter) = self.registry.get(provider_id) else {
            return Err(GenerationError::validation(format!(
                "Unknown provider '{provider_id}'."
            )));
        };
        let invalid = |message: String| GenerationError::validation(message).with_provider(provider_id);

        let configured = self.credentials.selected_model(adapter.id());
        let selection = ModelSelector::new(adapter.models().to_vec())
            .select(params.model.as_deref(), configured.as_deref())
            .map_err(invalid)?;
        if let (Some(reason), Some(_)) = (&selection.fallback_reason, &configured) {
            tracing::info!(provider = provider_id, model = %selection.model.id, reason = %reason, "model fallback");
        }

        let request = GenerationRequest::new(
            prompt,
            adapter.id(),
            selection.model.id.as_str(),
            params,
            self.credentials.quality_preference(),
        );
        if request.has_image_inputs() && !adapter.supports_image_to_image(&request.model) {
            return Err(invalid(format!(
                "Model '{}' does not support image-to-image generation.",
                request.model
            )));
        }

        let api_key = if adapter.requires_credential() {
            let Some(api_key) = self.credentials.api_key(adapter.id()) else {
                return Err(invalid(format!(
                    "No API key configured for provider '{provider_id}'."
                )));
            };
            if !adapter.validate_credential_format(&api_key) {
                return Err(invalid(format!(
                    "The API key configured for provider '{provider_id}' is malformed."
                )));
            }
            api_key
        } else {
            String::new()
        };

        Ok(PreparedGeneration {
            adapter,
            request,
            api_key,
        })
    }

    pub fn run(
        &self,
        prepared: &PreparedGeneration,
        cancel: &CancellationToken,
    ) -> Result<GenerationReport, GenerationError> {
        let adapter = prepared.adapter.as_ref();
        let request = &prepared.request;
        let mut state = RunState {
            started: Instant::now(),
            attempts: 0,
            retries: 0,
            polls: 0,
            prediction_id: None,
            last_message: None,
            delays: Vec::new(),
        };
        let mut backoff = self.policy.backoff();
        let mut classifier = OutcomeClassifier::default();
        let mut handle: Option<PredictionHandle> = None;

        self.emit(
            "generation_started",
            json!({
                "provider": adapter.id(),
                "model": request.model,
                "image_inputs": request.image_urls().len(),
                "max_retries": self.policy.max_retries,
            }),
        );

        loop {
            if cancel.is_cancelled() {
                return Err(self.fail(adapter, &state, GenerationError::cancelled()));
            }

            state.attempts += 1;
            let polling = handle.is_some();
            let outcome = match &handle {
                Some(pending) => adapter.check_pending_status(pending, &prepared.api_key),
                None => request_outcome(adapter, request, &prepared.api_key),
            };
            tracing::debug!(
                provider = adapter.id(),
                attempt = state.attempts,
                polling,
                outcome = outcome.label(),
                "provider call finished"
            );
            self.emit(
                "attempt_finished",
                json!({
                    "provider": adapter.id(),
                    "attempt": state.attempts,
                    "polling": polling,
                    "outcome": outcome.label(),
                }),
            );

            let next_event = match classifier.classify(outcome) {
                Classified::Image {
                    image,
                    prediction_id,
                } => {
                    let prediction_id = prediction_id.or(state.prediction_id.take());
                    tracing::info!(
                        provider = adapter.id(),
                        model = %request.model,
                        attempts = state.attempts,
                        source = image.source_label(),
                        "generation succeeded"
                    );
                    self.emit(
                        "generation_succeeded",
                        json!({
                            "provider": adapter.id(),
                            "model": request.model,
                            "attempts": state.attempts,
                            "retries": state.retries,
                            "polls": state.polls,
                            "prediction_id": prediction_id,
                            "source": image.source_label(),
                        }),
                    );
                    return Ok(GenerationReport {
                        image,
                        provider_id: adapter.id().to_string(),
                        model: request.model.clone(),
                        attempts: state.attempts,
                        retries: state.retries,
                        polls: state.polls,
                        prediction_id,
                        delays: state.delays,
                    });
                }
                Classified::Pending(next) => {
                    state.polls += 1;
                    state.prediction_id = Some(next.id.clone());
                    if !adapter.supports_polling() {
                        let message = format!(
                            "{} returned pending prediction {} but cannot be polled",
                            adapter.name(),
                            next.id
                        );
                        return Err(self.fail(
                            adapter,
                            &state,
                            GenerationError::new(ErrorKind::PermanentProvider, &message),
                        ));
                    }
                    if state.polls > self.policy.max_polls {
                        let message = format!(
                            "prediction {} still pending after {} status checks",
                            next.id, self.policy.max_polls
                        );
                        return Err(self.fail(
                            adapter,
                            &state,
                            GenerationError::new(ErrorKind::DeadlineExceeded, &message),
                        ));
                    }
                    state.last_message = Some(format!("prediction {} still pending", next.id));
                    handle = Some(next);
                    "poll_scheduled"
                }
                Classified::Retry { kind, message } => {
                    state.retries += 1;
                    if state.retries >= self.policy.max_retries {
                        return Err(self.fail(
                            adapter,
                            &state,
                            GenerationError::new(kind.error_kind(), &message),
                        ));
                    }
                    tracing::debug!(
                        provider = adapter.id(),
                        retry = state.retries,
                        kind = kind.as_str(),
                        message = %message,
                        "retryable outcome"
                    );
                    state.last_message = Some(message);
                    "retry_scheduled"
                }
                Classified::Fail { kind, message } => {
                    return Err(self.fail(adapter, &state, GenerationError::new(kind, &message)));
                }
            };

            let delay = backoff.next().unwrap_or(self.policy.max_delay);
            if let Some(deadline) = self.policy.deadline {
                let resumes_at = state.started.elapsed().checked_add(delay);
                if resumes_at.map_or(true, |at| at > deadline) {
                    let message = format!(
                        "deadline of {deadline:?} reached; last status: {}",
                        state.last_message.as_deref().unwrap_or("none")
                    );
                    return Err(self.fail(
                        adapter,
                        &state,
                        GenerationError::new(ErrorKind::DeadlineExceeded, &message),
                    ));
                }
            }
            self.emit(
                next_event,
                json!({
                    "provider": adapter.id(),
                    "attempt": state.attempts,
                    "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "prediction_id": state.prediction_id,
                    "reason": state.last_message,
                }),
            );
            state.delays.push(delay);
            if !delay.is_zero() && cancel.wait(delay) {
                return Err(self.fail(adapter, &state, GenerationError::cancelled()));
            }
        }
    }

    fn fail(
        &self,
        adapter: &dyn ProviderAdapter,
        state: &RunState,
        err: GenerationError,
    ) -> GenerationError {
        let err = err
            .with_provider(adapter.id())
            .with_prediction(state.prediction_id.clone())
            .with_attempts(state.attempts);
        match err.kind {
            ErrorKind::ContentModeration | ErrorKind::Cancelled | ErrorKind::Validation => {
                tracing::info!(provider = adapter.id(), attempts = state.attempts, error = %err, "generation stopped");
            }
            _ => {
                tracing::warn!(
                    provider = adapter.id(),
                    attempts = state.attempts,
                    prediction_id = state.prediction_id.as_deref().unwrap_or(""),
                    error = %err,
                    "generation failed"
                );
            }
        }
        self.emit(
            "generation_failed",
            json!({
                "provider": adapter.id(),
                "code": err.code(),
                "error": err.message,
                "attempts": state.attempts,
                "prediction_id": state.prediction_id,
            }),
        );
        err
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        let payload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = events.emit(event_type, payload) {
            tracing::warn!(event = event_type, error = %err, "failed to write generation event");
        }
    }
}
