//! Computation runner: the full client pipeline for one job.
//!
//! submit → poll → collect → (release → decrypt → post-process) per result.
//!
//! Job-level failures (submission, polling, collection) abort the run. Once
//! the result set is collected, every result is released and decoded on its
//! own; a failure on one result is reported next to the others' successes.

use std::sync::Arc;

use crate::config::PollSettings;
use crate::domain::{
    ArtifactDescriptor, DecryptedArtifact, JobDefinition, JobHandle, ResultReference, TerminalJob,
};
use crate::ports::{Clock, ComputationService, CryptoEngine, CryptoEngineHandle};
use crate::{CipherflowError, Result};

use super::collector::ResultCollector;
use super::dispatcher::{decode_plaintext, DecryptionDispatcher};
use super::negotiator::{KeySwitchNegotiator, Released};
use super::poller::{CancellationFlag, StatusPoller};
use super::post_processor::PostProcessor;

/// Decoded (or failed) outcome of one result.
#[derive(Debug)]
pub struct ResultOutcome {
    pub reference: ResultReference,
    pub result: Result<DecryptedArtifact>,
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: TerminalJob,
    pub results: Vec<ResultOutcome>,
}

impl JobOutcome {
    /// Whether every result was released and decoded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|r| r.result.is_ok())
    }

    pub fn artifacts(&self) -> impl Iterator<Item = (&ResultReference, &DecryptedArtifact)> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().ok().map(|a| (&r.reference, a)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ResultReference, &CipherflowError)> {
        self.results
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (&r.reference, e)))
    }
}

pub struct ComputationRunner<S, E, C>
where
    S: ComputationService + ?Sized,
    E: CryptoEngine + ?Sized,
    C: Clock + ?Sized,
{
    service: Arc<S>,
    poller: StatusPoller<S, C>,
    collector: ResultCollector<S>,
    negotiator: KeySwitchNegotiator<S, E>,
    dispatcher: DecryptionDispatcher<E>,
    post_processor: PostProcessor<E>,
}

impl<S, E, C> ComputationRunner<S, E, C>
where
    S: ComputationService + ?Sized,
    E: CryptoEngine + ?Sized,
    C: Clock + ?Sized,
{
    #[must_use]
    pub fn builder() -> ComputationRunnerBuilder<S, E, C> {
        ComputationRunnerBuilder::new()
    }

    #[must_use]
    pub fn poll_settings(&self) -> &PollSettings {
        self.poller.settings()
    }

    /// Run a job to completion and decode all of its results.
    ///
    /// # Errors
    /// Returns the job-level failure: `Submission`, any polling error, or a
    /// collection error. Per-result failures are inside the `JobOutcome`.
    pub fn run(&self, definition: &JobDefinition) -> Result<JobOutcome> {
        self.run_with_cancel(definition, &CancellationFlag::new())
    }

    /// Same as [`run`](Self::run); `cancel` stops the polling phase early.
    ///
    /// # Errors
    /// See [`run`](Self::run).
    pub fn run_with_cancel(
        &self,
        definition: &JobDefinition,
        cancel: &CancellationFlag,
    ) -> Result<JobOutcome> {
        let handle = self
            .service
            .submit(definition)
            .map_err(CipherflowError::Submission)?;
        tracing::info!(
            "Submitted {} job {} ({} participant(s))",
            definition.computation.kind,
            handle,
            definition.participants.len()
        );

        let job = self.poller.poll_with_cancel(&handle, cancel)?;
        let descriptors = self.collector.collect(&job)?;

        let results: Vec<ResultOutcome> = descriptors
            .iter()
            .map(|descriptor| {
                let result = self.release_result(&job.handle, definition, descriptor);
                if let Err(e) = &result {
                    tracing::error!("Result {} could not be decoded: {}", descriptor.reference, e);
                }
                ResultOutcome {
                    reference: descriptor.reference.clone(),
                    result,
                }
            })
            .collect();

        let decoded = results.iter().filter(|r| r.result.is_ok()).count();
        tracing::info!(
            "Job {} finished: {}/{} result(s) decoded",
            job.handle,
            decoded,
            results.len()
        );

        Ok(JobOutcome { job, results })
    }

    /// Release, decode and post-process a single collected result.
    ///
    /// The ephemeral key (if any) is discarded before post-processing starts.
    ///
    /// # Errors
    /// Any negotiator, dispatcher or post-processor error for this result,
    /// naming both `job` and the result.
    pub fn release_result(
        &self,
        job: &JobHandle,
        definition: &JobDefinition,
        descriptor: &ArtifactDescriptor,
    ) -> Result<DecryptedArtifact> {
        let artifact = match self.negotiator.release(job, descriptor)? {
            Released::Plaintext(payload) => decode_plaintext(job, descriptor, &payload)?,
            Released::Encrypted { artifact, keys } => {
                self.dispatcher.decrypt(job, descriptor, &artifact, &keys)?
            }
        };

        self.post_processor.post_process(
            job,
            &descriptor.reference,
            &definition.computation,
            artifact,
            descriptor.required_post_processing.as_deref(),
        )
    }
}

/// Builder for [`ComputationRunner`].
pub struct ComputationRunnerBuilder<S, E, C>
where
    S: ComputationService + ?Sized,
    E: CryptoEngine + ?Sized,
    C: Clock + ?Sized,
{
    service: Option<Arc<S>>,
    engine: Option<CryptoEngineHandle<E>>,
    clock: Option<Arc<C>>,
    poll_settings: Option<PollSettings>,
}

impl<S, E, C> ComputationRunnerBuilder<S, E, C>
where
    S: ComputationService + ?Sized,
    E: CryptoEngine + ?Sized,
    C: Clock + ?Sized,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            service: None,
            engine: None,
            clock: None,
            poll_settings: None,
        }
    }

    #[must_use]
    pub fn service(mut self, service: Arc<S>) -> Self {
        self.service = Some(service);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: CryptoEngineHandle<E>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<C>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn poll_settings(mut self, settings: PollSettings) -> Self {
        self.poll_settings = Some(settings);
        self
    }

    /// Assemble the pipeline.
    ///
    /// # Errors
    /// Returns `Configuration` if the service, engine or clock is missing, or
    /// the poll settings are invalid.
    pub fn build(self) -> Result<ComputationRunner<S, E, C>> {
        let service = self
            .service
            .ok_or_else(|| CipherflowError::Configuration("computation service is required".into()))?;
        let engine = self
            .engine
            .ok_or_else(|| CipherflowError::Configuration("crypto engine is required".into()))?;
        let clock = self
            .clock
            .ok_or_else(|| CipherflowError::Configuration("clock is required".into()))?;

        Ok(ComputationRunner {
            poller: StatusPoller::new(
                Arc::clone(&service),
                clock,
                self.poll_settings.unwrap_or_default(),
            )?,
            collector: ResultCollector::new(Arc::clone(&service)),
            negotiator: KeySwitchNegotiator::new(Arc::clone(&service), engine.clone()),
            dispatcher: DecryptionDispatcher::new(engine.clone()),
            post_processor: PostProcessor::new(engine),
            service,
        })
    }
}

impl<S, E, C> Default for ComputationRunnerBuilder<S, E, C>
where
    S: ComputationService + ?Sized,
    E: CryptoEngine + ?Sized,
    C: Clock + ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ComputationDefinition, ContentType, JobStatus, Quantity, StatisticDefinition, StatusReport,
    };
    use crate::ports::ServiceError;
    use crate::test_support::{ManualClock, RecordingEngine, ScriptedService};
    use std::time::Duration;

    fn runner(
        service: &Arc<ScriptedService>,
        engine: &Arc<RecordingEngine>,
        clock: &Arc<ManualClock>,
    ) -> ComputationRunner<ScriptedService, RecordingEngine, ManualClock> {
        ComputationRunner::builder()
            .service(Arc::clone(service))
            .engine(CryptoEngineHandle::new(Arc::clone(engine)))
            .clock(Arc::clone(clock))
            .poll_settings(PollSettings::new(
                Duration::from_secs(60),
                Duration::from_millis(100),
                Duration::from_secs(5),
            ))
            .build()
            .expect("runner")
    }

    fn dp_job() -> JobDefinition {
        JobDefinition::new(
            ComputationDefinition::new("datasetStatistics")
                .with_statistic(StatisticDefinition::new("age", "age", vec![Quantity::Mean]))
                .with_statistic(StatisticDefinition::new(
                    "weight",
                    "weight",
                    vec![Quantity::Variance],
                ))
                .with_dp(1.0),
        )
    }

    fn refs(ids: &[&str]) -> Vec<ResultReference> {
        ids.iter().map(|id| ResultReference::new(*id)).collect()
    }

    #[test]
    fn test_one_failed_result_does_not_hide_the_others() {
        let service = Arc::new(ScriptedService::with_statuses(vec![
            Ok(StatusReport::new(JobStatus::Running)),
            Ok(StatusReport::success(refs(&["plain", "dp", "model"]))),
        ]));
        service.add_descriptor(ArtifactDescriptor::new(
            ResultReference::new("plain"),
            ContentType::Statistics,
        ));
        service.add_raw(
            ResultReference::new("plain"),
            br#"[{"variable":"age","mean":40.0}]"#.to_vec(),
        );
        service.add_descriptor(
            ArtifactDescriptor::new(ResultReference::new("dp"), ContentType::FloatMatrix)
                .encrypted_with("cGFyYW1z")
                .with_post_processing("dp-statistics"),
        );
        service.add_release(ResultReference::new("dp"), vec![9; 16]);
        service.add_descriptor(
            ArtifactDescriptor::new(ResultReference::new("model"), ContentType::Prediction)
                .encrypted_with("cGFyYW1z"),
        );
        service.add_release(ResultReference::new("model"), vec![1; 16]);

        let engine = Arc::new(RecordingEngine::new());
        engine.set_numeric_rows(vec![vec![40.0, 1.0, 70.0, 25.0]]);
        let clock = Arc::new(ManualClock::new());

        let outcome = runner(&service, &engine, &clock)
            .run(&dp_job())
            .expect("job-level success");

        assert_eq!(outcome.job.polls, 2);
        assert_eq!(outcome.results.len(), 3);
        assert!(!outcome.is_complete());

        let ids: Vec<_> = outcome.artifacts().map(|(r, _)| r.as_str()).collect();
        assert_eq!(ids, vec!["plain", "dp"]);

        let DecryptedArtifact::Statistics(dp) = outcome.results[1].result.as_ref().unwrap() else {
            panic!("expected corrected statistics");
        };
        assert_eq!(dp.records[0].mean, Some(40.0));
        assert_eq!(dp.records[1].mean, None);
        assert_eq!(dp.records[1].std_dev, Some(5.0));

        let failures: Vec<_> = outcome.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.as_str(), "model");
        match failures[0].1 {
            CipherflowError::UnsupportedContentType {
                job,
                result,
                content_type,
            } => {
                assert_eq!(job, &outcome.job.handle.id);
                assert_eq!(job, "job-1");
                assert_eq!(result, "model");
                assert_eq!(*content_type, ContentType::Prediction);
            }
            other => panic!("expected unsupported content type, got {other:?}"),
        }

        // Only the decodable encrypted result gets a key, and it does not
        // outlive its result. The prediction is never released.
        assert_eq!(engine.contexts_created(), 1);
        assert_eq!(engine.contexts_discarded(), 1);
        assert_eq!(service.release_calls(), 1);
    }

    #[test]
    fn test_submission_failure_aborts_before_polling() {
        let service = Arc::new(ScriptedService::with_statuses(vec![Ok(
            StatusReport::success(refs(&["r1"])),
        )]));
        service.fail_submit(ServiceError::Rejected {
            status: 422,
            message: "unknown computation kind".into(),
        });
        let engine = Arc::new(RecordingEngine::new());
        let clock = Arc::new(ManualClock::new());

        let err = runner(&service, &engine, &clock)
            .run(&dp_job())
            .unwrap_err();

        assert!(matches!(
            err,
            CipherflowError::Submission(ServiceError::Rejected { status: 422, .. })
        ));
        assert_eq!(service.submissions().len(), 1);
        assert_eq!(service.status_reads(), 0);
        assert!(clock.sleeps().is_empty());
        assert_eq!(engine.total_calls(), 0);
    }

    #[test]
    fn test_per_result_errors_name_the_job() {
        let service = Arc::new(ScriptedService::with_statuses(vec![Ok(
            StatusReport::success(refs(&["r1"])),
        )]));
        service.add_descriptor(
            ArtifactDescriptor::new(ResultReference::new("r1"), ContentType::FloatMatrix)
                .encrypted_with("cGFyYW1z"),
        );
        service.fail_release(ServiceError::Transport("connection reset".into()));
        let engine = Arc::new(RecordingEngine::new());
        let clock = Arc::new(ManualClock::new());

        let outcome = runner(&service, &engine, &clock)
            .run(&dp_job())
            .expect("job-level success");

        let (_, err) = outcome.failures().next().expect("one failure");
        assert!(matches!(
            err,
            CipherflowError::KeySwitch { job, result, .. } if job == "job-1" && result == "r1"
        ));
        let message = err.to_string();
        assert!(message.contains("job-1"), "{message}");
        assert!(message.contains("r1"), "{message}");
    }

    #[test]
    fn test_plaintext_job_never_touches_engine() {
        let service = Arc::new(ScriptedService::with_statuses(vec![Ok(
            StatusReport::success(refs(&["r1"])),
        )]));
        service.add_descriptor(
            ArtifactDescriptor::new(ResultReference::new("r1"), ContentType::FloatMatrix)
                .with_columns(vec!["n".into()]),
        );
        service.add_raw(ResultReference::new("r1"), b"[[12.0],[30.0]]".to_vec());
        let engine = Arc::new(RecordingEngine::new());
        let clock = Arc::new(ManualClock::new());

        let outcome = runner(&service, &engine, &clock)
            .run(&JobDefinition::new(ComputationDefinition::new("aggregate")))
            .expect("run");

        assert!(outcome.is_complete());
        assert_eq!(engine.total_calls(), 0);
        assert!(service.released_keys().is_empty());
        assert_eq!(service.submissions().len(), 1);
    }

    #[test]
    fn test_job_failure_aborts_run() {
        let service = Arc::new(ScriptedService::with_statuses(vec![Ok(
            StatusReport::failed("quota exceeded"),
        )]));
        let engine = Arc::new(RecordingEngine::new());
        let clock = Arc::new(ManualClock::new());

        let err = runner(&service, &engine, &clock)
            .run(&dp_job())
            .unwrap_err();
        assert!(matches!(err, CipherflowError::JobExecution { ref message, .. } if message == "quota exceeded"));
    }

    #[test]
    fn test_collection_failure_aborts_run() {
        let service = Arc::new(ScriptedService::with_statuses(vec![Ok(
            StatusReport::success(refs(&["r1", "r2"])),
        )]));
        service.add_descriptor(ArtifactDescriptor::new(
            ResultReference::new("r1"),
            ContentType::Statistics,
        ));
        let engine = Arc::new(RecordingEngine::new());
        let clock = Arc::new(ManualClock::new());

        let err = runner(&service, &engine, &clock)
            .run(&dp_job())
            .unwrap_err();
        assert!(matches!(err, CipherflowError::ResultCollection { .. }));
        assert_eq!(service.raw_fetches(), 0);
    }

    #[test]
    fn test_builder_requires_service_and_engine() {
        let engine = Arc::new(RecordingEngine::new());
        let clock = Arc::new(ManualClock::new());

        let missing_service = ComputationRunner::<ScriptedService, RecordingEngine, ManualClock>::builder()
            .engine(CryptoEngineHandle::new(Arc::clone(&engine)))
            .clock(Arc::clone(&clock))
            .build();
        assert!(matches!(missing_service, Err(CipherflowError::Configuration(_))));

        let missing_engine = ComputationRunner::<ScriptedService, RecordingEngine, ManualClock>::builder()
            .service(Arc::new(ScriptedService::default()))
            .clock(clock)
            .build();
        assert!(matches!(missing_engine, Err(CipherflowError::Configuration(_))));
    }
}
