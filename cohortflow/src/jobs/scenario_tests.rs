//! End-to-end lifecycle scenarios across registry, resolver, aggregator and
//! the job manager.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    use crate::aggregator::{aggregate, CohortSummary};
    use crate::config::{OrchestratorConfig, ProgressMode};
    use crate::core::{CohortStatus, JobAction, JobStatus, StageId, StageStatus};
    use crate::errors::{CohortflowError, EntityKind};
    use crate::events::CollectingEventSink;
    use crate::jobs::{
        EngineSignal, JobLifecycleManager, MockProcessingEngine, CANCELED_BY_USER,
    };
    use crate::model::{Cohort, CohortId, Job, JobId};
    use crate::registry::{CohortRegistry, CohortSpec};
    use crate::resolver;

    struct Harness {
        manager: Arc<JobLifecycleManager>,
        sink: Arc<CollectingEventSink>,
    }

    impl Harness {
        fn new(config: OrchestratorConfig) -> Self {
            let sink = Arc::new(CollectingEventSink::new());
            let manager = JobLifecycleManager::builder(Arc::new(CohortRegistry::new()))
                .config(config)
                .event_sink(sink.clone())
                .build()
                .unwrap();
            Self { manager, sink }
        }

        /// External progress with a fixed tick step, so ticks are manual and exact.
        fn manual(step: u8) -> Self {
            Self::new(
                OrchestratorConfig::default()
                    .with_progress_mode(ProgressMode::External)
                    .with_tick_step(step),
            )
        }

        fn cohort(&self, deidentify: bool) -> CohortId {
            self.manager
                .registry()
                .register(CohortSpec::new("study").with_deidentify(deidentify))
                .unwrap()
                .id
        }

        fn snapshot(&self, cohort_id: CohortId) -> Cohort {
            let cohort = self.manager.registry().get(cohort_id).unwrap();
            assert_invariants(&cohort);
            cohort
        }

        fn start(&self, cohort_id: CohortId, stage: StageId) -> JobId {
            let stage = self.manager.start_stage(cohort_id, stage, None).unwrap();
            stage.job_id.unwrap()
        }

        fn tick_until_done(&self, job_id: JobId) -> Job {
            for _ in 0..200 {
                let job = self.manager.tick(job_id).unwrap();
                if job.status != JobStatus::Running {
                    return job;
                }
            }
            panic!("job {job_id} never finished");
        }

        fn complete(&self, cohort_id: CohortId, stage: StageId) {
            let job_id = self.start(cohort_id, stage);
            self.tick_until_done(job_id);
        }
    }

    fn assert_invariants(cohort: &Cohort) {
        assert!(
            resolver::dependencies_hold(&cohort.stages),
            "dependency invariant broken: {:?}",
            cohort.stages.iter().map(|s| (s.id, s.status)).collect::<Vec<_>>()
        );
        for stage in &cohort.stages {
            assert!(stage.progress_is_consistent(), "inconsistent progress: {stage:?}");
            assert_eq!(stage.status.has_live_job(), stage.job_id.is_some());
        }
        assert!(cohort.live_jobs().len() <= 1);
        assert_eq!(
            aggregate(&cohort.stages, cohort.percentage),
            CohortSummary {
                status: cohort.status,
                percentage: cohort.percentage,
            }
        );
    }

    #[test]
    fn test_happy_path() {
        let h = Harness::manual(20);
        let cohort_id = h.cohort(false);

        let stage = h.manager.start_stage(cohort_id, StageId::Extract, None).unwrap();
        assert_eq!(stage.status, StageStatus::Running);
        assert_eq!(stage.progress, 1);
        assert_eq!(stage.runs.len(), 1);
        let job_id = stage.job_id.unwrap();

        let job = h.manager.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 1);
        assert_eq!(h.snapshot(cohort_id).status, CohortStatus::Running);

        let job = h.tick_until_done(job_id);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.finished_at.is_some());

        let cohort = h.snapshot(cohort_id);
        let extract = cohort.stage(StageId::Extract).unwrap();
        assert_eq!(extract.status, StageStatus::Completed);
        assert_eq!(extract.progress, 100);
        assert!(extract.job_id.is_none());
        assert_eq!(extract.last_job_id, Some(job_id));
        let run = extract.last_run().unwrap();
        assert_eq!(run.status, StageStatus::Completed);
        assert!(run.finished_at.is_some());

        assert_eq!(cohort.stage(StageId::Sort).unwrap().status, StageStatus::Pending);
        assert_eq!(cohort.stage(StageId::Convert).unwrap().status, StageStatus::Blocked);
        assert_eq!(cohort.percentage, 33);

        let types = h.sink.event_types();
        assert_eq!(types.first().map(String::as_str), Some("job.started"));
        assert!(types.iter().any(|t| t == "job.completed"));
        assert_eq!(h.sink.events_of_type("stage.unblocked").len(), 1);
    }

    #[test]
    fn test_full_pipeline_completes_cohort() {
        let h = Harness::manual(25);
        let cohort_id = h.cohort(true);

        for stage in StageId::ALL {
            h.complete(cohort_id, stage);
        }

        let cohort = h.snapshot(cohort_id);
        assert_eq!(cohort.status, CohortStatus::Completed);
        assert_eq!(cohort.percentage, 100);
        assert_eq!(h.manager.jobs_for_cohort(cohort_id).len(), 4);
    }

    #[test]
    fn test_pause_and_resume() {
        let h = Harness::manual(13);
        let cohort_id = h.cohort(false);
        let job_id = h.start(cohort_id, StageId::Extract);

        for _ in 0..3 {
            h.manager.tick(job_id).unwrap();
        }
        assert_eq!(h.manager.get_job(job_id).unwrap().progress, 40);

        let job = h.manager.pause(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.progress, 40);
        let stage = h.snapshot(cohort_id).stage(StageId::Extract).cloned().unwrap();
        assert_eq!(stage.status, StageStatus::Paused);
        assert_eq!(stage.progress, 40);

        // In-flight tick and repeated pause leave the job untouched.
        assert_eq!(h.manager.tick(job_id).unwrap().progress, 40);
        assert_eq!(h.manager.pause(job_id).unwrap(), job);
        assert_eq!(h.sink.events_of_type("job.paused").len(), 1);

        let job = h.manager.resume(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 40);
        assert_eq!(h.manager.resume(job_id).unwrap(), job);
        assert_eq!(h.sink.events_of_type("job.resumed").len(), 1);

        let job = h.tick_until_done(job_id);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            h.snapshot(cohort_id).stage(StageId::Extract).unwrap().status,
            StageStatus::Completed
        );
    }

    #[test]
    fn test_cancel_then_retry() {
        let h = Harness::manual(19);
        let cohort_id = h.cohort(false);
        h.complete(cohort_id, StageId::Extract);

        let job_id = h.start(cohort_id, StageId::Sort);
        h.manager.tick(job_id).unwrap();
        assert_eq!(h.manager.get_job(job_id).unwrap().progress, 20);

        let canceled = h.manager.cancel(job_id).unwrap();
        assert_eq!(canceled.status, JobStatus::Canceled);
        assert_eq!(canceled.error.as_deref(), Some(CANCELED_BY_USER));

        let cohort = h.snapshot(cohort_id);
        let sort = cohort.stage(StageId::Sort).unwrap();
        assert_eq!(sort.status, StageStatus::Failed);
        assert!(sort.job_id.is_none());
        assert_eq!(sort.last_run().unwrap().status, StageStatus::Failed);
        assert_eq!(sort.last_run().unwrap().error.as_deref(), Some(CANCELED_BY_USER));
        assert_eq!(cohort.stage(StageId::Convert).unwrap().status, StageStatus::Blocked);
        assert_eq!(cohort.stage(StageId::Extract).unwrap().status, StageStatus::Completed);
        assert_eq!(cohort.status, CohortStatus::Failed);

        let retried = h.manager.job_action(job_id, JobAction::Retry).unwrap();
        assert!(retried.id != job_id);
        assert_eq!(retried.retry_of, Some(job_id));
        assert_eq!(retried.status, JobStatus::Running);
        assert_eq!(retried.progress, 1);

        let cohort = h.snapshot(cohort_id);
        let sort = cohort.stage(StageId::Sort).unwrap();
        assert_eq!(sort.status, StageStatus::Running);
        assert_eq!(sort.job_id, Some(retried.id));
        assert_eq!(sort.runs.len(), 2);
        assert_eq!(cohort.status, CohortStatus::Running);

        // The canceled job stays queryable with its message.
        let old = h.manager.get_job(job_id).unwrap();
        assert_eq!(old.status, JobStatus::Canceled);
        assert_eq!(old.error.as_deref(), Some(CANCELED_BY_USER));
    }

    #[test]
    fn test_failure_is_visible() {
        let h = Harness::manual(50);
        let cohort_id = h.cohort(false);
        h.complete(cohort_id, StageId::Extract);
        let job_id = h.start(cohort_id, StageId::Sort);
        let before = h.snapshot(cohort_id).percentage;

        let job = h.manager.on_failed(job_id, "classifier crashed").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("classifier crashed"));

        let cohort = h.snapshot(cohort_id);
        assert_eq!(cohort.status, CohortStatus::Failed);
        assert_eq!(cohort.percentage, before);
        assert!(cohort.stages.iter().all(|s| s.status != StageStatus::Running));
        assert_eq!(h.sink.events_of_type("cohort.status_changed").len(), 4);
    }

    #[test]
    fn test_deidentify_disabled() {
        let h = Harness::manual(50);
        let cohort_id = h.cohort(false);
        let cohort = h.snapshot(cohort_id);

        assert_eq!(cohort.stages[0].id, StageId::Extract);
        assert_eq!(cohort.stages[0].status, StageStatus::Pending);
        assert!(cohort.stage_ids().iter().all(|id| *id != StageId::Deidentify));

        let err = h
            .manager
            .start_stage(cohort_id, StageId::Deidentify, None)
            .unwrap_err();
        assert!(matches!(err, CohortflowError::NotFound { kind: EntityKind::Stage, .. }));
    }

    #[test]
    fn test_start_stage_guards() {
        let h = Harness::manual(10);
        let cohort_id = h.cohort(true);

        let err = h.manager.start_stage(cohort_id, StageId::Sort, None).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");

        let first = h.manager.start_stage(cohort_id, StageId::Deidentify, None).unwrap();
        let again = h.manager.start_stage(cohort_id, StageId::Deidentify, None).unwrap();
        assert_eq!(again.job_id, first.job_id);
        assert_eq!(h.manager.list_jobs().len(), 1);

        h.manager.pause(first.job_id.unwrap()).unwrap();
        let err = h.manager.start_stage(cohort_id, StageId::Deidentify, None).unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let err = h.manager.start_stage(CohortId::nil(), StageId::Extract, None).unwrap_err();
        assert!(matches!(err, CohortflowError::NotFound { kind: EntityKind::Cohort, .. }));
    }

    #[test]
    fn test_rerun_completed_stage_reblocks_downstream() {
        let h = Harness::manual(50);
        let cohort_id = h.cohort(false);
        h.complete(cohort_id, StageId::Extract);
        assert_eq!(h.snapshot(cohort_id).stage(StageId::Sort).unwrap().status, StageStatus::Pending);

        let stage = h.manager.start_stage(cohort_id, StageId::Extract, None).unwrap();
        assert_eq!(stage.progress, 1);
        assert_eq!(stage.runs.len(), 2);

        let cohort = h.snapshot(cohort_id);
        assert_eq!(cohort.stage(StageId::Sort).unwrap().status, StageStatus::Blocked);
        assert_eq!(h.sink.events_of_type("stage.blocked").len(), 1);
    }

    #[test]
    fn test_rerun_upstream_with_completed_downstream() {
        let h = Harness::manual(50);
        let cohort_id = h.cohort(false);
        h.complete(cohort_id, StageId::Extract);
        h.complete(cohort_id, StageId::Sort);
        assert_eq!(
            h.snapshot(cohort_id).stage(StageId::Convert).unwrap().status,
            StageStatus::Pending
        );

        let job_id = h.start(cohort_id, StageId::Extract);
        let cohort = h.snapshot(cohort_id);
        assert_eq!(cohort.stage(StageId::Extract).unwrap().status, StageStatus::Running);
        assert_eq!(cohort.stage(StageId::Sort).unwrap().status, StageStatus::Completed);
        assert_eq!(cohort.stage(StageId::Convert).unwrap().status, StageStatus::Blocked);
        let err = h.manager.start_stage(cohort_id, StageId::Convert, None).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");

        assert_eq!(h.tick_until_done(job_id).status, JobStatus::Completed);
        let cohort = h.snapshot(cohort_id);
        assert_eq!(cohort.stage(StageId::Sort).unwrap().status, StageStatus::Completed);
        assert_eq!(cohort.stage(StageId::Convert).unwrap().status, StageStatus::Pending);
    }

    #[test]
    fn test_start_with_invalid_patch_is_atomic() {
        let h = Harness::manual(10);
        let cohort_id = h.cohort(false);
        let before = h.snapshot(cohort_id);

        let err = h
            .manager
            .start_stage(cohort_id, StageId::Extract, Some(&serde_json::json!("not an object")))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_config");

        assert_eq!(h.snapshot(cohort_id), before);
        assert!(h.manager.list_jobs().is_empty());
        assert!(h.sink.is_empty());
    }

    #[test]
    fn test_start_patch_is_snapshotted_in_run() {
        let h = Harness::manual(10);
        let cohort_id = h.cohort(false);

        let stage = h
            .manager
            .start_stage(
                cohort_id,
                StageId::Extract,
                Some(&serde_json::json!({"concurrency": 16})),
            )
            .unwrap();

        let snapshot = serde_json::to_value(&stage.runs[0].config).unwrap();
        assert_eq!(snapshot["concurrency"], serde_json::json!(16));
        assert_eq!(stage.runs[0].config, stage.config);
        let job = h.manager.get_job(stage.job_id.unwrap()).unwrap();
        assert_eq!(job.config, stage.config);
    }

    #[test]
    fn test_invalid_job_transitions() {
        let h = Harness::manual(50);
        let cohort_id = h.cohort(false);
        let job_id = h.start(cohort_id, StageId::Extract);

        let err = h.manager.retry(job_id).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");

        h.tick_until_done(job_id);
        for action in [JobAction::Pause, JobAction::Resume, JobAction::Cancel] {
            let err = assert_err!(h.manager.job_action(job_id, action));
            assert_eq!(err.kind(), "invalid_transition", "{action}");
        }
        assert_eq!(h.manager.tick(job_id).unwrap_err().kind(), "invalid_transition");
        assert_eq!(h.manager.get_job(JobId::nil()).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_engine_signals_respect_job_transitions() {
        let h = Harness::manual(10);
        let cohort_id = h.cohort(false);
        let job_id = h.start(cohort_id, StageId::Extract);

        h.manager.pause(job_id).unwrap();
        let err = h.manager.on_completed(job_id, None).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(h.manager.get_job(job_id).unwrap().status, JobStatus::Paused);

        let failed = assert_ok!(h.manager.on_failed(job_id, "engine lost"));
        assert_eq!(failed.status, JobStatus::Failed);
        for err in [
            h.manager.on_failed(job_id, "again").unwrap_err(),
            h.manager.on_completed(job_id, None).unwrap_err(),
            h.manager.cancel(job_id).unwrap_err(),
            h.manager.pause(job_id).unwrap_err(),
        ] {
            assert_eq!(err.kind(), "invalid_transition");
        }
        assert_eq!(h.snapshot(cohort_id).status, CohortStatus::Failed);
    }

    #[test]
    fn test_retry_of_superseded_job_conflicts() {
        let h = Harness::manual(10);
        let cohort_id = h.cohort(false);
        let first = h.start(cohort_id, StageId::Extract);

        h.manager.cancel(first).unwrap();
        let second = h.manager.retry(first).unwrap();
        h.manager.cancel(second.id).unwrap();

        let err = h.manager.retry(first).unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let third = assert_ok!(h.manager.retry(second.id));
        assert_eq!(third.retry_of, Some(second.id));
    }

    #[test]
    fn test_engine_progress_signals() {
        let h = Harness::manual(10);
        let cohort_id = h.cohort(false);
        let job_id = h.start(cohort_id, StageId::Extract);

        assert_eq!(h.manager.on_progress(job_id, 60).unwrap().progress, 60);
        // Lower reports never regress; 100 is held until completion.
        assert_eq!(h.manager.on_progress(job_id, 30).unwrap().progress, 60);
        assert_eq!(h.manager.on_progress(job_id, 100).unwrap().progress, 99);
        assert_eq!(h.manager.get_job(job_id).unwrap().status, JobStatus::Running);

        h.manager.pause(job_id).unwrap();
        let err = h.manager.on_completed(job_id, None).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(h.manager.on_progress(job_id, 10).unwrap().status, JobStatus::Paused);
        h.manager.resume(job_id).unwrap();

        let mut metrics = HashMap::new();
        metrics.insert("files".to_string(), serde_json::json!(1200));
        let job = h.manager.on_completed(job_id, Some(metrics.clone())).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.metrics, Some(metrics));

        let completed = h.sink.events_of_type("job.completed");
        assert_eq!(completed[0].data["metrics"]["files"], serde_json::json!(1200));
        assert_eq!(h.snapshot(cohort_id).stage(StageId::Extract).unwrap().progress, 100);
    }

    #[test]
    fn test_remove_cohort_with_live_job() {
        let h = Harness::manual(10);
        let cohort_id = h.cohort(false);
        let job_id = h.start(cohort_id, StageId::Extract);

        let err = h.manager.remove_cohort(cohort_id).unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(h.manager.list_jobs().len(), 1);

        h.manager.cancel(job_id).unwrap();
        assert_ok!(h.manager.remove_cohort(cohort_id));
        assert!(h.manager.registry().is_empty());
        assert!(h.manager.list_jobs().is_empty());
        assert_eq!(h.manager.active_tickers(), 0);
        assert_eq!(h.manager.get_job(job_id).unwrap_err().kind(), "not_found");
        assert_eq!(h.manager.pause(job_id).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_engine_is_notified_after_commit() {
        let mut engine = MockProcessingEngine::new();
        engine
            .expect_start()
            .withf(|job: &Job| job.stage_id == StageId::Extract && job.status == JobStatus::Running)
            .times(1)
            .return_const(());
        engine.expect_pause().times(1).return_const(());
        engine.expect_resume().times(1).return_const(());
        engine.expect_cancel().times(1).return_const(());

        let manager = JobLifecycleManager::builder(Arc::new(CohortRegistry::new()))
            .config(OrchestratorConfig::default().with_progress_mode(ProgressMode::External))
            .engine(Arc::new(engine))
            .build()
            .unwrap();
        let cohort_id = manager
            .registry()
            .register(CohortSpec::new("mocked").with_deidentify(false))
            .unwrap()
            .id;

        let job_id = manager
            .start_stage(cohort_id, StageId::Extract, None)
            .unwrap()
            .job_id
            .unwrap();
        manager.pause(job_id).unwrap();
        manager.pause(job_id).unwrap();
        manager.resume(job_id).unwrap();
        manager.cancel(job_id).unwrap();
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = JobLifecycleManager::builder(Arc::new(CohortRegistry::new()))
            .config(OrchestratorConfig::default().with_tick_step_range(10, 5))
            .build();
        let err = assert_err!(result);
        assert_eq!(err.kind(), "invalid_request");
        assert!(err.is_client_error());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cohorts() {
        let h = Harness::manual(7);
        let cohort_ids: Vec<CohortId> = (0..8).map(|_| h.cohort(true)).collect();

        let tasks = cohort_ids.iter().map(|&cohort_id| {
            let manager = h.manager.clone();
            tokio::spawn(async move {
                for stage in StageId::ALL {
                    let job_id = manager
                        .start_stage(cohort_id, stage, None)
                        .unwrap()
                        .job_id
                        .unwrap();
                    while manager.tick(job_id).unwrap().status == JobStatus::Running {
                        tokio::task::yield_now().await;
                    }
                }
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        for cohort_id in cohort_ids {
            let cohort = h.snapshot(cohort_id);
            assert_eq!(cohort.status, CohortStatus::Completed);
        }
        assert_eq!(h.manager.list_jobs().len(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_driver_completes_job() {
        let h = Harness::new(
            OrchestratorConfig::default()
                .with_tick_interval_ms(100)
                .with_tick_step(10),
        );
        let cohort_id = h.cohort(false);
        let job_id = h.start(cohort_id, StageId::Extract);
        assert_eq!(h.manager.active_tickers(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;

        let job = h.manager.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.manager.active_tickers(), 0);
        assert_eq!(h.snapshot(cohort_id).stage(StageId::Sort).unwrap().status, StageStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_driver_stops_on_pause() {
        let h = Harness::new(
            OrchestratorConfig::default()
                .with_tick_interval_ms(100)
                .with_tick_step(10),
        );
        let cohort_id = h.cohort(false);
        let job_id = h.start(cohort_id, StageId::Extract);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let paused = h.manager.pause(job_id).unwrap();
        assert!(paused.progress > 1);
        assert_eq!(h.manager.active_tickers(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.manager.get_job(job_id).unwrap().progress, paused.progress);

        h.manager.resume(job_id).unwrap();
        assert_eq!(h.manager.active_tickers(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.manager.get_job(job_id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_signal_listener_applies_signals() {
        let h = Harness::manual(10);
        let cohort_id = h.cohort(false);
        let job_id = h.start(cohort_id, StageId::Extract);

        let (tx, rx) = mpsc::channel(8);
        let listener = h.manager.spawn_signal_listener(rx);

        tx.send(EngineSignal::Progress { job_id, progress: 50 }).await.unwrap();
        // Rejected signals are skipped without stopping the listener.
        tx.send(EngineSignal::Progress { job_id: JobId::nil(), progress: 10 })
            .await
            .unwrap();
        tx.send(EngineSignal::Completed { job_id, metrics: None }).await.unwrap();
        drop(tx);
        listener.await.unwrap();

        let job = h.manager.get_job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.sink.events_of_type("job.progress").len(), 1);
    }
}
