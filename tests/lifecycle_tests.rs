
use serde_json::{json, Value};

use batch_agent::error::JobError;
use batch_agent::lifecycle::{JobController, JobSpec, SourceOrigin, SubmitJobRequest};

use test_harness::{job_id, FakeFetcher, FakeScheduler, JobsRoot};

fn spec(body: Value) -> JobSpec {
    let request: SubmitJobRequest = serde_json::from_value(body).unwrap();
    JobSpec::try_from(request).unwrap()
}

fn submission(id: &str) -> Value {
    json!({
        "Job_id": id,
        "Job_name": "resnet-train",
        "github_url": "https://github.com/acme/resnet.git",
        "user_name": "alice",
        "cpu_request": 4,
        "memory_request": 16,
        "user_email": "alice@example.com"
    })
}

#[tokio::test]
async fn submit_fetches_and_hands_script_to_scheduler() {
    let root = JobsRoot::new();
    let fetcher = FakeFetcher::with_files(&[("run.sh", "#!/bin/bash\r\npython train.py\r\n")]);
    let scheduler = FakeScheduler::new();
    let controller = JobController::new(root.index.clone(), fetcher.clone(), scheduler.clone());

    let handle = controller.submit(spec(submission("42"))).await.unwrap();

    assert_eq!(handle.job_id.as_str(), "42");
    assert_eq!(handle.scheduler_job_id.as_deref(), Some("1001"));
    assert!(handle.scheduler_output.contains("Submitted batch job 1001"));

    let submits = scheduler.submits();
    assert_eq!(submits.len(), 1);
    let request = &submits[0];
    assert_eq!(request.script, "run.sh");
    assert_eq!(request.work_dir, root.path().join("42"));
    assert_eq!(request.job_name, "resnet-train");
    assert_eq!(request.requester, "alice");
    assert_eq!(request.resources.cpus, 4);
    assert_eq!(request.resources.memory_gb, 16);
    assert_eq!(request.resources.gpus, 0);

    assert_eq!(
        fetcher.origins(),
        vec![SourceOrigin::Repository {
            url: "https://github.com/acme/resnet.git".to_string()
        }]
    );
    let script = std::fs::read_to_string(root.path().join("42").join("run.sh")).unwrap();
    assert_eq!(script, "#!/bin/bash\npython train.py\n");
}

#[tokio::test]
async fn gpu_request_is_forwarded() {
    let root = JobsRoot::new();
    let scheduler = FakeScheduler::new();
    let controller = JobController::new(
        root.index.clone(),
        FakeFetcher::with_files(&[("main.sh", "")]),
        scheduler.clone(),
    );

    let mut body = submission("43");
    body["gpu_request"] = json!(2);
    controller.submit(spec(body)).await.unwrap();

    let submits = scheduler.submits();
    assert_eq!(submits[0].resources.gpus, 2);
    assert_eq!(submits[0].script, "main.sh");
}

#[tokio::test]
async fn resubmission_replaces_previous_folder() {
    let root = JobsRoot::new();
    root.add_job("42", &[("run.sh", ""), ("stale-output.log", "old")]);
    let controller = JobController::new(
        root.index.clone(),
        FakeFetcher::with_files(&[("run.sh", "echo new\n")]),
        FakeScheduler::new(),
    );

    controller.submit(spec(submission("42"))).await.unwrap();

    assert!(!root.path().join("42").join("stale-output.log").exists());
    assert!(root.path().join("42").join("run.sh").exists());
}

#[tokio::test]
async fn fetch_failure_keeps_partial_folder() {
    let root = JobsRoot::new();
    let scheduler = FakeScheduler::new();
    let controller = JobController::new(
        root.index.clone(),
        FakeFetcher::failing("fatal: repository not found"),
        scheduler.clone(),
    );

    let err = controller.submit(spec(submission("42"))).await.unwrap_err();

    match err {
        JobError::FetchFailed(details) => assert!(details.contains("repository not found")),
        other => panic!("expected FetchFailed, got {:?}", other),
    }
    assert!(root.path().join("42").join("partial.txt").exists());
    assert!(scheduler.submits().is_empty());
}

#[tokio::test]
async fn scheduler_rejection_keeps_folder() {
    let root = JobsRoot::new();
    let scheduler = FakeScheduler::new();
    scheduler.fail_submissions("sbatch: error: invalid partition specified");
    let controller = JobController::new(
        root.index.clone(),
        FakeFetcher::with_files(&[("run.sh", "")]),
        scheduler,
    );

    let err = controller.submit(spec(submission("42"))).await.unwrap_err();

    assert_eq!(err.category(), "submit_failed");
    assert!(err.details().contains("invalid partition"));
    assert!(root.path().join("42").join("run.sh").exists());
}

#[tokio::test]
async fn source_without_script_is_rejected() {
    let root = JobsRoot::new();
    let scheduler = FakeScheduler::new();
    let controller = JobController::new(
        root.index.clone(),
        FakeFetcher::with_files(&[("README.md", "# nothing to run")]),
        scheduler.clone(),
    );

    let err = controller.submit(spec(submission("42"))).await.unwrap_err();

    assert_eq!(err.category(), "invalid_request");
    assert!(err.details().contains("No shell script found"));
    assert!(root.path().join("42").join("README.md").exists());
    assert!(scheduler.submits().is_empty());
}

#[tokio::test]
async fn nested_archive_layout_runs_from_subfolder() {
    let root = JobsRoot::new();
    let scheduler = FakeScheduler::new();
    let controller = JobController::new(
        root.index.clone(),
        FakeFetcher::with_files(&[("resnet-main/start.sh", ""), ("resnet-main/data.csv", "")]),
        scheduler.clone(),
    );

    let mut body = submission("44");
    body["github_url"] = json!("https://files.example.com/resnet.zip");
    controller.submit(spec(body)).await.unwrap();

    let submits = scheduler.submits();
    assert_eq!(submits[0].work_dir, root.path().join("44").join("resnet-main"));
    assert_eq!(submits[0].script, "start.sh");
}

#[tokio::test]
async fn cancel_is_passed_through_without_local_check() {
    let root = JobsRoot::new();
    let scheduler = FakeScheduler::new();
    let controller = JobController::new(
        root.index.clone(),
        FakeFetcher::with_files(&[]),
        scheduler.clone(),
    );

    controller.cancel(&job_id("987")).await.unwrap();

    assert_eq!(scheduler.cancels(), vec!["987".to_string()]);
    assert!(!root.path().join("987").exists());
}

#[tokio::test]
async fn cancel_refusal_is_reported() {
    let root = JobsRoot::new();
    let scheduler = FakeScheduler::new();
    scheduler.fail_cancels("scancel: error: Invalid job id specified");
    let controller = JobController::new(
        root.index.clone(),
        FakeFetcher::with_files(&[]),
        scheduler.clone(),
    );

    let err = controller.cancel(&job_id("987")).await.unwrap_err();

    assert_eq!(err.category(), "cancel_failed");
    assert_eq!(err.details(), "scancel: error: Invalid job id specified");
}
