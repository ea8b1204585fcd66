use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tubedrop_core::Tubedrop;
use tubedrop_core::artifacts::ArtifactConfig;
use tubedrop_core::executor::{Completion, Launcher, OutputLine, ProcessHandle};
use tubedrop_core::hub::Subscription;
use tubedrop_core::jobs::{JobConfig, JobState};
use tubedrop_core::model::{JobId, JobRequest, Notification, NotificationPayload};

type Script = dyn Fn(&str) -> (Vec<OutputLine>, Completion) + Send + Sync;

/// Plays a script instead of running yt-dlp, and records every launch.
struct ScriptedLauncher {
    script: Box<Script>,
    launches: AtomicUsize,
    args: Mutex<Vec<Vec<String>>>,
}

impl ScriptedLauncher {
    fn new(script: impl Fn(&str) -> (Vec<OutputLine>, Completion) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            launches: AtomicUsize::new(0),
            args: Mutex::new(Vec::new()),
        })
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn last_args(&self) -> Vec<String> {
        self.args.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, _program: &Path, args: &[String]) -> ProcessHandle {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.args.lock().unwrap().push(args.to_vec());

        let template = args
            .iter()
            .position(|arg| arg == "-o")
            .and_then(|index| args.get(index + 1))
            .cloned()
            .unwrap_or_default();
        let (lines, completion) = (self.script)(&template);
        ProcessHandle::scripted(lines, completion)
    }
}

fn output(template: &str, extension: &str) -> PathBuf {
    PathBuf::from(template.replace("%(ext)s", extension))
}

fn service(launcher: Arc<ScriptedLauncher>, dir: &Path) -> Tubedrop {
    service_with(launcher, dir, JobConfig::default())
}

fn service_with(launcher: Arc<ScriptedLauncher>, dir: &Path, config: JobConfig) -> Tubedrop {
    let artifacts = ArtifactConfig::new(Duration::from_secs(3600), Duration::from_secs(24 * 3600));
    Tubedrop::with_launcher(launcher, dir, config, artifacts).unwrap()
}

/// Receives the notifications of `job_id` up to and including its terminal one.
async fn until_terminal(subscription: &mut Subscription, job_id: JobId) -> Vec<Notification> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(notification) = subscription.recv().await {
            if notification.job_id != job_id {
                continue;
            }
            let terminal = notification.is_terminal();
            received.push(notification);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("job did not finish in time");
    received
}

/// Asserts that nothing else is published for `job_id`.
async fn assert_silent(subscription: &mut Subscription, job_id: JobId) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Some(notification) = subscription.try_recv() {
        assert_ne!(notification.job_id, job_id, "late notification: {:?}", notification);
    }
}

fn percents(notifications: &[Notification]) -> Vec<f64> {
    notifications
        .iter()
        .filter_map(|notification| match &notification.payload {
            NotificationPayload::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn audio_job_completes_and_serves_the_mp3() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|template| {
        let source = output(template, "webm");
        let target = output(template, "mp3");
        std::fs::write(&target, b"ID3 fake mp3").unwrap();

        let lines = vec![
            OutputLine::stdout("[youtube] abc12345678: Downloading webpage"),
            OutputLine::stdout(format!("[download] Destination: {}", source.display())),
            OutputLine::stdout("[download]   0.0% of    3.00MiB at  Unknown B/s ETA Unknown"),
            OutputLine::stdout("[download]  37.5% of    3.00MiB at    1.00MiB/s ETA 00:02"),
            OutputLine::stdout("[download]  88.2% of    3.00MiB at    1.20MiB/s ETA 00:00"),
            OutputLine::stdout("[download] 100% of    3.00MiB in 00:00:02 at 1.40MiB/s"),
            OutputLine::stdout(format!("[ExtractAudio] Destination: {}", target.display())),
            OutputLine::stdout(format!(
                "Deleting original file {} (pass -k to keep)",
                source.display()
            )),
        ];
        (lines, Ok(0))
    });
    let service = service(launcher.clone(), dir.path());
    let mut subscription = service.subscribe();

    let job_id = service
        .submit(JobRequest::new("https://youtu.be/abc12345678", "audio", "192"))
        .await
        .unwrap();
    let notifications = until_terminal(&mut subscription, job_id).await;

    let reported = percents(&notifications);
    assert_eq!(reported, vec![0.0, 37.5, 88.2, 100.0]);
    assert!(reported.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(
        notifications.iter().filter(|n| n.is_terminal()).count(),
        1
    );

    let (fetch_ref, filename) = match &notifications.last().unwrap().payload {
        NotificationPayload::Complete {
            fetch_ref,
            download_url,
            filename,
        } => {
            assert_eq!(download_url, &format!("/api/file/{}", fetch_ref));
            (*fetch_ref, filename.clone())
        }
        other => panic!("unexpected terminal notification: {:?}", other),
    };
    assert!(filename.ends_with(".mp3"));
    assert_eq!(filename, format!("{}.mp3", job_id));

    let args = launcher.last_args();
    assert!(args.windows(2).any(|pair| pair == ["--audio-quality", "192"]));
    assert_eq!(args.last().unwrap(), "https://youtu.be/abc12345678");

    match service.jobs.wait_for_completion(job_id).await {
        Some(JobState::Completed { filename: name, .. }) => assert_eq!(name, filename),
        other => panic!("unexpected state: {:?}", other),
    }

    let mut artifact = service.fetch(&fetch_ref).await.unwrap();
    let mut content = Vec::new();
    artifact.file.read_to_end(&mut content).await.unwrap();
    assert_eq!(content, b"ID3 fake mp3");

    assert_silent(&mut subscription, job_id).await;
}

#[tokio::test]
async fn video_job_uses_the_merged_file() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|template| {
        let merged = output(template, "mp4");
        std::fs::write(&merged, b"merged").unwrap();

        let lines = vec![
            OutputLine::stdout(format!(
                "[download] Destination: {}",
                output(template, "f137.mp4").display()
            )),
            OutputLine::stdout("[download] 100% of   10.00MiB in 00:00:03"),
            OutputLine::stdout(format!(
                "[download] Destination: {}",
                output(template, "f251.webm").display()
            )),
            OutputLine::stdout("[download]  50.0% of    1.00MiB"),
            OutputLine::stdout(format!(
                "[Merger] Merging formats into \"{}\"",
                merged.display()
            )),
        ];
        (lines, Ok(0))
    });
    let service = service(launcher.clone(), dir.path());
    let mut subscription = service.subscribe();

    let job_id = service
        .submit(JobRequest::new(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "video",
            "720p",
        ))
        .await
        .unwrap();
    let notifications = until_terminal(&mut subscription, job_id).await;

    // The second stream starts over at 0%, which is never reported.
    assert_eq!(percents(&notifications), vec![100.0]);
    match &notifications.last().unwrap().payload {
        NotificationPayload::Complete { filename, .. } => {
            assert_eq!(filename, &format!("{}.mp4", job_id))
        }
        other => panic!("unexpected terminal notification: {:?}", other),
    }

    let args = launcher.last_args();
    assert!(args.contains(&"bestvideo[height<=720]+bestaudio/best[height<=720]".to_string()));
}

#[tokio::test]
async fn nonzero_exit_fails_once_and_removes_partial_files() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|template| {
        let partial = output(template, "webm.part");
        std::fs::write(&partial, b"half").unwrap();

        let lines = vec![
            OutputLine::stdout(format!("[download] Destination: {}", partial.display())),
            OutputLine::stdout("[download]  10.0% of 5.00MiB"),
            OutputLine::stdout("[download]  20.0% of 5.00MiB"),
        ];
        (lines, Ok(1))
    });
    let service = service(launcher, dir.path());
    let mut subscription = service.subscribe();

    let job_id = service
        .submit(JobRequest::new("https://youtu.be/abc12345678", "video", "best"))
        .await
        .unwrap();
    let notifications = until_terminal(&mut subscription, job_id).await;

    assert_eq!(percents(&notifications), vec![10.0, 20.0]);
    match &notifications.last().unwrap().payload {
        NotificationPayload::Error { error } => assert!(error.contains("exit code 1")),
        other => panic!("unexpected terminal notification: {:?}", other),
    }
    assert_silent(&mut subscription, job_id).await;

    assert!(matches!(
        service.jobs.wait_for_completion(job_id).await,
        Some(JobState::Failed { .. })
    ));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(service.artifacts.is_empty());
}

#[tokio::test]
async fn tool_error_line_fails_the_job_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|_| {
        let lines = vec![
            OutputLine::stdout("[download]   5.0% of 5.00MiB"),
            OutputLine::stderr("ERROR: [youtube] abc12345678: Video unavailable"),
            OutputLine::stdout("[download]  50.0% of 5.00MiB"),
            OutputLine::stderr("ERROR: something else failed"),
        ];
        (lines, Ok(1))
    });
    let service = service(launcher, dir.path());
    let mut subscription = service.subscribe();

    let job_id = service
        .submit(JobRequest::new("https://youtu.be/abc12345678", "audio", "5"))
        .await
        .unwrap();
    let notifications = until_terminal(&mut subscription, job_id).await;

    assert_eq!(percents(&notifications), vec![5.0]);
    assert_eq!(
        notifications.last().unwrap().payload,
        NotificationPayload::Error {
            error: "ERROR: [youtube] abc12345678: Video unavailable".to_string()
        }
    );
    assert_silent(&mut subscription, job_id).await;
}

#[tokio::test]
async fn benign_stderr_prefixes_do_not_fail_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|template| {
        std::fs::write(output(template, "mp3"), b"x").unwrap();
        let lines = vec![
            OutputLine::stderr("WARNING: [youtube] nsig extraction failed, some formats may be missing"),
            OutputLine::stdout("[download] 100% of 1.00MiB in 00:00:01"),
        ];
        (lines, Ok(0))
    });
    let config = JobConfig {
        benign_stderr_prefixes: vec!["WARNING:".to_string()],
        ..JobConfig::default()
    };
    let service = service_with(launcher, dir.path(), config);

    let job_id = service
        .submit(JobRequest::new("https://youtu.be/abc12345678", "mp3", "0"))
        .await
        .unwrap();

    assert!(matches!(
        service.jobs.wait_for_completion(job_id).await,
        Some(JobState::Completed { .. })
    ));
}

#[tokio::test]
async fn launch_failure_fails_the_job() {
    struct Missing;
    impl Launcher for Missing {
        fn launch(&self, program: &Path, _args: &[String]) -> ProcessHandle {
            ProcessHandle::launch_failed(program, "No such file or directory")
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let service = Tubedrop::with_launcher(
        Arc::new(Missing),
        dir.path(),
        JobConfig::default(),
        ArtifactConfig::default(),
    )
    .unwrap();
    let mut subscription = service.subscribe();

    let job_id = service
        .submit(JobRequest::new("https://youtu.be/abc12345678", "audio", "192"))
        .await
        .unwrap();
    let notifications = until_terminal(&mut subscription, job_id).await;

    assert_eq!(notifications.len(), 1);
    match &notifications[0].payload {
        NotificationPayload::Error { error } => assert!(error.contains("Failed to launch")),
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn successful_exit_without_a_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|_| {
        (
            vec![OutputLine::stdout("[download] 100% of 1.00MiB in 00:00:01")],
            Ok(0),
        )
    });
    let service = service(launcher, dir.path());

    let job_id = service
        .submit(JobRequest::new("https://youtu.be/abc12345678", "audio", "192"))
        .await
        .unwrap();

    assert_eq!(
        service.jobs.wait_for_completion(job_id).await,
        Some(JobState::Failed {
            reason: "Download completed but file not found".to_string()
        })
    );
}

#[tokio::test]
async fn progress_never_goes_backwards() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|template| {
        std::fs::write(output(template, "mp4"), b"x").unwrap();
        let lines = ["10.0", "50.0", "30.0", "50.0", "60.0"]
            .into_iter()
            .map(|percent| OutputLine::stdout(format!("[download]  {}% of 1.00MiB", percent)))
            .collect();
        (lines, Ok(0))
    });
    let service = service(launcher, dir.path());
    let mut subscription = service.subscribe();

    let job_id = service
        .submit(JobRequest::new("https://youtu.be/abc12345678", "video", "1080"))
        .await
        .unwrap();
    let notifications = until_terminal(&mut subscription, job_id).await;

    assert_eq!(percents(&notifications), vec![10.0, 50.0, 60.0]);
    assert_eq!(service.job(job_id).await.unwrap().percent, 100.0);
}

#[tokio::test]
async fn invalid_requests_never_launch_a_process() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|_| (Vec::new(), Ok(0)));
    let service = service(launcher.clone(), dir.path());

    for request in [
        JobRequest::new("https://vimeo.com/123456789", "video", "best"),
        JobRequest::new("not a url", "audio", "192"),
        JobRequest::new("https://youtu.be/short", "audio", "192"),
        JobRequest::new("https://youtu.be/abc12345678", "flac", "192"),
        JobRequest::new("https://youtu.be/abc12345678", "video", "ultra"),
        JobRequest::new("https://youtu.be/abc12345678", "audio", "loud"),
    ] {
        let error = service.submit(request.clone()).await.unwrap_err();
        assert!(error.is_validation(), "{:?} -> {:?}", request, error);
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(launcher.launches(), 0);
    assert_eq!(service.jobs.active_jobs().await, 0);
}

#[tokio::test]
async fn capped_jobs_all_finish() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|template| {
        std::fs::write(output(template, "mp3"), b"x").unwrap();
        (vec![OutputLine::stdout("[download]  50.0% of 1.00MiB")], Ok(0))
    });
    let config = JobConfig {
        max_concurrent_jobs: Some(1),
        ..JobConfig::default()
    };
    let service = service_with(launcher.clone(), dir.path(), config);

    let mut job_ids = Vec::new();
    for _ in 0..3 {
        job_ids.push(
            service
                .submit(JobRequest::new("https://youtu.be/abc12345678", "audio", "192"))
                .await
                .unwrap(),
        );
    }

    for job_id in job_ids {
        assert!(matches!(
            service.jobs.wait_for_completion(job_id).await,
            Some(JobState::Completed { .. })
        ));
    }
    assert_eq!(launcher.launches(), 3);
    assert_eq!(service.artifacts.len(), 3);
}

#[tokio::test]
async fn finished_jobs_are_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|_| (Vec::new(), Ok(2)));
    let service = service(launcher, dir.path());

    let job_id = service
        .submit(JobRequest::new("https://youtu.be/abc12345678", "audio", "192"))
        .await
        .unwrap();
    service.jobs.wait_for_completion(job_id).await;

    assert_eq!(service.jobs.prune_finished(Duration::from_secs(3600)).await, 0);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(service.jobs.prune_finished(Duration::ZERO).await, 1);
    assert!(service.job(job_id).await.is_none());
    assert_eq!(service.jobs.wait_for_completion(job_id).await, None);
}
