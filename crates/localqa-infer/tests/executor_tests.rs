#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use localqa_core::config::{ExecutorSettings, GenerationParams};
use localqa_infer::{GenerationError, GeneratorFactory, PoolError, ProcessExecutor, ProcessExecutorFactory};

fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn executor(executable: String, overall_secs: u64, pause_ms: u64) -> ProcessExecutor {
    ProcessExecutor::new(
        0,
        ExecutorSettings {
            executable,
            model: "model.gguf".into(),
            overall_timeout_secs: overall_secs,
            pause_timeout_ms: pause_ms,
            poll_interval_ms: 20,
            extra_args: Vec::new(),
            ..Default::default()
        },
    )
}

async fn run(exec: &ProcessExecutor) -> Result<String, GenerationError> {
    exec.run("You are helpful.", "How do I win?", &GenerationParams::default()).await
}

#[tokio::test]
async fn answer_after_marker_is_cleaned() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(
        tmp.path(),
        "ok.sh",
        "echo 'loading model...'\necho '<|im_start|>user'\necho 'How do I win?<|im_end|>'\necho '<|im_start|>assistant'\necho 'Reach level 10 first.'\necho '<|im_end|>'\necho 'llama_print_timings: 12 ms'",
    );
    let answer = run(&executor(exe, 10, 2000)).await.unwrap();
    assert_eq!(answer, "Reach level 10 first.");
}

#[tokio::test]
async fn silence_after_answer_completes_generation() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(tmp.path(), "pause.sh", "echo '<|im_start|>assistant'\necho 'Shuffle the deck.'\nexec sleep 30");
    let started = Instant::now();
    let answer = run(&executor(exe, 20, 300)).await.unwrap();
    assert_eq!(answer, "Shuffle the deck.");
    assert!(started.elapsed() < Duration::from_secs(5), "pause timeout ends the run");
}

#[tokio::test]
async fn loading_noise_does_not_start_pause_timer() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(
        tmp.path(),
        "slowload.sh",
        "echo 'loading'\nsleep 1\necho '<|im_start|>assistant'\necho 'Ready.'",
    );
    let answer = run(&executor(exe, 10, 200)).await.unwrap();
    assert_eq!(answer, "Ready.");
}

#[tokio::test]
async fn overall_timeout_without_marker_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(tmp.path(), "hang.sh", "echo 'loading'\nexec sleep 30");
    let exec = executor(exe, 1, 200);
    let started = Instant::now();
    let err = run(&exec).await.unwrap_err();
    assert!(matches!(err, GenerationError::Timeout(_)), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));

    let text = exec.execute("sys", "q", &GenerationParams::default()).await;
    assert!(text.starts_with("Error:") && text.contains("timed out"), "{text}");
}

#[tokio::test]
async fn overall_timeout_keeps_partial_answer() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(tmp.path(), "chatty.sh", "echo '<|im_start|>assistant'\nwhile true; do echo 'more'; sleep 0.1; done");
    let answer = run(&executor(exe, 1, 5000)).await.unwrap();
    assert!(answer.starts_with("more"), "{answer}");
}

#[tokio::test]
async fn exit_without_marker_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(tmp.path(), "nomarker.sh", "echo 'just noise'");
    let err = run(&executor(exe, 10, 200)).await.unwrap_err();
    assert!(matches!(err, GenerationError::MarkerNotFound), "{err}");
}

#[tokio::test]
async fn failed_process_reports_stderr() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(tmp.path(), "crash.sh", "echo 'error: bad model file' >&2\nexit 3");
    let err = run(&executor(exe, 10, 200)).await.unwrap_err();
    match err {
        GenerationError::ProcessFailed { stderr, .. } => assert!(stderr.contains("bad model file"), "{stderr}"),
        other => panic!("unexpected {other}"),
    }
}

#[tokio::test]
async fn spawn_failure_becomes_message() {
    let exec = executor("/nonexistent/llama-cli".into(), 10, 200);
    let text = exec.execute("sys", "q", &GenerationParams::default()).await;
    assert!(text.starts_with("Error: Failed to start inference process"), "{text}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_kills_running_process() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(tmp.path(), "long.sh", "echo '<|im_start|>assistant'\nexec sleep 30");
    let exec = Arc::new(executor(exe, 30, 20_000));
    let running = {
        let exec = Arc::clone(&exec);
        tokio::spawn(async move { run(&exec).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    exec.shutdown();
    let res = tokio::time::timeout(Duration::from_secs(5), running).await.expect("stops").unwrap();
    assert!(matches!(res, Err(GenerationError::Shutdown)));
    assert!(matches!(run(&exec).await, Err(GenerationError::Shutdown)));
}

#[tokio::test]
async fn factory_validates_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let exe = script(tmp.path(), "ok.sh", "echo '<|im_start|>assistant'\necho 'fine'");
    fs::write(tmp.path().join("model.gguf"), b"gguf").unwrap();

    let good = ProcessExecutorFactory::new(
        ExecutorSettings { executable: exe.clone(), model: "model.gguf".into(), ..Default::default() },
        tmp.path(),
    );
    assert!(good.create(0).await.is_ok());
    let resolved = good.resolved_settings().unwrap();
    assert!(Path::new(&resolved.model).is_absolute());

    let no_model = ProcessExecutorFactory::new(
        ExecutorSettings { executable: exe, model: "missing.gguf".into(), ..Default::default() },
        tmp.path(),
    );
    assert!(matches!(no_model.create(0).await, Err(PoolError::InvalidConfig(_))));

    let no_exe = ProcessExecutorFactory::new(
        ExecutorSettings { executable: "./not-here".into(), model: "model.gguf".into(), ..Default::default() },
        tmp.path(),
    );
    assert!(matches!(no_exe.create(0).await, Err(PoolError::InvalidConfig(_))));
}
