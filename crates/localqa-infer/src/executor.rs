//! External inference process driver.
//!
//! One process per request. Stdout is streamed line by line; answer text
//! starts after the assistant marker. Two timers decide completion:
//! - overall: wall clock since spawn, always armed
//! - pause: silence since the last answer line, armed once the marker is seen
//!
//! Either timer kills the child. Caller cancellation is not honored once the
//! process runs; only timeouts and `shutdown` stop it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use localqa_core::config::{resolve_with_base, ExecutorSettings, GenerationParams};

use crate::error::{GenerationError, PoolError};
use crate::generator::{Generator, GeneratorFactory};
use crate::prompt::PromptTemplate;

const STDERR_TAIL_LINES: usize = 20;
const EXIT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Exited,
    Paused,
    OverallTimeout,
    Shutdown,
}

pub struct ProcessExecutor {
    slot_id: usize,
    settings: ExecutorSettings,
    gate: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl ProcessExecutor {
    /// `settings.executable` and `settings.model` are used verbatim.
    pub fn new(slot_id: usize, settings: ExecutorSettings) -> Self {
        Self { slot_id, settings, gate: tokio::sync::Mutex::new(()), shutdown: CancellationToken::new() }
    }

    pub fn slot_id(&self) -> usize { self.slot_id }

    pub fn settings(&self) -> &ExecutorSettings { &self.settings }

    /// Command-line arguments for one request, in llama.cpp CLI form.
    pub fn build_args(&self, prompt: &str, params: &GenerationParams) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.settings.model.clone(),
            "-p".to_string(),
            prompt.to_string(),
            "-n".to_string(),
            params.max_tokens.to_string(),
            "--temp".to_string(),
            params.temperature.to_string(),
            "--top-k".to_string(),
            params.top_k.to_string(),
            "--top-p".to_string(),
            params.top_p.to_string(),
            "--repeat-penalty".to_string(),
            params.repeat_penalty.to_string(),
            "--repeat-last-n".to_string(),
            params.repeat_last_n.to_string(),
            "-c".to_string(),
            params.context_size.to_string(),
        ];
        if let Some(threads) = params.threads {
            args.push("-t".to_string());
            args.push(threads.to_string());
        }
        args.extend(self.settings.extra_args.iter().cloned());
        args
    }

    /// Generate an answer. Failures come back as a descriptive message.
    pub async fn execute(&self, system_prompt: &str, question: &str, params: &GenerationParams) -> String {
        match self.run(system_prompt, question, params).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(slot = self.slot_id, error = %e, "generation failed");
                describe_failure(&e)
            }
        }
    }

    /// Kill any running child and refuse further requests.
    pub fn shutdown(&self) { self.shutdown.cancel(); }

    pub fn is_shut_down(&self) -> bool { self.shutdown.is_cancelled() }

    /// Typed variant of [`execute`](Self::execute).
    pub async fn run(&self, system_prompt: &str, question: &str, params: &GenerationParams) -> Result<String, GenerationError> {
        let _gate = self.gate.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(GenerationError::Shutdown);
        }
        let prompt = PromptTemplate::render(system_prompt, question);
        let mut child = Command::new(&self.settings.executable)
            .args(self.build_args(&prompt, params))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GenerationError::Spawn { executable: self.settings.executable.clone(), reason: e.to_string() })?;
        debug!(slot = self.slot_id, pid = child.id(), "inference process started");

        let stdout = child.stdout.take().ok_or_else(|| GenerationError::Io("stdout was not captured".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| GenerationError::Io("stderr was not captured".into()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() { break; }
            }
        });
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let mut stderr_task = {
            let tail = Arc::clone(&tail);
            let slot = self.slot_id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(slot, "{line}");
                    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    if tail.len() == STDERR_TAIL_LINES { tail.pop_front(); }
                    tail.push_back(line);
                }
            })
        };

        let marker = self.settings.assistant_marker.as_deref().filter(|m| !m.is_empty());
        let overall = self.settings.overall_timeout();
        let pause = self.settings.pause_timeout();
        let started = Instant::now();
        let mut lines: Vec<String> = Vec::new();
        let mut answer_started = false;
        let mut last_output: Option<Instant> = None;

        let mut ticker = interval(self.settings.poll_interval().max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let outcome = loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break Outcome::Shutdown,
                _ = ticker.tick() => {}
            }
            let mut closed = false;
            loop {
                match rx.try_recv() {
                    Ok(line) => {
                        if !answer_started && marker.is_none_or(|m| line.contains(m)) {
                            answer_started = true;
                            debug!(slot = self.slot_id, elapsed_ms = elapsed_ms(started), "assistant output started");
                        }
                        lines.push(line);
                        if answer_started { last_output = Some(Instant::now()); }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => { closed = true; break; }
                }
            }
            if closed { break Outcome::Exited; }
            if started.elapsed() >= overall { break Outcome::OverallTimeout; }
            if last_output.is_some_and(|t| t.elapsed() >= pause) { break Outcome::Paused; }
        };

        let status = match outcome {
            Outcome::Exited => match timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    warn!(slot = self.slot_id, error = %e, "waiting for inference process failed");
                    None
                }
                Err(_) => {
                    kill(&mut child, self.slot_id).await;
                    None
                }
            },
            Outcome::Paused | Outcome::OverallTimeout | Outcome::Shutdown => {
                kill(&mut child, self.slot_id).await;
                None
            }
        };
        let _ = timeout(EXIT_GRACE, &mut stderr_task).await;
        stdout_task.abort();
        stderr_task.abort();
        debug!(slot = self.slot_id, ?outcome, ?status, elapsed_ms = elapsed_ms(started), "inference process finished");

        let output = lines.join("\n");
        let answer = extract_answer(&output, marker, &self.settings.end_markers);
        match outcome {
            Outcome::Shutdown => Err(GenerationError::Shutdown),
            Outcome::OverallTimeout => match answer {
                Some(a) if !a.is_empty() => {
                    warn!(slot = self.slot_id, timeout = ?overall, "overall timeout reached, returning partial answer");
                    Ok(a)
                }
                _ => {
                    warn!(slot = self.slot_id, timeout = ?overall, "inference timed out");
                    Err(GenerationError::Timeout(overall))
                }
            },
            Outcome::Paused | Outcome::Exited => {
                if let Some(status) = status.filter(|s| !s.success()) {
                    if answer.as_deref().is_none_or(str::is_empty) {
                        let stderr = tail.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect::<Vec<_>>().join("\n");
                        return Err(GenerationError::ProcessFailed { status: status.to_string(), stderr });
                    }
                    warn!(slot = self.slot_id, %status, "inference process exited unsuccessfully after answering");
                }
                match answer {
                    None => Err(GenerationError::MarkerNotFound),
                    Some(a) if a.is_empty() => Err(GenerationError::EmptyAnswer),
                    Some(a) => Ok(a),
                }
            }
        }
    }
}

#[async_trait]
impl Generator for ProcessExecutor {
    async fn generate(&self, system_prompt: &str, question: &str, params: &GenerationParams) -> Result<String, GenerationError> {
        self.run(system_prompt, question, params).await
    }

    fn is_healthy(&self) -> bool { !self.is_shut_down() }

    async fn shutdown(&self) { ProcessExecutor::shutdown(self); }
}

async fn kill(child: &mut Child, slot: usize) {
    if let Err(e) = child.kill().await {
        debug!(slot, error = %e, "kill failed, process already gone");
    }
}

fn elapsed_ms(started: Instant) -> u64 { u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX) }

/// Answer text after the last assistant marker, cut at the first end marker
/// and trimmed. `None` when a marker is configured but absent.
pub fn extract_answer(output: &str, marker: Option<&str>, end_markers: &[String]) -> Option<String> {
    let body = match marker {
        Some(m) => &output[output.rfind(m)? + m.len()..],
        None => output,
    };
    let end = end_markers
        .iter()
        .filter(|m| !m.is_empty())
        .filter_map(|m| body.find(m.as_str()))
        .min()
        .unwrap_or(body.len());
    Some(body[..end].trim().to_string())
}

/// The message handed back to callers in place of an answer.
pub fn describe_failure(error: &GenerationError) -> String { format!("Error: {error}") }

/// Creates one `ProcessExecutor` per slot after checking that the executable
/// and model exist.
pub struct ProcessExecutorFactory {
    settings: ExecutorSettings,
    base_dir: PathBuf,
}

impl ProcessExecutorFactory {
    /// Relative paths in `settings` resolve against `base_dir`.
    pub fn new(settings: ExecutorSettings, base_dir: impl Into<PathBuf>) -> Self {
        Self { settings, base_dir: base_dir.into() }
    }

    /// Settings with executable and model resolved to existing files.
    pub fn resolved_settings(&self) -> Result<ExecutorSettings, PoolError> {
        let executable = resolve_executable(&self.base_dir, &self.settings.executable).ok_or_else(|| {
            PoolError::InvalidConfig(format!("inference executable '{}' not found", self.settings.executable))
        })?;
        let model = resolve_with_base(&self.base_dir, &self.settings.model);
        if !model.is_file() {
            return Err(PoolError::InvalidConfig(format!("model file '{}' not found", model.display())));
        }
        Ok(ExecutorSettings {
            executable: executable.to_string_lossy().into_owned(),
            model: model.to_string_lossy().into_owned(),
            ..self.settings.clone()
        })
    }
}

#[async_trait]
impl GeneratorFactory for ProcessExecutorFactory {
    async fn create(&self, slot_id: usize) -> Result<Arc<dyn Generator>, PoolError> {
        let settings = self.resolved_settings()?;
        info!(slot = slot_id, executable = %settings.executable, model = %settings.model, "process executor ready");
        Ok(Arc::new(ProcessExecutor::new(slot_id, settings)))
    }
}

/// Paths with a separator resolve against `base`; bare names go through `PATH`.
fn resolve_executable(base: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() { return None; }
    let expanded = resolve_with_base(base, name);
    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        return expanded.is_file().then_some(expanded);
    }
    if expanded.is_file() { return Some(expanded); }
    std::env::var_os("PATH").and_then(|paths| std::env::split_paths(&paths).map(|dir| dir.join(name)).find(|p| p.is_file()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ends() -> Vec<String> { ExecutorSettings::default().end_markers }

    #[test]
    fn answer_follows_last_marker() {
        let out = "loading...\n<|im_start|>assistant\nignored echo\n<|im_start|>assistant\nRoll two dice.<|im_end|>\n> EOF";
        assert_eq!(extract_answer(out, Some("<|im_start|>assistant"), &ends()).as_deref(), Some("Roll two dice."));
    }

    #[test]
    fn missing_marker_is_none() {
        assert_eq!(extract_answer("loading model", Some("<|im_start|>assistant"), &ends()), None);
        assert_eq!(extract_answer("  plain answer [end of text]", None, &ends()).as_deref(), Some("plain answer"));
    }

    #[test]
    fn args_carry_generation_params() {
        let exec = ProcessExecutor::new(0, ExecutorSettings { model: "m.gguf".into(), extra_args: vec!["-no-cnv".into()], ..Default::default() });
        let params = GenerationParams { threads: Some(4), ..Default::default() };
        let args = exec.build_args("PROMPT", &params);
        let pair = |flag: &str| args.iter().position(|a| a == flag).map(|i| args[i + 1].clone());
        assert_eq!(pair("-m").as_deref(), Some("m.gguf"));
        assert_eq!(pair("-p").as_deref(), Some("PROMPT"));
        assert_eq!(pair("-n").as_deref(), Some("512"));
        assert_eq!(pair("--temp").as_deref(), Some("0.7"));
        assert_eq!(pair("-t").as_deref(), Some("4"));
        assert_eq!(args.last().map(String::as_str), Some("-no-cnv"));
    }

    #[test]
    fn failure_description_is_readable() {
        let msg = describe_failure(&GenerationError::Timeout(Duration::from_secs(3)));
        assert_eq!(msg, "Error: Inference timed out after 3s");
    }
}
