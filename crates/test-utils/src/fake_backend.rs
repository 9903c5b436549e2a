use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use framewright::exec::{
    CancelSignal, CapturedStream, InvocationRequest, ToolchainBackend, ToolchainInvocation,
};
use framewright::exec::{ExitInfo, Termination};

/// Bytes that pass the mp4 container check.
pub fn fake_mp4() -> Vec<u8> {
    let mut bytes = b"\x00\x00\x00\x18ftypisom\x00\x00\x02\x00isomiso2".to_vec();
    bytes.extend(std::iter::repeat_n(0u8, 64));
    bytes
}

/// What the fake engine does for one stage.
#[derive(Debug, Clone)]
pub struct FakeResponse {
    pub delay: Duration,
    pub exit_code: i32,
    pub stderr: String,
    /// Files to create (relative to the workspace) on a successful exit.
    pub files: Vec<(String, Vec<u8>)>,
    /// Run until cancelled.
    pub hang: bool,
    pub panic: bool,
    /// Fail if the workspace holds anything besides the scene file, `tmp/`
    /// and entries this backend wrote into that same workspace earlier.
    pub require_clean_workspace: bool,
}

impl FakeResponse {
    pub fn success() -> Self {
        Self {
            delay: Duration::ZERO,
            exit_code: 0,
            stderr: String::new(),
            files: Vec::new(),
            hang: false,
            panic: false,
            require_clean_workspace: false,
        }
    }

    /// Exit 0 after writing a valid mp4 at `rel`.
    pub fn writes_mp4(rel: &str) -> Self {
        Self::success().writing(rel, fake_mp4())
    }

    pub fn failing(code: i32, stderr: &str) -> Self {
        Self {
            exit_code: code,
            stderr: stderr.to_string(),
            ..Self::success()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::success()
        }
    }

    pub fn panic() -> Self {
        Self {
            panic: true,
            ..Self::success()
        }
    }

    pub fn writing(mut self, rel: &str, bytes: Vec<u8>) -> Self {
        self.files.push((rel.to_string(), bytes));
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn clean_workspace(mut self) -> Self {
        self.require_clean_workspace = true;
        self
    }
}

/// A fake toolchain backend that:
/// - records every invocation request
/// - tracks how many invocations run at once
/// - answers from per-stage scripted responses (default: exit 0, no files).
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    responses: Arc<Mutex<HashMap<String, FakeResponse>>>,
    /// Checked first: used when any argv element contains the needle.
    overrides: Arc<Mutex<Vec<(String, FakeResponse)>>>,
    calls: Arc<Mutex<Vec<InvocationRequest>>>,
    /// Top-level entries written so far, per workspace.
    written: Arc<Mutex<HashMap<PathBuf, HashSet<String>>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, stage: &str, response: FakeResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(stage.to_string(), response);
        self
    }

    /// Use `response` for any invocation whose argv mentions `needle`
    /// (e.g. a scene name).
    pub fn respond_if_arg(self, needle: &str, response: FakeResponse) -> Self {
        self.overrides
            .lock()
            .unwrap()
            .push((needle.to_string(), response));
        self
    }

    pub fn calls(&self) -> Vec<InvocationRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn workspaces_seen(&self) -> Vec<PathBuf> {
        self.calls().into_iter().map(|r| r.cwd).collect()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn response_for(&self, request: &InvocationRequest) -> FakeResponse {
        let overrides = self.overrides.lock().unwrap();
        for (needle, response) in overrides.iter() {
            if request.argv.iter().any(|arg| arg.contains(needle.as_str())) {
                return response.clone();
            }
        }
        drop(overrides);

        let stage = request.stage.as_str();
        self.responses
            .lock()
            .unwrap()
            .get(stage)
            .cloned()
            .unwrap_or_else(FakeResponse::success)
    }

    /// Entries in the workspace that neither the pipeline nor an earlier
    /// invocation in the same workspace put there.
    fn foreign_entries(&self, request: &InvocationRequest) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&request.cwd) else {
            return vec!["<unreadable>".to_string()];
        };
        let written = self.written.lock().unwrap();
        let ours = written.get(&request.cwd);
        let mut foreign: Vec<String> = entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "scene.py" && name != "tmp")
            .filter(|name| !ours.is_some_and(|set| set.contains(name)))
            .collect();
        foreign.sort();
        foreign
    }

    fn write_files(&self, request: &InvocationRequest, files: &[(String, Vec<u8>)]) {
        let mut written = self.written.lock().unwrap();
        let ours = written.entry(request.cwd.clone()).or_default();
        for (rel, bytes) in files {
            let path = request.cwd.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, bytes).unwrap();
            if let Some(top) = rel.split('/').next() {
                ours.insert(top.to_string());
            }
        }
    }
}

impl ToolchainBackend for FakeBackend {
    fn invoke<'a>(
        &'a self,
        request: InvocationRequest,
        mut cancel: CancelSignal,
    ) -> Pin<Box<dyn Future<Output = ToolchainInvocation> + Send + 'a>> {
        Box::pin(async move {
            let started = Instant::now();
            let response = self.response_for(&request);
            self.calls.lock().unwrap().push(request.clone());

            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);
            let _guard = RunningGuard(Arc::clone(&self.running));

            if response.panic {
                panic!("fake engine panicked in stage {}", request.stage);
            }

            let termination = if response.hang {
                cancel.cancelled().await;
                Termination::Cancelled
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(response.delay) => Termination::Exited,
                    _ = cancel.cancelled() => Termination::Cancelled,
                }
            };

            let mut exit_code = response.exit_code;
            let mut stderr = response.stderr.clone();

            if termination == Termination::Exited {
                if response.require_clean_workspace {
                    let foreign = self.foreign_entries(&request);
                    if !foreign.is_empty() {
                        exit_code = 3;
                        stderr = format!("workspace not clean: {foreign:?}");
                    }
                }
                if exit_code == 0 {
                    self.write_files(&request, &response.files);
                }
            }

            let exit = match termination {
                Termination::Exited => Some(ExitInfo {
                    code: Some(exit_code),
                    signal: None,
                }),
                _ => Some(ExitInfo {
                    code: None,
                    signal: Some(9),
                }),
            };

            ToolchainInvocation {
                stage: request.stage.clone(),
                argv: request.argv.clone(),
                termination,
                exit,
                stdout: CapturedStream::from_text(""),
                stderr: CapturedStream::from_text(stderr),
                elapsed: started.elapsed(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use framewright::exec::ResourceLimits;

    use super::*;

    fn request(stage: &str, cwd: &std::path::Path) -> InvocationRequest {
        InvocationRequest {
            stage: stage.to_string(),
            argv: vec!["engine".to_string()],
            cwd: cwd.to_path_buf(),
            env: Vec::new(),
            limits: ResourceLimits::default(),
        }
    }

    fn exit_code(inv: &ToolchainInvocation) -> Option<i32> {
        inv.exit.and_then(|e| e.code)
    }

    #[tokio::test]
    async fn planted_file_is_foreign_even_when_the_stage_writes_the_same_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("canary.txt"), b"planted").unwrap();
        let backend = FakeBackend::new().respond(
            "render",
            FakeResponse::success()
                .writing("canary.txt", b"mine".to_vec())
                .clean_workspace(),
        );

        let inv = backend
            .invoke(request("render", dir.path()), CancelSignal::never())
            .await;
        assert_eq!(exit_code(&inv), Some(3));
        assert!(inv.stderr.text.contains("canary.txt"));
        assert_eq!(std::fs::read(dir.path().join("canary.txt")).unwrap(), b"planted");
    }

    #[tokio::test]
    async fn earlier_stage_output_in_the_same_workspace_is_not_foreign() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scene.py"), b"").unwrap();
        let backend = FakeBackend::new()
            .respond("render", FakeResponse::writes_mp4("media/Intro.mp4"))
            .respond("mux", FakeResponse::writes_mp4("out.mp4").clean_workspace());

        let first = backend
            .invoke(request("render", dir.path()), CancelSignal::never())
            .await;
        assert_eq!(exit_code(&first), Some(0));

        let second = backend
            .invoke(request("mux", dir.path()), CancelSignal::never())
            .await;
        assert_eq!(exit_code(&second), Some(0), "{}", second.stderr.text);
    }

    #[tokio::test]
    async fn output_written_into_another_workspace_does_not_count_as_ours() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new()
            .respond("render", FakeResponse::success().writing("canary.txt", Vec::new()))
            .respond("check", FakeResponse::success().clean_workspace());

        backend
            .invoke(request("render", first.path()), CancelSignal::never())
            .await;
        std::fs::copy(first.path().join("canary.txt"), second.path().join("canary.txt")).unwrap();

        let inv = backend
            .invoke(request("check", second.path()), CancelSignal::never())
            .await;
        assert_eq!(exit_code(&inv), Some(3));
    }
}
