use super::*;

use std::sync::Mutex;

/// Grace period for draining stderr once the process is killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runs commands by spawning a fresh control tool process for each one.
///
/// The command text is written to the tool's stdin followed by
/// [`EXIT_COMMAND`], then stdin is closed and the process is awaited up to
/// the effective timeout. The process is reaped or killed before `run`
/// returns on every path.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    tool_path: PathBuf,
    timeouts: CommandTimeouts,
}

impl ToolExecutor {
    pub fn new(tool_path: impl Into<PathBuf>, timeouts: CommandTimeouts) -> Self {
        Self {
            tool_path: tool_path.into(),
            timeouts,
        }
    }

    /// Builds an executor from resolved settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, ManagerError> {
        Ok(Self::new(
            &settings.bluetoothctl_path,
            settings.command_timeouts()?,
        ))
    }

    /// Resolves the effective timeout for `command`.
    pub fn request(&self, command: &str, timeout: Option<Duration>) -> CommandRequest {
        CommandRequest {
            text: command.to_string(),
            timeout: self.timeouts.resolve(command, timeout),
        }
    }

    /// Runs one request to completion.
    pub async fn run(&self, request: &CommandRequest) -> Result<String, ManagerError> {
        let command = request.text.as_str();
        let mut state = ExecState::Idle;
        debug!(
            "Running '{}' via {} (timeout {:?})",
            command,
            self.tool_path.display(),
            request.timeout
        );

        // The child inherits this process's environment.
        let mut child = Command::new(&self.tool_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ManagerError::Startup {
                command: command.to_string(),
                reason: e.to_string(),
            })?;
        advance(&mut state, ExecState::Spawned, command);

        let stdout = PipeBuffer::default();
        let stderr = PipeBuffer::default();
        let mut stdout_task = tokio::spawn(read_pipe(child.stdout.take(), stdout.clone()));
        let mut stderr_task = tokio::spawn(read_pipe(child.stderr.take(), stderr.clone()));

        let Some(mut stdin) = child.stdin.take() else {
            advance(&mut state, ExecState::ErrorReported, command);
            terminate(&mut child, &mut state, command).await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(ManagerError::Startup {
                command: command.to_string(),
                reason: "failed to open stdin for the control tool".to_string(),
            });
        };

        advance(&mut state, ExecState::Writing, command);
        let payload = format!("{command}\n{EXIT_COMMAND}\n");
        let written = async {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        drop(stdin);

        if let Err(e) = written {
            advance(&mut state, ExecState::ErrorReported, command);
            terminate(&mut child, &mut state, command).await;
            stdout_task.abort();
            drain(stderr_task).await;
            // A tool that exits before reading its input usually says why on stderr.
            let errors = stderr.take();
            if !errors.is_empty() {
                return Err(ManagerError::Execution {
                    command: command.to_string(),
                    errors,
                });
            }
            return Err(ManagerError::Startup {
                command: command.to_string(),
                reason: format!("failed to write to the control tool: {e}"),
            });
        }

        // The timeout covers process exit and EOF on both pipes, so output
        // held open by a helper the tool left behind is still collected.
        advance(&mut state, ExecState::AwaitingCompletion, command);
        let finished = tokio::time::timeout(request.timeout, async {
            let status = child.wait().await?;
            let _ = tokio::join!(&mut stdout_task, &mut stderr_task);
            Ok::<_, std::io::Error>(status)
        })
        .await;

        match finished {
            Ok(Ok(status)) => {
                advance(&mut state, ExecState::Completed, command);
                advance(&mut state, ExecState::Terminated, command);
                if !status.success() {
                    debug!("'{}' exited with {}", command, status);
                }

                let errors = stderr.take();
                if !errors.is_empty() {
                    return Err(ManagerError::Execution {
                        command: command.to_string(),
                        errors,
                    });
                }
                Ok(stdout.take())
            }
            Ok(Err(e)) => {
                advance(&mut state, ExecState::ErrorReported, command);
                terminate(&mut child, &mut state, command).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(ManagerError::Io(e))
            }
            Err(_) => {
                advance(&mut state, ExecState::TimedOut, command);
                terminate(&mut child, &mut state, command).await;
                stdout_task.abort();
                drain(stderr_task).await;
                let partial = stderr.take();
                Err(ManagerError::Timeout {
                    command: command.to_string(),
                    errors: (!partial.is_empty()).then_some(partial),
                })
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ToolExecutor {
    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, ManagerError> {
        let request = self.request(command, timeout);
        self.run(&request).await
    }
}

fn advance(state: &mut ExecState, next: ExecState, command: &str) {
    trace!("'{}': {} -> {}", command, state, next);
    *state = next;
}

/// Kills the child and waits for it to be reaped.
async fn terminate(child: &mut Child, state: &mut ExecState, command: &str) {
    if let Err(e) = child.kill().await {
        debug!("Killing the process for '{}' failed: {}", command, e);
    }
    advance(state, ExecState::Terminated, command);
}

/// Bytes read from one of the child's pipes so far.
///
/// Shared with the reader task, so whatever arrived before the reader is
/// aborted is kept.
#[derive(Debug, Clone, Default)]
struct PipeBuffer(Arc<Mutex<Vec<u8>>>);

impl PipeBuffer {
    fn extend(&self, bytes: &[u8]) {
        if let Ok(mut buf) = self.0.lock() {
            buf.extend_from_slice(bytes);
        }
    }

    fn take(&self) -> String {
        match self.0.lock() {
            Ok(mut buf) => String::from_utf8_lossy(&std::mem::take(&mut *buf)).into_owned(),
            Err(_) => String::new(),
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>, sink: PipeBuffer) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => sink.extend(&chunk[..n]),
            Err(e) => {
                trace!("Pipe read stopped early: {}", e);
                break;
            }
        }
    }
}

/// Waits briefly for a pipe reader after the process was killed.
async fn drain(task: tokio::task::JoinHandle<()>) {
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Pipe reader failed: {}", e),
        Err(_) => abort.abort(),
    }
}
