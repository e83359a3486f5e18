// SPDX-License-Identifier: Apache-2.0
//! Policy-enforced shell tool.
//!
//! Three enforcement modes, from most to least restrictive:
//! - [`ShellMode::Deny`]: every command is rejected.
//! - [`ShellMode::Allowlist`]: only commands whose first token (the
//!   program name) matches a configured list run.
//! - [`ShellMode::Full`]: everything runs except an explicit deny list and
//!   a handful of dangerous patterns (pipe-to-shell, `rm -rf /`, ...).
//!
//! Every command carries a timeout. Longer jobs can be "backgrounded":
//! the tool returns a job id immediately and [`ShellJobTool`] polls or
//! kills it later.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
#[cfg(unix)]
use libc;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

const OUTPUT_LIMIT_BYTES: usize = 20_000;
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

/// Enforcement mode for the shell tool, see module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    Deny,
    Allowlist,
    Full,
}

/// Dangerous patterns rejected even in [`ShellMode::Full`]: piping into a
/// shell interpreter, or recursively removing a root-ish path.
const DANGEROUS_PATTERNS: &[&str] = &["| sh", "|sh", "| bash", "|bash", "rm -rf /", "rm -rf /*", "mkfs", ":(){ :|:& };:"];

fn head_tail_truncate(text: &str) -> String {
    if text.len() <= OUTPUT_LIMIT_BYTES {
        return text.to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= HEAD_LINES + TAIL_LINES {
        return text.chars().take(OUTPUT_LIMIT_BYTES).collect();
    }
    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[lines.len() - TAIL_LINES..].join("\n");
    format!("{head}\n... ({} lines omitted) ...\n{tail}", lines.len() - HEAD_LINES - TAIL_LINES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

struct Job {
    status: JobStatus,
    output: Option<String>,
    handle: Option<JoinHandle<()>>,
}

/// Shared table of backgrounded shell jobs, keyed by job id.
#[derive(Clone)]
pub struct JobTable {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self { jobs: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShellTool {
    pub mode: ShellMode,
    pub allowlist: Vec<String>,
    pub deny: Vec<String>,
    pub sensitive_dirs: Vec<PathBuf>,
    pub timeout_secs: u64,
    pub background_threshold_secs: u64,
    pub jobs: JobTable,
}

impl ShellTool {
    pub fn new(mode: ShellMode) -> Self {
        Self {
            mode,
            allowlist: Vec::new(),
            deny: Vec::new(),
            sensitive_dirs: vec![PathBuf::from("/"), PathBuf::from("/etc"), PathBuf::from("/sys"), PathBuf::from("/proc")],
            timeout_secs: 30,
            background_threshold_secs: 30,
            jobs: JobTable::new(),
        }
    }

    pub fn with_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn with_deny(mut self, deny: Vec<String>) -> Self {
        self.deny = deny;
        self
    }

    fn first_token(command: &str) -> &str {
        command.split_whitespace().next().unwrap_or("")
    }

    fn check(&self, command: &str) -> Result<(), String> {
        match self.mode {
            ShellMode::Deny => Err("shell tool is disabled by policy".into()),
            ShellMode::Allowlist => {
                let head = Self::first_token(command);
                if self.allowlist.iter().any(|a| a == head) {
                    Ok(())
                } else {
                    Err(format!("command '{head}' is not in the shell allowlist"))
                }
            }
            ShellMode::Full => {
                if self.deny.iter().any(|d| command.contains(d.as_str())) {
                    return Err("command matches the shell deny list".into());
                }
                if DANGEROUS_PATTERNS.iter().any(|p| command.contains(p)) {
                    return Err("command matches a dangerous pattern".into());
                }
                Ok(())
            }
        }
    }

    fn check_workdir(&self, workdir: &Option<String>) -> Result<(), String> {
        let Some(wd) = workdir else { return Ok(()) };
        let path = Path::new(wd);
        if self.sensitive_dirs.iter().any(|s| path == s.as_path()) {
            return Err(format!("working directory '{wd}' is a sensitive location"));
        }
        Ok(())
    }

    fn build_command(command: &str, workdir: &Option<String>) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }
        cmd
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr. Output longer than ~20KB is \
         truncated to the first and last 100 lines. Set 'background': true to run a job that \
         may outlive this tool call's timeout; poll or kill it with the shell_job tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "workdir": { "type": "string" },
                "timeout_secs": { "type": "integer" },
                "background": { "type": "boolean", "default": false }
            },
            "required": ["command"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["runtime"]
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(command) = call.args.get("command").and_then(|v| v.as_str()).map(str::to_string) else {
            return ToolOutput::err(&call.id, "'command' is required");
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str()).map(str::to_string);
        let timeout = call.args.get("timeout_secs").and_then(|v| v.as_u64()).unwrap_or(self.timeout_secs);
        let background = call.args.get("background").and_then(|v| v.as_bool()).unwrap_or(false);

        if let Err(reason) = self.check(&command) {
            return ToolOutput::err(&call.id, reason);
        }
        if let Err(reason) = self.check_workdir(&workdir) {
            return ToolOutput::err(&call.id, reason);
        }

        debug!(cmd = %command, background, "executing shell tool");

        if background {
            let job_id = Uuid::new_v4().to_string();
            let jobs = self.jobs.jobs.clone();
            jobs.lock().unwrap().insert(job_id.clone(), Job { status: JobStatus::Running, output: None, handle: None });

            let job_id_for_task = job_id.clone();
            let jobs_for_task = jobs.clone();
            let handle = tokio::spawn(async move {
                let mut cmd = Self::build_command(&command, &workdir);
                let outcome = cmd.output().await;
                let mut table = jobs_for_task.lock().unwrap();
                if let Some(job) = table.get_mut(&job_id_for_task) {
                    match outcome {
                        Ok(output) => {
                            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                            text.push_str(&String::from_utf8_lossy(&output.stderr));
                            job.status = if output.status.success() { JobStatus::Completed } else { JobStatus::Failed };
                            job.output = Some(head_tail_truncate(&text));
                        }
                        Err(e) => {
                            job.status = JobStatus::Failed;
                            job.output = Some(e.to_string());
                        }
                    }
                }
            });
            jobs.lock().unwrap().get_mut(&job_id).unwrap().handle = Some(handle);

            return ToolOutput::ok(&call.id, json!({ "job_id": job_id, "status": "started" }).to_string());
        }

        let mut cmd = Self::build_command(&command, &workdir);
        let result = tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await;
        match result {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                let truncated = head_tail_truncate(&text);
                if output.status.success() {
                    ToolOutput::ok(&call.id, truncated)
                } else {
                    ToolOutput::err(&call.id, format!("exit code {:?}\n{truncated}", output.status.code()))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("failed to spawn: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("command timed out after {timeout}s")),
        }
    }
}

/// Polls or kills a backgrounded shell job. `{action: "status"|"kill", job_id}`.
pub struct ShellJobTool {
    jobs: JobTable,
}

impl ShellJobTool {
    pub fn new(jobs: JobTable) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl Tool for ShellJobTool {
    fn name(&self) -> &str {
        "shell_job"
    }

    fn description(&self) -> &str {
        "Check the status of, or kill, a backgrounded shell job started via shell(background=true)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["status", "kill"] },
                "job_id": { "type": "string" }
            },
            "required": ["action", "job_id"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["runtime"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let action = call.args.get("action").and_then(|v| v.as_str()).unwrap_or("status");
        let Some(job_id) = call.args.get("job_id").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "'job_id' is required");
        };

        let mut table = self.jobs.jobs.lock().unwrap();
        let Some(job) = table.get_mut(job_id) else {
            return ToolOutput::err(&call.id, format!("unknown job id: {job_id}"));
        };

        if action == "kill" {
            if let Some(handle) = job.handle.take() {
                handle.abort();
            }
            job.status = JobStatus::Killed;
        }

        let status = match job.status {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        };
        ToolOutput::ok(&call.id, json!({ "job_id": job_id, "status": status, "output": job.output }).to_string())
    }
}
