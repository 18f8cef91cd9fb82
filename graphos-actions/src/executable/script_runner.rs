use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;

use super::ExecutableError;

/// Variables passed through to script children; everything else is cleared.
const INHERITED_ENV: &[&str] = &["PATH", "HOME", "LANG"];

/// Run `source` with `python3 -I -c`, writing `context` as JSON to stdin and
/// parsing stdout as a JSON value. The child is killed on timeout and when
/// the calling task is aborted.
pub async fn run_python_source(
    source: &str,
    context: &serde_json::Value,
    timeout: Duration,
    execution_id: &str,
    node_id: &str,
) -> Result<serde_json::Value, ExecutableError> {
    let started_at = Instant::now();
    tracing::info!(
        execution_id = %execution_id,
        node_id = %node_id,
        timeout_ms = timeout.as_millis() as u64,
        "script_executable_started"
    );

    let stdin_payload = serde_json::to_vec(context).map_err(|err| {
        ExecutableError::ScriptExecution(format!("failed to encode script context: {err}"))
    })?;

    let mut command = TokioCommand::new("python3");
    command
        .arg("-I")
        .arg("-c")
        .arg(source)
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for name in INHERITED_ENV {
        if let Ok(value) = std::env::var(name) {
            command.env(name, value);
        }
    }

    let mut child = command.spawn().map_err(|err| {
        ExecutableError::ScriptExecution(format!(
            "failed to start python for node '{node_id}': {err}"
        ))
    })?;

    let mut stdin = child.stdin.take().ok_or_else(|| {
        ExecutableError::ScriptExecution(format!("script stdin is unavailable for node '{node_id}'"))
    })?;
    // The write runs beside the wait so a script that never drains stdin
    // cannot hold the runner past the timeout.
    let stdin_task = tokio::spawn(async move {
        let result = stdin.write_all(&stdin_payload).await;
        drop(stdin);
        match result {
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    });

    let mut stdout = child.stdout.take().ok_or_else(|| {
        ExecutableError::ScriptExecution(format!("script stdout is unavailable for node '{node_id}'"))
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        ExecutableError::ScriptExecution(format!("script stderr is unavailable for node '{node_id}'"))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        stdout.read_to_end(&mut buffer).await.map(|_| buffer)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buffer = Vec::new();
        stderr.read_to_end(&mut buffer).await.map(|_| buffer)
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(result) => result.map_err(|err| {
            ExecutableError::ScriptExecution(format!(
                "failed waiting for script of node '{node_id}': {err}"
            ))
        })?,
        Err(_) => {
            stdin_task.abort();
            let _ = child.kill().await;
            let _ = child.wait().await;
            tracing::warn!(
                execution_id = %execution_id,
                node_id = %node_id,
                timeout_ms = timeout.as_millis() as u64,
                "script_executable_timed_out"
            );
            return Err(ExecutableError::ScriptTimeout(format!(
                "script of node '{node_id}' exceeded timeout of {}ms",
                timeout.as_millis()
            )));
        }
    };

    match stdin_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            return Err(ExecutableError::ScriptExecution(format!(
                "failed to write context to script for node '{node_id}': {err}"
            )));
        }
        Err(err) => {
            return Err(ExecutableError::ScriptExecution(format!(
                "failed joining stdin writer for node '{node_id}': {err}"
            )));
        }
    }

    let stdout_bytes = collect_output(stdout_task, "stdout", node_id).await?;
    let stderr_bytes = collect_output(stderr_task, "stderr", node_id).await?;

    let stderr = String::from_utf8_lossy(&stderr_bytes);
    if !status.success() {
        return Err(ExecutableError::ScriptExecution(format!(
            "script of node '{node_id}' exited with status {status}: {}",
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8(stdout_bytes).map_err(|err| {
        ExecutableError::ScriptInvalidOutput(format!(
            "script of node '{node_id}' emitted non-utf8 stdout: {err}"
        ))
    })?;
    let parsed = serde_json::from_str::<serde_json::Value>(stdout.trim()).map_err(|err| {
        ExecutableError::ScriptInvalidOutput(format!(
            "script of node '{node_id}' emitted invalid JSON: {err}; stderr='{}'",
            stderr.trim()
        ))
    })?;

    tracing::info!(
        execution_id = %execution_id,
        node_id = %node_id,
        duration_ms = started_at.elapsed().as_millis() as u64,
        status = %status,
        stdout_bytes = stdout.len(),
        stderr_bytes = stderr.len(),
        "script_executable_finished"
    );

    Ok(parsed)
}

async fn collect_output(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    stream: &str,
    node_id: &str,
) -> Result<Vec<u8>, ExecutableError> {
    task.await
        .map_err(|err| {
            ExecutableError::ScriptExecution(format!(
                "failed joining {stream} reader for node '{node_id}': {err}"
            ))
        })?
        .map_err(|err| {
            ExecutableError::ScriptExecution(format!(
                "failed reading script {stream} for node '{node_id}': {err}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python3_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[tokio::test]
    async fn returns_json() {
        if !python3_available() {
            return;
        }

        let source = r#"import json, sys
ctx = json.loads(sys.stdin.read())
print(json.dumps({"sum": ctx["a"] + ctx["b"]}))
"#;
        let value = run_python_source(
            source,
            &serde_json::json!({"a": 20, "b": 22}),
            Duration::from_secs(5),
            "exec-1",
            "test:node",
        )
        .await
        .expect("script should succeed");
        assert_eq!(value["sum"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn environment_is_cleared() {
        if !python3_available() {
            return;
        }

        // cargo exports CARGO_PKG_NAME to test processes.
        let source = r#"import json, os
print(json.dumps(os.environ.get("CARGO_PKG_NAME")))
"#;
        let value = run_python_source(
            source,
            &serde_json::json!({}),
            Duration::from_secs(5),
            "exec-1",
            "test:node",
        )
        .await
        .expect("script should succeed");
        assert_eq!(value, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn times_out() {
        if !python3_available() {
            return;
        }

        let err = run_python_source(
            "import time\ntime.sleep(2.0)\nprint('{}')\n",
            &serde_json::json!({}),
            Duration::from_millis(50),
            "exec-1",
            "test:node",
        )
        .await
        .expect_err("script should time out");
        assert!(
            err.to_string().contains("script_timeout"),
            "unexpected timeout error: {err}"
        );
    }

    #[tokio::test]
    async fn timeout_holds_when_script_ignores_large_stdin() {
        if !python3_available() {
            return;
        }

        // Larger than any pipe buffer, so the write cannot complete.
        let blob = "x".repeat(1 << 20);
        let started = Instant::now();
        let err = run_python_source(
            "import time\ntime.sleep(60)\n",
            &serde_json::json!({ "blob": blob }),
            Duration::from_millis(300),
            "exec-1",
            "test:node",
        )
        .await
        .expect_err("script should time out");
        assert!(matches!(err, ExecutableError::ScriptTimeout(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn large_context_reaches_script() {
        if !python3_available() {
            return;
        }

        let blob = "y".repeat(1 << 20);
        let value = run_python_source(
            "import json, sys\nprint(len(json.load(sys.stdin)['blob']))\n",
            &serde_json::json!({ "blob": blob }),
            Duration::from_secs(10),
            "exec-1",
            "test:node",
        )
        .await
        .expect("script should succeed");
        assert_eq!(value, serde_json::json!(1 << 20));
    }

    #[tokio::test]
    async fn rejects_invalid_json() {
        if !python3_available() {
            return;
        }

        let err = run_python_source(
            "print('not-json')",
            &serde_json::json!({}),
            Duration::from_secs(5),
            "exec-1",
            "test:node",
        )
        .await
        .expect_err("script output should fail JSON parsing");
        assert!(
            err.to_string().contains("script_invalid_json"),
            "unexpected parse error: {err}"
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_execution_error() {
        if !python3_available() {
            return;
        }

        let err = run_python_source(
            "import sys\nsys.stderr.write('bad input')\nsys.exit(3)\n",
            &serde_json::json!({}),
            Duration::from_secs(5),
            "exec-1",
            "test:node",
        )
        .await
        .expect_err("script should fail");
        assert!(matches!(err, ExecutableError::ScriptExecution(ref message) if message.contains("bad input")));
    }
}
