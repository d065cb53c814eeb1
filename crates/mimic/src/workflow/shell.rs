//! `run` steps: execute a script in a shell and collect its output.

use super::action::{ActionError, ActionOutput};
use super::types::Shell;
use indexmap::IndexMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Parse a `::<command> name=<IDENT>::<VALUE>` line.
pub fn parse_output_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("::")?;
    let (header, value) = rest.split_once("::")?;
    let name = header
        .split_whitespace()
        .skip(1)
        .find_map(|token| token.strip_prefix("name="))?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then(|| (name.to_string(), value.trim_end_matches('\r').to_string()))
}

/// Split captured stdout into outputs and plain log lines.
pub fn collect_output(stdout: &str) -> ActionOutput {
    let mut output = ActionOutput::default();
    for line in stdout.lines() {
        match parse_output_line(line) {
            Some((name, value)) => {
                output.outputs.insert(name, serde_json::Value::String(value));
            }
            None => output.log.push(line.to_string()),
        }
    }
    output
}

/// Run `script` with exactly `env` as the process environment. The child is
/// killed when `cancel` fires or the returned future is dropped.
pub async fn run(
    shell: Shell,
    script: &str,
    env: &IndexMap<String, String>,
    working_directory: Option<&str>,
    cancel: &CancellationToken,
) -> Result<ActionOutput, ActionError> {
    let (program, args) = shell.command(script);
    debug!("Running {} script ({} bytes)", program, script.len());

    let mut command = Command::new(program);
    command
        .args(&args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_directory {
        command.current_dir(dir);
    }

    let child = command
        .spawn()
        .map_err(|e| ActionError::failed("run", format!("failed to start {}: {}", program, e)))?;

    let result = tokio::select! {
        result = child.wait_with_output() => result,
        _ = cancel.cancelled() => return Err(ActionError::Cancelled),
    };
    let output = result.map_err(|e| ActionError::failed("run", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut collected = collect_output(&stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    collected.log.extend(stderr.lines().map(str::to_string));

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let detail = stderr.trim();
        let message = if detail.is_empty() {
            format!("exit status {}", code)
        } else {
            format!("exit status {}: {}", code, detail)
        };
        return Err(ActionError::failed("run", message));
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn path_env() -> IndexMap<String, String> {
        std::env::vars().filter(|(k, _)| k == "PATH").collect()
    }

    #[test]
    fn test_parse_output_line() {
        assert_eq!(
            parse_output_line("::set-output name=greet::hello"),
            Some(("greet".into(), "hello".into()))
        );
        assert_eq!(
            parse_output_line("::anything name=a_b::x::y"),
            Some(("a_b".into(), "x::y".into()))
        );
        assert_eq!(parse_output_line("::set-output name=empty::"), Some(("empty".into(), String::new())));
        assert_eq!(parse_output_line("set-output name=greet::hello"), None);
        assert_eq!(parse_output_line("::set-output greet::hello"), None);
        assert_eq!(parse_output_line("::set-output name=bad name::v"), None);
    }

    #[test]
    fn test_collect_output_splits_log() {
        let out = collect_output("start\n::set-output name=a::1\nend\n");
        assert_eq!(out.outputs["a"], serde_json::json!("1"));
        assert_eq!(out.log, vec!["start".to_string(), "end".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_outputs_and_env() {
        let mut env = path_env();
        env.insert("WHO".into(), "world".into());
        let out = run(
            Shell::Sh,
            "echo \"::set-output name=greet::hello $WHO\"; echo done",
            &env,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out.outputs["greet"], serde_json::json!("hello world"));
        assert_eq!(out.log, vec!["done".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_status() {
        let err = run(Shell::Sh, "echo oops >&2; exit 3", &path_env(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "action 'run' failed: exit status 3: oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_honors_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(
            Shell::Sh,
            "pwd",
            &path_env(),
            dir.path().to_str(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let expected = dir.path().canonicalize().unwrap();
        let got = std::path::PathBuf::from(&out.log[0]).canonicalize().unwrap();
        assert_eq!(got, expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = run(Shell::Sh, "sleep 10", &path_env(), None, &cancel).await.unwrap_err();
        assert!(matches!(err, ActionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
