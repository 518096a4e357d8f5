use std::path::PathBuf;
use std::time::{Duration, Instant};

use provision_worker::config::WorkerConfig;
use provision_worker::sandbox::{BuiltCommands, SandboxCommand, SandboxEnv};
use provision_worker::worker::SandboxExecutor;
use uuid::Uuid;

/// Create a test executor with the given main-command timeout
fn test_executor(timeout: Duration) -> SandboxExecutor {
    SandboxExecutor::new(&WorkerConfig::default().with_timeout(timeout))
}

fn sh(script: &str) -> SandboxCommand {
    let mut env = SandboxEnv::new();
    env.set("PATH", "/usr/bin:/bin");
    SandboxCommand {
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        dir: PathBuf::from("/"),
        env,
    }
}

/// `get` step and main command as shell scripts
fn commands(get: &str, main: &str) -> BuiltCommands {
    BuiltCommands {
        main: sh(main),
        get: sh(get),
        var_file: None,
        cloud_file: None,
    }
}

async fn run(main: &str) -> provision_worker::worker::RunResult {
    test_executor(Duration::from_secs(10))
        .execute(Uuid::new_v4(), &commands("true", main))
        .await
}

#[tokio::test]
async fn test_execute_simple_command() {
    let result = run("echo hello").await;

    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.output, Some("hello\n".to_string()));
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_execute_empty_output() {
    let result = run("true").await;

    assert!(result.success);
    // A process ran, so the output is recorded even when empty
    assert_eq!(result.output, Some(String::new()));
}

#[tokio::test]
async fn test_execute_large_output() {
    let result = run("seq 1 1000").await;

    assert!(result.success);
    let output = result.output.unwrap();
    assert_eq!(output.lines().count(), 1000);
}

#[tokio::test]
async fn test_execute_command_failure() {
    let result = run("exit 1").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.explanation, "exit status 1");
}

#[tokio::test]
async fn test_execute_combines_stderr_into_output() {
    let result = run("echo 'error message' >&2 && exit 1").await;

    assert!(!result.success);
    assert!(result.output.unwrap().contains("error message"));
}

#[tokio::test]
async fn test_execute_invalid_command() {
    let result = run("nonexistent_command_12345").await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(127));
}

#[tokio::test]
async fn test_get_succeeds_but_main_program_missing() {
    let mut cmds = commands("true", "true");
    cmds.main.program = "/nonexistent/proot".to_string();

    let result = test_executor(Duration::from_secs(10))
        .execute(Uuid::new_v4(), &cmds)
        .await;

    assert!(!result.success);
    // Nothing ran, so there is no output to record
    assert!(result.output.is_none());
    assert!(result.explanation.starts_with("unable to start /nonexistent/proot"));
    assert!(result.exit_code.is_none());
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_execute_with_special_characters() {
    // Single quotes prevent variable expansion
    let result = run("echo 'hello $USER'").await;

    assert!(result.success);
    assert_eq!(result.output, Some("hello $USER\n".to_string()));
}

#[tokio::test]
async fn test_execute_piped_commands() {
    let result = run("echo 'hello world' | wc -w").await;

    assert!(result.success);
    assert_eq!(result.output.unwrap().trim(), "2");
}

#[tokio::test]
async fn test_execute_environment_is_cleared() {
    std::env::set_var("PROVISION_WORKER_LEAK_CHECK", "leaked");
    let result = run("echo \"[$PROVISION_WORKER_LEAK_CHECK]\"").await;

    assert_eq!(result.output, Some("[]\n".to_string()));
}

#[tokio::test]
async fn test_execute_stdin_is_closed() {
    let result = run("read line; echo \"got:$line\"").await;

    assert_eq!(result.output, Some("got:\n".to_string()));
}

#[tokio::test]
async fn test_execute_runs_in_new_session() {
    // A session leader's session id equals its pid
    let result = run("cut -d' ' -f6 /proc/$$/stat; echo $$").await;

    let output = result.output.unwrap();
    let mut lines = output.lines().map(str::trim);
    let sid = lines.next().unwrap();
    let pid = lines.next().unwrap();
    assert_eq!(sid, pid);
}

#[tokio::test]
async fn test_get_failure_skips_main_command() {
    let result = test_executor(Duration::from_secs(10))
        .execute(
            Uuid::new_v4(),
            &commands("echo 'module not found'; exit 1", "echo should-not-run"),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.explanation, "terraform get failed");
    let output = result.output.unwrap();
    assert!(output.contains("module not found"));
    assert!(!output.contains("should-not-run"));
}

#[tokio::test]
async fn test_timeout_kills_process_group() {
    let started = Instant::now();
    let result = test_executor(Duration::from_millis(300))
        .execute(
            Uuid::new_v4(),
            &commands("true", "echo started; sleep 30 & sleep 30; echo never"),
        )
        .await;

    // The background sleep holds the output pipe; only a group kill lets
    // the run finish promptly.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert!(result.timed_out);
    assert!(result.exit_code.is_none());
    assert_eq!(result.explanation, "timed out after 300ms");
    let output = result.output.unwrap();
    assert!(output.contains("started"));
    assert!(!output.contains("never"));
}

#[tokio::test]
async fn test_fast_exit_disarms_timeout() {
    let result = test_executor(Duration::from_millis(500))
        .execute(Uuid::new_v4(), &commands("true", "echo quick"))
        .await;

    assert!(result.success);
    assert!(!result.timed_out);
    assert!(result.elapsed < Duration::from_millis(500));
}
