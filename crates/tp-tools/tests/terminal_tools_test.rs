use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tp_core::config::{SessionLimits, TerminalConfig};
use tp_session::SessionRegistry;
use tp_tools::{
    ExecCommandRequest, KillSessionRequest, OutcomeStatus, TerminalTools, WriteStdinRequest,
};

fn tools_with(limits: SessionLimits) -> TerminalTools {
    let registry = Arc::new(SessionRegistry::new(limits).expect("valid limits"));
    let config = TerminalConfig {
        default_shell: Some("/bin/sh".to_string()),
        ..TerminalConfig::default()
    };
    TerminalTools::new(registry, config)
}

fn tools() -> TerminalTools {
    tools_with(SessionLimits::default())
}

// ---------------------------------------------------------------------------
// exec_command
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fast_command_completes_without_session() {
    let tools = tools();
    let outcome = tools
        .exec_command(ExecCommandRequest::new("echo hello").yield_time_ms(1_000))
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert!(outcome.session_id.is_none());
    assert!(outcome.output.contains("hello"), "got: {:?}", outcome.output);
    assert_eq!(outcome.exit_code, Some(0));
    assert!(tools.registry().is_empty());
}

#[tokio::test]
async fn slow_command_becomes_a_session() {
    let tools = tools();
    let outcome = tools
        .exec_command(ExecCommandRequest::new("sleep 5").yield_time_ms(50))
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Running);
    let id = outcome.session_id.expect("running command has a session");
    assert!(outcome.exit_code.is_none());
    assert_eq!(tools.registry().len(), 1);
    assert_eq!(tools.registry().list()[0].session_id, id);
    assert_eq!(tools.registry().list()[0].command, "sleep 5");
}

#[tokio::test]
async fn output_is_line_capped() {
    let tools = tools();
    let cmd = "i=1; while [ $i -le 100 ]; do echo Line $i; i=$((i+1)); done";
    let outcome = tools
        .exec_command(ExecCommandRequest {
            max_output_lines: Some(20),
            ..ExecCommandRequest::new(cmd).yield_time_ms(5_000)
        })
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    let truncation = outcome.truncation.expect("output should be truncated");
    assert_eq!(truncation.total_lines, 100);
    assert_eq!(truncation.omitted_lines, 80);
    assert!(outcome.output.starts_with("Line 1\n"), "got: {:?}", outcome.output);
    assert!(outcome.output.contains("Line 10\n[... 80 lines omitted ...]\nLine 91\n"));
    assert!(outcome.output.ends_with("Line 100\n"));
    assert!(!outcome.output.contains('\r'));
}

#[tokio::test]
async fn output_is_token_capped() {
    let tools = tools();
    let cmd = "i=0; while [ $i -lt 50 ]; do echo 0123456789abcdef; i=$((i+1)); done";
    let outcome = tools
        .exec_command(ExecCommandRequest {
            max_output_tokens: Some(10),
            ..ExecCommandRequest::new(cmd).yield_time_ms(5_000)
        })
        .await;

    let truncation = outcome.truncation.expect("output should be truncated");
    assert!(truncation.tokens_truncated > 0);
    assert!(outcome.output.contains("tokens truncated"));
}

#[tokio::test]
async fn spawn_failure_is_a_structured_error() {
    let tools = tools();
    let outcome = tools
        .exec_command(ExecCommandRequest {
            workdir: Some("/definitely/not/here".to_string()),
            ..ExecCommandRequest::new("echo hi")
        })
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert!(outcome.is_error());
    assert!(outcome.output.contains("/definitely/not/here"));
    assert!(tools.registry().is_empty());
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let tools = tools();
    let outcome = tools.exec_command(ExecCommandRequest::new("   ")).await;
    assert_eq!(outcome.status, OutcomeStatus::Error);
}

#[tokio::test]
async fn workdir_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "found me").unwrap();
    let tools = tools();
    let outcome = tools
        .exec_command(ExecCommandRequest {
            workdir: Some(dir.path().display().to_string()),
            ..ExecCommandRequest::new("cat marker.txt").yield_time_ms(5_000)
        })
        .await;
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert!(outcome.output.contains("found me"));
}

#[tokio::test]
async fn capacity_pressure_is_reported() {
    let tools = tools_with(SessionLimits {
        max_sessions: 3,
        warning_threshold: 2,
        protected_count: 1,
        grace_period_ms: 50,
    });

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(
            tools
                .exec_command(ExecCommandRequest::new("sleep 30").yield_time_ms(20))
                .await,
        );
    }

    assert!(outcomes[0].warning.is_none());
    assert!(outcomes[1].warning.is_none());
    assert!(outcomes[2].warning.is_some());
    assert_eq!(outcomes[3].evicted.len(), 1);
    assert_eq!(outcomes[3].evicted[0].session_id, outcomes[0].session_id.unwrap());
    assert_eq!(tools.registry().len(), 3);
}

#[tokio::test]
async fn terminal_size_comes_from_config() {
    let registry = Arc::new(SessionRegistry::new(SessionLimits::default()).unwrap());
    let tools = TerminalTools::new(
        registry,
        TerminalConfig {
            default_shell: Some("/bin/sh".to_string()),
            cols: 100,
            rows: 30,
            ..TerminalConfig::default()
        },
    );
    let outcome = tools
        .exec_command(ExecCommandRequest::new("stty size").yield_time_ms(5_000))
        .await;
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert!(outcome.output.contains("30 100"), "got: {:?}", outcome.output);
}

// ---------------------------------------------------------------------------
// write_stdin
// ---------------------------------------------------------------------------

#[tokio::test]
async fn interactive_session_echoes_input() {
    let tools = tools();
    let id = tools
        .exec_command(ExecCommandRequest::new("cat").yield_time_ms(100))
        .await
        .session_id
        .expect("cat keeps running");

    let outcome = tools
        .write_stdin(WriteStdinRequest::new(id, "hello pty\n").yield_time_ms(500))
        .await;
    assert_eq!(outcome.status, OutcomeStatus::Running);
    assert_eq!(outcome.session_id, Some(id));
    assert!(outcome.output.contains("hello pty"), "got: {:?}", outcome.output);
}

#[tokio::test]
async fn stale_session_is_cleaned_up() {
    let tools = tools();
    let id = tools
        .exec_command(ExecCommandRequest::new("sleep 1").yield_time_ms(50))
        .await
        .session_id
        .expect("sleep 1 outlives a 50ms yield");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let outcome = tools.write_stdin(WriteStdinRequest::new(id, "")).await;

    assert_eq!(outcome.status, OutcomeStatus::Exited);
    assert!(outcome.cleaned_up);
    assert_eq!(outcome.exit_code, Some(0));
    assert!(tools.registry().get(id).is_err());
}

#[tokio::test]
async fn session_exiting_mid_call_is_removed() {
    let tools = tools();
    let id = tools
        .exec_command(ExecCommandRequest::new("read line; echo got $line").yield_time_ms(100))
        .await
        .session_id
        .expect("read waits for input");

    let outcome = tools
        .write_stdin(WriteStdinRequest::new(id, "abc\n").yield_time_ms(5_000))
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Exited);
    assert!(!outcome.cleaned_up);
    assert!(outcome.output.contains("got abc"), "got: {:?}", outcome.output);
    assert!(tools.registry().is_empty());
}

#[tokio::test]
async fn write_to_unknown_session_is_not_found() {
    let tools = tools();
    let outcome = tools.write_stdin(WriteStdinRequest::new(999, "ls\n")).await;
    assert_eq!(outcome.status, OutcomeStatus::NotFound);
    assert!(outcome.output.contains("999"));
}

#[tokio::test]
async fn polling_touches_the_session() {
    let tools = tools();
    let id = tools
        .exec_command(ExecCommandRequest::new("sleep 30").yield_time_ms(20))
        .await
        .session_id
        .unwrap();
    let before = tools.registry().list()[0].last_used;

    tokio::time::sleep(Duration::from_millis(5)).await;
    tools
        .write_stdin(WriteStdinRequest::new(id, "").yield_time_ms(10))
        .await;
    let after = tools.registry().list()[0].last_used;
    assert!(after > before);
}

// ---------------------------------------------------------------------------
// kill_session / list_sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn kill_twice_reports_not_found() {
    let tools = tools();
    let id = tools
        .exec_command(ExecCommandRequest::new("sleep 30").yield_time_ms(20))
        .await
        .session_id
        .unwrap();

    let first = tools.kill_session(KillSessionRequest { session_id: id }).await;
    assert_eq!(first.status, OutcomeStatus::Killed);
    assert!(first.output.contains("sleep 30"));

    let second = tools.kill_session(KillSessionRequest { session_id: id }).await;
    assert_eq!(second.status, OutcomeStatus::NotFound);
    assert!(tools.registry().is_empty());
}

#[tokio::test]
async fn kill_wins_over_a_write_waiting_for_the_session() {
    let tools = tools();
    let id = tools
        .exec_command(ExecCommandRequest::new("cat").yield_time_ms(50))
        .await
        .session_id
        .expect("cat keeps running");

    // Holds the I/O lock until the process dies or a second passes.
    let polling = tokio::spawn({
        let tools = tools.clone();
        async move {
            tools
                .write_stdin(WriteStdinRequest::new(id, "").yield_time_ms(1_000))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let waiting = tokio::spawn({
        let tools = tools.clone();
        async move { tools.write_stdin(WriteStdinRequest::new(id, "late\n")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let killed = tools.kill_session(KillSessionRequest { session_id: id }).await;
    assert_eq!(killed.status, OutcomeStatus::Killed);

    let waiting = waiting.await.unwrap();
    assert_eq!(waiting.status, OutcomeStatus::NotFound);
    assert_ne!(polling.await.unwrap().status, OutcomeStatus::NotFound);
    assert!(tools.registry().is_empty());
}

#[tokio::test]
async fn kill_does_not_stall_other_tasks() {
    let tools = tools();
    let id = tools
        .exec_command(ExecCommandRequest::new("trap '' HUP; exec sleep 30").yield_time_ms(50))
        .await
        .session_id
        .expect("sleep keeps running");

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = tokio::spawn({
        let ticks = ticks.clone();
        async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ticks.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
    tokio::task::yield_now().await;

    let before = ticks.load(Ordering::Relaxed);
    let started = Instant::now();
    let outcome = tools.kill_session(KillSessionRequest { session_id: id }).await;
    let elapsed = started.elapsed();
    let during = ticks.load(Ordering::Relaxed) - before;
    ticker.abort();

    assert_eq!(outcome.status, OutcomeStatus::Killed);
    // SIGHUP is ignored, so the kill waits before escalating.
    assert!(elapsed >= Duration::from_millis(100), "kill took {elapsed:?}");
    assert!(during >= 5, "runtime ticked {during} times during a {elapsed:?} kill");
}

#[tokio::test]
async fn list_without_sessions() {
    let tools = tools();
    let outcome = tools.list_sessions().await;
    assert_eq!(outcome.status, OutcomeStatus::Ok);
    assert_eq!(outcome.output, "No active sessions.");
    assert_eq!(outcome.sessions, Some(Vec::new()));
}

#[tokio::test]
async fn list_is_ordered_and_does_not_touch() {
    let tools = tools();
    let mut ids = Vec::new();
    for cmd in ["sleep 30", "cat", "sleep 31"] {
        ids.push(
            tools
                .exec_command(ExecCommandRequest::new(cmd).yield_time_ms(20))
                .await
                .session_id
                .unwrap(),
        );
    }

    let first = tools.list_sessions().await.sessions.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = tools.list_sessions().await.sessions.unwrap();

    let listed: Vec<_> = first.iter().map(|m| m.session_id).collect();
    assert_eq!(listed, ids);
    let last_used = |v: &Vec<tp_core::types::SessionMetadata>| {
        v.iter().map(|m| m.last_used).collect::<Vec<_>>()
    };
    assert_eq!(last_used(&first), last_used(&second));
}

#[tokio::test]
async fn shutdown_clears_every_session() {
    let tools = tools();
    for _ in 0..2 {
        tools
            .exec_command(ExecCommandRequest::new("sleep 30").yield_time_ms(20))
            .await;
    }
    assert_eq!(tools.shutdown(), 2);
    assert!(tools.registry().is_empty());
}
