//! End-to-end integration tests for the shell execution layer
//!
//! These tests run real servers and clients in-process and spawn real OS
//! processes through /bin/sh, verifying:
//! 1. Round trips over both transports
//! 2. Timeout, exit-code and environment semantics
//! 3. Fault handling (malformed payloads, missing binaries)
//! 4. Independence of concurrent requests

#![cfg(unix)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use shellexec::proto::{
    wire, Command, RunCommandRequest, RunCommandResponse, EXIT_CODE_FAILED_TO_START,
    EXIT_CODE_TIMED_OUT,
};
use shellexec::socket::transport;
use shellexec::{
    LocalExecutor, MailboxClient, MailboxExecutor, MailboxServer, ResultKind, ShellExecutor,
    ShellRequest, SocketClient, SocketExecutor, SocketServer,
};

/// Mailbox server plus the scratch exchange directory it serves
struct MailboxContext {
    _dir: tempfile::TempDir,
    server: Option<MailboxServer>,
    client: MailboxClient,
}

impl MailboxContext {
    async fn start() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create exchange dir");
        let server = MailboxServer::start(dir.path())
            .await
            .expect("Failed to start mailbox server");
        let client = MailboxClient::new(dir.path());
        Self {
            _dir: dir,
            server: Some(server),
            client,
        }
    }

    fn exchange_dir(&self) -> std::path::PathBuf {
        self.server.as_ref().unwrap().exchange_dir().to_path_buf()
    }

    async fn stop(mut self) {
        if let Some(server) = self.server.take() {
            server.stop().await;
        }
    }
}

/// Socket server running in a background task
struct SocketContext {
    address: String,
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<shellexec::Result<()>>,
}

impl SocketContext {
    async fn start() -> Self {
        let server = SocketServer::bind()
            .await
            .expect("Failed to bind socket server");
        let address = server.address().to_string();
        let (shutdown, rx) = oneshot::channel();
        let task = tokio::spawn(server.run(rx));
        Self {
            address,
            shutdown,
            task,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("Server did not shut down within the grace period")
            .expect("Server task panicked")
            .expect("Server returned an error");
    }
}

fn shell_command(line: &str, timeout_ms: u64) -> Command {
    let mut cmd = Command::new(line, Duration::from_millis(timeout_ms));
    cmd.through_shell = true;
    cmd
}

fn shell_request(line: &str, timeout_ms: u64) -> RunCommandRequest {
    RunCommandRequest {
        argv: vec!["sh".to_string(), "-c".to_string(), line.to_string()],
        environment: HashMap::new(),
        timeout_ms,
    }
}

// ============== Mailbox transport ==============

#[tokio::test]
async fn test_mailbox_round_trip() {
    let ctx = MailboxContext::start().await;

    let result = ctx
        .client
        .execute(&shell_command("echo hello", 5000))
        .await
        .unwrap();
    assert_eq!(result.kind, ResultKind::Exited);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, b"hello\n");
    assert!(result.stderr.is_empty());

    ctx.stop().await;
}

#[tokio::test]
async fn test_mailbox_exit_code_passthrough() {
    let ctx = MailboxContext::start().await;

    let result = ctx
        .client
        .execute(&shell_command("exit 123", 5000))
        .await
        .unwrap();
    assert_eq!(result.kind, ResultKind::Exited);
    assert_eq!(result.exit_code, 123);

    ctx.stop().await;
}

#[tokio::test]
async fn test_mailbox_environment_propagation() {
    let ctx = MailboxContext::start().await;

    let mut cmd = shell_command("echo ${POTRZEBIE}", 5000);
    cmd.environment
        .insert("POTRZEBIE".to_string(), "furshlugginer".to_string());
    let result = ctx.client.execute(&cmd).await.unwrap();
    assert_eq!(result.kind, ResultKind::Exited);
    assert_eq!(result.stdout, b"furshlugginer\n");

    ctx.stop().await;
}

#[tokio::test]
async fn test_mailbox_timeout_boundary() {
    let ctx = MailboxContext::start().await;

    let start = Instant::now();
    let result = ctx
        .client
        .execute(&shell_command("echo X && sleep 10", 1000))
        .await
        .unwrap();
    assert_eq!(result.kind, ResultKind::TimedOut);
    assert_eq!(result.stdout, b"X\n");
    assert!(
        start.elapsed() < Duration::from_secs(8),
        "timeout took {:?}",
        start.elapsed()
    );

    ctx.stop().await;
}

#[tokio::test]
async fn test_mailbox_malformed_request_yields_server_error() {
    let ctx = MailboxContext::start().await;
    let dir = ctx.exchange_dir();

    // Bypass the client and drop raw garbage into the exchange directory
    tokio::fs::write(dir.join("999999-0.request"), b"these are not protocol bytes")
        .await
        .unwrap();

    // The server must answer with a SERVER_ERROR response file
    let response_path = dir.join("999999-0.response");
    let deadline = Instant::now() + Duration::from_secs(10);
    let data = loop {
        if let Ok(data) = tokio::fs::read(&response_path).await {
            break data;
        }
        assert!(Instant::now() < deadline, "no response to malformed request");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    let result = wire::decode_result(&data).unwrap();
    assert_eq!(result.kind, ResultKind::ServerError);
    assert!(!result.stderr.is_empty(), "diagnostic must not be empty");

    // The handling task must have survived: a normal request still works
    let result = ctx
        .client
        .execute(&shell_command("echo alive", 5000))
        .await
        .unwrap();
    assert_eq!(result.kind, ResultKind::Exited);
    assert_eq!(result.stdout, b"alive\n");

    ctx.stop().await;
}

#[tokio::test]
async fn test_mailbox_concurrent_requests_are_independent() {
    let ctx = MailboxContext::start().await;

    let slow_client = MailboxClient::new(ctx.exchange_dir());
    let fast_client = MailboxClient::new(ctx.exchange_dir());

    let slow = tokio::spawn(async move {
        slow_client
            .execute(&shell_command("sleep 2; echo slow", 10_000))
            .await
            .unwrap()
    });
    // Give the slow request a head start so both are in flight
    tokio::time::sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    let fast = fast_client
        .execute(&shell_command("echo fast", 10_000))
        .await
        .unwrap();
    let fast_elapsed = start.elapsed();

    assert_eq!(fast.stdout, b"fast\n");
    assert!(
        fast_elapsed < Duration::from_secs(2),
        "fast request blocked behind slow one: {:?}",
        fast_elapsed
    );

    let slow = slow.await.unwrap();
    assert_eq!(slow.kind, ResultKind::Exited);
    assert_eq!(slow.stdout, b"slow\n");

    ctx.stop().await;
}

#[tokio::test]
async fn test_mailbox_no_server_yields_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = MailboxClient::new(dir.path());

    let result = client
        .execute(&shell_command("echo nobody", 500))
        .await
        .unwrap();
    assert_eq!(result.kind, ResultKind::ClientError);
    assert!(!result.stderr.is_empty());
}

#[tokio::test]
async fn test_mailbox_executor_streams_merged_output() {
    let ctx = MailboxContext::start().await;

    let executor = MailboxExecutor::new(ctx.exchange_dir());
    let output = executor
        .execute_to_string(
            ShellRequest::new("echo out; echo err >&2")
                .through_shell(true)
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert!(output.contains("out\n"), "missing stdout: {output:?}");
    assert!(output.contains("err\n"), "missing merged stderr: {output:?}");

    ctx.stop().await;
}

// ============== Socket transport ==============

#[tokio::test]
async fn test_socket_round_trip() {
    let ctx = SocketContext::start().await;

    let client = SocketClient::new(ctx.address.as_str());
    let (output, code) = client
        .execute_buffered(&shell_request("echo hello", 5000))
        .await
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(output, b"hello\n");

    ctx.stop().await;
}

#[tokio::test]
async fn test_socket_exit_code_passthrough() {
    let ctx = SocketContext::start().await;

    let client = SocketClient::new(ctx.address.as_str());
    let (_, code) = client
        .execute_buffered(&shell_request("exit 123", 5000))
        .await
        .unwrap();
    assert_eq!(code, 123);

    ctx.stop().await;
}

#[tokio::test]
async fn test_socket_environment_propagation() {
    let ctx = SocketContext::start().await;

    let client = SocketClient::new(ctx.address.as_str());
    let mut request = shell_request("echo ${POTRZEBIE}", 5000);
    request
        .environment
        .insert("POTRZEBIE".to_string(), "furshlugginer".to_string());
    let (output, code) = client.execute_buffered(&request).await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(output, b"furshlugginer\n");

    ctx.stop().await;
}

#[tokio::test]
async fn test_socket_timeout_sentinel_with_partial_output() {
    let ctx = SocketContext::start().await;

    let client = SocketClient::new(ctx.address.as_str());
    let start = Instant::now();
    let (output, code) = client
        .execute_buffered(&shell_request("echo X && sleep 10", 1000))
        .await
        .unwrap();
    assert_eq!(code, EXIT_CODE_TIMED_OUT);
    assert_eq!(output, b"X\n");
    assert!(
        start.elapsed() < Duration::from_secs(8),
        "timeout took {:?}",
        start.elapsed()
    );

    ctx.stop().await;
}

#[tokio::test]
async fn test_socket_failed_to_start_carries_diagnostic() {
    let ctx = SocketContext::start().await;

    let client = SocketClient::new(ctx.address.as_str());
    let request = RunCommandRequest {
        argv: vec!["/nonexistent/program".to_string()],
        environment: HashMap::new(),
        timeout_ms: 5000,
    };
    let (output, code) = client.execute_buffered(&request).await.unwrap();
    assert_eq!(code, EXIT_CODE_FAILED_TO_START);
    assert!(!output.is_empty(), "diagnostic must travel in the buffer");

    ctx.stop().await;
}

#[tokio::test]
async fn test_socket_malformed_request_yields_failed_to_start() {
    let ctx = SocketContext::start().await;

    // Speak the framing but not the message schema
    let stream = transport::connect(&ctx.address).await.unwrap();
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = tokio::io::BufReader::new(reader);

    transport::send_frame(&mut writer, b"not a run request")
        .await
        .unwrap();

    let mut saw_diagnostic = false;
    loop {
        let frame = transport::recv_frame(&mut reader).await.unwrap();
        match serde_json::from_slice::<RunCommandResponse>(&frame).unwrap() {
            RunCommandResponse::Buffer { data } => saw_diagnostic = !data.is_empty(),
            RunCommandResponse::Exit { code } => {
                assert_eq!(code, EXIT_CODE_FAILED_TO_START);
                break;
            }
        }
    }
    assert!(saw_diagnostic);

    ctx.stop().await;
}

#[tokio::test]
async fn test_socket_streams_chunks_incrementally() {
    let ctx = SocketContext::start().await;

    let client = SocketClient::new(ctx.address.as_str());
    let (tx, mut rx) = mpsc::channel(16);
    let run = tokio::spawn(async move {
        client
            .execute(&shell_request("echo first; sleep 1; echo second", 10_000), tx)
            .await
            .unwrap()
    });

    // The first chunk must arrive while the command is still running
    let first = tokio::time::timeout(Duration::from_millis(900), rx.recv())
        .await
        .expect("first chunk did not stream before completion")
        .expect("stream closed early");
    assert_eq!(first, b"first\n");

    let mut rest = Vec::new();
    while let Some(chunk) = rx.recv().await {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b"second\n");
    assert_eq!(run.await.unwrap(), 0);

    ctx.stop().await;
}

#[tokio::test]
async fn test_socket_concurrent_requests_are_independent() {
    let ctx = SocketContext::start().await;

    let slow_client = SocketClient::new(ctx.address.as_str());
    let slow = tokio::spawn(async move {
        slow_client
            .execute_buffered(&shell_request("sleep 2; echo slow", 10_000))
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fast_client = SocketClient::new(ctx.address.as_str());
    let start = Instant::now();
    let (output, code) = fast_client
        .execute_buffered(&shell_request("echo fast", 10_000))
        .await
        .unwrap();
    let fast_elapsed = start.elapsed();

    assert_eq!(code, 0);
    assert_eq!(output, b"fast\n");
    assert!(
        fast_elapsed < Duration::from_secs(2),
        "fast request blocked behind slow one: {:?}",
        fast_elapsed
    );

    let (output, code) = slow.await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(output, b"slow\n");

    ctx.stop().await;
}

#[tokio::test]
async fn test_socket_no_server_is_an_error() {
    let client = SocketClient::new("/tmp/shellexec-test-no-such-socket.sock");
    let err = client
        .execute_buffered(&shell_request("echo nobody", 1000))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        shellexec::Error::ServerNotRunning(_) | shellexec::Error::ConnectFailed(_)
    ));
}

#[tokio::test]
async fn test_socket_executor_uniform_interface() {
    let ctx = SocketContext::start().await;

    let executor = SocketExecutor::new(ctx.address.as_str());
    let output = executor
        .execute_to_string(
            ShellRequest::new("echo")
                .parameters(vec!["uniform".to_string()])
                .through_shell(true)
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(output, "uniform\n");

    ctx.stop().await;
}

// ============== Uniform interface across backends ==============

#[tokio::test]
async fn test_all_backends_agree_on_output() {
    let mailbox = MailboxContext::start().await;
    let socket = SocketContext::start().await;

    let backends: Vec<Box<dyn ShellExecutor>> = vec![
        Box::new(LocalExecutor::new()),
        Box::new(MailboxExecutor::new(mailbox.exchange_dir())),
        Box::new(SocketExecutor::new(socket.address.as_str())),
    ];

    for executor in &backends {
        let output = executor
            .execute_to_string(
                ShellRequest::new("echo same everywhere")
                    .through_shell(true)
                    .timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(output, "same everywhere\n");
    }

    socket.stop().await;
    mailbox.stop().await;
}

// ============== Server shutdown ==============

#[tokio::test]
async fn test_socket_server_shutdown_waits_for_handler() {
    let ctx = SocketContext::start().await;

    let client = SocketClient::new(ctx.address.as_str());
    let run = tokio::spawn(async move {
        client
            .execute_buffered(&shell_request("sleep 1; echo done", 10_000))
            .await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Shutdown must let the in-flight handler finish within the grace period
    let start = Instant::now();
    ctx.stop().await;
    assert!(start.elapsed() < Duration::from_secs(8));

    let (output, code) = run.await.unwrap().unwrap();
    assert_eq!(code, 0);
    assert_eq!(output, b"done\n");
}
