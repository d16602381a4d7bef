// tests/exec_tasks.rs
#![cfg(unix)]

mod common;
use crate::common::Harness;
use crate::common::builders::{ContextBuilder, RuleBuilder, TransferBuilder, spec};

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use taskgate::engine::{ChainError, ChainOutcome, ContextResolver};
use taskgate::model::{TaskSpec, TransferContext};
use taskgate::store::Store;
use taskgate::tasks::{TaskArgs, TaskError};
use taskgate::tasks::exec::{ExecSpec, run_program};
use taskgate::types::{Chain, Direction, ErrorCode};

fn sh(kind: &str, script: &str) -> TaskSpec {
    let args = format!("-c {}", shell_words::quote(script));
    spec(kind, &[("path", "/bin/sh"), ("args", &args)])
}

fn context(task: TaskSpec, file: &Path) -> TransferContext {
    let rule = RuleBuilder::new("inbound", Direction::Receive).post(task).build();
    ContextBuilder::new(rule, TransferBuilder::new(0).local_path(file).build()).build()
}

#[tokio::test]
async fn exit_status_maps_to_outcome() {
    let h = Harness::real();

    let mut ok = context(sh("EXEC", "exit 0"), Path::new("/tmp/x"));
    h.register(&mut ok);
    assert_eq!(h.run(Chain::Post, &mut ok).await.unwrap(), ChainOutcome::Completed);

    let mut warn = context(sh("EXEC", "exit 1"), Path::new("/tmp/x"));
    h.register(&mut warn);
    assert!(matches!(
        h.run(Chain::Post, &mut warn).await.unwrap(),
        ChainOutcome::CompletedWithWarning(_)
    ));
    assert_eq!(
        h.store.transfer(warn.transfer.id).unwrap().error.code,
        ErrorCode::Warning
    );

    let mut fail = context(sh("EXEC", "exit 3"), Path::new("/tmp/x"));
    h.register(&mut fail);
    assert!(h.run(Chain::Post, &mut fail).await.is_err());
}

#[tokio::test]
async fn program_is_killed_after_its_delay() {
    let h = Harness::real();
    // `sleep` runs as a grandchild and keeps the output pipes open.
    let task = sh("EXEC", "sleep 3; true").arg("delay", "100");
    let mut ctx = context(task, Path::new("/tmp/x"));
    h.register(&mut ctx);

    let started = Instant::now();
    let err = h.run(Chain::Post, &mut ctx).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    match err {
        ChainError::Task { source: TaskError::Timeout(_), .. } => {}
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_stops_the_program_promptly() {
    let h = Harness::real();
    let mut ctx = context(sh("EXEC", "sleep 3; true"), Path::new("/tmp/x"));
    h.register(&mut ctx);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = common::with_timeout(h.runner.run_chain(&cancel, Chain::Post, &mut ctx, None))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::Cancelled(_),
            ..
        }
    ));
}

#[tokio::test]
async fn missing_program_fails_the_step() {
    let h = Harness::real();
    let mut ctx = context(
        spec("EXEC", &[("path", "/definitely/not/a/program")]),
        Path::new("/tmp/x"),
    );
    h.register(&mut ctx);

    let err = h.run(Chain::Post, &mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("failed to start external program"));
}

#[tokio::test]
async fn program_sees_tokens_in_its_environment() {
    let h = Harness::real();
    let ctx = context(spec("EXEC", &[]), Path::new("/data/in/report.csv"));
    let env = ContextResolver::new(&ctx, h.store.as_ref()).environment().unwrap();
    let program = ExecSpec::parse(&TaskArgs::new().with("path", "/usr/bin/env")).unwrap();

    let (output, result) = run_program(&program, &env, &CancellationToken::new()).await;
    result.unwrap();
    let lines: Vec<&str> = output.stdout.lines().collect();
    assert!(lines.contains(&"#RULE#=inbound"), "{lines:?}");
    assert!(lines.contains(&"#TRUEFILENAME#=report.csv"), "{lines:?}");
}

#[tokio::test]
async fn execoutput_turns_output_into_the_warning_message() {
    let h = Harness::real();
    let mut ctx = context(
        sh("EXECOUTPUT", "echo 'partner rejected'; echo 'retry later'; exit 1"),
        Path::new("/tmp/x"),
    );
    h.register(&mut ctx);

    let outcome = h.run(Chain::Post, &mut ctx).await.unwrap();
    assert_eq!(
        outcome,
        ChainOutcome::CompletedWithWarning("partner rejected\nretry later".to_string())
    );
}

#[tokio::test]
async fn missing_account_fails_before_the_program_starts() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let h = Harness::real();
    let mut ctx = context(
        spec("EXEC", &[("path", "/usr/bin/touch"), ("args", marker.to_str().unwrap())]),
        Path::new("/tmp/x"),
    );
    ctx.transfer.remote_account_id = Some(404);
    h.register(&mut ctx);

    let err = h.run(Chain::Post, &mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::Interpolation(_),
            ..
        }
    ));
    assert!(!marker.exists());
}

#[tokio::test]
async fn execoutput_picks_up_a_new_file_name() {
    let h = Harness::real();
    let mut ctx = context(
        sh("EXECOUTPUT", "echo converting; echo NEWFILENAME:/data/out/converted.xml"),
        Path::new("/data/in/source.csv"),
    );
    h.register(&mut ctx);

    h.run(Chain::Post, &mut ctx).await.unwrap();
    assert_eq!(
        h.store.transfer(ctx.transfer.id).unwrap().local_path,
        PathBuf::from("/data/out/converted.xml")
    );
}

#[tokio::test]
async fn execmove_follows_the_printed_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("report.csv");
    std::fs::write(&file, b"x").unwrap();

    let h = Harness::real();
    let mut ctx = context(
        spec(
            "EXECMOVE",
            &[
                ("path", "/bin/sh"),
                ("args", "-c 'mv \"$1\" \"$1.done\" && echo \"$1.done\"' sh #TRUEFULLPATH#"),
            ],
        ),
        &file,
    );
    h.register(&mut ctx);

    h.run(Chain::Post, &mut ctx).await.unwrap();

    let moved = dir.path().join("report.csv.done");
    assert!(moved.is_file());
    assert_eq!(ctx.transfer.local_path, moved);
}

#[tokio::test]
async fn execmove_rejects_a_path_that_does_not_exist() {
    let h = Harness::real();
    let mut ctx = context(
        sh("EXECMOVE", "echo /no/such/file"),
        Path::new("/tmp/x"),
    );
    h.register(&mut ctx);

    let err = h.run(Chain::Post, &mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
    assert_eq!(ctx.transfer.local_path, PathBuf::from("/tmp/x"));
}
