// tests/archive_tasks.rs

mod common;
use crate::common::Harness;
use crate::common::builders::{ContextBuilder, RuleBuilder, TransferBuilder, spec};

use std::io::{Cursor, Write};
use std::path::PathBuf;

use zip::write::SimpleFileOptions;

use taskgate::engine::ChainError;
use taskgate::model::{TaskSpec, TransferContext};
use taskgate::tasks::TaskError;
use taskgate::types::{Chain, Direction};

fn context(tasks: Vec<TaskSpec>) -> TransferContext {
    let rule = tasks
        .into_iter()
        .fold(RuleBuilder::new("pack", Direction::Send), |b, t| b.pre(t))
        .build();
    ContextBuilder::new(rule, TransferBuilder::new(0).local_path("/gw/out/a.txt").build()).build()
}

fn seed(fs: &taskgate::fs::mock::MockFileSystem) {
    fs.add_file("/gw/out/a.txt", b"alpha");
    fs.add_file("/gw/out/b.csv", b"beta,1\nbeta,2\n");
    fs.add_file("/gw/out/nested/c.txt", b"gamma");
}

#[tokio::test]
async fn every_format_round_trips_through_extract() {
    let formats = [
        "bundle.zip",
        "bundle.tar",
        "bundle.tar.gz",
        "bundle.tgz",
        "bundle.tar.bz2",
        "bundle.tar.xz",
        "bundle.tar.zst",
        "bundle.tar.lz4",
    ];
    for name in formats {
        let (h, fs) = Harness::mock();
        seed(&fs);
        let archive = format!("/gw/archives/{name}");

        let mut ctx = context(vec![
            spec("ARCHIVE", &[("files", "/gw/out/a.txt, /gw/out/nested"), ("outputPath", &archive)]),
            spec("EXTRACT", &[("archivePath", &archive), ("outputDir", "/gw/unpacked")]),
        ]);
        h.register(&mut ctx);
        h.run(Chain::Pre, &mut ctx).await.unwrap_or_else(|e| panic!("{name}: {e}"));

        assert_eq!(fs.contents("/gw/unpacked/a.txt").unwrap(), b"alpha", "{name}");
        assert_eq!(fs.contents("/gw/unpacked/nested/c.txt").unwrap(), b"gamma", "{name}");
        assert!(fs.contents("/gw/unpacked/b.csv").is_none(), "{name}");
    }
}

#[tokio::test]
async fn glob_patterns_select_files() {
    let (h, fs) = Harness::mock();
    seed(&fs);

    let mut ctx = context(vec![
        spec("ARCHIVE", &[("files", "/gw/out/*.csv"), ("outputPath", "/gw/csv.zip")]),
        spec("EXTRACT", &[("archivePath", "/gw/csv.zip"), ("outputDir", "/gw/x")]),
    ]);
    h.register(&mut ctx);
    h.run(Chain::Pre, &mut ctx).await.unwrap();

    let extracted: Vec<PathBuf> = fs
        .files()
        .into_iter()
        .filter(|p| p.starts_with("/gw/x"))
        .collect();
    assert_eq!(extracted, vec![PathBuf::from("/gw/x/b.csv")]);
}

#[tokio::test]
async fn extract_defaults_to_the_transfer_file_and_its_directory() {
    let (h, fs) = Harness::mock();
    seed(&fs);

    let mut first = context(vec![spec(
        "ARCHIVE",
        &[("files", "/gw/out/b.csv"), ("outputPath", "/gw/drop/data.tar.gz")],
    )]);
    h.register(&mut first);
    h.run(Chain::Pre, &mut first).await.unwrap();

    let rule = RuleBuilder::new("unpack", Direction::Receive)
        .post(spec("EXTRACT", &[]))
        .build();
    let mut ctx = ContextBuilder::new(
        rule,
        TransferBuilder::new(0).local_path("/gw/drop/data.tar.gz").build(),
    )
    .build();
    h.register(&mut ctx);
    h.run(Chain::Post, &mut ctx).await.unwrap();

    assert_eq!(fs.contents("/gw/drop/b.csv").unwrap(), b"beta,1\nbeta,2\n");
}

#[tokio::test]
async fn pattern_without_matches_fails() {
    let (h, fs) = Harness::mock();
    seed(&fs);

    let mut ctx = context(vec![spec(
        "ARCHIVE",
        &[("files", "/gw/out/*.pdf"), ("outputPath", "/gw/none.zip")],
    )]);
    h.register(&mut ctx);

    let err = h.run(Chain::Pre, &mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::NotFound(_),
            ..
        }
    ));
    assert!(fs.contents("/gw/none.zip").is_none());
}

#[tokio::test]
async fn files_sharing_a_name_are_not_silently_dropped() {
    let (h, fs) = Harness::mock();
    fs.add_file("/gw/a/report.txt", b"from-a");
    fs.add_file("/gw/b/report.txt", b"from-b");

    let mut ctx = context(vec![spec(
        "ARCHIVE",
        &[("files", "/gw/a/report.txt, /gw/b/report.txt"), ("outputPath", "/gw/reports.zip")],
    )]);
    h.register(&mut ctx);

    let err = h.run(Chain::Pre, &mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::BadArguments(_),
            ..
        }
    ));
    assert!(err.to_string().contains("report.txt"));
    assert!(fs.contents("/gw/reports.zip").is_none());
}

#[tokio::test]
async fn invalid_level_is_rejected() {
    let (h, fs) = Harness::mock();
    seed(&fs);

    let mut ctx = context(vec![spec(
        "ARCHIVE",
        &[("files", "/gw/out/a.txt"), ("outputPath", "/gw/a.zip"), ("compressionLevel", "42")],
    )]);
    h.register(&mut ctx);

    let err = h.run(Chain::Pre, &mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::Task {
            source: TaskError::BadArguments(_),
            ..
        }
    ));
}

#[tokio::test]
async fn entries_escaping_the_output_directory_are_refused() {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        zip.start_file("../../etc/evil.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"owned").unwrap();
        zip.finish().unwrap();
    }

    let (h, fs) = Harness::mock();
    fs.add_file("/gw/in/evil.zip", buf.into_inner());
    let rule = RuleBuilder::new("unpack", Direction::Receive)
        .post(spec("EXTRACT", &[("outputDir", "/gw/in/unpacked")]))
        .build();
    let mut ctx = ContextBuilder::new(rule, TransferBuilder::new(0).local_path("/gw/in/evil.zip").build()).build();
    h.register(&mut ctx);

    let err = h.run(Chain::Post, &mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("outside of the output directory"));
    assert!(fs.contents("/etc/evil.txt").is_none());
}

#[tokio::test]
async fn archive_on_the_real_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(data.join("sub")).unwrap();
    std::fs::write(data.join("one.txt"), b"1").unwrap();
    std::fs::write(data.join("sub").join("two.txt"), b"2").unwrap();

    let archive = dir.path().join("data.tar.zst");
    let restored = dir.path().join("restored");

    let h = Harness::real();
    let mut ctx = context(vec![
        spec(
            "ARCHIVE",
            &[
                ("files", data.to_str().unwrap()),
                ("outputPath", archive.to_str().unwrap()),
                ("compressionLevel", "3"),
            ],
        ),
        spec(
            "EXTRACT",
            &[("archivePath", archive.to_str().unwrap()), ("outputDir", restored.to_str().unwrap())],
        ),
    ]);
    h.register(&mut ctx);
    h.run(Chain::Pre, &mut ctx).await.unwrap();

    assert_eq!(std::fs::read(restored.join("data").join("one.txt")).unwrap(), b"1");
    assert_eq!(
        std::fs::read(restored.join("data").join("sub").join("two.txt")).unwrap(),
        b"2"
    );
}
