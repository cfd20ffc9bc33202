//! Command analyzer tests

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use capline_config::{AfterRead, AnalysisConfig, OutputFormat};

use super::*;

// ============================================================================
// Helper Functions
// ============================================================================

fn shell(script: &str, output: PathBuf) -> AnalysisConfig {
    AnalysisConfig {
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
        output,
        ..AnalysisConfig::default()
    }
}

fn segment(dir: &Path) -> PathBuf {
    let path = dir.join("trace_03.pcapng");
    std::fs::write(&path, b"segment").unwrap();
    path
}

// ============================================================================
// Placeholders
// ============================================================================

#[test]
fn test_placeholders_substituted() {
    let config = AnalysisConfig {
        program: "/opt/cfm/launch.sh".into(),
        args: vec!["-r".into(), "{input}".into(), "--out={output}".into()],
        output: PathBuf::from("/tmp/flows_{segment}.csv"),
        ..AnalysisConfig::default()
    };
    let analyzer = CommandAnalyzer::new(&config);
    let seg = Path::new("/captures/trace_07.pcapng");

    let output = analyzer.output_path(seg);
    assert_eq!(output, PathBuf::from("/tmp/flows_trace_07.csv"));
    assert_eq!(
        analyzer.args_for(seg, &output),
        vec![
            "-r",
            "/captures/trace_07.pcapng",
            "--out=/tmp/flows_trace_07.csv"
        ]
    );
    assert_eq!(analyzer.name(), "launch.sh");
}

#[test]
fn test_output_without_segment_placeholder_is_fixed() {
    let config = AnalysisConfig {
        output: PathBuf::from("/alerts/alert_json.txt"),
        ..AnalysisConfig::default()
    };
    let analyzer = CommandAnalyzer::new(&config);
    assert_eq!(
        analyzer.output_path(Path::new("trace_01.pcapng")),
        PathBuf::from("/alerts/alert_json.txt")
    );
}

// ============================================================================
// Running
// ============================================================================

#[tokio::test]
async fn test_json_lines_read_then_truncated() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("alerts.txt");
    let config = shell(
        r#"printf '{"msg":"a"}\n\n{"msg":"b"}\n' > {output}; test -f {input}"#,
        out.clone(),
    );
    let analyzer = CommandAnalyzer::new(&config);

    let report = analyzer.analyze(&segment(dir.path())).await.unwrap();
    assert_eq!(report.lines, vec![r#"{"msg":"a"}"#, r#"{"msg":"b"}"#]);
    assert!(report.header.is_none());
    assert_eq!(report.documents().documents.len(), 2);

    // Truncated, not removed
    assert_eq!(std::fs::metadata(&out).unwrap().len(), 0);
}

#[tokio::test]
async fn test_csv_header_split_and_file_deleted() {
    let dir = TempDir::new().unwrap();
    let config = AnalysisConfig {
        format: OutputFormat::Csv,
        after_read: AfterRead::Delete,
        ..shell(
            "printf 'src,port\\n10.0.0.1,80\\n' > {output}",
            dir.path().join("flows_{segment}.csv"),
        )
    };
    let analyzer = CommandAnalyzer::new(&config);

    let report = analyzer.analyze(&segment(dir.path())).await.unwrap();
    assert_eq!(report.header.as_deref(), Some("src,port"));
    assert_eq!(report.lines, vec!["10.0.0.1,80"]);
    assert!(!dir.path().join("flows_trace_03.csv").exists());
}

#[tokio::test]
async fn test_csv_quoted_line_break_kept_in_record() {
    let dir = TempDir::new().unwrap();
    let config = AnalysisConfig {
        format: OutputFormat::Csv,
        ..shell(
            r#"printf 'src,note\n10.0.0.1,"multi\nline"\n10.0.0.2,ok\n' > {output}"#,
            dir.path().join("flows.csv"),
        )
    };
    let analyzer = CommandAnalyzer::new(&config);

    let report = analyzer.analyze(&segment(dir.path())).await.unwrap();
    assert_eq!(report.lines, vec!["10.0.0.1,\"multi\nline\"", "10.0.0.2,ok"]);
    let parsed = report.documents();
    assert_eq!(parsed.documents[0]["note"], serde_json::json!("multi\nline"));
    assert_eq!(parsed.malformed, 0);
}

#[tokio::test]
async fn test_missing_output_is_empty_report() {
    let dir = TempDir::new().unwrap();
    let analyzer = CommandAnalyzer::new(&shell("true", dir.path().join("none.txt")));
    let report = analyzer.analyze(&segment(dir.path())).await.unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_failure_reports_stderr_and_clears_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("alerts.txt");
    let config = shell("echo partial > {output}; echo boom >&2; exit 3", out.clone());
    let analyzer = CommandAnalyzer::new(&config);

    let err = analyzer.analyze(&segment(dir.path())).await.unwrap_err();
    match err {
        AnalysisError::ToolFailed { stderr, status, .. } => {
            assert_eq!(stderr, "boom");
            assert_eq!(status.code(), Some(3));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(std::fs::metadata(&out).unwrap().len(), 0);
}

#[tokio::test]
async fn test_failure_keeps_only_last_stderr_lines() {
    let dir = TempDir::new().unwrap();
    let config = shell(
        "i=1; while [ $i -le 20 ]; do echo line$i >&2; i=$((i+1)); done; exit 1",
        dir.path().join("out.txt"),
    );
    let analyzer = CommandAnalyzer::new(&config);

    let expected: Vec<String> = (13..=20).map(|i| format!("line{i}")).collect();
    match analyzer.analyze(&segment(dir.path())).await.unwrap_err() {
        AnalysisError::ToolFailed { stderr, .. } => assert_eq!(stderr, expected.join("\n")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_stderr_forwarded_line_by_line() {
    let stderr: &[u8] = b"warming up\r\n\nsegment truncated\n";
    let tail = forward_stderr(stderr, "tool".into(), "trace_00.pcapng".into()).await;
    assert_eq!(tail.forwarded, 3);
    assert_eq!(tail.joined(), "warming up\n\nsegment truncated");
}

#[tokio::test]
async fn test_successful_tool_with_background_child_returns() {
    let dir = TempDir::new().unwrap();
    let config = shell("(sleep 5 >&2 &); echo done >&2", dir.path().join("out.txt"));
    let analyzer = CommandAnalyzer::new(&config);

    let started = std::time::Instant::now();
    assert!(analyzer.analyze(&segment(dir.path())).await.is_ok());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_timeout_kills_tool() {
    let dir = TempDir::new().unwrap();
    let config = AnalysisConfig {
        timeout: Some(Duration::from_millis(50)),
        ..shell("sleep 5", dir.path().join("out.txt"))
    };
    let analyzer = CommandAnalyzer::new(&config);

    let started = std::time::Instant::now();
    let err = analyzer.analyze(&segment(dir.path())).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_spawn_failure() {
    let dir = TempDir::new().unwrap();
    let config = AnalysisConfig {
        program: "/nonexistent/analyzer".into(),
        output: dir.path().join("out.txt"),
        ..AnalysisConfig::default()
    };
    let err = CommandAnalyzer::new(&config)
        .analyze(&segment(dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Spawn { .. }));
}
