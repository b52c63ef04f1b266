// ============================================================================
// Pipeline Tests
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use frame_bus::testing::{EncoderProbe, ScriptedDecoder, ScriptedEncoder};
use frame_bus::{Bitrate, Encoder, EncoderPreference, FrameRate, MemoryReporter, Metric, PipelineError};

use super::{BranchOutcome, Pipe};
use crate::config::{BranchConfig, PipeConfig};

fn scripted(branch: &BranchConfig, fail_branch: Option<&str>) -> anyhow::Result<Box<dyn Encoder>> {
    let encoder = ScriptedEncoder::new(EncoderProbe::new());
    let encoder = if fail_branch == Some(branch.name.as_str()) {
        encoder.failing_at(3)
    } else {
        encoder
    };
    Ok(Box::new(encoder))
}

// ------------------------------------------------------------------------
// Pipe Tests
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_pipe_measures_every_branch_once() -> anyhow::Result<()> {
    let reporter = Arc::new(MemoryReporter::new());
    let pipe = Pipe::new(PipeConfig::default()).with_reporter(reporter.clone());

    let summary = pipe
        .run(Box::new(ScriptedDecoder::new(90)), |b| scripted(b, None))
        .await?;

    assert_eq!(summary.frames, 90);
    assert_eq!(summary.leaked, 0);
    assert_eq!(summary.failed(), 0);
    // 2 keyframes of 4000 bytes plus 88 deltas of 1000 bytes over 3.003s.
    for name in ["software", "hardware"] {
        let branch = summary.branch(name).expect("branch report");
        assert_eq!(branch.bitrate(), Some(Bitrate::Measured(255744)));
        assert_eq!(
            reporter.metrics_for(name),
            vec![Metric::Bitrate(Bitrate::Measured(255744))]
        );
    }
    assert_eq!(reporter.metrics_for("source"), vec![Metric::Frames(90)]);
    assert_eq!(reporter.entries().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_pipe_branch_failure_is_isolated() -> anyhow::Result<()> {
    let reporter = Arc::new(MemoryReporter::new());
    let pipe = Pipe::new(PipeConfig::default()).with_reporter(reporter.clone());

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        pipe.run(Box::new(ScriptedDecoder::new(90)), |b| {
            scripted(b, Some("software"))
        }),
    )
    .await??;

    let software = summary.branch("software").expect("software report");
    match software.error() {
        Some(PipelineError::Encode { branch, .. }) => assert_eq!(branch, "software"),
        other => panic!("expected encode failure, got {:?}", other),
    }
    let hardware = summary.branch("hardware").expect("hardware report");
    assert_eq!(hardware.bitrate(), Some(Bitrate::Measured(255744)));

    assert_eq!(summary.frames, 90);
    assert_eq!(summary.leaked, 0);
    assert!(matches!(
        reporter.metrics_for("software").as_slice(),
        [Metric::Failed(_)]
    ));
    assert_eq!(reporter.metrics_for("hardware").len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_pipe_flush_failure_leaves_sibling_measured() -> anyhow::Result<()> {
    let reporter = Arc::new(MemoryReporter::new());
    let pipe = Pipe::new(PipeConfig::default()).with_reporter(reporter.clone());

    let summary = pipe
        .run(Box::new(ScriptedDecoder::new(90)), |b| {
            let encoder = ScriptedEncoder::new(EncoderProbe::new());
            let encoder = if b.name == "software" {
                encoder.failing_flush()
            } else {
                encoder
            };
            Ok(Box::new(encoder) as Box<dyn Encoder>)
        })
        .await?;

    match summary.branch("software").and_then(|b| b.error()) {
        Some(PipelineError::Encode { branch, .. }) => assert_eq!(branch, "software"),
        other => panic!("expected encode failure, got {:?}", other),
    }
    assert_eq!(
        summary.branch("hardware").and_then(|b| b.bitrate()),
        Some(Bitrate::Measured(255744))
    );
    assert!(matches!(
        reporter.metrics_for("software").as_slice(),
        [Metric::Failed(_)]
    ));
    assert_eq!(
        reporter.metrics_for("hardware"),
        vec![Metric::Bitrate(Bitrate::Measured(255744))]
    );
    assert_eq!(summary.frames, 90);
    assert_eq!(summary.leaked, 0);
    Ok(())
}

#[tokio::test]
async fn test_pipe_source_failure_reaches_both_branches() -> anyhow::Result<()> {
    let reporter = Arc::new(MemoryReporter::new());
    let pipe = Pipe::new(PipeConfig::default()).with_reporter(reporter.clone());

    let summary = pipe
        .run(Box::new(ScriptedDecoder::new(90).failing_at(10)), |b| {
            scripted(b, None)
        })
        .await?;

    assert_eq!(summary.frames, 10);
    assert_eq!(summary.failed(), 2);
    for branch in &summary.branches {
        assert!(branch.error().expect("branch error").is_global());
        assert!(matches!(
            reporter.metrics_for(&branch.name).as_slice(),
            [Metric::Failed(_)]
        ));
    }
    assert!(matches!(
        reporter.metrics_for("source").as_slice(),
        [Metric::Failed(_)]
    ));
    assert_eq!(summary.leaked, 0);
    Ok(())
}

#[tokio::test]
async fn test_pipe_applies_frame_rate_to_branches() -> anyhow::Result<()> {
    let probe = EncoderProbe::new();
    let config = PipeConfig::builder()
        .framerate(FrameRate::new(25, 1)?)
        .add_preference_branch("only", EncoderPreference::PreferSoftware)
        .build();
    let pipe = Pipe::new(config).with_reporter(Arc::new(MemoryReporter::new()));

    let encoder_probe = probe.clone();
    let summary = pipe
        .run(Box::new(ScriptedDecoder::new(5)), move |_| {
            Ok(Box::new(ScriptedEncoder::new(encoder_probe.clone())) as Box<dyn Encoder>)
        })
        .await?;

    let log = probe.log();
    assert_eq!(log.configured.len(), 1);
    assert_eq!(log.configured[0].framerate, FrameRate::new(25, 1)?);
    assert_eq!(log.configured[0].preference, EncoderPreference::PreferSoftware);
    assert_eq!(log.timestamps, vec![0, 40_000, 80_000, 120_000, 160_000]);
    // 4000 + 4 * 1000 bytes over 0.2s.
    assert_eq!(
        summary.branch("only").and_then(|b| b.bitrate()),
        Some(Bitrate::Measured(320_000))
    );
    Ok(())
}

#[tokio::test]
async fn test_pipe_encoder_setup_error_aborts_before_playback() -> anyhow::Result<()> {
    let reporter = Arc::new(MemoryReporter::new());
    let pipe = Pipe::new(PipeConfig::default()).with_reporter(reporter.clone());

    let result = pipe
        .run(Box::new(ScriptedDecoder::new(10)), |b| {
            if b.name == "hardware" {
                anyhow::bail!("no device");
            }
            scripted(b, None)
        })
        .await;

    let err = result.expect_err("setup error");
    assert!(err.to_string().contains("hardware"));
    assert!(reporter.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_pipe_cancel_stops_branches() -> anyhow::Result<()> {
    let reporter = Arc::new(MemoryReporter::new());
    let pipe = Arc::new(Pipe::new(PipeConfig::default()).with_reporter(reporter.clone()));

    let canceller = pipe.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        pipe.run(Box::new(ScriptedDecoder::new(10_000)), |_| {
            let encoder =
                ScriptedEncoder::new(EncoderProbe::new()).with_delay(Duration::from_millis(10));
            Ok(Box::new(encoder) as Box<dyn Encoder>)
        }),
    )
    .await??;

    assert!(summary.frames < 10_000);
    for branch in &summary.branches {
        assert!(matches!(branch.outcome, BranchOutcome::Cancelled));
        assert!(reporter.metrics_for(&branch.name).is_empty());
    }
    assert_eq!(summary.leaked, 0);
    Ok(())
}

// ------------------------------------------------------------------------
// PipeConfig Tests
// ------------------------------------------------------------------------

#[test]
fn test_default_config_has_software_and_hardware_branches() {
    let config = PipeConfig::default();

    let names: Vec<&str> = config.branches.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["software", "hardware"]);
    assert_eq!(
        config.branches[0].encoder.preference,
        Some(EncoderPreference::PreferSoftware)
    );
    assert_eq!(
        config.branches[1].encoder.preference,
        Some(EncoderPreference::PreferHardware)
    );
    assert_eq!(config.frame_rate(), FrameRate::NTSC);
    assert!(config.validate().is_ok());
}

#[test]
fn test_builder_without_branches_uses_defaults() {
    let config = PipeConfig::builder().build();
    assert_eq!(config, PipeConfig::default());
}

#[test]
fn test_config_from_json() {
    let config: PipeConfig = serde_json::from_str(
        r#"{
            "framerate": "30000/1001",
            "branches": [
                { "name": "x264", "encoder": { "preference": "prefer-software", "bitrate": 800000 } },
                { "name": "gpu", "encoder": { "preference": "prefer-hardware", "gop_size": 30 } }
            ]
        }"#,
    )
    .unwrap();

    assert_eq!(config.framerate, Some(FrameRate::NTSC));
    assert_eq!(config.branches.len(), 2);
    assert_eq!(config.branches[0].encoder.bitrate, Some(800_000));
    assert_eq!(config.branches[1].encoder.gop_size, Some(30));
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_rejects_duplicate_branch_names() {
    let config = PipeConfig::builder()
        .add_preference_branch("a", EncoderPreference::PreferSoftware)
        .add_preference_branch("a", EncoderPreference::PreferHardware)
        .build();

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn test_config_from_json_file() {
    let path = std::env::temp_dir().join(format!("bitrate-tee-{}.json", std::process::id()));
    std::fs::write(&path, r#"{ "framerate": "25" }"#).unwrap();

    let config = PipeConfig::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.frame_rate(), FrameRate::new(25, 1).unwrap());
    assert_eq!(config.branches.len(), 2);
}
