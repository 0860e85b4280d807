mod common;

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use common::{harness, wav_bytes_at, wav_frames, ScriptedProvider, SAMPLE_RATE};
use narrator::config::ContainerFormat;
use narrator::export::concat::{Concatenator, FfmpegConcatenator, WavConcatenator};
use narrator::export::{ExportMerger, ExportRequest};
use narrator::kernel::block::RichContent;
use narrator::kernel::telemetry::recorder::SharedTelemetry;
use narrator::ErrorKind;

/// Mono clip holding one constant sample value, so order is checkable.
fn constant_wav(value: i16, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn samples(bytes: &[u8]) -> Vec<i16> {
    hound::WavReader::new(Cursor::new(bytes))
        .unwrap()
        .samples::<i16>()
        .map(|s| s.unwrap())
        .collect()
}

fn leftover(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

fn merger(provider: Arc<ScriptedProvider>, work: &Path) -> (ExportMerger, SharedTelemetry) {
    merger_with(provider, work, Arc::new(WavConcatenator))
}

fn merger_with(
    provider: Arc<ScriptedProvider>,
    work: &Path,
    concat: Arc<dyn Concatenator>,
) -> (ExportMerger, SharedTelemetry) {
    let telemetry = SharedTelemetry::new();
    let merger = ExportMerger::new(
        provider,
        concat,
        work.to_path_buf(),
        "narration.wav".to_string(),
    )
    .with_telemetry(telemetry.clone());
    (merger, telemetry)
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_partial_export_skips_unfetchable_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let provider = ScriptedProvider::new();
    provider.insert_artifact("j1", constant_wav(1_000, 800));
    provider.insert_artifact("j2", constant_wav(2_000, 400));
    provider.insert_artifact("j3", constant_wav(3_000, 600));
    provider.break_fetch("j2");

    let (merger, telemetry) = merger(provider, &work);
    let artifact = merger.merge(&ids(&["j1", "j2", "j3"])).await.unwrap();

    assert_eq!(artifact.included, ids(&["j1", "j3"]));
    assert_eq!(artifact.skipped.len(), 1);
    assert_eq!(artifact.skipped[0].job_id, "j2");
    assert!(artifact.is_partial());
    assert_eq!(artifact.warnings().len(), 1);
    assert!(artifact.warnings()[0].contains("j2"));

    let merged = samples(&artifact.bytes);
    assert_eq!(merged.len(), 1_400);
    assert!(merged[..800].iter().all(|s| *s == 1_000), "j1 first");
    assert!(merged[800..].iter().all(|s| *s == 3_000), "then j3");

    assert_eq!(artifact.content_type, "audio/wav");
    assert_eq!(artifact.content_disposition(), "attachment; filename=\"narration.wav\"");
    assert_eq!(leftover(&work), 0, "scratch files are removed");

    let stats = telemetry.snapshot().export;
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.partial, 1);
    assert_eq!(stats.artifacts_skipped, 1);
}

#[tokio::test]
async fn test_export_fails_when_nothing_is_retrievable() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let provider = ScriptedProvider::new();
    for job in ["a", "b"] {
        provider.insert_artifact(job, constant_wav(5, 100));
        provider.break_fetch(job);
    }

    let (merger, telemetry) = merger(provider, &work);
    let err = merger.merge(&ids(&["a", "b", "never-existed"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Merge);
    assert_eq!(leftover(&work), 0, "no temp files survive a failed export");
    assert_eq!(telemetry.snapshot().export.failed, 1);
}

#[tokio::test]
async fn test_empty_request_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (merger, _) = merger(ScriptedProvider::new(), dir.path());

    let err = merger.merge(&[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Merge);

    let body = merger.handle(ExportRequest { job_ids: vec![] }).await.unwrap_err();
    assert_eq!(body.kind, ErrorKind::Merge);
    assert!(body.message.contains("no jobs"));
}

#[tokio::test]
async fn test_mismatched_formats_abort_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let provider = ScriptedProvider::new();
    provider.insert_artifact("narrow", wav_bytes_at(0.5, 8_000));
    provider.insert_artifact("wide", wav_bytes_at(0.5, 16_000));

    let (merger, _) = merger(provider, &work);
    let err = merger.merge(&ids(&["narrow", "wide"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Merge);
    assert_eq!(leftover(&work), 0);
}

#[tokio::test]
async fn test_project_export_follows_block_order() {
    let h = harness();
    h.provider.succeed("opening", 0.5);
    h.provider.succeed("closing", 0.25);
    let opening = h.orchestrator.add_block(RichContent::plain("opening"), Some("nova".into()));
    let closing = h.orchestrator.add_block(RichContent::plain("closing"), Some("nova".into()));
    h.orchestrator.generate_all().await;

    let jobs = |id: narrator::BlockId| h.orchestrator.block(&id).unwrap().job_id.unwrap();
    assert_eq!(h.orchestrator.export_job_ids(), vec![jobs(opening), jobs(closing)]);

    h.orchestrator.move_block(closing, 0).unwrap();
    assert_eq!(h.orchestrator.export_job_ids(), vec![jobs(closing), jobs(opening)]);

    // Trims shape playback only; the export carries whole clips.
    h.orchestrator.trim(opening, 0.1, 0.2).unwrap();
    let artifact = h.orchestrator.export().await.unwrap();
    assert!(!artifact.is_partial());
    assert_eq!(wav_frames(&artifact.bytes), (0.75 * SAMPLE_RATE as f64) as u32);
}

#[tokio::test]
async fn test_project_without_audio_has_nothing_to_export() {
    let h = harness();
    h.orchestrator.add_block(RichContent::plain("unspoken"), Some("nova".into()));
    let err = h.orchestrator.export().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Merge);
    assert_eq!(h.provider.fetch_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

/// Shell script standing in for ffmpeg: records argv and the concat list,
/// then writes a marker to the output path (its last argument).
#[cfg(unix)]
fn fake_ffmpeg(dir: &Path, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-ffmpeg");
    std::fs::write(&script, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(unix)]
#[tokio::test]
async fn test_ffmpeg_backend_names_the_output_container() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let args_file = dir.path().join("args.txt");
    let list_copy = dir.path().join("list.txt");
    let script = fake_ffmpeg(
        dir.path(),
        &format!(
            r#"printf '%s\n' "$@" > '{args}'
prev=""
for a; do
  if [ "$prev" = "-i" ]; then cp "$a" '{list}'; fi
  prev="$a"
  last="$a"
done
printf 'merged' > "$last"
"#,
            args = args_file.display(),
            list = list_copy.display()
        ),
    );

    let provider = ScriptedProvider::new();
    provider.insert_artifact("j1", b"first".to_vec());
    provider.insert_artifact("j2", b"second".to_vec());
    provider.insert_artifact("j3", b"third".to_vec());
    provider.break_fetch("j2");

    let concat = Arc::new(FfmpegConcatenator::new(script, ContainerFormat::Mp3));
    let (merger, _) = merger_with(provider, &work, concat);
    let artifact = merger.merge(&ids(&["j1", "j2", "j3"])).await.unwrap();

    assert_eq!(artifact.bytes, b"merged");
    assert_eq!(artifact.content_type, "audio/mpeg");
    assert_eq!(artifact.file_name, "narration.mp3");
    assert_eq!(artifact.included, ids(&["j1", "j3"]));

    let args: Vec<String> = std::fs::read_to_string(&args_file)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    let muxer = args.iter().rposition(|a| a == "-f").unwrap();
    assert_eq!(args[muxer + 1], "mp3", "output muxer is explicit");
    assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
    assert!(args.last().unwrap().ends_with("merged.mp3"));

    let list = std::fs::read_to_string(&list_copy).unwrap();
    let entries: Vec<&str> = list.lines().collect();
    assert_eq!(entries.len(), 2);
    assert!(entries[0].contains("0000.part") && entries[1].contains("0002.part"));
    assert_eq!(leftover(&work), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_ffmpeg_failure_is_a_merge_error() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let script = fake_ffmpeg(dir.path(), "echo 'Invalid data found' >&2\nexit 1\n");

    let provider = ScriptedProvider::new();
    provider.insert_artifact("j1", b"first".to_vec());
    let concat = Arc::new(FfmpegConcatenator::new(script, ContainerFormat::Ogg));
    let (merger, telemetry) = merger_with(provider, &work, concat);

    let err = merger.merge(&ids(&["j1"])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Merge);
    assert!(err.to_string().contains("Invalid data found"));
    assert_eq!(leftover(&work), 0);
    assert_eq!(telemetry.snapshot().export.failed, 1);
}

#[tokio::test]
async fn test_ffmpeg_joins_wav_clips_when_installed() {
    let installed = std::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !installed {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let provider = ScriptedProvider::new();
    provider.insert_artifact("a", constant_wav(100, 800));
    provider.insert_artifact("b", constant_wav(200, 400));

    let concat = Arc::new(FfmpegConcatenator::new("ffmpeg".into(), ContainerFormat::Wav));
    let (merger, _) = merger_with(provider, &work, concat);
    let artifact = merger.merge(&ids(&["a", "b"])).await.unwrap();

    assert_eq!(artifact.file_name, "narration.wav");
    assert_eq!(wav_frames(&artifact.bytes), 1_200);
    assert_eq!(leftover(&work), 0);
}
