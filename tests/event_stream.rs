//! Background pipelines and their event streams.

mod support;

use framecodec::{CancellationToken, EncodeOptions, ExtractOptions, FrameCodecError, PipelineEvent, StillFormat, stream};
use support::{Script, ScriptedBackend, write_frames};

fn terminal_count(events: &[PipelineEvent]) -> usize {
    events.iter().filter(|event| event.is_terminal()).count()
}

#[test]
fn extraction_ends_with_exactly_one_completion() {
    let directory = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(Script::default());

    let events: Vec<PipelineEvent> = stream::spawn_extraction(
        backend.clone(),
        "clip.mp4",
        vec![0.5, 1.0, 1.5],
        directory.path(),
        ExtractOptions::new(),
    )
    .unwrap()
    .collect();

    assert_eq!(events.len(), 4);
    assert_eq!(terminal_count(&events), 1);

    let percents: Vec<u8> = events
        .iter()
        .map(|event| match event {
            PipelineEvent::Progress(progress) | PipelineEvent::Completed(progress) => progress.percent,
            PipelineEvent::Failed(error) => panic!("unexpected failure: {error}"),
        })
        .collect();
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]), "{percents:?}");

    match events.last().unwrap() {
        PipelineEvent::Completed(done) => {
            assert_eq!(done.percent, 100);
            assert_eq!(done.location.as_deref(), Some(directory.path()));
        }
        other => panic!("Expected Completed, got: {other:?}"),
    }
    assert!(directory.path().join("image_003.jpg").is_file());
}

#[test]
fn failure_is_the_only_terminal_event() {
    let directory = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(Script {
        unreadable: true,
        ..Script::default()
    });

    let events: Vec<PipelineEvent> =
        stream::spawn_extraction(backend, "missing.mp4", vec![1.0], directory.path(), ExtractOptions::new())
            .unwrap()
            .collect();

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        PipelineEvent::Failed(FrameCodecError::SourceUnreadable { .. })
    ));
}

#[test]
fn cancellation_ends_the_stream_without_a_terminal_event() {
    let directory = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let backend = ScriptedBackend::new(Script {
        cancel_after: Some((20, token.clone())),
        ..Script::default()
    });
    let options = ExtractOptions::new()
        .with_still_format(StillFormat::Png)
        .with_cancellation(token);

    let mut events = stream::spawn_extraction(
        backend.clone(),
        "clip.mp4",
        vec![0.5, 1.0, 1.5],
        directory.path(),
        options,
    )
    .unwrap();

    let mut seen = Vec::new();
    while let Some(event) = events.blocking_next() {
        seen.push(event);
    }
    events.join();

    assert_eq!(terminal_count(&seen), 0);
    assert_eq!(seen.len(), 1, "only the frame before the cancellation point");
    assert_eq!(backend.observed.live_handles(), 0);
}

#[test]
fn cancel_through_the_stream_handle() {
    let directory = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(Script {
        samples: 100_000,
        tracks: vec![support::video_track(30.0, 3_333.0)],
        ..Script::default()
    });

    let mut events = stream::spawn_extraction(
        backend.clone(),
        "long.mp4",
        vec![3_000.0],
        directory.path(),
        ExtractOptions::new(),
    )
    .unwrap();
    events.cancel();
    assert!(events.cancellation_token().is_cancelled());

    let mut seen = Vec::new();
    while let Some(event) = events.blocking_next() {
        seen.push(event);
    }
    events.join();

    assert_eq!(terminal_count(&seen), 0);
    assert_eq!(backend.observed.live_handles(), 0);
}

#[test]
fn encoding_stream_completes_with_the_output_location() {
    let directory = tempfile::tempdir().unwrap();
    let frames = directory.path().join("frames");
    write_frames(&frames, 4, 8, 6);
    let output = directory.path().join("out.mp4");
    let backend = ScriptedBackend::new(Script::default());

    let events: Vec<PipelineEvent> = stream::spawn_encoding(backend, &frames, &output, EncodeOptions::new())
        .unwrap()
        .collect();

    assert_eq!(events.len(), 5);
    assert_eq!(terminal_count(&events), 1);
    match events.last().unwrap() {
        PipelineEvent::Completed(done) => assert_eq!(done.location.as_deref(), Some(output.as_path())),
        other => panic!("Expected Completed, got: {other:?}"),
    }
}

#[test]
fn empty_frame_set_fails_through_the_stream() {
    let directory = tempfile::tempdir().unwrap();
    let frames = directory.path().join("frames");
    std::fs::create_dir(&frames).unwrap();
    let backend = ScriptedBackend::new(Script::default());

    let events: Vec<PipelineEvent> =
        stream::spawn_encoding(backend, &frames, directory.path().join("out.mp4"), EncodeOptions::new())
            .unwrap()
            .collect();

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], PipelineEvent::Failed(FrameCodecError::EmptyFrameSet)));
}

#[tokio::test]
async fn events_can_be_awaited() {
    let directory = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(Script::default());

    let mut events = stream::spawn_extraction(
        backend,
        "clip.mp4",
        vec![1.0, 2.0],
        directory.path().to_path_buf(),
        ExtractOptions::new(),
    )
    .unwrap();

    let mut progress = 0;
    let mut completed = false;
    while let Some(event) = events.next_event().await {
        match event {
            PipelineEvent::Progress(_) => progress += 1,
            PipelineEvent::Completed(_) => completed = true,
            PipelineEvent::Failed(error) => panic!("unexpected failure: {error}"),
        }
    }

    assert_eq!(progress, 2);
    assert!(completed);
}

#[cfg(feature = "async")]
#[tokio::test]
async fn event_stream_is_a_tokio_stream() {
    use tokio_stream::StreamExt;

    let directory = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(Script::default());

    let events = stream::spawn_extraction(
        backend,
        "clip.mp4",
        vec![0.5],
        directory.path().to_path_buf(),
        ExtractOptions::new(),
    )
    .unwrap();

    // `EventStream` is also an `Iterator`; name the trait to pick the async one.
    let collected: Vec<PipelineEvent> = StreamExt::collect(events).await;
    assert_eq!(collected.len(), 2);
    assert!(collected[1].is_terminal());
}
