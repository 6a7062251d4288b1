mod common;

use bytes::Bytes;
use common::{Harness, Script, ScriptedEngine, jpeg_bytes, png_bytes};
use cutout_relay::config::RelayConfig;
use cutout_relay::models::ProcessingRequest;
use cutout_relay::services::engine::Purpose;
use cutout_relay::services::pipeline::{EncodingStrategy, PipelineError};
use std::collections::HashSet;
use std::time::Duration;

#[tokio::test]
async fn test_file_reference_success() {
    let engine = ScriptedEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone()).await;

    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(jpeg_bytes(8, 6)), "jpg", "image/jpeg")
        .await
        .unwrap();
    let input = upload.path.clone();
    let base = upload.base_name.clone();

    let outcome = h
        .pipeline
        .process_upload(upload, ProcessingRequest::new("req-cat"))
        .await
        .unwrap();

    assert_eq!(outcome.strategy, EncodingStrategy::FileReference);
    assert_eq!(outcome.image_url, format!("/processed/{}.png", base));
    assert_eq!(outcome.asset.filename, format!("{}.png", base));
    assert!(outcome.asset.path.exists());
    assert!(outcome.asset.size > 0);

    let calls = engine.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, "file");
    assert!(calls[0].locator.starts_with("file://"));
    assert!(calls[0].readable, "engine must be able to read the input");
    assert_eq!(calls[0].options.purpose, Some(Purpose::Foreground));
    assert_eq!(calls[0].options.output_format, "image/png");
    assert_eq!(calls[0].options.quality, 1.0);

    // Input is gone, output stays until the cleanup delay
    assert!(!input.exists());
    assert_eq!(h.pending_uploads(), 0);
    assert_eq!(h.pipeline.cleanup().stats().pending, 1);
}

#[tokio::test]
async fn test_inline_retry_after_file_reference_fails() {
    let engine = ScriptedEngine::new(Script::RejectFile("file access denied".to_string()));
    let h = Harness::new(engine.clone()).await;

    // Declared as JPEG, but the bytes are PNG
    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(png_bytes(4, 4)), "jpg", "image/jpeg")
        .await
        .unwrap();
    let input = upload.path.clone();

    let outcome = h
        .pipeline
        .process_upload(upload, ProcessingRequest::generate())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, EncodingStrategy::InlineData);
    assert!(outcome.asset.path.exists());

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].kind, "file");
    assert_eq!(calls[1].kind, "inline");
    assert!(calls[1].locator.starts_with("data:image/png;base64,"));
    assert!(calls[1].readable);

    // Only `purpose` differs between the two attempts
    assert_eq!(calls[1].options.purpose, None);
    assert_eq!(calls[1].options.output_format, calls[0].options.output_format);
    assert_eq!(calls[1].options.quality, calls[0].options.quality);
    assert_eq!(calls[1].options.debug, calls[0].options.debug);

    assert!(!input.exists());
}

#[tokio::test]
async fn test_both_attempts_fail_reports_first_error() {
    let engine = ScriptedEngine::new(Script::RejectAll {
        file: "model not loaded".to_string(),
        inline: "payload too large".to_string(),
    });
    let h = Harness::new(engine.clone()).await;

    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(jpeg_bytes(4, 4)), "jpg", "image/jpeg")
        .await
        .unwrap();
    let input = upload.path.clone();
    let output = h.pipeline.storage().processed_path(&upload.base_name);

    let err = h
        .pipeline
        .process_upload(upload, ProcessingRequest::generate())
        .await
        .unwrap_err();

    match err {
        PipelineError::EngineFailure { primary } => {
            assert!(primary.contains("model not loaded"));
            assert!(!primary.contains("payload too large"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(engine.calls().len(), 2);
    assert!(!input.exists());
    assert!(!output.exists());
    assert_eq!(h.pipeline.cleanup().stats().pending, 0);
}

#[tokio::test]
async fn test_timeout_is_terminal() {
    let engine = ScriptedEngine::new(Script::Hang);
    let h = Harness::with_timeout(engine.clone(), Duration::from_millis(200)).await;

    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(jpeg_bytes(4, 4)), "jpg", "image/jpeg")
        .await
        .unwrap();
    let input = upload.path.clone();

    let err = h
        .pipeline
        .process_upload(upload, ProcessingRequest::generate())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::EngineTimeout { timeout } if timeout == Duration::from_millis(200)));
    // No inline retry after a timeout
    assert_eq!(engine.calls().len(), 1);
    assert!(!input.exists());
}

#[tokio::test]
async fn test_missing_input() {
    let engine = ScriptedEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone()).await;

    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(jpeg_bytes(4, 4)), "jpg", "image/jpeg")
        .await
        .unwrap();
    std::fs::remove_file(&upload.path).unwrap();

    let err = h
        .pipeline
        .process_upload(upload, ProcessingRequest::generate())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoInput));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_uploads_get_distinct_outputs() {
    let engine = ScriptedEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone()).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = h.pipeline.clone();
        handles.push(tokio::spawn(async move {
            let upload = pipeline
                .storage()
                .store_upload(Bytes::from(jpeg_bytes(4, 4)), "jpg", "image/jpeg")
                .await
                .unwrap();
            pipeline
                .process_upload(upload, ProcessingRequest::generate())
                .await
                .unwrap()
        }));
    }

    let mut urls = HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.asset.path.exists());
        urls.insert(outcome.image_url);
    }

    assert_eq!(urls.len(), 8);
    assert_eq!(engine.calls().len(), 8);
    assert_eq!(h.pending_uploads(), 0);
}

#[tokio::test]
async fn test_outputs_removed_on_shutdown() {
    let engine = ScriptedEngine::new(Script::Succeed);
    let h = Harness::new(engine).await;

    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(jpeg_bytes(4, 4)), "png", "image/png")
        .await
        .unwrap();
    let outcome = h
        .pipeline
        .process_upload(upload, ProcessingRequest::generate())
        .await
        .unwrap();
    assert!(outcome.asset.path.exists());

    h.shutdown.send(true).unwrap();

    let mut gone = false;
    for _ in 0..50 {
        if !outcome.asset.path.exists() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "pending output should be deleted on shutdown");
}

#[tokio::test(start_paused = true)]
async fn test_output_lives_for_the_default_cleanup_delay() {
    let engine = ScriptedEngine::new(Script::Succeed);
    let h = Harness::with_config(engine, RelayConfig::default(), Duration::from_secs(10)).await;
    assert_eq!(h.pipeline.cleanup().delay(), Duration::from_secs(300));

    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(jpeg_bytes(4, 4)), "jpg", "image/jpeg")
        .await
        .unwrap();
    let outcome = h
        .pipeline
        .process_upload(upload, ProcessingRequest::generate())
        .await
        .unwrap();
    let output = outcome.asset.path.clone();

    // Let the worker pick up the job before moving the clock
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    tokio::time::advance(Duration::from_secs(299)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(output.exists(), "output deleted before five minutes");

    tokio::time::advance(Duration::from_secs(2)).await;
    let mut gone = false;
    for _ in 0..100 {
        if !output.exists() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(gone, "output still present after five minutes");
    assert_eq!(h.pipeline.cleanup().stats().deleted, 1);
}

#[tokio::test]
async fn test_failed_output_write_leaves_nothing_behind() {
    let engine = ScriptedEngine::new(Script::Succeed);
    let h = Harness::new(engine.clone()).await;

    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(jpeg_bytes(4, 4)), "jpg", "image/jpeg")
        .await
        .unwrap();
    let input = upload.path.clone();

    // A directory squatting on the output name makes the final rename fail
    let output = h.pipeline.storage().processed_path(&upload.base_name);
    std::fs::create_dir(&output).unwrap();

    let err = h
        .pipeline
        .process_upload(upload, ProcessingRequest::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Io(_)));

    let leftovers: Vec<_> = std::fs::read_dir(h.pipeline.storage().processed_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(leftovers, vec![output]);
    assert!(!input.exists());
}

#[tokio::test]
async fn test_configured_quality_reaches_engine() {
    let engine = ScriptedEngine::new(Script::RejectFile("no file access".to_string()));
    let config = RelayConfig {
        engine_quality: 0.5,
        ..RelayConfig::default()
    };
    let h = Harness::with_config(engine.clone(), config, Duration::from_secs(10)).await;

    let upload = h
        .pipeline
        .storage()
        .store_upload(Bytes::from(jpeg_bytes(4, 4)), "jpg", "image/jpeg")
        .await
        .unwrap();
    h.pipeline
        .process_upload(upload, ProcessingRequest::generate())
        .await
        .unwrap();

    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].options.quality, 0.5);
    assert_eq!(calls[1].options.quality, 0.5);
}
