use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use voice_session_recorder::chunk_store::{ChunkStore, LocalChunkStore};
use voice_session_recorder::context::RequestContext;
use voice_session_recorder::ffmpeg::{self, FfmpegRunner};
use voice_session_recorder::models::{SilenceAnalysis, SilenceSegment};
use voice_session_recorder::records::{RecordStore, SqliteRecordStore};
use voice_session_recorder::silence::{SilenceAnalyzer, SilenceError, SilenceSettings};

struct Fixture {
    analyzer: SilenceAnalyzer,
    records: Arc<SqliteRecordStore>,
    store: Arc<LocalChunkStore>,
    _db_guard: tempfile::TempDir,
    _storage: tempfile::TempDir,
}

async fn fixture(ffmpeg_program: &str) -> Fixture {
    let (pool, db_guard) = voice_session_recorder::db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    voice_session_recorder::db::init_database_schema(&pool)
        .await
        .unwrap();
    let records = Arc::new(SqliteRecordStore::new(pool));

    let storage = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalChunkStore::new(storage.path()));

    let analyzer = SilenceAnalyzer::new(
        store.clone() as Arc<dyn ChunkStore>,
        records.clone() as Arc<dyn RecordStore>,
        FfmpegRunner::new(ffmpeg_program, Duration::from_secs(30)),
        SilenceSettings::default(),
        None,
    );

    Fixture {
        analyzer,
        records,
        store,
        _db_guard: db_guard,
        _storage: storage,
    }
}

/// 1s of tone, 2s of digital silence, 1s of tone at 48kHz mono
fn tone_gap_tone_wav() -> Vec<u8> {
    tone_with_gaps_wav(4.0, &[(1.0, 3.0)])
}

/// A 440Hz tone of `seconds` length with digital silence over each `(start, end)` gap
fn tone_with_gaps_wav(seconds: f64, gaps: &[(f64, f64)]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..(seconds * 48_000.0) as u32 {
            let t = i as f64 / 48_000.0;
            let sample = if gaps.iter().any(|&(start, end)| (start..end).contains(&t)) {
                0
            } else {
                ((t * 440.0 * std::f64::consts::TAU).sin() * 12_000.0) as i16
            };
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[test]
fn test_cached_analysis_is_returned_without_scanning() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        // A scan would fail: the program does not exist
        let fx = fixture("/nonexistent/ffmpeg").await;
        let cached = SilenceAnalysis {
            file_path: "conv-1/combined-1.webm".to_string(),
            segments: vec![SilenceSegment { start: 2.0, end: 4.0 }],
            duration_seconds: 12.0,
            threshold_db: -50.0,
            min_silence_duration_seconds: 0.5,
            analyzed_at_ms: 42,
        };
        fx.records.upsert_silence_analysis(&cached).await.unwrap();

        let ctx = RequestContext::new("silence");
        let analysis = fx
            .analyzer
            .analyze(&ctx, "conv-1/combined-1.webm")
            .await
            .unwrap();
        assert_eq!(analysis, cached);
    });
}

#[test]
fn test_missing_file_is_not_found() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let fx = fixture("/nonexistent/ffmpeg").await;
        let ctx = RequestContext::new("silence");

        let err = fx
            .analyzer
            .analyze(&ctx, "conv-1/missing.webm")
            .await
            .unwrap_err();
        assert!(matches!(err, SilenceError::NotFound(ref p) if p == "conv-1/missing.webm"));
    });
}

#[test]
fn test_blank_path_is_rejected() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let fx = fixture("/nonexistent/ffmpeg").await;
        let ctx = RequestContext::new("silence");

        let err = fx.analyzer.analyze(&ctx, "   ").await.unwrap_err();
        assert!(matches!(err, SilenceError::InvalidInput(_)));
    });
}

#[test]
fn test_tool_failure_writes_no_analysis() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let fx = fixture("/nonexistent/ffmpeg").await;
        fx.store
            .put("conv-2/combined-1.wav", tone_gap_tone_wav(), "audio/wav", false)
            .await
            .unwrap();
        let ctx = RequestContext::new("silence");

        let err = fx
            .analyzer
            .analyze(&ctx, "conv-2/combined-1.wav")
            .await
            .unwrap_err();
        assert!(matches!(err, SilenceError::Tool(_)), "{}", err);
        assert!(fx
            .records
            .get_silence_analysis("conv-2/combined-1.wav")
            .await
            .unwrap()
            .is_none());
    });
}

#[test]
fn test_detects_gap_with_real_ffmpeg() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        if !ffmpeg::is_available(Path::new("ffmpeg")).await {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let fx = fixture("ffmpeg").await;
        fx.store
            .put("conv-3/combined-1.wav", tone_gap_tone_wav(), "audio/wav", false)
            .await
            .unwrap();
        let ctx = RequestContext::new("silence");

        let analysis = fx
            .analyzer
            .analyze(&ctx, "conv-3/combined-1.wav")
            .await
            .unwrap();
        assert_eq!(analysis.segments.len(), 1, "{:?}", analysis.segments);
        let segment = analysis.segments[0];
        assert!((segment.start - 1.0).abs() < 0.1, "{:?}", segment);
        assert!((segment.end - 3.0).abs() < 0.1, "{:?}", segment);
        assert!((analysis.duration_seconds - 4.0).abs() < 0.1);

        let stored = fx
            .records
            .get_silence_analysis("conv-3/combined-1.wav")
            .await
            .unwrap();
        assert_eq!(stored, Some(analysis));
    });
}

#[test]
fn test_reports_only_gaps_longer_than_minimum() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        if !ffmpeg::is_available(Path::new("ffmpeg")).await {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let fx = fixture("ffmpeg").await;
        // The 0.3s gap at 6.0 is shorter than the 0.5s minimum
        let wav = tone_with_gaps_wav(12.0, &[(2.0, 4.0), (6.0, 6.3), (10.0, 10.6)]);
        fx.store
            .put("conv-4/combined-1.wav", wav, "audio/wav", false)
            .await
            .unwrap();
        let ctx = RequestContext::new("silence");

        let analysis = fx
            .analyzer
            .analyze(&ctx, "conv-4/combined-1.wav")
            .await
            .unwrap();
        let expected = [(2.0, 4.0), (10.0, 10.6)];
        assert_eq!(analysis.segments.len(), expected.len(), "{:?}", analysis.segments);
        for (segment, (start, end)) in analysis.segments.iter().zip(expected) {
            assert!((segment.start - start).abs() < 0.1, "{:?}", segment);
            assert!((segment.end - end).abs() < 0.1, "{:?}", segment);
        }
        assert!(analysis
            .segments
            .windows(2)
            .all(|w| w[0].end <= w[1].start));
        assert_eq!(analysis.threshold_db, -50.0);
        assert_eq!(analysis.min_silence_duration_seconds, 0.5);
    });
}
