//! transcode.rs の Property-Based Testing
//!
//! モックのエンジンを使って、出力のタイミングや失敗箇所を変えても
//! 画像の解放漏れやカウンターの不整合が起きないことを確認する

#[path = "../../tests/common/mod.rs"]
mod common;

use std::sync::Arc;

use futures::executor::block_on;
use proptest::prelude::*;
use shiguredo_mp4_to_webm::{
    TranscodeErrorKind, TranscodeOptions, TranscodeProgress, TranscodeState, Transcoder,
};

use common::{FrameLedger, MockDecoder, MockEncoder, TrackSpec, build_mp4};

#[derive(Debug, Clone, Copy)]
struct Scenario {
    sample_count: usize,
    batch_size: usize,
    max_decode_queue: usize,
    decoder_reorder_depth: usize,
    encoder_buffers: bool,
}

/// デコーダーが保持する画像の数は常にキューの上限未満になるように生成する
fn scenario() -> impl Strategy<Value = Scenario> {
    (1usize..30, 1usize..12, 1usize..10, any::<bool>())
        .prop_flat_map(|(sample_count, batch_size, max_decode_queue, encoder_buffers)| {
            (0..max_decode_queue).prop_map(move |decoder_reorder_depth| Scenario {
                sample_count,
                batch_size,
                max_decode_queue,
                decoder_reorder_depth,
                encoder_buffers,
            })
        })
}

proptest! {
    /// 正常終了時は全段階のカウンターが一致し、全ての画像が解放される
    #[test]
    fn successful_runs_balance_counters(s in scenario()) {
        let ledger = Arc::new(FrameLedger::default());
        let mut decoder = MockDecoder::new(ledger.clone());
        decoder.reorder_depth = s.decoder_reorder_depth;
        let mut encoder = MockEncoder::new();
        encoder.buffer_until_flush = s.encoder_buffers;

        let options = TranscodeOptions {
            demux_batch_size: s.batch_size,
            max_decode_queue: s.max_decode_queue,
            ..TranscodeOptions::default()
        };
        let bytes = build_mp4(&[TrackSpec::h264(s.sample_count)]);
        let mut transcoder = Transcoder::new(options, decoder, encoder).expect("transcoder");

        let mut last_fraction = 0.0;
        let mut monotonic = true;
        let result = block_on(transcoder.transcode(&bytes, |p: &TranscodeProgress| {
            monotonic &= last_fraction <= p.fraction;
            last_fraction = p.fraction;
        }));

        prop_assert!(result.is_ok());
        prop_assert!(monotonic);
        prop_assert_eq!(last_fraction, 1.0);
        prop_assert_eq!(transcoder.state(), TranscodeState::Done);

        let c = transcoder.counters();
        prop_assert_eq!(c.total_samples, s.sample_count);
        prop_assert_eq!(c.demuxed_samples, s.sample_count);
        prop_assert_eq!(c.submitted_samples, s.sample_count);
        prop_assert_eq!(c.decoded_frames, s.sample_count);
        prop_assert_eq!(c.encoded_chunks, s.sample_count);
        prop_assert_eq!(c.muxed_chunks, s.sample_count);
        prop_assert_eq!(ledger.created(), s.sample_count);
        prop_assert_eq!(ledger.outstanding(), 0);
        prop_assert!(ledger.peak() <= s.max_decode_queue);
    }

    /// どこで失敗しても画像は全て解放され、エンジンは一度だけ閉じられる
    #[test]
    fn failures_release_every_frame(
        s in scenario(),
        fail_at in 1usize..30,
        fail_in_decoder in any::<bool>(),
    ) {
        let ledger = Arc::new(FrameLedger::default());
        let mut decoder = MockDecoder::new(ledger.clone());
        decoder.reorder_depth = s.decoder_reorder_depth;
        let mut encoder = MockEncoder::new();
        encoder.buffer_until_flush = s.encoder_buffers;
        if fail_in_decoder {
            decoder.fail_on_chunk = Some(fail_at);
        } else {
            encoder.fail_on_frame = Some(fail_at);
        }
        let decoder_calls = decoder.calls.clone();
        let encoder_calls = encoder.calls.clone();

        let options = TranscodeOptions {
            max_decode_queue: s.max_decode_queue,
            ..TranscodeOptions::default()
        };
        let bytes = build_mp4(&[TrackSpec::h264(s.sample_count)]);
        let mut transcoder = Transcoder::new(options, decoder, encoder).expect("transcoder");
        let result = block_on(transcoder.transcode(&bytes, |_: &TranscodeProgress| {}));

        if fail_at <= s.sample_count {
            let error = result.expect_err("must fail");
            prop_assert_eq!(error.kind(), TranscodeErrorKind::EngineRuntime);
            prop_assert_eq!(transcoder.state(), TranscodeState::Failed);
        } else {
            prop_assert!(result.is_ok());
        }
        prop_assert_eq!(ledger.outstanding(), 0);
        prop_assert_eq!(decoder_calls.borrow().close_calls, 1);
        prop_assert_eq!(encoder_calls.borrow().close_calls, 1);
    }
}
