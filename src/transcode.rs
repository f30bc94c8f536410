//! MP4 から WebM への変換処理全体を制御するモジュール
//!
//! # 状態遷移
//!
//! ```text
//! Idle → Running → Draining → Done
//!   │       │          │
//!   └───────┴──────────┴────→ Failed
//! ```
//!
//! - Running: サンプルを一つずつデコーダーに渡し、出力された画像をすぐにエンコーダーに渡す。
//!   出力待ちのチャンク数が [`TranscodeOptions::max_decode_queue`] に達した場合は、
//!   エンジンの出力が届くまで次のサンプルの投入を待つ
//! - Draining: 全サンプルを渡し終えた後にデコーダーとエンコーダーを順に flush する
//! - Failed: エンジンのエラーやキャンセルなどで中断された (途中までの出力は破棄される)
use std::{
    collections::HashMap,
    future::Future,
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{
    StreamExt,
    future::{self, Either},
};
use serde::Serialize;

use crate::{
    codec_config::{CodecConfigResolver, DecoderConfig},
    demux::{Mp4VideoDemuxer, Sample, collect_samples},
    engine::{
        ChunkType, EncodeOptions, EncodedChunk, EncodedVideoChunk, OutputReceiver, OutputSender,
        VideoDecoderEngine, VideoEncoderEngine, VideoFrame, output_channel,
    },
    error::{EngineRole, TranscodeError},
    options::TranscodeOptions,
    webm::{WebmMuxer, WebmTrackConfig},
};

/// 変換処理の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum TranscodeState {
    Idle,
    Running,
    Draining,
    Done,
    Failed,
}

/// 変換処理の各段階で処理されたサンプル数などのカウンター
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeCounters {
    /// トラックの全サンプル数
    pub total_samples: usize,

    /// デマルチプレクサーから取り出されたサンプル数
    pub demuxed_samples: usize,

    /// デコーダーに渡されたサンプル数
    pub submitted_samples: usize,

    /// デコーダーから出力された画像の数
    pub decoded_frames: usize,

    /// エンコーダーから出力されたチャンクの数
    pub encoded_chunks: usize,

    /// WebM に書き込まれたチャンクの数
    pub muxed_chunks: usize,
}

impl TranscodeCounters {
    /// 進捗率 (エンコード済みチャンク数 / 全サンプル数) を返す
    pub fn fraction(&self) -> f64 {
        if self.total_samples == 0 {
            return 0.0;
        }
        (self.encoded_chunks as f64 / self.total_samples as f64).min(1.0)
    }
}

/// 変換処理の段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum TranscodePhase {
    Demuxing,
    Transcoding,
    Draining,
    Complete,
}

/// 変換処理の進捗
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeProgress {
    /// 進捗率 (0.0 〜 1.0)
    pub fraction: f64,

    /// 現在の段階
    pub phase: TranscodePhase,

    /// 表示用のメッセージ
    pub message: String,

    /// 各段階のカウンター
    pub counters: TranscodeCounters,
}

impl TranscodeProgress {
    fn new(phase: TranscodePhase, message: String, counters: TranscodeCounters) -> Self {
        let fraction = if phase == TranscodePhase::Complete {
            1.0
        } else {
            counters.fraction()
        };
        Self {
            fraction,
            phase,
            message,
            counters,
        }
    }
}

/// 変換処理の進捗の通知を受け取るためのトレイト
pub trait ProgressObserver {
    /// 進捗が更新されるたびに呼び出される
    fn on_progress(&mut self, progress: &TranscodeProgress);
}

impl<F: FnMut(&TranscodeProgress)> ProgressObserver for F {
    fn on_progress(&mut self, progress: &TranscodeProgress) {
        self(progress)
    }
}

/// 変換処理を外部から中断するためのトークン
///
/// クローンしたトークンは全て同じ状態を共有する
#[derive(Debug, Default, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// 新しい [`CancellationToken`] インスタンスを生成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 変換処理の中断を要求する
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// 中断が要求されているかどうかを返す
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// タイムスケール単位の時刻をマイクロ秒単位に変換する
///
/// 端数は四捨五入される (`round(ticks * 1_000_000 / timescale)`)
pub fn to_microseconds(ticks: i64, timescale: NonZeroU32) -> i64 {
    let timescale = i128::from(timescale.get());
    let numerator = i128::from(ticks) * 1_000_000;
    let us = (2 * numerator + timescale).div_euclid(2 * timescale);
    i64::try_from(us).unwrap_or(if us < 0 { i64::MIN } else { i64::MAX })
}

/// MP4 ファイルを WebM (VP8) ファイルに変換する
///
/// 一つのインスタンスで行える変換は一回のみ
#[derive(Debug)]
pub struct Transcoder<D, E> {
    options: TranscodeOptions,
    decoder: D,
    encoder: E,
    state: TranscodeState,
    counters: TranscodeCounters,
    cancellation: CancellationToken,
}

impl<D, E> Transcoder<D, E>
where
    D: VideoDecoderEngine,
    E: VideoEncoderEngine<Frame = D::Frame>,
{
    /// 新しい [`Transcoder`] インスタンスを生成する
    pub fn new(options: TranscodeOptions, decoder: D, encoder: E) -> Result<Self, TranscodeError> {
        options.validate()?;
        Ok(Self {
            options,
            decoder,
            encoder,
            state: TranscodeState::Idle,
            counters: TranscodeCounters::default(),
            cancellation: CancellationToken::new(),
        })
    }

    /// この変換処理を中断するためのトークンを返す
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// 現在の状態を返す
    pub fn state(&self) -> TranscodeState {
        self.state
    }

    /// 現在のカウンターを返す
    pub fn counters(&self) -> TranscodeCounters {
        self.counters
    }

    /// 変換に使われる設定を返す
    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// MP4 ファイルを変換して、WebM ファイルのバイト列を返す
    pub async fn transcode<P>(&mut self, input: &[u8], progress: P) -> Result<Vec<u8>, TranscodeError>
    where
        P: ProgressObserver,
    {
        self.transcode_with_deadline(input, future::pending(), progress)
            .await
    }

    /// [`Transcoder::transcode()`] と同様だが、サンプルの取り出しに期限を設ける
    ///
    /// 全サンプルが揃う前に `deadline` が完了した場合は [`TranscodeError::DemuxTimeout`] となる
    pub async fn transcode_with_deadline<T, P>(
        &mut self,
        input: &[u8],
        deadline: T,
        mut progress: P,
    ) -> Result<Vec<u8>, TranscodeError>
    where
        T: Future<Output = ()>,
        P: ProgressObserver,
    {
        if self.state != TranscodeState::Idle {
            return Err(TranscodeError::invalid_options(
                "Transcoder can only run a single conversion",
            ));
        }
        self.state = TranscodeState::Running;
        tracing::info!(input_bytes = input.len(), "Starting MP4 to WebM transcoding");

        let (frame_tx, mut frame_rx) = output_channel();
        let (chunk_tx, mut chunk_rx) = output_channel();
        let result = self
            .run(
                input,
                deadline,
                &mut progress,
                (frame_tx, &mut frame_rx),
                (chunk_tx, &mut chunk_rx),
            )
            .await;

        match result {
            Ok(webm) => {
                self.decoder.close();
                self.encoder.close();
                self.state = TranscodeState::Done;
                tracing::info!(
                    chunks = self.counters.muxed_chunks,
                    output_bytes = webm.len(),
                    "Transcoding completed"
                );
                progress.on_progress(&TranscodeProgress::new(
                    TranscodePhase::Complete,
                    "Conversion complete".to_owned(),
                    self.counters,
                ));
                Ok(webm)
            }
            Err(e) => {
                // バッファに残っている画像も必ず解放する
                frame_rx.close();
                while let Ok(item) = frame_rx.try_recv() {
                    if let Ok(frame) = item {
                        frame.close();
                    }
                }
                self.decoder.close();
                self.encoder.close();
                self.state = TranscodeState::Failed;
                tracing::warn!(error = %e, counters = ?self.counters, "Transcoding failed");
                Err(e)
            }
        }
    }

    async fn run<T, P>(
        &mut self,
        input: &[u8],
        deadline: T,
        progress: &mut P,
        (frame_tx, frame_rx): (OutputSender<D::Frame>, &mut OutputReceiver<D::Frame>),
        (chunk_tx, chunk_rx): (OutputSender<EncodedChunk>, &mut OutputReceiver<EncodedChunk>),
    ) -> Result<Vec<u8>, TranscodeError>
    where
        T: Future<Output = ()>,
        P: ProgressObserver,
    {
        let demuxer = Mp4VideoDemuxer::new(input)?;
        let track = demuxer.track().clone();
        let total = track.sample_count;
        self.counters = TranscodeCounters {
            total_samples: total,
            ..TranscodeCounters::default()
        };
        if total == 0 {
            return Err(TranscodeError::container_parse("Video track has no samples"));
        }

        let batches = futures::stream::iter(demuxer.extract_samples(self.options.demux_batch_size)?);
        let counters = &mut self.counters;
        let samples = collect_samples(batches, total, deadline, |collected| {
            counters.demuxed_samples = collected;
            progress.on_progress(&TranscodeProgress::new(
                TranscodePhase::Demuxing,
                format!("Demuxing samples {collected} of {total}"),
                *counters,
            ));
        })
        .await?;

        let resolved = CodecConfigResolver::new(&self.options)
            .resolve(&track, &samples, &self.decoder, &self.encoder)
            .await?;
        check_cancelled(&self.cancellation)?;

        self.decoder
            .configure(&resolved.decoder, frame_tx)
            .map_err(|f| TranscodeError::engine(EngineRole::Decoder, f))?;
        self.encoder
            .configure(&resolved.encoder, chunk_tx)
            .map_err(|f| TranscodeError::engine(EngineRole::Encoder, f))?;

        let muxer = WebmMuxer::new(
            WebmTrackConfig::vp8(
                resolved.encoder.width,
                resolved.encoder.height,
                Some(resolved.encoder.framerate),
            ),
            &self.options.writing_app,
        );
        let mut pipeline = Pipeline {
            decoder: &mut self.decoder,
            encoder: &mut self.encoder,
            frames: frame_rx,
            chunks: chunk_rx,
            muxer,
            counters: &mut self.counters,
            progress,
            cancellation: &self.cancellation,
            keyframe_interval: self.options.keyframe_interval,
            max_decode_queue: self.options.max_decode_queue,
            source_keyframes: HashMap::new(),
        };

        for sample in samples {
            pipeline.submit(sample, &resolved.decoder, track.timescale)?;
            pipeline.wait_for_decode_queue().await?;
        }

        self.state = TranscodeState::Draining;
        pipeline.drain().await?;
        pipeline.finish()
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<(), TranscodeError> {
    if token.is_cancelled() {
        tracing::info!("Transcoding was cancelled");
        return Err(TranscodeError::Cancelled);
    }
    Ok(())
}

/// Running / Draining 中のサンプル、画像、チャンクの受け渡しを行う
struct Pipeline<'a, D: VideoDecoderEngine, E, P> {
    decoder: &'a mut D,
    encoder: &'a mut E,
    frames: &'a mut OutputReceiver<D::Frame>,
    chunks: &'a mut OutputReceiver<EncodedChunk>,
    muxer: WebmMuxer,
    counters: &'a mut TranscodeCounters,
    progress: &'a mut P,
    cancellation: &'a CancellationToken,
    keyframe_interval: Option<u32>,
    max_decode_queue: usize,

    // 表示時刻 (マイクロ秒) → 入力サンプルが同期サンプルかどうか
    source_keyframes: HashMap<i64, bool>,
}

enum EngineOutput<F> {
    Frame(Option<orfail::Result<F>>),
    Chunk(orfail::Result<EncodedChunk>),
}

impl<D, E, P> Pipeline<'_, D, E, P>
where
    D: VideoDecoderEngine,
    E: VideoEncoderEngine<Frame = D::Frame>,
    P: ProgressObserver,
{
    fn submit(
        &mut self,
        sample: Sample,
        config: &DecoderConfig,
        timescale: NonZeroU32,
    ) -> Result<(), TranscodeError> {
        check_cancelled(self.cancellation)?;

        let kind = if sample.keyframe {
            ChunkType::Key
        } else {
            ChunkType::Delta
        };
        let timestamp = to_microseconds(sample.composition_timestamp, timescale);
        let chunk = EncodedVideoChunk {
            kind,
            timestamp,
            duration: u64::try_from(to_microseconds(i64::from(sample.duration), timescale)).ok(),
            // ペイロードの所有権はここでデコーダーに移る
            data: config.normalize_payload(sample.data)?,
        };
        self.decoder
            .decode(chunk)
            .map_err(|f| TranscodeError::engine(EngineRole::Decoder, f))?;
        *self.source_keyframes.entry(timestamp).or_default() |= sample.keyframe;
        self.counters.submitted_samples += 1;

        self.pump_frames()?;
        self.pump_chunks()
    }

    /// 出力待ちのチャンク数が上限を下回るまで、エンジンの出力を待って処理する
    async fn wait_for_decode_queue(&mut self) -> Result<(), TranscodeError> {
        while self
            .counters
            .submitted_samples
            .saturating_sub(self.counters.decoded_frames)
            >= self.max_decode_queue
        {
            self.process_next_output().await?;
            check_cancelled(self.cancellation)?;
        }
        Ok(())
    }

    /// デコーダーかエンコーダーのどちらかから出力が届くのを待って処理する
    async fn process_next_output(&mut self) -> Result<(), TranscodeError> {
        let output = match future::select(self.frames.next(), self.chunks.next()).await {
            Either::Left((frame, _)) => EngineOutput::Frame(frame),
            Either::Right((Some(chunk), _)) => EngineOutput::Chunk(chunk),
            Either::Right((None, frame)) => EngineOutput::Frame(frame.await),
        };
        match output {
            EngineOutput::Frame(Some(item)) => self.encode_frame(item),
            EngineOutput::Frame(None) => Err(TranscodeError::EngineRuntime {
                engine: EngineRole::Decoder,
                reason: "Decoder output channel was closed".to_owned(),
            }),
            EngineOutput::Chunk(item) => self.mux_chunk(item),
        }
    }

    /// デコーダーから届いている画像を全てエンコーダーに渡す
    fn pump_frames(&mut self) -> Result<(), TranscodeError> {
        while let Ok(item) = self.frames.try_recv() {
            self.encode_frame(item)?;
        }
        Ok(())
    }

    fn encode_frame(&mut self, item: orfail::Result<D::Frame>) -> Result<(), TranscodeError> {
        let frame = item.map_err(|f| TranscodeError::engine(EngineRole::Decoder, f))?;
        let index = self.counters.decoded_frames;
        self.counters.decoded_frames += 1;

        let source_keyframe = self
            .source_keyframes
            .remove(&frame.timestamp())
            .unwrap_or(false);
        let key_frame = match self.keyframe_interval {
            Some(interval) => index % interval as usize == 0,
            None => index == 0 || source_keyframe,
        };
        let result = self.encoder.encode(&frame, EncodeOptions { key_frame });
        frame.close();
        result.map_err(|f| TranscodeError::engine(EngineRole::Encoder, f))
    }

    /// エンコーダーから届いているチャンクを全て WebM に書き込む
    fn pump_chunks(&mut self) -> Result<(), TranscodeError> {
        while let Ok(item) = self.chunks.try_recv() {
            self.mux_chunk(item)?;
        }
        Ok(())
    }

    fn mux_chunk(&mut self, item: orfail::Result<EncodedChunk>) -> Result<(), TranscodeError> {
        let chunk = item.map_err(|f| TranscodeError::engine(EngineRole::Encoder, f))?;
        self.counters.encoded_chunks += 1;
        self.muxer.add_chunk(&chunk)?;
        self.counters.muxed_chunks += 1;

        let counters = *self.counters;
        self.progress.on_progress(&TranscodeProgress::new(
            TranscodePhase::Transcoding,
            format!(
                "Transcoding frame {} of {}",
                counters.encoded_chunks, counters.total_samples
            ),
            counters,
        ));
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), TranscodeError> {
        self.progress.on_progress(&TranscodeProgress::new(
            TranscodePhase::Draining,
            "Flushing decoder and encoder".to_owned(),
            *self.counters,
        ));

        check_cancelled(self.cancellation)?;
        self.decoder
            .flush()
            .await
            .map_err(|f| TranscodeError::engine(EngineRole::Decoder, f))?;
        self.pump_frames()?;
        self.pump_chunks()?;
        check_cancelled(self.cancellation)?;

        self.encoder
            .flush()
            .await
            .map_err(|f| TranscodeError::engine(EngineRole::Encoder, f))?;
        self.pump_chunks()?;
        check_cancelled(self.cancellation)?;

        self.verify_counters()
    }

    fn verify_counters(&self) -> Result<(), TranscodeError> {
        let c = *self.counters;
        if c.decoded_frames != c.submitted_samples || c.submitted_samples != c.total_samples {
            return Err(TranscodeError::EngineRuntime {
                engine: EngineRole::Decoder,
                reason: format!(
                    "Decoded frame count mismatch: submitted={}, decoded={}, total={}",
                    c.submitted_samples, c.decoded_frames, c.total_samples
                ),
            });
        }
        if c.encoded_chunks != c.decoded_frames || c.muxed_chunks != c.encoded_chunks {
            return Err(TranscodeError::EngineRuntime {
                engine: EngineRole::Encoder,
                reason: format!(
                    "Encoded chunk count mismatch: decoded={}, encoded={}",
                    c.decoded_frames, c.encoded_chunks
                ),
            });
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, TranscodeError> {
        Ok(self.muxer.finalize()?)
    }
}
