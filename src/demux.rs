//! MP4 ファイルから映像トラックのサンプルを取り出すための機能を提供するモジュール
//!
//! # 処理の流れ
//!
//! 1. [`Mp4VideoDemuxer::new()`] で MP4 ファイル全体を渡し、変換対象の映像トラックを選択する
//! 2. [`Mp4VideoDemuxer::track()`] でトラック情報を取得する
//! 3. [`Mp4VideoDemuxer::extract_samples()`] でサンプルをバッチ単位で取り出す
//! 4. [`collect_samples()`] でバッチを集めて、全サンプルが揃うのを待つ
//!
//! # Examples
//!
//! ```no_run
//! use shiguredo_mp4_to_webm::demux::Mp4VideoDemuxer;
//!
//! # fn main() -> Result<(), shiguredo_mp4_to_webm::TranscodeError> {
//! let mp4_bytes = std::fs::read("input.mp4").unwrap_or_default();
//! let demuxer = Mp4VideoDemuxer::new(&mp4_bytes)?;
//! println!("codec: {}", demuxer.track().codec);
//!
//! for batch in demuxer.extract_samples(100)? {
//!     for sample in batch? {
//!         println!("sample {}: {} bytes", sample.number, sample.data.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
use std::{future::Future, num::NonZeroU32};

use futures::{
    StreamExt,
    channel::oneshot,
    future::{self, Either},
    stream::Stream,
};

use crate::{
    BoxType, Decode, Mp4File,
    aux::{SampleIter, SampleTableAccessor},
    boxes::{
        Av1cBox, AvccBox, HdlrBox, HvccBox, RootBox, SampleEntry, StblBox, TrakBox,
        VideoSampleEntry, VpccBox,
    },
    error::TranscodeError,
};

/// サンプルエントリーに含まれていたコーデック設定
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CodecConfiguration {
    Avc(AvccBox),
    Hevc(HvccBox),
    Vp9(VpccBox),
    Av1(Av1cBox),
}

/// 変換対象として選択された映像トラックの情報
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackDescriptor {
    /// トラック ID
    pub track_id: u32,

    /// サンプルエントリーの種別 (`avc1`, `hvc1`, `vp09` など)
    pub sample_entry_type: BoxType,

    /// コーデック文字列
    ///
    /// コーデック設定ボックスが存在しない場合にはサンプルエントリーの種別のみとなる
    pub codec: String,

    /// 映像の幅
    pub width: u32,

    /// 映像の高さ
    pub height: u32,

    /// タイムスケール
    pub timescale: NonZeroU32,

    /// トラックの尺 (タイムスケール単位)
    pub duration: u64,

    /// トラックに含まれるサンプル数
    pub sample_count: usize,

    /// サンプルデータの合計バイト数
    pub total_sample_bytes: u64,

    /// サンプルエントリーに含まれていたコーデック設定 (帯域外のパラメーターセットなど)
    pub codec_configuration: Option<CodecConfiguration>,
}

/// トラックから取り出されたサンプル
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sample {
    /// トラック内でのサンプル番号 (1 始まり)
    pub number: NonZeroU32,

    /// サンプルデータ (MP4 に格納されている形式のまま)
    pub data: Vec<u8>,

    /// デコード時刻 (タイムスケール単位)
    pub decode_timestamp: u64,

    /// 表示時刻 (タイムスケール単位)
    pub composition_timestamp: i64,

    /// 尺 (タイムスケール単位)
    pub duration: u32,

    /// キーフレームかどうか
    pub keyframe: bool,
}

/// MP4 ファイルから映像トラックを一つ選んで、そのサンプルを取り出すデマルチプレクサー
#[derive(Debug)]
pub struct Mp4VideoDemuxer<'a> {
    bytes: &'a [u8],
    trak_box: TrakBox,
    track: TrackDescriptor,
}

impl<'a> Mp4VideoDemuxer<'a> {
    /// MP4 ファイル全体を受け取って、変換対象の映像トラックを選択する
    ///
    /// 選択されるのは、ハンドラー種別が `vide` で、最初のサンプルエントリーが
    /// [`VideoSampleEntry::SUPPORTED_TYPES`] のいずれかである最初のトラック。
    ///
    /// 該当するトラックがない場合には、サンプルの取り出しを一切行わずに
    /// [`TranscodeError::NoVideoTrack`] を返す
    pub fn new(bytes: &'a [u8]) -> Result<Self, TranscodeError> {
        let (mp4_file, _) = Mp4File::<RootBox>::decode(bytes)?;
        let moov_box = mp4_file
            .boxes
            .into_iter()
            .find_map(|b| match b {
                RootBox::Moov(b) => Some(b),
                RootBox::Unknown(_) => None,
            })
            .ok_or_else(|| TranscodeError::container_parse("'moov' box not found"))?;

        let track_count = moov_box.trak_boxes.len();
        let Some(trak_box) = moov_box
            .trak_boxes
            .into_iter()
            .find(|trak| supported_video_entry(trak).is_some())
        else {
            tracing::debug!(track_count, "No supported video track");
            return Err(TranscodeError::NoVideoTrack { track_count });
        };

        // サンプルテーブルの整合性はここでまとめて検証しておく
        let accessor = SampleTableAccessor::new(&trak_box.mdia_box.minf_box.stbl_box)?;
        let track = build_track_descriptor(&trak_box, &accessor)?;
        tracing::info!(
            track_id = track.track_id,
            codec = %track.codec,
            width = track.width,
            height = track.height,
            sample_count = track.sample_count,
            "Selected video track"
        );

        let leading = leading_non_sync_samples(&trak_box.mdia_box.minf_box.stbl_box);
        if leading > 0 {
            // 先頭の非同期サンプルも取り除かずにそのままデコーダーに渡す
            tracing::warn!(
                track_id = track.track_id,
                leading_non_sync_samples = leading,
                "Track does not start with a sync sample"
            );
        }

        Ok(Self {
            bytes,
            trak_box,
            track,
        })
    }

    /// 選択されたトラックの情報を返す
    pub fn track(&self) -> &TrackDescriptor {
        &self.track
    }

    /// サンプルを先頭から順に、最大 `batch_size` 個ずつのバッチで取り出すイテレーターを返す
    pub fn extract_samples(
        &self,
        batch_size: usize,
    ) -> Result<SampleExtractor<'_>, TranscodeError> {
        if batch_size == 0 {
            return Err(TranscodeError::invalid_options(
                "Batch size must be greater than zero",
            ));
        }
        let accessor = SampleTableAccessor::new(self.stbl_box())?;
        Ok(SampleExtractor {
            bytes: self.bytes,
            locations: accessor.samples(),
            batch_size,
            remaining: self.track.sample_count,
            failed: false,
        })
    }

    fn stbl_box(&self) -> &StblBox {
        &self.trak_box.mdia_box.minf_box.stbl_box
    }
}

fn supported_video_entry(trak_box: &TrakBox) -> Option<&VideoSampleEntry> {
    if trak_box.mdia_box.hdlr_box.handler_type != HdlrBox::HANDLER_TYPE_VIDE {
        return None;
    }

    // 複数のサンプルエントリーを持つトラックでも、最初のエントリーだけを使う
    match trak_box.mdia_box.minf_box.stbl_box.stsd_box.entries.first()? {
        SampleEntry::Video(entry) if VideoSampleEntry::SUPPORTED_TYPES.contains(&entry.box_type) => {
            Some(entry)
        }
        _ => None,
    }
}

fn build_track_descriptor(
    trak_box: &TrakBox,
    accessor: &SampleTableAccessor<'_>,
) -> Result<TrackDescriptor, TranscodeError> {
    let entry = supported_video_entry(trak_box)
        .ok_or_else(|| TranscodeError::container_parse("Sample entry is not a video entry"))?;
    let stbl_box = &trak_box.mdia_box.minf_box.stbl_box;

    let codec_configuration = if let Some(b) = &entry.avcc_box {
        Some(CodecConfiguration::Avc(b.clone()))
    } else if let Some(b) = &entry.hvcc_box {
        Some(CodecConfiguration::Hevc(b.clone()))
    } else if let Some(b) = &entry.vpcc_box {
        Some(CodecConfiguration::Vp9(b.clone()))
    } else {
        entry.av1c_box.clone().map(CodecConfiguration::Av1)
    };

    // サンプルエントリーの幅と高さが 0 の場合は tkhd の表示サイズで代用する
    let (mut width, mut height) = (u32::from(entry.visual.width), u32::from(entry.visual.height));
    if width == 0 || height == 0 {
        width = u32::try_from(trak_box.tkhd_box.width.integer).unwrap_or(0);
        height = u32::try_from(trak_box.tkhd_box.height.integer).unwrap_or(0);
    }

    let sample_durations: u64 = stbl_box
        .stts_box
        .entries
        .iter()
        .map(|e| u64::from(e.sample_count) * u64::from(e.sample_delta))
        .sum();
    let duration = match trak_box.mdia_box.mdhd_box.duration {
        0 | u64::MAX => sample_durations,
        d => d,
    };

    let sample_count = accessor.sample_count() as usize;
    let total_sample_bytes = (1..=accessor.sample_count())
        .filter_map(NonZeroU32::new)
        .filter_map(|i| accessor.sample_size(i))
        .map(u64::from)
        .sum();

    Ok(TrackDescriptor {
        track_id: trak_box.tkhd_box.track_id,
        sample_entry_type: entry.box_type,
        codec: entry.codec_string(),
        width,
        height,
        timescale: trak_box.mdia_box.mdhd_box.timescale,
        duration,
        sample_count,
        total_sample_bytes,
        codec_configuration,
    })
}

fn leading_non_sync_samples(stbl_box: &StblBox) -> u32 {
    let Some(stss_box) = &stbl_box.stss_box else {
        return 0;
    };
    match stss_box.sample_numbers.first() {
        Some(first) => first.get() - 1,
        None => stbl_box.stsz_box.sample_count(),
    }
}

/// [`Mp4VideoDemuxer::extract_samples()`] が返すイテレーター
///
/// エラーが発生した場合は、そのエラーを返した後は何も返さなくなる
#[derive(Debug)]
pub struct SampleExtractor<'a> {
    bytes: &'a [u8],
    locations: SampleIter<'a>,
    batch_size: usize,
    remaining: usize,
    failed: bool,
}

impl SampleExtractor<'_> {
    fn next_batch(&mut self) -> Result<Vec<Sample>, TranscodeError> {
        let n = self.batch_size.min(self.remaining);
        let mut batch = Vec::with_capacity(n);
        for _ in 0..n {
            let location = self.locations.next().ok_or_else(|| {
                TranscodeError::container_parse("Sample table ended unexpectedly")
            })?;
            let data = usize::try_from(location.data_offset)
                .ok()
                .and_then(|start| Some(start..start.checked_add(location.data_size as usize)?))
                .and_then(|range| self.bytes.get(range))
                .ok_or_else(|| {
                    TranscodeError::container_parse(format!(
                        "Sample data is out of file range: sample={}, offset={}, size={}, file_size={}",
                        location.number,
                        location.data_offset,
                        location.data_size,
                        self.bytes.len()
                    ))
                })?;
            batch.push(Sample {
                number: location.number,
                data: data.to_vec(),
                decode_timestamp: location.decode_time,
                composition_timestamp: location.composition_time(),
                duration: location.duration,
                keyframe: location.is_sync,
            });
        }
        self.remaining -= n;
        Ok(batch)
    }
}

impl Iterator for SampleExtractor<'_> {
    type Item = Result<Vec<Sample>, TranscodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        let result = self.next_batch();
        self.failed = result.is_err();
        Some(result)
    }
}

/// 非同期に届くサンプルのバッチを集めて、全サンプルが揃った時点で完了通知を行う
///
/// 完了はポーリングではなく [`SampleCollector::new()`] が返す
/// [`oneshot::Receiver`] を通して通知される
#[derive(Debug)]
pub struct SampleCollector {
    expected: usize,
    collected: usize,
    samples: Vec<Sample>,
    completion: Option<oneshot::Sender<Vec<Sample>>>,
}

impl SampleCollector {
    /// `expected` 個のサンプルを集めるコレクターと、その完了通知を受け取るためのレシーバーを返す
    pub fn new(expected: usize) -> (Self, oneshot::Receiver<Vec<Sample>>) {
        let (tx, rx) = oneshot::channel();
        let mut this = Self {
            expected,
            collected: 0,
            samples: Vec::with_capacity(expected),
            completion: Some(tx),
        };
        if expected == 0 {
            this.complete();
        }
        (this, rx)
    }

    /// これまでに集めたサンプル数を返す
    pub fn collected(&self) -> usize {
        self.collected
    }

    /// 集めるべきサンプル数を返す
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// 全サンプルが揃ったかどうかを返す
    pub fn is_complete(&self) -> bool {
        self.completion.is_none()
    }

    /// バッチを追加する
    ///
    /// このバッチで全サンプルが揃った場合には `true` を返す。
    /// サンプル数が `expected` を超える場合にはエラーとなる
    pub fn push_batch(&mut self, batch: Vec<Sample>) -> Result<bool, TranscodeError> {
        let total = self.collected + batch.len();
        if total > self.expected || (self.is_complete() && !batch.is_empty()) {
            return Err(TranscodeError::container_parse(format!(
                "Received more samples than the track contains: received={total}, expected={}",
                self.expected
            )));
        }

        self.collected = total;
        self.samples.extend(batch);
        if self.collected == self.expected {
            self.complete();
            return Ok(true);
        }
        Ok(false)
    }

    fn complete(&mut self) {
        if let Some(tx) = self.completion.take() {
            // 受信側が既に破棄されている場合は結果が不要になっただけなので無視する
            let _ = tx.send(std::mem::take(&mut self.samples));
        }
    }
}

/// バッチのストリームから全サンプルを集める
///
/// - 全サンプルが揃った時点で完了する (ストリームの残りは読まない)
/// - `deadline` が先に完了した場合は [`TranscodeError::DemuxTimeout`] となる
/// - 全サンプルが揃う前にストリームが終了した場合は [`TranscodeError::ContainerParse`] となる
/// - `on_batch` はバッチを受け取るたびに、それまでに集めたサンプル数を引数にして呼ばれる
pub async fn collect_samples<S, D, F>(
    batches: S,
    expected: usize,
    deadline: D,
    mut on_batch: F,
) -> Result<Vec<Sample>, TranscodeError>
where
    S: Stream<Item = Result<Vec<Sample>, TranscodeError>>,
    D: Future<Output = ()>,
    F: FnMut(usize),
{
    let (mut collector, completion) = SampleCollector::new(expected);

    let feed_result = {
        let feed = async {
            futures::pin_mut!(batches);
            while !collector.is_complete() {
                let Some(batch) = batches.next().await else {
                    break;
                };
                collector.push_batch(batch?)?;
                on_batch(collector.collected());
            }
            Ok::<_, TranscodeError>(())
        };
        futures::pin_mut!(feed);
        futures::pin_mut!(deadline);
        match future::select(feed, deadline).await {
            Either::Left((result, _)) => Some(result),
            Either::Right(((), _)) => None,
        }
    };

    match feed_result {
        None => {
            tracing::warn!(
                collected = collector.collected(),
                expected,
                "Sample extraction timed out"
            );
            return Err(TranscodeError::DemuxTimeout {
                collected: collector.collected(),
                expected,
            });
        }
        Some(result) => result?,
    }

    if !collector.is_complete() {
        return Err(TranscodeError::container_parse(format!(
            "Sample stream ended before all samples were extracted: collected={}, expected={expected}",
            collector.collected()
        )));
    }

    let samples = completion
        .await
        .map_err(|_| TranscodeError::container_parse("Sample collection was aborted"))?;
    tracing::debug!(samples = samples.len(), "All samples collected");
    Ok(samples)
}
