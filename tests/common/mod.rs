//! 結合テスト用の共通ヘルパー
//!
//! - テスト用の MP4 ファイルをメモリ上で組み立てるビルダー
//! - 呼び出し履歴を記録するモックのデコーダー / エンコーダー
//! - 別スレッドから非同期に画像を出力するデコーダー
#![allow(dead_code)]

use std::{
    cell::RefCell,
    future::Future,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use futures::{channel::oneshot, future};
use shiguredo_mp4_to_webm::{
    codec_config::{DecoderConfig, EncoderConfig},
    engine::{
        EncodeOptions, EncodedChunk, EncodedVideoChunk, OutputSender, VideoDecoderEngine,
        VideoEncoderEngine, VideoFrame,
    },
};

/// Baseline プロファイル / レベル 3.0 の SPS
pub const SPS: &[u8] = &[0x67, 0x42, 0xE0, 0x1E, 0xAB, 0x40, 0x50];

/// PPS
pub const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

/// High 4:4:4 Predictive プロファイルの SPS
pub const EXOTIC_SPS: &[u8] = &[0x67, 0xF4, 0x00, 0x1F, 0x91, 0x88];

pub const IDR_SLICE: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x33];
pub const NON_IDR_SLICE: &[u8] = &[0x41, 0x9A, 0x02, 0x11];

/// H.265 の VPS
pub const HEVC_VPS: &[u8] = &[0x40, 0x01, 0x0C, 0x01, 0xFF, 0xFF, 0x01, 0x60];

/// Main プロファイル / レベル 3.1 の H.265 SPS (エミュレーション防止バイトを含む)
pub const HEVC_SPS: &[u8] = &[
    0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0xB0, 0x00, 0x00, 0x03, 0x00, 0x00,
    0x03, 0x00, 0x5D, 0xA0, 0x02, 0x80,
];

/// H.265 の PPS
pub const HEVC_PPS: &[u8] = &[0x44, 0x01, 0xC1, 0x72, 0xB4];

pub const HEVC_IDR_SLICE: &[u8] = &[0x26, 0x01, 0xAF, 0x06];
pub const HEVC_TRAIL_SLICE: &[u8] = &[0x02, 0x01, 0xD0, 0x09];

pub const TIMESCALE: u32 = 90_000;
pub const SAMPLE_DELTA: u32 = 3_000;

pub fn mp4_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(8 + payload.len());
    b.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    b.extend_from_slice(box_type);
    b.extend_from_slice(payload);
    b
}

pub fn full_box(box_type: &[u8; 4], version: u8, payload: &[u8]) -> Vec<u8> {
    let mut p = vec![version, 0, 0, 0];
    p.extend_from_slice(payload);
    mp4_box(box_type, &p)
}

/// 4 バイトの長さプレフィックス形式で NAL ユニットを連結する
pub fn length_prefixed(units: &[&[u8]]) -> Vec<u8> {
    let mut b = Vec::new();
    for unit in units {
        b.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        b.extend_from_slice(unit);
    }
    b
}

/// スタートコード形式で NAL ユニットを連結する
pub fn annexb(units: &[&[u8]]) -> Vec<u8> {
    let mut b = Vec::new();
    for unit in units {
        b.extend_from_slice(&[0, 0, 0, 1]);
        b.extend_from_slice(unit);
    }
    b
}

/// avcC ボックスを組み立てる
pub fn avcc_box(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut p = vec![1, sps[1], sps[2], sps[3], 0xFF, 0xE1];
    p.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    p.extend_from_slice(sps);
    p.push(1);
    p.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    p.extend_from_slice(pps);
    mp4_box(b"avcC", &p)
}

/// hvcC ボックスを組み立てる
///
/// `profile` は general_profile_space / tier / profile_idc をまとめた 1 バイト
pub fn hvcc_box(profile: u8, compatibility: u32, level: u8, units: &[&[u8]]) -> Vec<u8> {
    let mut p = vec![1, profile];
    p.extend_from_slice(&compatibility.to_be_bytes());
    p.extend_from_slice(&[0xB0, 0, 0, 0, 0, 0]);
    p.push(level);
    p.extend_from_slice(&[0xF0, 0x00, 0xFC, 0xFD, 0xF8, 0xF8, 0x00, 0x00]);
    // lengthSizeMinusOne = 3
    p.push(0x0F);
    p.push(units.len() as u8);
    for unit in units {
        p.push(0x80 | ((unit[0] >> 1) & 0x3F));
        p.extend_from_slice(&1u16.to_be_bytes());
        p.extend_from_slice(&(unit.len() as u16).to_be_bytes());
        p.extend_from_slice(unit);
    }
    mp4_box(b"hvcC", &p)
}

/// vpcC ボックス (プロファイル 0、レベル 1.0、8 ビット、4:2:0) のペイロード
pub const VPCC_RECORD: &[u8] = &[1, 0, 0, 0, 0, 10, 0x82, 1, 1, 1, 0, 0];

/// av1C ボックス (プロファイル 0、レベル 3.0、Main tier、8 ビット) のペイロード
pub const AV1C_RECORD: &[u8] = &[0x81, 0x04, 0x0C, 0x00];

/// 映像サンプルエントリーを組み立てる
pub fn visual_sample_entry(
    fourcc: &[u8; 4],
    width: u16,
    height: u16,
    children: &[Vec<u8>],
) -> Vec<u8> {
    let mut p = vec![0; 6];
    p.extend_from_slice(&1u16.to_be_bytes());
    p.extend_from_slice(&[0; 16]);
    p.extend_from_slice(&width.to_be_bytes());
    p.extend_from_slice(&height.to_be_bytes());
    p.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    p.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    p.extend_from_slice(&[0; 4]);
    p.extend_from_slice(&1u16.to_be_bytes());
    p.extend_from_slice(&[0; 32]);
    p.extend_from_slice(&0x0018u16.to_be_bytes());
    p.extend_from_slice(&(-1i16).to_be_bytes());
    for child in children {
        p.extend_from_slice(child);
    }
    mp4_box(fourcc, &p)
}

#[derive(Debug, Clone)]
pub struct SampleSpec {
    pub data: Vec<u8>,
    pub duration: u32,
}

/// MP4 に格納するトラックの定義
#[derive(Debug, Clone)]
pub struct TrackSpec {
    pub track_id: u32,
    pub handler: [u8; 4],
    pub sample_entry: Vec<u8>,
    pub timescale: u32,
    pub width: u16,
    pub height: u16,
    pub samples: Vec<SampleSpec>,

    /// `None` の場合は stss を出力しない (全サンプルが同期サンプル)
    pub sync_samples: Option<Vec<u32>>,

    /// `None` の場合は ctts を出力しない
    pub composition_offsets: Option<Vec<i32>>,
}

impl TrackSpec {
    /// `avc1` + avcC (帯域外パラメーターセット) の H.264 トラック
    pub fn h264(sample_count: usize) -> Self {
        Self::video(
            b"avc1",
            vec![avcc_box(SPS, PPS)],
            h264_samples(sample_count, false),
        )
    }

    /// avcC を持たず、最初のサンプルにパラメーターセットを含む H.264 トラック
    pub fn h264_in_band(fourcc: &[u8; 4], sample_count: usize) -> Self {
        Self::video(fourcc, Vec::new(), h264_samples(sample_count, true))
    }

    /// `hvc1` + hvcC (帯域外パラメーターセット) の H.265 トラック
    pub fn hevc(sample_count: usize) -> Self {
        Self::video(
            b"hvc1",
            vec![hvcc_box(0x01, 0x6000_0000, 93, &[HEVC_VPS, HEVC_SPS, HEVC_PPS])],
            hevc_samples(sample_count, false),
        )
    }

    /// hvcC を持たず、最初のサンプルにパラメーターセットを含む `hev1` トラック
    pub fn hevc_in_band(sample_count: usize) -> Self {
        Self::video(b"hev1", Vec::new(), hevc_samples(sample_count, true))
    }

    /// vpcC を持つ VP9 トラック
    pub fn vp9(sample_count: usize) -> Self {
        Self::video(
            b"vp09",
            vec![mp4_box(b"vpcC", VPCC_RECORD)],
            opaque_samples(sample_count),
        )
    }

    /// av1C を持つ AV1 トラック
    pub fn av1(sample_count: usize) -> Self {
        Self::video(
            b"av01",
            vec![mp4_box(b"av1C", AV1C_RECORD)],
            opaque_samples(sample_count),
        )
    }

    /// 5 サンプルごとに同期サンプルを持つ 320x240 の映像トラック
    pub fn video(fourcc: &[u8; 4], children: Vec<Vec<u8>>, samples: Vec<SampleSpec>) -> Self {
        let sync_samples = (1..=samples.len() as u32).filter(|n| n % 5 == 1).collect();
        Self {
            track_id: 1,
            handler: *b"vide",
            sample_entry: visual_sample_entry(fourcc, 320, 240, &children),
            timescale: TIMESCALE,
            width: 320,
            height: 240,
            samples,
            sync_samples: Some(sync_samples),
            composition_offsets: None,
        }
    }

    /// 映像を含まない音声トラック
    pub fn audio(track_id: u32) -> Self {
        let mut entry = vec![0; 6];
        entry.extend_from_slice(&1u16.to_be_bytes());
        entry.extend_from_slice(&[0; 20]);
        Self {
            track_id,
            handler: *b"soun",
            sample_entry: mp4_box(b"mp4a", &entry),
            timescale: 48_000,
            width: 0,
            height: 0,
            samples: vec![SampleSpec {
                data: vec![0x21, 0x10, 0x04],
                duration: 1024,
            }],
            sync_samples: None,
            composition_offsets: None,
        }
    }
}

/// H.265 のサンプル列を生成する (5 サンプルごとに IDR)
pub fn hevc_samples(count: usize, in_band_parameter_sets: bool) -> Vec<SampleSpec> {
    (0..count)
        .map(|i| {
            let mut slice = if i % 5 == 0 {
                HEVC_IDR_SLICE.to_vec()
            } else {
                HEVC_TRAIL_SLICE.to_vec()
            };
            slice.push(i as u8);
            let data = if i == 0 && in_band_parameter_sets {
                length_prefixed(&[HEVC_VPS, HEVC_SPS, HEVC_PPS, &slice])
            } else {
                length_prefixed(&[&slice])
            };
            SampleSpec {
                data,
                duration: SAMPLE_DELTA,
            }
        })
        .collect()
}

/// NAL ユニット構造を持たない (VP9 / AV1 の) サンプル列を生成する
pub fn opaque_samples(count: usize) -> Vec<SampleSpec> {
    (0..count)
        .map(|i| SampleSpec {
            data: vec![0x82, 0x49, 0x83, 0x42, i as u8],
            duration: SAMPLE_DELTA,
        })
        .collect()
}

/// H.264 のサンプル列を生成する (5 サンプルごとに IDR)
pub fn h264_samples(count: usize, in_band_parameter_sets: bool) -> Vec<SampleSpec> {
    (0..count)
        .map(|i| {
            let mut slice = if i % 5 == 0 {
                IDR_SLICE.to_vec()
            } else {
                NON_IDR_SLICE.to_vec()
            };
            slice.push(i as u8);
            let data = if i == 0 && in_band_parameter_sets {
                length_prefixed(&[SPS, PPS, &slice])
            } else {
                length_prefixed(&[&slice])
            };
            SampleSpec {
                data,
                duration: SAMPLE_DELTA,
            }
        })
        .collect()
}

fn tkhd_box(track: &TrackSpec, duration: u32) -> Vec<u8> {
    let mut p = vec![0; 8];
    p.extend_from_slice(&track.track_id.to_be_bytes());
    p.extend_from_slice(&[0; 4]);
    p.extend_from_slice(&duration.to_be_bytes());
    p.extend_from_slice(&[0; 4 * 2 + 2 * 4 + 4 * 9]);
    p.extend_from_slice(&(u32::from(track.width) << 16).to_be_bytes());
    p.extend_from_slice(&(u32::from(track.height) << 16).to_be_bytes());
    let mut b = full_box(b"tkhd", 0, &p);
    // track_enabled
    b[11] = 1;
    b
}

fn stbl_box(track: &TrackSpec, chunk_offset: u32) -> Vec<u8> {
    let sample_count = track.samples.len() as u32;

    let mut stsd = 1u32.to_be_bytes().to_vec();
    stsd.extend_from_slice(&track.sample_entry);

    let mut stts = Vec::new();
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for s in &track.samples {
        match runs.last_mut() {
            Some((count, delta)) if *delta == s.duration => *count += 1,
            _ => runs.push((1, s.duration)),
        }
    }
    stts.extend_from_slice(&(runs.len() as u32).to_be_bytes());
    for (count, delta) in runs {
        stts.extend_from_slice(&count.to_be_bytes());
        stts.extend_from_slice(&delta.to_be_bytes());
    }

    let mut stsc = Vec::new();
    if sample_count > 0 {
        stsc.extend_from_slice(&1u32.to_be_bytes());
        stsc.extend_from_slice(&1u32.to_be_bytes());
        stsc.extend_from_slice(&sample_count.to_be_bytes());
        stsc.extend_from_slice(&1u32.to_be_bytes());
    } else {
        stsc.extend_from_slice(&0u32.to_be_bytes());
    }

    let mut stsz = 0u32.to_be_bytes().to_vec();
    stsz.extend_from_slice(&sample_count.to_be_bytes());
    for s in &track.samples {
        stsz.extend_from_slice(&(s.data.len() as u32).to_be_bytes());
    }

    let mut stco = Vec::new();
    if sample_count > 0 {
        stco.extend_from_slice(&1u32.to_be_bytes());
        stco.extend_from_slice(&chunk_offset.to_be_bytes());
    } else {
        stco.extend_from_slice(&0u32.to_be_bytes());
    }

    let mut payload = Vec::new();
    payload.extend(full_box(b"stsd", 0, &stsd));
    payload.extend(full_box(b"stts", 0, &stts));
    if let Some(offsets) = &track.composition_offsets {
        let mut ctts = (offsets.len() as u32).to_be_bytes().to_vec();
        for offset in offsets {
            ctts.extend_from_slice(&1u32.to_be_bytes());
            ctts.extend_from_slice(&offset.to_be_bytes());
        }
        payload.extend(full_box(b"ctts", 1, &ctts));
    }
    payload.extend(full_box(b"stsc", 0, &stsc));
    payload.extend(full_box(b"stsz", 0, &stsz));
    payload.extend(full_box(b"stco", 0, &stco));
    if let Some(sync) = &track.sync_samples {
        let mut stss = (sync.len() as u32).to_be_bytes().to_vec();
        for n in sync {
            stss.extend_from_slice(&n.to_be_bytes());
        }
        payload.extend(full_box(b"stss", 0, &stss));
    }
    mp4_box(b"stbl", &payload)
}

fn trak_box(track: &TrackSpec, chunk_offset: u32) -> Vec<u8> {
    let duration: u32 = track.samples.iter().map(|s| s.duration).sum();

    let mut mdhd = vec![0; 8];
    mdhd.extend_from_slice(&track.timescale.to_be_bytes());
    mdhd.extend_from_slice(&duration.to_be_bytes());
    mdhd.extend_from_slice(&[0x55, 0xC4, 0, 0]);

    let mut hdlr = vec![0; 4];
    hdlr.extend_from_slice(&track.handler);
    hdlr.extend_from_slice(&[0; 12]);
    hdlr.push(0);

    let minf = mp4_box(b"minf", &stbl_box(track, chunk_offset));
    let mut mdia = full_box(b"mdhd", 0, &mdhd);
    mdia.extend(full_box(b"hdlr", 0, &hdlr));
    mdia.extend(minf);

    let mut trak = tkhd_box(track, duration);
    trak.extend(mp4_box(b"mdia", &mdia));
    mp4_box(b"trak", &trak)
}

/// ftyp, mdat, moov の順に並んだ MP4 ファイルを組み立てる
///
/// 各トラックのサンプルは一つのチャンクにまとめて mdat に格納される
pub fn build_mp4(tracks: &[TrackSpec]) -> Vec<u8> {
    let ftyp = mp4_box(b"ftyp", b"isom\x00\x00\x02\x00isomavc1");

    let mut mdat_payload = Vec::new();
    let mut chunk_offsets = Vec::new();
    let mdat_start = (ftyp.len() + 8) as u32;
    for track in tracks {
        chunk_offsets.push(mdat_start + mdat_payload.len() as u32);
        for s in &track.samples {
            mdat_payload.extend_from_slice(&s.data);
        }
    }

    let mut mvhd = vec![0; 8];
    mvhd.extend_from_slice(&1000u32.to_be_bytes());
    mvhd.extend_from_slice(&0u32.to_be_bytes());
    mvhd.extend_from_slice(&[0; 80]);
    let mut moov = full_box(b"mvhd", 0, &mvhd);
    for (track, offset) in tracks.iter().zip(chunk_offsets) {
        moov.extend(trak_box(track, offset));
    }

    let mut file = ftyp;
    file.extend(mp4_box(b"mdat", &mdat_payload));
    file.extend(mp4_box(b"moov", &moov));
    file
}

/// 生成 / 解放された画像の数
///
/// 別スレッドで動くデコーダーからも更新されるのでアトミックに数える
#[derive(Debug, Default)]
pub struct FrameLedger {
    created: AtomicUsize,
    closed: AtomicUsize,
    peak: AtomicUsize,
}

impl FrameLedger {
    pub fn new_frame(self: &Arc<Self>, timestamp: i64) -> MockFrame {
        let created = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let live = created.saturating_sub(self.closed.load(Ordering::SeqCst));
        self.peak.fetch_max(live, Ordering::SeqCst);
        MockFrame {
            timestamp,
            ledger: self.clone(),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.created() - self.closed.load(Ordering::SeqCst)
    }

    /// 同時に解放されずに残っていた画像の最大数
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockFrame {
    timestamp: i64,
    ledger: Arc<FrameLedger>,
}

impl VideoFrame for MockFrame {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn close(self) {
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn send_frame(output: &OutputSender<MockFrame>, item: orfail::Result<MockFrame>) {
    if let Err(e) = output.unbounded_send(item) {
        if let Ok(frame) = e.into_inner() {
            frame.close();
        }
    }
}

/// デコーダーが受け取った呼び出しの記録
#[derive(Debug, Default)]
pub struct DecoderCalls {
    pub queried: Vec<DecoderConfig>,
    pub configured: Option<DecoderConfig>,
    pub decoded: Vec<EncodedVideoChunk>,
    pub flush_calls: usize,
    pub close_calls: usize,
}

pub struct MockDecoder {
    pub calls: Rc<RefCell<DecoderCalls>>,
    pub ledger: Arc<FrameLedger>,

    /// 対応しているコーデック文字列の判定
    pub supports: Box<dyn Fn(&str) -> bool>,

    /// 出力せずに保持する画像の最大数
    ///
    /// 保持数を超えると表示時刻が最も早い画像から出力する (B フレームの並び替えと同じ)。
    /// `usize::MAX` の場合は `flush()` が呼ばれるまで何も出力しない
    pub reorder_depth: usize,

    /// 指定番目 (1 始まり) のチャンクでエラーを出力チャネルに送る
    pub fail_on_chunk: Option<usize>,

    output: Option<OutputSender<MockFrame>>,
    buffered: Vec<MockFrame>,
}

impl MockDecoder {
    pub fn new(ledger: Arc<FrameLedger>) -> Self {
        Self {
            calls: Rc::default(),
            ledger,
            supports: Box::new(|_: &str| true),
            reorder_depth: 0,
            fail_on_chunk: None,
            output: None,
            buffered: Vec::new(),
        }
    }

    fn send(&self, item: orfail::Result<MockFrame>) {
        match &self.output {
            Some(output) => send_frame(output, item),
            None => {
                if let Ok(frame) = item {
                    frame.close();
                }
            }
        }
    }

    fn emit_earliest(&mut self) {
        let earliest = self
            .buffered
            .iter()
            .enumerate()
            .min_by_key(|(_, f)| f.timestamp)
            .map(|(i, _)| i);
        if let Some(i) = earliest {
            let frame = self.buffered.remove(i);
            self.send(Ok(frame));
        }
    }
}

impl VideoDecoderEngine for MockDecoder {
    type Frame = MockFrame;

    fn is_config_supported(&self, config: &DecoderConfig) -> impl Future<Output = bool> {
        self.calls.borrow_mut().queried.push(config.clone());
        future::ready((self.supports)(&config.codec))
    }

    fn configure(
        &mut self,
        config: &DecoderConfig,
        output: OutputSender<Self::Frame>,
    ) -> orfail::Result<()> {
        self.calls.borrow_mut().configured = Some(config.clone());
        self.output = Some(output);
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedVideoChunk) -> orfail::Result<()> {
        let timestamp = chunk.timestamp;
        let n = {
            let mut calls = self.calls.borrow_mut();
            calls.decoded.push(chunk);
            calls.decoded.len()
        };
        if self.fail_on_chunk == Some(n) {
            self.send(Err(orfail::Failure::new("broken slice data".to_owned())));
            return Ok(());
        }

        self.buffered.push(self.ledger.new_frame(timestamp));
        while self.buffered.len() > self.reorder_depth {
            self.emit_earliest();
        }
        Ok(())
    }

    fn flush(&mut self) -> impl Future<Output = orfail::Result<()>> {
        self.calls.borrow_mut().flush_calls += 1;
        while !self.buffered.is_empty() {
            self.emit_earliest();
        }
        future::ready(Ok(()))
    }

    fn close(&mut self) {
        self.calls.borrow_mut().close_calls += 1;
        for frame in self.buffered.drain(..) {
            frame.close();
        }
        self.output = None;
    }
}

enum WorkerMessage {
    Decode(i64),
    Fail,
    Flush(oneshot::Sender<()>),
}

/// ワーカースレッド上でデコードを行い、一定時間後に画像を出力するデコーダー
///
/// 出力は `decode()` の呼び出しとは非同期にチャネルへ届く
pub struct ThreadDecoder {
    pub ledger: Arc<FrameLedger>,
    pub delay: Duration,

    /// 指定番目 (1 始まり) のチャンクでエラーを出力チャネルに送る
    pub fail_on_chunk: Option<usize>,

    pub close_calls: Arc<AtomicUsize>,
    submitted: usize,
    worker: Option<(mpsc::Sender<WorkerMessage>, JoinHandle<()>)>,
}

impl ThreadDecoder {
    pub fn new(ledger: Arc<FrameLedger>, delay: Duration) -> Self {
        Self {
            ledger,
            delay,
            fail_on_chunk: None,
            close_calls: Arc::default(),
            submitted: 0,
            worker: None,
        }
    }

    fn post(&self, message: WorkerMessage) -> orfail::Result<()> {
        let Some((worker, _)) = &self.worker else {
            return Err(orfail::Failure::new("decoder is not configured".to_owned()));
        };
        worker
            .send(message)
            .map_err(|_| orfail::Failure::new("decoder worker stopped".to_owned()))
    }
}

impl VideoDecoderEngine for ThreadDecoder {
    type Frame = MockFrame;

    fn is_config_supported(&self, _config: &DecoderConfig) -> impl Future<Output = bool> {
        future::ready(true)
    }

    fn configure(
        &mut self,
        _config: &DecoderConfig,
        output: OutputSender<Self::Frame>,
    ) -> orfail::Result<()> {
        let (tx, rx) = mpsc::channel();
        let ledger = self.ledger.clone();
        let delay = self.delay;
        let handle = thread::spawn(move || {
            for message in rx {
                match message {
                    WorkerMessage::Decode(timestamp) => {
                        thread::sleep(delay);
                        send_frame(&output, Ok(ledger.new_frame(timestamp)));
                    }
                    WorkerMessage::Fail => {
                        thread::sleep(delay);
                        let _ = output.unbounded_send(Err(orfail::Failure::new(
                            "broken slice data".to_owned(),
                        )));
                    }
                    WorkerMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        self.worker = Some((tx, handle));
        Ok(())
    }

    fn decode(&mut self, chunk: EncodedVideoChunk) -> orfail::Result<()> {
        self.submitted += 1;
        if self.fail_on_chunk == Some(self.submitted) {
            self.post(WorkerMessage::Fail)
        } else {
            self.post(WorkerMessage::Decode(chunk.timestamp))
        }
    }

    fn flush(&mut self) -> impl Future<Output = orfail::Result<()>> {
        let (tx, rx) = oneshot::channel();
        let posted = self.post(WorkerMessage::Flush(tx));
        async move {
            match posted {
                Ok(()) => rx
                    .await
                    .map_err(|_| orfail::Failure::new("decoder worker stopped".to_owned())),
                Err(e) => Err(e),
            }
        }
    }

    fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((worker, handle)) = self.worker.take() {
            drop(worker);
            let _ = handle.join();
        }
    }
}

/// エンコーダーが受け取った呼び出しの記録
#[derive(Debug, Default)]
pub struct EncoderCalls {
    pub queried: Vec<EncoderConfig>,
    pub configured: Option<EncoderConfig>,
    pub encoded_timestamps: Vec<i64>,
    pub key_frame_requests: Vec<bool>,
    pub flush_calls: usize,
    pub close_calls: usize,
}

pub struct MockEncoder {
    pub calls: Rc<RefCell<EncoderCalls>>,
    pub supported: bool,

    /// `flush()` が呼ばれるまでチャンクを出力しない
    pub buffer_until_flush: bool,

    /// 指定番目 (1 始まり) の画像で `encode()` がエラーを返す
    pub fail_on_frame: Option<usize>,

    output: Option<OutputSender<EncodedChunk>>,
    buffered: Vec<EncodedChunk>,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self {
            calls: Rc::default(),
            supported: true,
            buffer_until_flush: false,
            fail_on_frame: None,
            output: None,
            buffered: Vec::new(),
        }
    }

    fn send(&self, chunk: EncodedChunk) {
        if let Some(output) = &self.output {
            let _ = output.unbounded_send(Ok(chunk));
        }
    }
}

impl VideoEncoderEngine for MockEncoder {
    type Frame = MockFrame;

    fn is_config_supported(&self, config: &EncoderConfig) -> impl Future<Output = bool> {
        self.calls.borrow_mut().queried.push(config.clone());
        future::ready(self.supported)
    }

    fn configure(
        &mut self,
        config: &EncoderConfig,
        output: OutputSender<EncodedChunk>,
    ) -> orfail::Result<()> {
        self.calls.borrow_mut().configured = Some(config.clone());
        self.output = Some(output);
        Ok(())
    }

    fn encode(&mut self, frame: &Self::Frame, options: EncodeOptions) -> orfail::Result<()> {
        let n = {
            let mut calls = self.calls.borrow_mut();
            calls.encoded_timestamps.push(frame.timestamp());
            calls.key_frame_requests.push(options.key_frame);
            calls.encoded_timestamps.len()
        };
        if self.fail_on_frame == Some(n) {
            return Err(orfail::Failure::new("encoder queue overflow".to_owned()));
        }

        let chunk = EncodedChunk {
            data: vec![0x9D, 0x01, 0x2A, n as u8],
            keyframe: options.key_frame,
            timestamp: frame.timestamp(),
            duration: None,
            metadata: None,
        };
        if self.buffer_until_flush {
            self.buffered.push(chunk);
        } else {
            self.send(chunk);
        }
        Ok(())
    }

    fn flush(&mut self) -> impl Future<Output = orfail::Result<()>> {
        self.calls.borrow_mut().flush_calls += 1;
        for chunk in std::mem::take(&mut self.buffered) {
            self.send(chunk);
        }
        future::ready(Ok(()))
    }

    fn close(&mut self) {
        self.calls.borrow_mut().close_calls += 1;
        self.buffered.clear();
        self.output = None;
    }
}
