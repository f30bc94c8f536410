//! エンコード済みの VP8 チャンクから WebM ファイルを組み立てるモジュール
//!
//! 出力されるファイルの構造は以下の通り:
//!
//! ```text
//! EBML
//! Segment
//! ├── SeekHead
//! ├── Info
//! ├── Tracks
//! │   └── TrackEntry (映像トラック一つ)
//! ├── Cluster (キーフレームごと)
//! │   ├── Timestamp
//! │   └── SimpleBlock ...
//! └── Cues
//! ```
//!
//! 全てのデータをメモリ上に保持し、[`WebmMuxer::finalize()`] の時点でファイル全体を組み立てる
use crate::{
    ebml,
    engine::{ColorSpace, EncodedChunk},
};

/// WebM の要素 ID
#[allow(missing_docs)]
pub mod ids {
    pub const EBML: u32 = 0x1A45DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const SEGMENT: u32 = 0x18538067;

    pub const SEEK_HEAD: u32 = 0x114D9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const SEEK_ID: u32 = 0x53AB;
    pub const SEEK_POSITION: u32 = 0x53AC;

    pub const INFO: u32 = 0x1549A966;
    pub const TIMESTAMP_SCALE: u32 = 0x2AD7B1;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;
    pub const DURATION: u32 = 0x4489;

    pub const TRACKS: u32 = 0x1654AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const CODEC_ID: u32 = 0x86;
    pub const DEFAULT_DURATION: u32 = 0x23E383;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const COLOUR: u32 = 0x55B0;
    pub const MATRIX_COEFFICIENTS: u32 = 0x55B1;
    pub const RANGE: u32 = 0x55B9;
    pub const TRANSFER_CHARACTERISTICS: u32 = 0x55BA;
    pub const PRIMARIES: u32 = 0x55BB;

    pub const CLUSTER: u32 = 0x1F43B675;
    pub const TIMESTAMP: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;

    pub const CUES: u32 = 0x1C53BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
}

/// VP8 のコーデック ID
pub const CODEC_ID_VP8: &str = "V_VP8";

/// TimestampScale (1 ミリ秒)
pub const TIMESTAMP_SCALE_NS: u64 = 1_000_000;

/// 出力される映像トラックの番号
pub const TRACK_NUMBER: u64 = 1;

const TRACK_TYPE_VIDEO: u64 = 1;
const MUXING_APP: &str = concat!("shiguredo_mp4_to_webm ", env!("CARGO_PKG_VERSION"));

/// [`WebmMuxer`] が返すエラー
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WebmMuxError {
    /// チャンクが一つも追加されていない状態で [`WebmMuxer::finalize()`] が呼ばれた
    NoChunks,

    /// 直前のチャンクよりも前の時刻のチャンクが追加された
    DecreasingTimestamp {
        /// 直前のチャンクの時刻 (マイクロ秒単位)
        previous: i64,

        /// 追加されたチャンクの時刻 (マイクロ秒単位)
        timestamp: i64,
    },

}

impl std::fmt::Debug for WebmMuxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for WebmMuxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChunks => write!(f, "No chunks were added to the WebM muxer"),
            Self::DecreasingTimestamp {
                previous,
                timestamp,
            } => write!(
                f,
                "Chunk timestamp must not decrease: previous={previous}us, current={timestamp}us"
            ),
        }
    }
}

impl std::error::Error for WebmMuxError {}

/// 出力トラックの静的な情報
#[derive(Debug, Clone, PartialEq)]
pub struct WebmTrackConfig {
    /// コーデック ID
    pub codec_id: String,

    /// 映像の幅
    pub width: u32,

    /// 映像の高さ
    pub height: u32,

    /// フレームレート (DefaultDuration の計算に使われる)
    pub frame_rate: Option<f64>,
}

impl WebmTrackConfig {
    /// VP8 トラックの設定を作成する
    pub fn vp8(width: u32, height: u32, frame_rate: Option<f64>) -> Self {
        Self {
            codec_id: CODEC_ID_VP8.to_owned(),
            width,
            height,
            frame_rate,
        }
    }
}

#[derive(Debug)]
struct ClusterBuilder {
    timestamp: u64,
    blocks: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct CuePoint {
    time: u64,
    clusters_offset: u64,
}

/// エンコード済みのチャンクを受け取って WebM ファイルを組み立てる
///
/// チャンクは表示時刻の昇順で追加する必要があり、並び替えは行わない
#[derive(Debug)]
pub struct WebmMuxer {
    track: WebmTrackConfig,
    writing_app: String,
    color_space: Option<ColorSpace>,
    clusters: Vec<u8>,
    current_cluster: Option<ClusterBuilder>,
    cue_points: Vec<CuePoint>,
    last_timestamp: Option<i64>,
    origin: i64,
    end_time: u64,
    chunk_count: usize,
}

impl WebmMuxer {
    /// 新しい [`WebmMuxer`] インスタンスを生成する
    pub fn new(track: WebmTrackConfig, writing_app: &str) -> Self {
        Self {
            track,
            writing_app: writing_app.to_owned(),
            color_space: None,
            clusters: Vec::new(),
            current_cluster: None,
            cue_points: Vec::new(),
            last_timestamp: None,
            origin: 0,
            end_time: 0,
            chunk_count: 0,
        }
    }

    /// これまでに追加されたチャンクの数を返す
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// チャンクを追加する
    ///
    /// 最初のチャンクの時刻が負の場合 (ctts の負のオフセットなど) は、
    /// その時刻が 0 になるように全てのチャンクの時刻をずらして書き込む
    pub fn add_chunk(&mut self, chunk: &EncodedChunk) -> Result<(), WebmMuxError> {
        match self.last_timestamp {
            None => self.origin = chunk.timestamp.min(0),
            Some(previous) if chunk.timestamp < previous => {
                return Err(WebmMuxError::DecreasingTimestamp {
                    previous,
                    timestamp: chunk.timestamp,
                });
            }
            Some(_) => {}
        }

        if self.color_space.is_none() {
            self.color_space = chunk.metadata.as_ref().and_then(|m| m.color_space);
        }

        // マイクロ秒からミリ秒 (TimestampScale) に変換する
        let time = chunk.timestamp.abs_diff(self.origin) / 1000;
        let needs_new_cluster = match &self.current_cluster {
            None => true,
            Some(cluster) => chunk.keyframe || time - cluster.timestamp > i16::MAX as u64,
        };
        if needs_new_cluster {
            self.close_cluster();
            if chunk.keyframe {
                self.cue_points.push(CuePoint {
                    time,
                    clusters_offset: self.clusters.len() as u64,
                });
            }
            self.current_cluster = Some(ClusterBuilder {
                timestamp: time,
                blocks: Vec::new(),
            });
        }

        if let Some(cluster) = &mut self.current_cluster {
            // クラスター切り替えの条件により、相対時刻は必ず i16 に収まる
            let relative = (time - cluster.timestamp) as i16;
            let mut block = Vec::with_capacity(4 + chunk.data.len());
            ebml::write_vint(&mut block, TRACK_NUMBER);
            block.extend_from_slice(&relative.to_be_bytes());
            block.push(if chunk.keyframe { 0x80 } else { 0x00 });
            block.extend_from_slice(&chunk.data);
            ebml::write_binary_element(&mut cluster.blocks, ids::SIMPLE_BLOCK, &block);
        }

        let duration = chunk.duration.unwrap_or(0) / 1000;
        self.end_time = self.end_time.max(time + duration);
        self.last_timestamp = Some(chunk.timestamp);
        self.chunk_count += 1;
        Ok(())
    }

    /// WebM ファイル全体を組み立てて返す
    ///
    /// この呼び出しの後に muxer を使い続けることはできない
    pub fn finalize(mut self) -> Result<Vec<u8>, WebmMuxError> {
        if self.chunk_count == 0 {
            return Err(WebmMuxError::NoChunks);
        }
        self.close_cluster();

        let info = self.build_info();
        let tracks = self.build_tracks();

        // SeekPosition は 8 バイト固定なので、位置が決まる前にサイズを確定できる
        let has_cues = !self.cue_points.is_empty();
        let seek_head_size = build_seek_head(0, 0, has_cues.then_some(0)).len() as u64;
        let info_position = seek_head_size;
        let tracks_position = info_position + info.len() as u64;
        let clusters_position = tracks_position + tracks.len() as u64;
        let cues_position = clusters_position + self.clusters.len() as u64;
        let seek_head = build_seek_head(
            info_position,
            tracks_position,
            has_cues.then_some(cues_position),
        );
        let cues = self.build_cues(clusters_position);

        let mut segment = Vec::with_capacity(
            seek_head.len() + info.len() + tracks.len() + self.clusters.len() + cues.len(),
        );
        segment.extend_from_slice(&seek_head);
        segment.extend_from_slice(&info);
        segment.extend_from_slice(&tracks);
        segment.extend_from_slice(&self.clusters);
        segment.extend_from_slice(&cues);

        let mut file = build_ebml_header();
        ebml::write_master_element(&mut file, ids::SEGMENT, &segment);

        tracing::debug!(
            chunks = self.chunk_count,
            cue_points = self.cue_points.len(),
            bytes = file.len(),
            "WebM file finalized"
        );
        Ok(file)
    }

    fn close_cluster(&mut self) {
        let Some(cluster) = self.current_cluster.take() else {
            return;
        };
        let mut content = Vec::with_capacity(cluster.blocks.len() + 16);
        ebml::write_uint_element(&mut content, ids::TIMESTAMP, cluster.timestamp);
        content.extend_from_slice(&cluster.blocks);
        ebml::write_master_element(&mut self.clusters, ids::CLUSTER, &content);
    }

    fn build_info(&self) -> Vec<u8> {
        let mut content = Vec::new();
        ebml::write_uint_element(&mut content, ids::TIMESTAMP_SCALE, TIMESTAMP_SCALE_NS);
        ebml::write_string_element(&mut content, ids::MUXING_APP, MUXING_APP);
        ebml::write_string_element(&mut content, ids::WRITING_APP, &self.writing_app);
        ebml::write_float_element(&mut content, ids::DURATION, self.end_time as f64);

        let mut buf = Vec::new();
        ebml::write_master_element(&mut buf, ids::INFO, &content);
        buf
    }

    fn build_tracks(&self) -> Vec<u8> {
        let mut video = Vec::new();
        ebml::write_uint_element(&mut video, ids::PIXEL_WIDTH, u64::from(self.track.width));
        ebml::write_uint_element(&mut video, ids::PIXEL_HEIGHT, u64::from(self.track.height));
        if let Some(color_space) = &self.color_space {
            let colour = build_colour(color_space);
            if !colour.is_empty() {
                ebml::write_master_element(&mut video, ids::COLOUR, &colour);
            }
        }

        let mut entry = Vec::new();
        ebml::write_uint_element(&mut entry, ids::TRACK_NUMBER, TRACK_NUMBER);
        ebml::write_uint_element(&mut entry, ids::TRACK_UID, TRACK_NUMBER);
        ebml::write_uint_element(&mut entry, ids::TRACK_TYPE, TRACK_TYPE_VIDEO);
        ebml::write_uint_element(&mut entry, ids::FLAG_LACING, 0);
        ebml::write_string_element(&mut entry, ids::CODEC_ID, &self.track.codec_id);
        if let Some(fps) = self.track.frame_rate
            && fps.is_finite()
            && fps > 0.0
        {
            let default_duration = (1_000_000_000.0 / fps).round() as u64;
            ebml::write_uint_element(&mut entry, ids::DEFAULT_DURATION, default_duration);
        }
        ebml::write_master_element(&mut entry, ids::VIDEO, &video);

        let mut content = Vec::new();
        ebml::write_master_element(&mut content, ids::TRACK_ENTRY, &entry);
        let mut buf = Vec::new();
        ebml::write_master_element(&mut buf, ids::TRACKS, &content);
        buf
    }

    fn build_cues(&self, clusters_position: u64) -> Vec<u8> {
        if self.cue_points.is_empty() {
            return Vec::new();
        }

        let mut content = Vec::new();
        for cue in &self.cue_points {
            let mut positions = Vec::new();
            ebml::write_uint_element(&mut positions, ids::CUE_TRACK, TRACK_NUMBER);
            ebml::write_uint_element(
                &mut positions,
                ids::CUE_CLUSTER_POSITION,
                clusters_position + cue.clusters_offset,
            );

            let mut point = Vec::new();
            ebml::write_uint_element(&mut point, ids::CUE_TIME, cue.time);
            ebml::write_master_element(&mut point, ids::CUE_TRACK_POSITIONS, &positions);
            ebml::write_master_element(&mut content, ids::CUE_POINT, &point);
        }

        let mut buf = Vec::new();
        ebml::write_master_element(&mut buf, ids::CUES, &content);
        buf
    }
}

fn build_ebml_header() -> Vec<u8> {
    let mut content = Vec::new();
    ebml::write_uint_element(&mut content, ids::EBML_VERSION, 1);
    ebml::write_uint_element(&mut content, ids::EBML_READ_VERSION, 1);
    ebml::write_uint_element(&mut content, ids::EBML_MAX_ID_LENGTH, 4);
    ebml::write_uint_element(&mut content, ids::EBML_MAX_SIZE_LENGTH, 8);
    ebml::write_string_element(&mut content, ids::DOC_TYPE, "webm");
    ebml::write_uint_element(&mut content, ids::DOC_TYPE_VERSION, 4);
    ebml::write_uint_element(&mut content, ids::DOC_TYPE_READ_VERSION, 2);

    let mut buf = Vec::new();
    ebml::write_master_element(&mut buf, ids::EBML, &content);
    buf
}

fn build_seek_head(info: u64, tracks: u64, cues: Option<u64>) -> Vec<u8> {
    let mut content = Vec::new();
    let entries = [(ids::INFO, Some(info)), (ids::TRACKS, Some(tracks)), (ids::CUES, cues)];
    for (id, position) in entries {
        let Some(position) = position else {
            continue;
        };
        let mut seek = Vec::new();
        let mut id_bytes = Vec::new();
        ebml::write_element_id(&mut id_bytes, id);
        ebml::write_binary_element(&mut seek, ids::SEEK_ID, &id_bytes);
        ebml::write_uint_element_fixed(&mut seek, ids::SEEK_POSITION, position);
        ebml::write_master_element(&mut content, ids::SEEK, &seek);
    }

    let mut buf = Vec::new();
    ebml::write_master_element(&mut buf, ids::SEEK_HEAD, &content);
    buf
}

fn build_colour(color_space: &ColorSpace) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(matrix) = color_space.matrix {
        ebml::write_uint_element(&mut buf, ids::MATRIX_COEFFICIENTS, u64::from(matrix));
    }
    if let Some(full_range) = color_space.full_range {
        // 1: broadcast range, 2: full range
        ebml::write_uint_element(&mut buf, ids::RANGE, if full_range { 2 } else { 1 });
    }
    if let Some(transfer) = color_space.transfer {
        ebml::write_uint_element(&mut buf, ids::TRANSFER_CHARACTERISTICS, u64::from(transfer));
    }
    if let Some(primaries) = color_space.primaries {
        ebml::write_uint_element(&mut buf, ids::PRIMARIES, u64::from(primaries));
    }
    buf
}
