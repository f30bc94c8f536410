//! 映像デコーダー / エンコーダーの抽象化
//!
//! 実際のコーデック処理 (ブラウザの WebCodecs やネイティブライブラリなど) は
//! このモジュールのトレイトを実装した外部のエンジンが担当する。
//!
//! エンジンの出力は [`OutputSender`] 経由で非同期に届けられる。
//! チャネルは FIFO なので、エンジンが出力した順番がそのまま保たれる。
use std::future::Future;

use futures::channel::mpsc;

use crate::codec_config::{DecoderConfig, EncoderConfig};

/// エンジンの出力を送信するためのチャネル
///
/// 処理中にエラーが発生した場合には `Err` を送信することで変換処理を中断できる
pub type OutputSender<T> = mpsc::UnboundedSender<orfail::Result<T>>;

/// エンジンの出力を受信するためのチャネル
pub type OutputReceiver<T> = mpsc::UnboundedReceiver<orfail::Result<T>>;

/// エンジン出力用のチャネルを作成する
pub fn output_channel<T>() -> (OutputSender<T>, OutputReceiver<T>) {
    mpsc::unbounded()
}

/// [`EncodedVideoChunk`] の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// 単独でデコード可能なキーフレーム
    Key,

    /// 前のフレームに依存する差分フレーム
    Delta,
}

/// デコーダーに渡される符号化済みの映像データ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVideoChunk {
    /// チャンクの種類
    pub kind: ChunkType,

    /// 表示時刻 (マイクロ秒単位)
    pub timestamp: i64,

    /// 尺 (マイクロ秒単位)
    pub duration: Option<u64>,

    /// デコーダー設定の形式に正規化済みのペイロード
    pub data: Vec<u8>,
}

/// デコーダーが出力する画像
///
/// 画像はエンジン側のリソース (GPU メモリなど) を保持している可能性があるため、
/// 使い終わった画像は必ず [`VideoFrame::close()`] で解放すること
pub trait VideoFrame {
    /// 表示時刻 (マイクロ秒単位)
    fn timestamp(&self) -> i64;

    /// 画像が保持しているリソースを解放する
    fn close(self);
}

/// 色空間情報
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ColorSpace {
    pub primaries: Option<u8>,
    pub transfer: Option<u8>,
    pub matrix: Option<u8>,
    pub full_range: Option<bool>,
}

/// エンコーダーが最初のチャンクなどに付与するメタデータ
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncodedChunkMetadata {
    /// 出力映像の色空間情報
    pub color_space: Option<ColorSpace>,
}

/// エンコーダーが出力する符号化済みの映像データ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// 符号化済みのデータ
    pub data: Vec<u8>,

    /// キーフレームかどうか
    pub keyframe: bool,

    /// 表示時刻 (マイクロ秒単位)
    pub timestamp: i64,

    /// 尺 (マイクロ秒単位)
    pub duration: Option<u64>,

    /// メタデータ
    pub metadata: Option<EncodedChunkMetadata>,
}

/// [`VideoEncoderEngine::encode()`] に渡すオプション
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodeOptions {
    /// キーフレームとしてエンコードすることを要求するかどうか
    pub key_frame: bool,
}

/// 映像デコーダー
pub trait VideoDecoderEngine {
    /// デコード結果の画像の型
    type Frame: VideoFrame;

    /// 指定の設定でデコード可能かどうかを問い合わせる
    fn is_config_supported(&self, config: &DecoderConfig) -> impl Future<Output = bool>;

    /// デコーダーを初期化する
    ///
    /// デコード結果は `output` に表示順ではなくデコーダーの出力順で送信される
    fn configure(
        &mut self,
        config: &DecoderConfig,
        output: OutputSender<Self::Frame>,
    ) -> orfail::Result<()>;

    /// チャンクのデコードを要求する
    ///
    /// 画像を出力していないチャンクが [`TranscodeOptions::max_decode_queue`] 個に達すると、
    /// 変換処理は次の画像が出力チャネルに届くまでこのメソッドを呼び出さない。
    /// そのため並び替えなどで保持する画像の数はこの値未満に抑える必要がある
    ///
    /// [`TranscodeOptions::max_decode_queue`]: crate::TranscodeOptions::max_decode_queue
    fn decode(&mut self, chunk: EncodedVideoChunk) -> orfail::Result<()>;

    /// バッファリングされている画像をすべて出力させる
    ///
    /// 返された Future が完了した時点で、対応する画像はすべて出力チャネルに送信済みであること
    fn flush(&mut self) -> impl Future<Output = orfail::Result<()>>;

    /// デコーダーを終了する
    ///
    /// 複数回呼ばれても問題がないように実装すること
    fn close(&mut self);
}

/// 映像エンコーダー
pub trait VideoEncoderEngine {
    /// エンコード対象の画像の型
    type Frame: VideoFrame;

    /// 指定の設定でエンコード可能かどうかを問い合わせる
    fn is_config_supported(&self, config: &EncoderConfig) -> impl Future<Output = bool>;

    /// エンコーダーを初期化する
    fn configure(
        &mut self,
        config: &EncoderConfig,
        output: OutputSender<EncodedChunk>,
    ) -> orfail::Result<()>;

    /// 画像のエンコードを要求する
    ///
    /// 画像の所有権は呼び出し元に残り、解放も呼び出し元が行う
    fn encode(&mut self, frame: &Self::Frame, options: EncodeOptions) -> orfail::Result<()>;

    /// バッファリングされているチャンクをすべて出力させる
    fn flush(&mut self) -> impl Future<Output = orfail::Result<()>>;

    /// エンコーダーを終了する
    ///
    /// 複数回呼ばれても問題がないように実装すること
    fn close(&mut self);
}
