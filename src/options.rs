//! 変換オプション
use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;

/// [`TranscodeOptions::fallback_bitrate`] のデフォルト値 (bps)
pub const DEFAULT_FALLBACK_BITRATE: u32 = 1_000_000;

/// [`TranscodeOptions::fallback_framerate`] のデフォルト値
pub const DEFAULT_FALLBACK_FRAMERATE: f64 = 30.0;

/// [`TranscodeOptions::demux_batch_size`] のデフォルト値
pub const DEFAULT_DEMUX_BATCH_SIZE: usize = 100;

/// [`TranscodeOptions::max_decode_queue`] のデフォルト値
pub const DEFAULT_MAX_DECODE_QUEUE: usize = 16;

/// [`TranscodeOptions::writing_app`] のデフォルト値
pub const DEFAULT_WRITING_APP: &str = concat!("shiguredo_mp4_to_webm ", env!("CARGO_PKG_VERSION"));

/// 変換処理の設定
///
/// JSON からも読み込めるようにフィールド名は camelCase でシリアライズされる。
/// 省略されたフィールドにはデフォルト値が使われる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscodeOptions {
    /// 出力ビットレート (bps)
    ///
    /// 指定がない場合は入力トラックのビットレートから推定する
    pub target_bitrate: Option<u32>,

    /// 出力フレームレート
    ///
    /// 指定がない場合は入力トラックのサンプル数と尺から推定する
    pub target_framerate: Option<f64>,

    /// ビットレートが推定できない場合に使われる値 (bps)
    pub fallback_bitrate: u32,

    /// フレームレートが推定できない場合に使われる値
    pub fallback_framerate: f64,

    /// エンコーダーにキーフレームを要求する間隔 (フレーム数)
    ///
    /// 指定がない場合は入力のキーフレーム位置に合わせる
    pub keyframe_interval: Option<u32>,

    /// デマルチプレクサーが一度に取り出すサンプル数
    pub demux_batch_size: usize,

    /// デコーダーに渡したが画像がまだ出力されていないチャンク数の上限
    ///
    /// 上限に達すると、次の画像が出力されるまでデコーダーへのチャンクの投入を待つ
    pub max_decode_queue: usize,

    /// サンプルエントリーにパラメーターセットが含まれない場合の探索方法
    pub parameter_set_recovery: ParameterSetRecovery,

    /// H.264 / H.265 のサンプルをデコーダーに渡す際の形式
    pub nal_payload_format: NalPayloadFormat,

    /// WebM の WritingApp 要素に書き込まれる名前
    pub writing_app: String,
}

impl TranscodeOptions {
    /// JSON 文字列からオプションを読み込む
    ///
    /// 読み込んだ後に [`TranscodeOptions::validate()`] による検証も行われる
    pub fn from_json(json: &str) -> Result<Self, TranscodeError> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| TranscodeError::invalid_options(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// オプションの値が妥当かどうかを検証する
    pub fn validate(&self) -> Result<(), TranscodeError> {
        if self.target_bitrate == Some(0) {
            return Err(TranscodeError::invalid_options(
                "targetBitrate must be greater than zero",
            ));
        }
        if let Some(fps) = self.target_framerate
            && !(fps.is_finite() && fps > 0.0)
        {
            return Err(TranscodeError::invalid_options(format!(
                "targetFramerate must be a positive finite number: {fps}"
            )));
        }
        if self.fallback_bitrate == 0 {
            return Err(TranscodeError::invalid_options(
                "fallbackBitrate must be greater than zero",
            ));
        }
        if !(self.fallback_framerate.is_finite() && self.fallback_framerate > 0.0) {
            return Err(TranscodeError::invalid_options(format!(
                "fallbackFramerate must be a positive finite number: {}",
                self.fallback_framerate
            )));
        }
        if self.keyframe_interval == Some(0) {
            return Err(TranscodeError::invalid_options(
                "keyframeInterval must be greater than zero",
            ));
        }
        if self.demux_batch_size == 0 {
            return Err(TranscodeError::invalid_options(
                "demuxBatchSize must be greater than zero",
            ));
        }
        if self.max_decode_queue == 0 {
            return Err(TranscodeError::invalid_options(
                "maxDecodeQueue must be greater than zero",
            ));
        }
        if let ParameterSetRecovery::ScanSamples { max_samples: 0 } = self.parameter_set_recovery {
            return Err(TranscodeError::invalid_options(
                "parameterSetRecovery.maxSamples must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            target_bitrate: None,
            target_framerate: None,
            fallback_bitrate: DEFAULT_FALLBACK_BITRATE,
            fallback_framerate: DEFAULT_FALLBACK_FRAMERATE,
            keyframe_interval: None,
            demux_batch_size: DEFAULT_DEMUX_BATCH_SIZE,
            max_decode_queue: DEFAULT_MAX_DECODE_QUEUE,
            parameter_set_recovery: ParameterSetRecovery::default(),
            nal_payload_format: NalPayloadFormat::default(),
            writing_app: DEFAULT_WRITING_APP.to_owned(),
        }
    }
}

/// サンプルエントリーに `avcC` / `hvcC` のパラメーターセットが含まれない場合に、
/// どのサンプルからパラメーターセットを探すか
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ParameterSetRecovery {
    /// 先頭サンプルのみを探索する
    #[default]
    FirstSample,

    /// 先頭から最大 `max_samples` 個のサンプルを探索する
    #[serde(rename_all = "camelCase")]
    ScanSamples {
        /// 探索するサンプル数の上限
        max_samples: usize,
    },
}

/// H.264 / H.265 のサンプルをデコーダーに渡す際の形式
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NalPayloadFormat {
    /// スタートコード区切り (`00 00 00 01`) に書き換える
    #[default]
    AnnexB,

    /// MP4 に格納されている長さプレフィックス形式のまま渡す
    LengthPrefixed,
}
