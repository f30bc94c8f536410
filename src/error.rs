//! 変換処理全体で使われるエラー型
use serde::{Deserialize, Serialize};

use crate::{Error, aux::SampleTableAccessorError, webm::WebmMuxError};

/// 変換処理で発生するエラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TranscodeErrorKind {
    /// 入力 MP4 ファイルの構造が壊れている、または解釈できない
    ContainerParse,

    /// 変換可能な映像トラックが存在しない
    NoVideoTrack,

    /// デコーダーの初期化に必要なパラメーターセットが見つからない
    MissingParameterSets,

    /// デコーダーが入力コーデックに対応していない
    UnsupportedCodec,

    /// エンコーダーが出力設定に対応していない
    UnsupportedEncode,

    /// サンプルの取り出しが期限内に完了しなかった
    DemuxTimeout,

    /// デコーダーまたはエンコーダーが処理中にエラーを報告した
    EngineRuntime,

    /// WebM の生成に失敗した
    Mux,

    /// 呼び出し元によって変換がキャンセルされた
    Cancelled,

    /// 変換オプションが不正
    InvalidOptions,
}

/// エラーを報告したエンジン
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum EngineRole {
    Decoder,
    Encoder,
}

impl std::fmt::Display for EngineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decoder => write!(f, "decoder"),
            Self::Encoder => write!(f, "encoder"),
        }
    }
}

/// 変換処理のエラー
///
/// いずれのエラーも変換処理にとっては致命的で、発生した時点で処理は中断される
#[non_exhaustive]
pub enum TranscodeError {
    /// 入力 MP4 ファイルの構造が壊れている、または解釈できない
    ContainerParse(Error),

    /// 変換可能な映像トラックが存在しない
    NoVideoTrack {
        /// ファイル内のトラック数
        track_count: usize,
    },

    /// デコーダーの初期化に必要なパラメーターセットが見つからない
    MissingParameterSets {
        /// 対象トラックのコーデック文字列
        codec: String,
    },

    /// デコーダーが入力コーデックに対応していない
    UnsupportedCodec {
        /// 最後に問い合わせたコーデック文字列
        codec: String,
    },

    /// エンコーダーが出力設定に対応していない
    UnsupportedEncode {
        /// 出力コーデック文字列
        codec: String,

        /// 出力映像の幅
        width: u32,

        /// 出力映像の高さ
        height: u32,
    },

    /// サンプルの取り出しが期限内に完了しなかった
    DemuxTimeout {
        /// 期限までに取り出せたサンプル数
        collected: usize,

        /// トラック内の全サンプル数
        expected: usize,
    },

    /// デコーダーまたはエンコーダーが処理中にエラーを報告した
    EngineRuntime {
        /// エラーを報告したエンジン
        engine: EngineRole,

        /// エンジンが報告したエラーメッセージ
        reason: String,
    },

    /// WebM の生成に失敗した
    Mux(WebmMuxError),

    /// 呼び出し元によって変換がキャンセルされた
    Cancelled,

    /// 変換オプションが不正
    InvalidOptions {
        /// 不正な理由
        reason: String,
    },
}

impl TranscodeError {
    /// エラーの種類を返す
    pub fn kind(&self) -> TranscodeErrorKind {
        match self {
            Self::ContainerParse(_) => TranscodeErrorKind::ContainerParse,
            Self::NoVideoTrack { .. } => TranscodeErrorKind::NoVideoTrack,
            Self::MissingParameterSets { .. } => TranscodeErrorKind::MissingParameterSets,
            Self::UnsupportedCodec { .. } => TranscodeErrorKind::UnsupportedCodec,
            Self::UnsupportedEncode { .. } => TranscodeErrorKind::UnsupportedEncode,
            Self::DemuxTimeout { .. } => TranscodeErrorKind::DemuxTimeout,
            Self::EngineRuntime { .. } => TranscodeErrorKind::EngineRuntime,
            Self::Mux(_) => TranscodeErrorKind::Mux,
            Self::Cancelled => TranscodeErrorKind::Cancelled,
            Self::InvalidOptions { .. } => TranscodeErrorKind::InvalidOptions,
        }
    }

    #[track_caller]
    pub(crate) fn container_parse<T: Into<String>>(reason: T) -> Self {
        Self::ContainerParse(Error::invalid_data(reason))
    }

    pub(crate) fn engine(engine: EngineRole, failure: orfail::Failure) -> Self {
        Self::EngineRuntime {
            engine,
            reason: failure.message,
        }
    }

    pub(crate) fn invalid_options<T: Into<String>>(reason: T) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Debug for TranscodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContainerParse(e) => write!(f, "Failed to parse MP4 container: {e}"),
            Self::NoVideoTrack { track_count } => write!(
                f,
                "No supported video track found ({track_count} tracks in file)"
            ),
            Self::MissingParameterSets { codec } => {
                write!(f, "Parameter sets (SPS/PPS) not found for codec {codec}")
            }
            Self::UnsupportedCodec { codec } => {
                write!(f, "Decoder does not support codec {codec}")
            }
            Self::UnsupportedEncode {
                codec,
                width,
                height,
            } => write!(
                f,
                "Encoder does not support {codec} at {width}x{height}"
            ),
            Self::DemuxTimeout {
                collected,
                expected,
            } => write!(
                f,
                "Timed out while extracting samples ({collected} of {expected} collected)"
            ),
            Self::EngineRuntime { engine, reason } => write!(f, "Video {engine} error: {reason}"),
            Self::Mux(e) => write!(f, "Failed to build WebM output: {e}"),
            Self::Cancelled => write!(f, "Transcoding was cancelled"),
            Self::InvalidOptions { reason } => write!(f, "Invalid transcode options: {reason}"),
        }
    }
}

impl std::error::Error for TranscodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ContainerParse(e) => Some(e),
            Self::Mux(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for TranscodeError {
    fn from(e: Error) -> Self {
        Self::ContainerParse(e)
    }
}

impl From<SampleTableAccessorError> for TranscodeError {
    #[track_caller]
    fn from(e: SampleTableAccessorError) -> Self {
        Self::container_parse(e.to_string())
    }
}

impl From<WebmMuxError> for TranscodeError {
    fn from(e: WebmMuxError) -> Self {
        Self::Mux(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_failure_keeps_message() {
        let error = TranscodeError::engine(EngineRole::Decoder, orfail::Failure::new("boom".to_owned()));
        assert_eq!(error.kind(), TranscodeErrorKind::EngineRuntime);
        assert_eq!(error.to_string(), "Video decoder error: boom");
    }

    #[test]
    fn kind_serializes_as_camel_case() {
        let json = serde_json::to_string(&TranscodeErrorKind::NoVideoTrack).expect("serialize");
        assert_eq!(json, "\"noVideoTrack\"");
    }
}
