//! MP4 (H.264 / H.265 / VP9 / AV1) の映像トラックを WebM (VP8) に変換するためのライブラリ
//!
//! 実際のデコードおよびエンコード処理は、[`engine`] モジュールのトレイトを実装した
//! 外部のエンジンに委譲する。
//! このライブラリが担当するのは、MP4 の解析、デコーダー設定の構築、
//! エンジン間のデータの受け渡し、そして WebM ファイルの生成である。
//!
//! # Examples
//!
//! ```ignore
//! use shiguredo_mp4_to_webm::{TranscodeOptions, Transcoder};
//!
//! let mut transcoder = Transcoder::new(TranscodeOptions::default(), decoder, encoder)?;
//! let webm = futures::executor::block_on(transcoder.transcode(&mp4_bytes, |progress| {
//!     println!("{:.1}%: {}", progress.fraction * 100.0, progress.message);
//! }))?;
//! ```
#![warn(missing_docs)]

mod auxiliary;
mod basic_types;
pub mod bitstream;
pub mod boxes;
mod boxes_moov_tree;
mod boxes_sample_entry;
mod codec;
pub mod codec_config;
pub mod demux;
pub mod ebml;
pub mod engine;
pub mod error;
pub mod options;
pub mod transcode;
pub mod webm;

pub use basic_types::{
    BoxHeader, BoxSize, BoxType, Either, FixedPointNumber, FullBoxFlags, FullBoxHeader, Mp4File,
    Uint,
};
pub use codec::{Decode, Error, ErrorKind, Result};
pub use error::{EngineRole, TranscodeError, TranscodeErrorKind};
pub use options::{NalPayloadFormat, ParameterSetRecovery, TranscodeOptions};
pub use transcode::{
    CancellationToken, ProgressObserver, TranscodeCounters, TranscodePhase, TranscodeProgress,
    TranscodeState, Transcoder,
};

// [NOTE]
// Windows 環境では aux.rs というファイル名が予約語で、リポジトリに含まれていると git clone に失敗するため、
// ファイル名自体は auxiliary.rs にして lib.rs の中で aux モジュール以下に再エクスポートしている。
pub mod aux {
    //! MP4 の仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール

    pub use crate::auxiliary::{
        SampleIter, SampleLocation, SampleTableAccessor, SampleTableAccessorError,
    };
}
