//! 入力トラックからデコーダー / エンコーダーの設定を組み立てるモジュール
//!
//! コーデックごとに個別の処理を書くのではなく、[`CodecFamily`] ごとの差分
//! (パラメーターセットの有無、NAL ユニットの構文、フォールバック用のコーデック文字列) だけを
//! 切り替えて、共通の手順で設定を構築する。
use crate::{
    BoxType,
    bitstream::{self, NalUnitSyntax, ParameterSets},
    boxes::VideoSampleEntry,
    boxes_sample_entry::hevc_codec_string,
    demux::{CodecConfiguration, Sample, TrackDescriptor},
    engine::{VideoDecoderEngine, VideoEncoderEngine},
    error::TranscodeError,
    options::{NalPayloadFormat, ParameterSetRecovery, TranscodeOptions},
};

/// 出力コーデック (VP8) のコーデック文字列
pub const VP8_CODEC: &str = "vp8";

/// H.264 のデコーダーが入力コーデック文字列に対応していない場合に使われるコーデック文字列
/// (Constrained Baseline Profile, Level 3.0)
pub const AVC_BASELINE_CODEC: &str = "avc1.42E01E";

/// H.265 のデコーダーが入力コーデック文字列に対応していない場合に使われるコーデック文字列
/// (Main Profile, Main Tier, Level 3.1)
pub const HEVC_BASELINE_CODEC: &str = "hvc1.1.6.L93.B0";

/// 長さプレフィックスのバイト数が不明な場合に使われる値
const DEFAULT_LENGTH_SIZE: usize = 4;

/// 入力コーデックの系統
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CodecFamily {
    Avc,
    Hevc,
    Vp9,
    Av1,
}

impl CodecFamily {
    /// コーデック文字列 (`avc1.42E01E` など) から系統を判定する
    pub fn from_codec_string(codec: &str) -> Option<Self> {
        let fourcc = codec.split('.').next().unwrap_or(codec);
        match fourcc {
            "avc1" | "avc3" => Some(Self::Avc),
            "hvc1" | "hev1" => Some(Self::Hevc),
            "vp09" => Some(Self::Vp9),
            "av01" => Some(Self::Av1),
            _ => None,
        }
    }

    /// サンプルエントリーの種別から系統を判定する
    pub fn from_sample_entry_type(box_type: BoxType) -> Option<Self> {
        match box_type {
            VideoSampleEntry::AVC1 | VideoSampleEntry::AVC3 => Some(Self::Avc),
            VideoSampleEntry::HVC1 | VideoSampleEntry::HEV1 => Some(Self::Hevc),
            VideoSampleEntry::VP09 => Some(Self::Vp9),
            VideoSampleEntry::AV01 => Some(Self::Av1),
            _ => None,
        }
    }

    /// デコーダーの初期化にパラメーターセット (SPS / PPS など) を必要とするかどうか
    pub const fn uses_parameter_sets(self) -> bool {
        matches!(self, Self::Avc | Self::Hevc)
    }

    /// NAL ユニットの構文を返す (パラメーターセットを使わない系統では `None`)
    pub const fn nal_unit_syntax(self) -> Option<NalUnitSyntax> {
        match self {
            Self::Avc => Some(NalUnitSyntax::Avc),
            Self::Hevc => Some(NalUnitSyntax::Hevc),
            Self::Vp9 | Self::Av1 => None,
        }
    }

    /// デコーダーが対応していなかった場合に一度だけ試すコーデック文字列を返す
    pub const fn baseline_codec_string(self) -> Option<&'static str> {
        match self {
            Self::Avc => Some(AVC_BASELINE_CODEC),
            Self::Hevc => Some(HEVC_BASELINE_CODEC),
            Self::Vp9 | Self::Av1 => None,
        }
    }
}

/// デコーダーに渡すサンプルペイロードの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadFormat {
    /// 長さプレフィックスをスタートコードに置き換えた Annex B 形式
    AnnexB {
        /// 入力サンプルの長さプレフィックスのバイト数
        length_size: usize,
    },

    /// MP4 に格納されている長さプレフィックス形式のまま
    LengthPrefixed {
        /// 長さプレフィックスのバイト数
        length_size: usize,
    },

    /// 変換を行わずにそのまま渡す (VP9 / AV1)
    Passthrough,
}

/// デコーダーの設定
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecoderConfig {
    /// コーデック文字列
    pub codec: String,

    /// 符号化された映像の幅
    pub coded_width: u32,

    /// 符号化された映像の高さ
    pub coded_height: u32,

    /// コーデック固有の初期化データ
    ///
    /// Annex B 形式の場合はスタートコード付きのパラメーターセット、
    /// それ以外の場合はサンプルエントリーのコーデック設定レコード
    pub description: Option<Vec<u8>>,

    /// サンプルペイロードの形式
    pub payload_format: PayloadFormat,
}

impl DecoderConfig {
    /// サンプルのペイロードをこの設定の形式に正規化する
    ///
    /// 形式はサンプルごとではなく設定ごとに決まる
    pub fn normalize_payload(&self, data: Vec<u8>) -> Result<Vec<u8>, TranscodeError> {
        match self.payload_format {
            PayloadFormat::AnnexB { length_size } => {
                Ok(bitstream::length_prefixed_to_annexb(&data, length_size)?)
            }
            PayloadFormat::LengthPrefixed { .. } | PayloadFormat::Passthrough => Ok(data),
        }
    }
}

/// エンコーダーの設定
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// コーデック文字列 (常に [`VP8_CODEC`])
    pub codec: String,

    /// 出力映像の幅
    pub width: u32,

    /// 出力映像の高さ
    pub height: u32,

    /// 目標ビットレート (bps)
    pub bitrate: u32,

    /// フレームレート
    pub framerate: f64,
}

/// 対応の確認が済んだデコーダー / エンコーダーの設定
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCodecConfig {
    /// 入力コーデックの系統
    pub family: CodecFamily,

    /// デコーダーの設定
    pub decoder: DecoderConfig,

    /// エンコーダーの設定
    pub encoder: EncoderConfig,

    /// デコーダー設定がフォールバック用のコーデック文字列に置き換えられたかどうか
    pub used_fallback: bool,
}

/// トラック情報からデコーダー / エンコーダーの設定を組み立てて、エンジンへの対応確認を行う
#[derive(Debug, Clone, Copy)]
pub struct CodecConfigResolver<'a> {
    options: &'a TranscodeOptions,
}

impl<'a> CodecConfigResolver<'a> {
    /// 新しい [`CodecConfigResolver`] インスタンスを生成する
    pub fn new(options: &'a TranscodeOptions) -> Self {
        Self { options }
    }

    /// デコーダーの設定を組み立てる
    ///
    /// この関数は副作用を持たず、同じ入力に対しては常に同じ結果を返す。
    ///
    /// `samples` はパラメーターセットが帯域外に存在しない場合の探索対象として使われ、
    /// 何個のサンプルを探索するかは [`TranscodeOptions::parameter_set_recovery`] で決まる
    pub fn build_decoder_config(
        &self,
        track: &TrackDescriptor,
        samples: &[Sample],
    ) -> Result<DecoderConfig, TranscodeError> {
        let family = track_family(track)?;
        let Some(syntax) = family.nal_unit_syntax() else {
            let description = match &track.codec_configuration {
                Some(CodecConfiguration::Vp9(b)) => Some(b.record.clone()),
                Some(CodecConfiguration::Av1(b)) => Some(b.record.clone()),
                _ => None,
            };
            return Ok(DecoderConfig {
                codec: track.codec.clone(),
                coded_width: track.width,
                coded_height: track.height,
                description,
                payload_format: PayloadFormat::Passthrough,
            });
        };

        let (mut sets, length_size, record) = out_of_band_parameter_sets(track);
        let out_of_band = sets.is_complete(syntax);
        if !out_of_band {
            let limit = match self.options.parameter_set_recovery {
                ParameterSetRecovery::FirstSample => 1,
                ParameterSetRecovery::ScanSamples { max_samples } => max_samples,
            };
            for sample in samples.iter().take(limit) {
                sets.scan(&sample.data, length_size, syntax)?;
                if sets.is_complete(syntax) {
                    break;
                }
            }
            if !sets.is_complete(syntax) {
                return Err(TranscodeError::MissingParameterSets {
                    codec: track.codec.clone(),
                });
            }
            tracing::debug!(
                track_id = track.track_id,
                codec = %track.codec,
                "Recovered parameter sets from sample data"
            );
        }

        let codec = if track.codec.contains('.') {
            track.codec.clone()
        } else {
            codec_string_from_sps(family, &track.codec, sets.sps.as_deref().unwrap_or_default())
                .ok_or_else(|| TranscodeError::MissingParameterSets {
                    codec: track.codec.clone(),
                })?
        };

        let (description, payload_format) = match (self.options.nal_payload_format, record) {
            (NalPayloadFormat::LengthPrefixed, Some(record)) if out_of_band => (
                record,
                PayloadFormat::LengthPrefixed { length_size },
            ),
            _ => (sets.to_annexb(), PayloadFormat::AnnexB { length_size }),
        };

        Ok(DecoderConfig {
            codec,
            coded_width: track.width,
            coded_height: track.height,
            description: Some(description),
            payload_format,
        })
    }

    /// デコーダーが設定に対応しているかを問い合わせる
    ///
    /// 対応していない場合、パラメーターセットを使う系統に限り、
    /// フォールバック用のコーデック文字列で一度だけ再確認を行う。
    /// 戻り値の二番目はフォールバックが使われたかどうか
    pub async fn negotiate_decoder_config<D: VideoDecoderEngine>(
        &self,
        decoder: &D,
        mut config: DecoderConfig,
    ) -> Result<(DecoderConfig, bool), TranscodeError> {
        if decoder.is_config_supported(&config).await {
            return Ok((config, false));
        }

        let family = CodecFamily::from_codec_string(&config.codec);
        let Some(baseline) = family.and_then(CodecFamily::baseline_codec_string) else {
            return Err(TranscodeError::UnsupportedCodec {
                codec: config.codec,
            });
        };

        tracing::warn!(
            codec = %config.codec,
            fallback = baseline,
            "Decoder does not support the codec, retrying with the baseline codec string"
        );
        config.codec = baseline.to_owned();
        if decoder.is_config_supported(&config).await {
            Ok((config, true))
        } else {
            Err(TranscodeError::UnsupportedCodec {
                codec: config.codec,
            })
        }
    }

    /// エンコーダーの設定を組み立てる
    pub fn build_encoder_config(&self, track: &TrackDescriptor) -> EncoderConfig {
        let timescale = u128::from(track.timescale.get());
        let duration = u128::from(track.duration);

        let bitrate = self
            .options
            .target_bitrate
            .or_else(|| {
                if duration == 0 || track.total_sample_bytes == 0 {
                    return None;
                }
                let bits = u128::from(track.total_sample_bytes) * 8;
                u32::try_from(bits * timescale / duration)
                    .ok()
                    .filter(|b| *b > 0)
            })
            .unwrap_or(self.options.fallback_bitrate);

        let framerate = self
            .options
            .target_framerate
            .or_else(|| {
                if duration == 0 || track.sample_count == 0 {
                    return None;
                }
                let fps = track.sample_count as f64 * timescale as f64 / duration as f64;
                fps.is_finite().then_some(fps)
            })
            .unwrap_or(self.options.fallback_framerate);

        EncoderConfig {
            codec: VP8_CODEC.to_owned(),
            width: track.width,
            height: track.height,
            bitrate,
            framerate,
        }
    }

    /// エンコーダーが設定に対応しているかを問い合わせる
    ///
    /// 出力形式は固定なので、対応していない場合の再試行は行わない
    pub async fn negotiate_encoder_config<E: VideoEncoderEngine>(
        &self,
        encoder: &E,
        config: EncoderConfig,
    ) -> Result<EncoderConfig, TranscodeError> {
        if encoder.is_config_supported(&config).await {
            Ok(config)
        } else {
            Err(TranscodeError::UnsupportedEncode {
                codec: config.codec,
                width: config.width,
                height: config.height,
            })
        }
    }

    /// デコーダー / エンコーダーの設定を組み立てて、両方のエンジンへの対応確認を行う
    pub async fn resolve<D, E>(
        &self,
        track: &TrackDescriptor,
        samples: &[Sample],
        decoder: &D,
        encoder: &E,
    ) -> Result<ResolvedCodecConfig, TranscodeError>
    where
        D: VideoDecoderEngine,
        E: VideoEncoderEngine,
    {
        let family = track_family(track)?;
        let decoder_config = self.build_decoder_config(track, samples)?;
        let (decoder_config, used_fallback) = self
            .negotiate_decoder_config(decoder, decoder_config)
            .await?;
        let encoder_config = self
            .negotiate_encoder_config(encoder, self.build_encoder_config(track))
            .await?;

        tracing::info!(
            decoder_codec = %decoder_config.codec,
            encoder_codec = %encoder_config.codec,
            width = encoder_config.width,
            height = encoder_config.height,
            bitrate = encoder_config.bitrate,
            framerate = encoder_config.framerate,
            used_fallback,
            "Codec configuration resolved"
        );
        Ok(ResolvedCodecConfig {
            family,
            decoder: decoder_config,
            encoder: encoder_config,
            used_fallback,
        })
    }
}

fn track_family(track: &TrackDescriptor) -> Result<CodecFamily, TranscodeError> {
    CodecFamily::from_sample_entry_type(track.sample_entry_type)
        .or_else(|| CodecFamily::from_codec_string(&track.codec))
        .ok_or_else(|| TranscodeError::UnsupportedCodec {
            codec: track.codec.clone(),
        })
}

fn out_of_band_parameter_sets(track: &TrackDescriptor) -> (ParameterSets, usize, Option<Vec<u8>>) {
    match &track.codec_configuration {
        Some(CodecConfiguration::Avc(b)) => (
            ParameterSets {
                vps: None,
                sps: b.sps_list.first().cloned(),
                pps: b.pps_list.first().cloned(),
            },
            usize::from(b.length_size_minus_one.get()) + 1,
            Some(b.record.clone()),
        ),
        Some(CodecConfiguration::Hevc(b)) => (
            ParameterSets {
                vps: b.nalus_of_type(NalUnitSyntax::HEVC_VPS).next().map(<[u8]>::to_vec),
                sps: b.nalus_of_type(NalUnitSyntax::HEVC_SPS).next().map(<[u8]>::to_vec),
                pps: b.nalus_of_type(NalUnitSyntax::HEVC_PPS).next().map(<[u8]>::to_vec),
            },
            usize::from(b.length_size_minus_one.get()) + 1,
            Some(b.record.clone()),
        ),
        _ => (ParameterSets::default(), DEFAULT_LENGTH_SIZE, None),
    }
}

/// プロファイル情報を含まないコーデック文字列 (`avc3` など) を SPS の内容から補完する
fn codec_string_from_sps(family: CodecFamily, fourcc: &str, sps: &[u8]) -> Option<String> {
    match family {
        CodecFamily::Avc => {
            // NAL ヘッダーに続く profile_idc, constraint_set フラグ, level_idc
            let [_, profile, constraints, level, ..] = sps else {
                return None;
            };
            Some(format!("{fourcc}.{profile:02X}{constraints:02X}{level:02X}"))
        }
        CodecFamily::Hevc => {
            // [NOTE]
            // NAL ヘッダー (2 バイト) と sps_video_parameter_set_id などを含む 1 バイトの後に
            // general_profile_tier_level の 12 バイトが続く
            let rbsp = bitstream::to_rbsp(sps);
            let ptl = rbsp.get(3..15)?;
            let mut constraint = [0; 8];
            constraint[2..].copy_from_slice(&ptl[5..11]);
            Some(hevc_codec_string(
                fourcc,
                ptl[0] >> 6,
                (ptl[0] >> 5) & 1 == 1,
                ptl[0] & 0x1F,
                u32::from_be_bytes([ptl[1], ptl[2], ptl[3], ptl[4]]),
                u64::from_be_bytes(constraint),
                ptl[11],
            ))
        }
        CodecFamily::Vp9 | CodecFamily::Av1 => None,
    }
}
