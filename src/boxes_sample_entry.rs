//! stsd ボックスの下に配置される映像用サンプルエントリーとコーデック設定ボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use std::num::NonZeroU16;

use crate::{
    BoxHeader, BoxType, Decode, Error, FixedPointNumber, FullBoxHeader, Result, Uint,
    basic_types::with_box_type, boxes::UnknownBox,
};

/// [`StsdBox`](crate::boxes::StsdBox) の子ボックス
///
/// このライブラリが変換元として扱えない種別のエントリーは [`SampleEntry::Unknown`] となる
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SampleEntry {
    Video(VideoSampleEntry),
    Unknown(UnknownBox),
}

impl SampleEntry {
    /// ボックス種別を返す
    pub fn box_type(&self) -> BoxType {
        match self {
            Self::Video(b) => b.box_type,
            Self::Unknown(b) => b.box_type,
        }
    }
}

impl Decode for SampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        if VideoSampleEntry::SUPPORTED_TYPES.contains(&header.box_type) {
            VideoSampleEntry::decode(buf).map(|(b, n)| (Self::Video(b), n))
        } else {
            UnknownBox::decode(buf).map(|(b, n)| (Self::Unknown(b), n))
        }
    }
}

/// 映像系のサンプルエントリーに共通のフィールドをまとめた構造体
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VisualSampleEntryFields {
    pub data_reference_index: NonZeroU16,
    pub width: u16,
    pub height: u16,
    pub horizresolution: FixedPointNumber<u16, u16>,
    pub vertresolution: FixedPointNumber<u16, u16>,
    pub frame_count: u16,
    pub compressorname: [u8; 32],
    pub depth: u16,
}

impl Decode for VisualSampleEntryFields {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let _ = <[u8; 6]>::decode_at(buf, &mut offset)?;
        let data_reference_index = NonZeroU16::decode_at(buf, &mut offset)?;
        let _ = <[u8; 2 + 2 + 4 * 3]>::decode_at(buf, &mut offset)?;
        let width = u16::decode_at(buf, &mut offset)?;
        let height = u16::decode_at(buf, &mut offset)?;
        let horizresolution = FixedPointNumber::decode_at(buf, &mut offset)?;
        let vertresolution = FixedPointNumber::decode_at(buf, &mut offset)?;
        let _ = <[u8; 4]>::decode_at(buf, &mut offset)?;
        let frame_count = u16::decode_at(buf, &mut offset)?;
        let compressorname = <[u8; 32]>::decode_at(buf, &mut offset)?;
        let depth = u16::decode_at(buf, &mut offset)?;
        let _ = <[u8; 2]>::decode_at(buf, &mut offset)?;
        Ok((
            Self {
                data_reference_index,
                width,
                height,
                horizresolution,
                vertresolution,
                frame_count,
                compressorname,
                depth,
            },
            offset,
        ))
    }
}

/// 変換元として扱える映像用サンプルエントリー
///
/// `avc1` / `avc3` / `hvc1` / `hev1` / `vp09` / `av01` のいずれかで、
/// 対応するコーデック設定ボックスは存在する場合にのみ保持される
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VideoSampleEntry {
    pub box_type: BoxType,
    pub visual: VisualSampleEntryFields,
    pub avcc_box: Option<AvccBox>,
    pub hvcc_box: Option<HvccBox>,
    pub vpcc_box: Option<VpccBox>,
    pub av1c_box: Option<Av1cBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl VideoSampleEntry {
    /// [ISO/IEC 14496-15] AVCSampleEntry (パラメーターセットは帯域外)
    pub const AVC1: BoxType = BoxType::Normal(*b"avc1");

    /// [ISO/IEC 14496-15] AVCSampleEntry (パラメーターセットは帯域内でも可)
    pub const AVC3: BoxType = BoxType::Normal(*b"avc3");

    /// [ISO/IEC 14496-15] HEVCSampleEntry (パラメーターセットは帯域外)
    pub const HVC1: BoxType = BoxType::Normal(*b"hvc1");

    /// [ISO/IEC 14496-15] HEVCSampleEntry (パラメーターセットは帯域内でも可)
    pub const HEV1: BoxType = BoxType::Normal(*b"hev1");

    /// [VP Codec ISO Media File Format Binding] VP9SampleEntry
    pub const VP09: BoxType = BoxType::Normal(*b"vp09");

    /// [AV1 Codec ISO Media File Format Binding] AV1SampleEntry
    pub const AV01: BoxType = BoxType::Normal(*b"av01");

    /// 変換元として扱えるサンプルエントリーの種別一覧
    pub const SUPPORTED_TYPES: [BoxType; 6] = [
        Self::AVC1,
        Self::AVC3,
        Self::HVC1,
        Self::HEV1,
        Self::VP09,
        Self::AV01,
    ];

    /// WebCodecs 形式のコーデック文字列を返す
    ///
    /// コーデック設定ボックスが存在しない場合には四文字コードのみとなる
    /// （例: `avc3` でパラメーターセットが帯域内にしかない場合）
    pub fn codec_string(&self) -> String {
        let fourcc = self.box_type.to_string();
        if let Some(b) = &self.avcc_box {
            format!(
                "{fourcc}.{:02X}{:02X}{:02X}",
                b.avc_profile_indication, b.profile_compatibility, b.avc_level_indication
            )
        } else if let Some(b) = &self.hvcc_box {
            b.codec_string(&fourcc)
        } else if let Some(b) = &self.vpcc_box {
            format!(
                "{fourcc}.{:02}.{:02}.{:02}",
                b.profile,
                b.level,
                b.bit_depth.get()
            )
        } else if let Some(b) = &self.av1c_box {
            b.codec_string(&fourcc)
        } else {
            fourcc
        }
    }
}

impl Decode for VideoSampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        with_box_type(header.box_type, || {
            if !Self::SUPPORTED_TYPES.contains(&header.box_type) {
                return Err(Error::invalid_data(format!(
                    "Unsupported video sample entry: {}",
                    header.box_type
                )));
            }

            let mut offset = 0;
            let visual = VisualSampleEntryFields::decode_at(payload, &mut offset)?;
            let mut avcc_box = None;
            let mut hvcc_box = None;
            let mut vpcc_box = None;
            let mut av1c_box = None;
            let mut unknown_boxes = Vec::new();

            while offset < payload.len() {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    AvccBox::TYPE if avcc_box.is_none() => {
                        avcc_box = Some(AvccBox::decode_at(payload, &mut offset)?);
                    }
                    HvccBox::TYPE if hvcc_box.is_none() => {
                        hvcc_box = Some(HvccBox::decode_at(payload, &mut offset)?);
                    }
                    VpccBox::TYPE if vpcc_box.is_none() => {
                        vpcc_box = Some(VpccBox::decode_at(payload, &mut offset)?);
                    }
                    Av1cBox::TYPE if av1c_box.is_none() => {
                        av1c_box = Some(Av1cBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    box_type: header.box_type,
                    visual,
                    avcc_box,
                    hvcc_box,
                    vpcc_box,
                    av1c_box,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

fn decode_length_prefixed_unit(payload: &[u8], offset: &mut usize, name: &str) -> Result<Vec<u8>> {
    let size = u16::decode_at(payload, offset)? as usize;
    let unit = payload
        .get(*offset..*offset + size)
        .ok_or_else(|| Error::invalid_data(format!("{name} data exceeds payload boundary")))?;
    *offset += size;
    Ok(unit.to_vec())
}

/// [ISO/IEC 14496-15] AVCConfigurationBox class (親: [`VideoSampleEntry`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AvccBox {
    pub avc_profile_indication: u8,
    pub profile_compatibility: u8,
    pub avc_level_indication: u8,
    pub length_size_minus_one: Uint<u8, 2>,
    pub sps_list: Vec<Vec<u8>>,
    pub pps_list: Vec<Vec<u8>>,

    /// ボックスヘッダーを除いたペイロード全体 (AVCDecoderConfigurationRecord)
    pub record: Vec<u8>,
}

impl AvccBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"avcC");

    const CONFIGURATION_VERSION: u8 = 1;
}

impl Decode for AvccBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let configuration_version = u8::decode_at(payload, &mut offset)?;
            if configuration_version != Self::CONFIGURATION_VERSION {
                return Err(Error::invalid_data(format!(
                    "Unsupported avcC configuration version: {configuration_version}"
                )));
            }

            let avc_profile_indication = u8::decode_at(payload, &mut offset)?;
            let profile_compatibility = u8::decode_at(payload, &mut offset)?;
            let avc_level_indication = u8::decode_at(payload, &mut offset)?;
            let length_size_minus_one = Uint::from_bits(u8::decode_at(payload, &mut offset)?);

            let sps_count = Uint::<u8, 5>::from_bits(u8::decode_at(payload, &mut offset)?).get();
            let mut sps_list = Vec::new();
            for _ in 0..sps_count {
                sps_list.push(decode_length_prefixed_unit(payload, &mut offset, "SPS")?);
            }

            let pps_count = u8::decode_at(payload, &mut offset)?;
            let mut pps_list = Vec::new();
            for _ in 0..pps_count {
                pps_list.push(decode_length_prefixed_unit(payload, &mut offset, "PPS")?);
            }

            // [NOTE]
            // High 系プロファイルでは chroma_format などの拡張フィールドが続くが、
            // デコーダー設定の構築には不要なので読み飛ばしている
            Ok((
                Self {
                    avc_profile_indication,
                    profile_compatibility,
                    avc_level_indication,
                    length_size_minus_one,
                    sps_list,
                    pps_list,
                    record: payload.to_vec(),
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [`HvccBox`] 内の NAL ユニット配列
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct HvccNalUnitArray {
    pub array_completeness: Uint<u8, 1, 7>,
    pub nal_unit_type: Uint<u8, 6, 0>,
    pub nalus: Vec<Vec<u8>>,
}

/// [ISO/IEC 14496-15] HEVCConfigurationBox class (親: [`VideoSampleEntry`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct HvccBox {
    pub general_profile_space: Uint<u8, 2, 6>,
    pub general_tier_flag: Uint<u8, 1, 5>,
    pub general_profile_idc: Uint<u8, 5, 0>,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: Uint<u64, 48>,
    pub general_level_idc: u8,
    pub length_size_minus_one: Uint<u8, 2, 0>,
    pub nalu_arrays: Vec<HvccNalUnitArray>,

    /// ボックスヘッダーを除いたペイロード全体 (HEVCDecoderConfigurationRecord)
    pub record: Vec<u8>,
}

impl HvccBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"hvcC");

    const CONFIGURATION_VERSION: u8 = 1;

    /// 指定された種別の NAL ユニットを配列の出現順に走査するイテレーターを返す
    pub fn nalus_of_type(&self, nal_unit_type: u8) -> impl Iterator<Item = &[u8]> {
        self.nalu_arrays
            .iter()
            .filter(move |a| a.nal_unit_type.get() == nal_unit_type)
            .flat_map(|a| a.nalus.iter().map(|n| n.as_slice()))
    }

    /// `hvc1.1.6.L93.B0` 形式のコーデック文字列を返す
    fn codec_string(&self, fourcc: &str) -> String {
        hevc_codec_string(
            fourcc,
            self.general_profile_space.get(),
            self.general_tier_flag.get() == 1,
            self.general_profile_idc.get(),
            self.general_profile_compatibility_flags,
            self.general_constraint_indicator_flags.get(),
            self.general_level_idc,
        )
    }
}

/// profile_tier_level の各値から `hvc1.1.6.L93.B0` 形式のコーデック文字列を組み立てる
pub(crate) fn hevc_codec_string(
    fourcc: &str,
    profile_space: u8,
    high_tier: bool,
    profile_idc: u8,
    compatibility_flags: u32,
    constraint_flags: u64,
    level_idc: u8,
) -> String {
    let profile_space = match profile_space {
        1 => "A",
        2 => "B",
        3 => "C",
        _ => "",
    };
    let tier = if high_tier { 'H' } else { 'L' };

    let mut codec = format!(
        "{fourcc}.{profile_space}{profile_idc}.{:X}.{tier}{level_idc}",
        compatibility_flags.reverse_bits(),
    );

    // 制約フラグは 6 バイトを先頭から並べ、末尾のゼロバイトは省略する
    let constraint = constraint_flags.to_be_bytes();
    let constraint = &constraint[2..];
    let end = constraint
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |i| i + 1);
    for b in &constraint[..end] {
        codec.push_str(&format!(".{b:X}"));
    }
    codec
}

impl Decode for HvccBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let configuration_version = u8::decode_at(payload, &mut offset)?;
            if configuration_version != Self::CONFIGURATION_VERSION {
                return Err(Error::invalid_data(format!(
                    "Unsupported hvcC version: {configuration_version}"
                )));
            }

            let b = u8::decode_at(payload, &mut offset)?;
            let general_profile_space = Uint::from_bits(b);
            let general_tier_flag = Uint::from_bits(b);
            let general_profile_idc = Uint::from_bits(b);

            let general_profile_compatibility_flags = u32::decode_at(payload, &mut offset)?;

            let mut buf_constraint = [0; 8];
            buf_constraint[2..].copy_from_slice(&<[u8; 6]>::decode_at(payload, &mut offset)?);
            let general_constraint_indicator_flags =
                Uint::from_bits(u64::from_be_bytes(buf_constraint));

            let general_level_idc = u8::decode_at(payload, &mut offset)?;

            // min_spatial_segmentation_idc, parallelismType, chroma_format_idc,
            // bit_depth_luma_minus8, bit_depth_chroma_minus8, avgFrameRate
            let _ = <[u8; 2 + 1 + 1 + 1 + 1 + 2]>::decode_at(payload, &mut offset)?;

            let length_size_minus_one = Uint::from_bits(u8::decode_at(payload, &mut offset)?);

            let num_of_arrays = u8::decode_at(payload, &mut offset)?;
            let mut nalu_arrays = Vec::new();
            for _ in 0..num_of_arrays {
                let b = u8::decode_at(payload, &mut offset)?;
                let num_nalus = u16::decode_at(payload, &mut offset)?;
                let mut nalus = Vec::new();
                for _ in 0..num_nalus {
                    nalus.push(decode_length_prefixed_unit(payload, &mut offset, "NAL unit")?);
                }
                nalu_arrays.push(HvccNalUnitArray {
                    array_completeness: Uint::from_bits(b),
                    nal_unit_type: Uint::from_bits(b),
                    nalus,
                });
            }

            Ok((
                Self {
                    general_profile_space,
                    general_tier_flag,
                    general_profile_idc,
                    general_profile_compatibility_flags,
                    general_constraint_indicator_flags,
                    general_level_idc,
                    length_size_minus_one,
                    nalu_arrays,
                    record: payload.to_vec(),
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [VP Codec ISO Media File Format Binding] VPCodecConfigurationBox class (親: [`VideoSampleEntry`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VpccBox {
    pub profile: u8,
    pub level: u8,
    pub bit_depth: Uint<u8, 4, 4>,
    pub chroma_subsampling: Uint<u8, 3, 1>,
    pub video_full_range_flag: Uint<u8, 1>,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,

    /// ボックスヘッダーを除いたペイロード全体（フルボックスヘッダーを含む）
    pub record: Vec<u8>,
}

impl VpccBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"vpcC");
}

impl Decode for VpccBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            if full_header.version != 1 {
                return Err(Error::unsupported(format!(
                    "Unsupported vpcC version: {}",
                    full_header.version
                )));
            }

            let profile = u8::decode_at(payload, &mut offset)?;
            let level = u8::decode_at(payload, &mut offset)?;
            let b = u8::decode_at(payload, &mut offset)?;
            let colour_primaries = u8::decode_at(payload, &mut offset)?;
            let transfer_characteristics = u8::decode_at(payload, &mut offset)?;
            let matrix_coefficients = u8::decode_at(payload, &mut offset)?;
            let codec_initialization_data_size = u16::decode_at(payload, &mut offset)? as usize;
            if offset + codec_initialization_data_size > payload.len() {
                return Err(Error::invalid_data(
                    "Codec initialization data exceeds payload boundary",
                ));
            }

            Ok((
                Self {
                    profile,
                    level,
                    bit_depth: Uint::from_bits(b),
                    chroma_subsampling: Uint::from_bits(b),
                    video_full_range_flag: Uint::from_bits(b),
                    colour_primaries,
                    transfer_characteristics,
                    matrix_coefficients,
                    record: payload.to_vec(),
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [AV1 Codec ISO Media File Format Binding] AV1CodecConfigurationBox class (親: [`VideoSampleEntry`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Av1cBox {
    pub seq_profile: Uint<u8, 3, 5>,
    pub seq_level_idx_0: Uint<u8, 5, 0>,
    pub seq_tier_0: Uint<u8, 1, 7>,
    pub high_bitdepth: Uint<u8, 1, 6>,
    pub twelve_bit: Uint<u8, 1, 5>,
    pub monochrome: Uint<u8, 1, 4>,

    /// ボックスヘッダーを除いたペイロード全体（configOBUs を含む）
    pub record: Vec<u8>,
}

impl Av1cBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"av1C");

    const MARKER_AND_VERSION: u8 = 0b1000_0001;

    /// `av01.0.04M.08` 形式のコーデック文字列を返す
    fn codec_string(&self, fourcc: &str) -> String {
        let tier = if self.seq_tier_0.get() == 1 { 'H' } else { 'M' };
        let bit_depth = match (self.high_bitdepth.get(), self.twelve_bit.get()) {
            (1, 1) => 12,
            (1, _) => 10,
            _ => 8,
        };
        format!(
            "{fourcc}.{}.{:02}{tier}.{bit_depth:02}",
            self.seq_profile.get(),
            self.seq_level_idx_0.get()
        )
    }
}

impl Decode for Av1cBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let b = u8::decode_at(payload, &mut offset)?;
            if b != Self::MARKER_AND_VERSION {
                return Err(Error::invalid_data(format!(
                    "Unexpected av1C marker or version: {b:#04x}"
                )));
            }

            let b = u8::decode_at(payload, &mut offset)?;
            let seq_profile = Uint::from_bits(b);
            let seq_level_idx_0 = Uint::from_bits(b);

            let b = u8::decode_at(payload, &mut offset)?;
            let seq_tier_0 = Uint::from_bits(b);
            let high_bitdepth = Uint::from_bits(b);
            let twelve_bit = Uint::from_bits(b);
            let monochrome = Uint::from_bits(b);

            // initial_presentation_delay
            let _ = u8::decode_at(payload, &mut offset)?;

            Ok((
                Self {
                    seq_profile,
                    seq_level_idx_0,
                    seq_tier_0,
                    high_bitdepth,
                    twelve_bit,
                    monochrome,
                    record: payload.to_vec(),
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}
