//! moov とその下に配置されるボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use std::num::NonZeroU32;

use crate::{
    BoxHeader, BoxType, Decode, Either, Error, FixedPointNumber, FullBoxHeader, Result,
    basic_types::with_box_type,
    boxes::{SampleEntry, UnknownBox, check_mandatory_box},
};

/// [ISO/IEC 14496-12] MovieBox class
///
/// `mvhd` などトラックの取り出しに不要な子ボックスは [`UnknownBox`] として扱われる
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MoovBox {
    pub trak_boxes: Vec<TrakBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MoovBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"moov");
}

impl Decode for MoovBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut trak_boxes = Vec::new();
            let mut unknown_boxes = Vec::new();

            while offset < payload.len() {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    TrakBox::TYPE => {
                        trak_boxes.push(TrakBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    trak_boxes,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-12] TrackBox class (親: [`MoovBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrakBox {
    pub tkhd_box: TkhdBox,
    pub mdia_box: MdiaBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl TrakBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"trak");
}

impl Decode for TrakBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut tkhd_box = None;
            let mut mdia_box = None;
            let mut unknown_boxes = Vec::new();

            while offset < payload.len() {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    TkhdBox::TYPE if tkhd_box.is_none() => {
                        tkhd_box = Some(TkhdBox::decode_at(payload, &mut offset)?);
                    }
                    MdiaBox::TYPE if mdia_box.is_none() => {
                        mdia_box = Some(MdiaBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    tkhd_box: check_mandatory_box(tkhd_box, "tkhd", "trak")?,
                    mdia_box: check_mandatory_box(mdia_box, "mdia", "trak")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-12] TrackHeaderBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TkhdBox {
    pub flag_track_enabled: bool,
    pub track_id: u32,
    pub duration: u64,
    pub width: FixedPointNumber<i16, u16>,
    pub height: FixedPointNumber<i16, u16>,
}

impl TkhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tkhd");
}

impl Decode for TkhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;

            let (track_id, duration) = match full_header.version {
                0 => {
                    // creation_time / modification_time
                    let _ = <[u8; 4 * 2]>::decode_at(payload, &mut offset)?;
                    let track_id = u32::decode_at(payload, &mut offset)?;
                    let _ = <[u8; 4]>::decode_at(payload, &mut offset)?;
                    let duration = u32::decode_at(payload, &mut offset)?;
                    (track_id, u64::from(duration))
                }
                1 => {
                    let _ = <[u8; 8 * 2]>::decode_at(payload, &mut offset)?;
                    let track_id = u32::decode_at(payload, &mut offset)?;
                    let _ = <[u8; 4]>::decode_at(payload, &mut offset)?;
                    let duration = u64::decode_at(payload, &mut offset)?;
                    (track_id, duration)
                }
                v => {
                    return Err(Error::unsupported(format!(
                        "Unsupported 'tkhd' box version: {v}"
                    )));
                }
            };

            // reserved, layer, alternate_group, volume, reserved, matrix
            let _ = <[u8; 4 * 2 + 2 * 4 + 4 * 9]>::decode_at(payload, &mut offset)?;
            let width = FixedPointNumber::decode_at(payload, &mut offset)?;
            let height = FixedPointNumber::decode_at(payload, &mut offset)?;

            Ok((
                Self {
                    flag_track_enabled: full_header.flags.is_set(0),
                    track_id,
                    duration,
                    width,
                    height,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-12] MediaBox class (親: [`TrakBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdiaBox {
    pub mdhd_box: MdhdBox,
    pub hdlr_box: HdlrBox,
    pub minf_box: MinfBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MdiaBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdia");
}

impl Decode for MdiaBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut mdhd_box = None;
            let mut hdlr_box = None;
            let mut minf_box = None;
            let mut unknown_boxes = Vec::new();

            while offset < payload.len() {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    MdhdBox::TYPE if mdhd_box.is_none() => {
                        mdhd_box = Some(MdhdBox::decode_at(payload, &mut offset)?);
                    }
                    HdlrBox::TYPE if hdlr_box.is_none() => {
                        hdlr_box = Some(HdlrBox::decode_at(payload, &mut offset)?);
                    }
                    MinfBox::TYPE if minf_box.is_none() => {
                        minf_box = Some(MinfBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    mdhd_box: check_mandatory_box(mdhd_box, "mdhd", "mdia")?,
                    hdlr_box: check_mandatory_box(hdlr_box, "hdlr", "mdia")?,
                    minf_box: check_mandatory_box(minf_box, "minf", "mdia")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-12] MediaHeaderBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdhdBox {
    pub timescale: NonZeroU32,
    pub duration: u64,
}

impl MdhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdhd");
}

impl Decode for MdhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;

            let (timescale, duration) = match full_header.version {
                0 => {
                    let _ = <[u8; 4 * 2]>::decode_at(payload, &mut offset)?;
                    let timescale = NonZeroU32::decode_at(payload, &mut offset)
                        .map_err(|_| Error::invalid_data("Timescale must be non-zero"))?;
                    let duration = u32::decode_at(payload, &mut offset)?;
                    (timescale, u64::from(duration))
                }
                1 => {
                    let _ = <[u8; 8 * 2]>::decode_at(payload, &mut offset)?;
                    let timescale = NonZeroU32::decode_at(payload, &mut offset)
                        .map_err(|_| Error::invalid_data("Timescale must be non-zero"))?;
                    let duration = u64::decode_at(payload, &mut offset)?;
                    (timescale, duration)
                }
                v => {
                    return Err(Error::unsupported(format!(
                        "Unsupported 'mdhd' box version: {v}"
                    )));
                }
            };

            Ok((
                Self {
                    timescale,
                    duration,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-12] HandlerBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct HdlrBox {
    pub handler_type: [u8; 4],
}

impl HdlrBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"hdlr");

    /// 映像トラックを表すハンドラー種別
    pub const HANDLER_TYPE_VIDE: [u8; 4] = *b"vide";

    /// 音声トラックを表すハンドラー種別
    pub const HANDLER_TYPE_SOUN: [u8; 4] = *b"soun";
}

impl Decode for HdlrBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let _pre_defined = u32::decode_at(payload, &mut offset)?;
            let handler_type = <[u8; 4]>::decode_at(payload, &mut offset)?;

            // 後続の reserved と name は使わないので読み飛ばす
            Ok((Self { handler_type }, header.external_size() + payload.len()))
        })
    }
}

/// [ISO/IEC 14496-12] MediaInformationBox class (親: [`MdiaBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MinfBox {
    pub stbl_box: StblBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MinfBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"minf");
}

impl Decode for MinfBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut stbl_box = None;
            let mut unknown_boxes = Vec::new();

            while offset < payload.len() {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    StblBox::TYPE if stbl_box.is_none() => {
                        stbl_box = Some(StblBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    stbl_box: check_mandatory_box(stbl_box, "stbl", "minf")?,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-12] SampleTableBox class (親: [`MinfBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StblBox {
    pub stsd_box: StsdBox,
    pub stts_box: SttsBox,
    pub ctts_box: Option<CttsBox>,
    pub stsc_box: StscBox,
    pub stsz_box: StszBox,
    pub stco_or_co64_box: Either<StcoBox, Co64Box>,
    pub stss_box: Option<StssBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl StblBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stbl");
}

impl Decode for StblBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut stsd_box = None;
            let mut stts_box = None;
            let mut ctts_box = None;
            let mut stsc_box = None;
            let mut stsz_box = None;
            let mut stco_box = None;
            let mut co64_box = None;
            let mut stss_box = None;
            let mut unknown_boxes = Vec::new();

            while offset < payload.len() {
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    StsdBox::TYPE if stsd_box.is_none() => {
                        stsd_box = Some(StsdBox::decode_at(payload, &mut offset)?);
                    }
                    SttsBox::TYPE if stts_box.is_none() => {
                        stts_box = Some(SttsBox::decode_at(payload, &mut offset)?);
                    }
                    CttsBox::TYPE if ctts_box.is_none() => {
                        ctts_box = Some(CttsBox::decode_at(payload, &mut offset)?);
                    }
                    StscBox::TYPE if stsc_box.is_none() => {
                        stsc_box = Some(StscBox::decode_at(payload, &mut offset)?);
                    }
                    StszBox::TYPE if stsz_box.is_none() => {
                        stsz_box = Some(StszBox::decode_at(payload, &mut offset)?);
                    }
                    StcoBox::TYPE if stco_box.is_none() => {
                        stco_box = Some(StcoBox::decode_at(payload, &mut offset)?);
                    }
                    Co64Box::TYPE if co64_box.is_none() => {
                        co64_box = Some(Co64Box::decode_at(payload, &mut offset)?);
                    }
                    StssBox::TYPE if stss_box.is_none() => {
                        stss_box = Some(StssBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    stsd_box: check_mandatory_box(stsd_box, "stsd", "stbl")?,
                    stts_box: check_mandatory_box(stts_box, "stts", "stbl")?,
                    ctts_box,
                    stsc_box: check_mandatory_box(stsc_box, "stsc", "stbl")?,
                    stsz_box: check_mandatory_box(stsz_box, "stsz", "stbl")?,
                    stco_or_co64_box: check_mandatory_box(
                        stco_box.map(Either::A).or(co64_box.map(Either::B)),
                        "stco' or 'co64",
                        "stbl",
                    )?,
                    stss_box,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// [ISO/IEC 14496-12] SampleDescriptionBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StsdBox {
    pub entries: Vec<SampleEntry>,
}

impl StsdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsd");
}

impl Decode for StsdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let entry_count = u32::decode_at(payload, &mut offset)?;
            let mut entries = Vec::new();
            for _ in 0..entry_count {
                entries.push(SampleEntry::decode_at(payload, &mut offset)?);
            }

            Ok((Self { entries }, header.external_size() + payload.len()))
        })
    }
}

/// [`SttsBox`] が保持するエントリー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// [ISO/IEC 14496-12] TimeToSampleBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct SttsBox {
    pub entries: Vec<SttsEntry>,
}

impl SttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stts");
}

impl Decode for SttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut entries = Vec::new();
            for _ in 0..count {
                entries.push(SttsEntry {
                    sample_count: u32::decode_at(payload, &mut offset)?,
                    sample_delta: u32::decode_at(payload, &mut offset)?,
                });
            }

            Ok((Self { entries }, header.external_size() + payload.len()))
        })
    }
}

/// [`CttsBox`] が保持するエントリー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CttsEntry {
    pub sample_count: u32,
    pub sample_offset: i64,
}

/// [ISO/IEC 14496-12] CompositionOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CttsBox {
    pub entries: Vec<CttsEntry>,
}

impl CttsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ctts");
}

impl Decode for CttsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut entries = Vec::new();
            for _ in 0..count {
                let sample_count = u32::decode_at(payload, &mut offset)?;

                // [NOTE] バージョン 0 では符号なし、バージョン 1 では符号付きのオフセットとなる
                let sample_offset = if full_header.version == 0 {
                    i64::from(u32::decode_at(payload, &mut offset)?)
                } else {
                    i64::from(i32::decode_at(payload, &mut offset)?)
                };
                entries.push(CttsEntry {
                    sample_count,
                    sample_offset,
                });
            }

            Ok((Self { entries }, header.external_size() + payload.len()))
        })
    }
}

/// [`StscBox`] が保持するエントリー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscEntry {
    pub first_chunk: NonZeroU32,
    pub samples_per_chunk: u32,
    pub sample_description_index: NonZeroU32,
}

/// [ISO/IEC 14496-12] SampleToChunkBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StscBox {
    pub entries: Vec<StscEntry>,
}

impl StscBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsc");
}

impl Decode for StscBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut entries = Vec::new();
            for _ in 0..count {
                entries.push(StscEntry {
                    first_chunk: NonZeroU32::decode_at(payload, &mut offset)?,
                    samples_per_chunk: u32::decode_at(payload, &mut offset)?,
                    sample_description_index: NonZeroU32::decode_at(payload, &mut offset)?,
                });
            }

            Ok((Self { entries }, header.external_size() + payload.len()))
        })
    }
}

/// [ISO/IEC 14496-12] SampleSizeBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StszBox {
    Fixed {
        sample_size: NonZeroU32,
        sample_count: u32,
    },
    Variable {
        entry_sizes: Vec<u32>,
    },
}

impl StszBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stsz");

    /// トラック内のサンプル数を返す
    pub fn sample_count(&self) -> u32 {
        match self {
            Self::Fixed { sample_count, .. } => *sample_count,
            Self::Variable { entry_sizes } => entry_sizes.len() as u32,
        }
    }
}

impl Decode for StszBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let sample_size = u32::decode_at(payload, &mut offset)?;
            let sample_count = u32::decode_at(payload, &mut offset)?;

            let stsz_box = if let Some(sample_size) = NonZeroU32::new(sample_size) {
                Self::Fixed {
                    sample_size,
                    sample_count,
                }
            } else {
                let mut entry_sizes = Vec::new();
                for _ in 0..sample_count {
                    entry_sizes.push(u32::decode_at(payload, &mut offset)?);
                }
                Self::Variable { entry_sizes }
            };

            Ok((stsz_box, header.external_size() + payload.len()))
        })
    }
}

/// [ISO/IEC 14496-12] ChunkOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StcoBox {
    pub chunk_offsets: Vec<u32>,
}

impl StcoBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stco");
}

impl Decode for StcoBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut chunk_offsets = Vec::new();
            for _ in 0..count {
                chunk_offsets.push(u32::decode_at(payload, &mut offset)?);
            }

            Ok((Self { chunk_offsets }, header.external_size() + payload.len()))
        })
    }
}

/// [ISO/IEC 14496-12] ChunkLargeOffsetBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct Co64Box {
    pub chunk_offsets: Vec<u64>,
}

impl Co64Box {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"co64");
}

impl Decode for Co64Box {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut chunk_offsets = Vec::new();
            for _ in 0..count {
                chunk_offsets.push(u64::decode_at(payload, &mut offset)?);
            }

            Ok((Self { chunk_offsets }, header.external_size() + payload.len()))
        })
    }
}

/// [ISO/IEC 14496-12] SyncSampleBox class (親: [`StblBox`])
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StssBox {
    pub sample_numbers: Vec<NonZeroU32>,
}

impl StssBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"stss");
}

impl Decode for StssBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let count = u32::decode_at(payload, &mut offset)?;
            let mut sample_numbers = Vec::new();
            for _ in 0..count {
                sample_numbers.push(NonZeroU32::decode_at(payload, &mut offset)?);
            }

            Ok((Self { sample_numbers }, header.external_size() + payload.len()))
        })
    }
}
