//! MP4 ファイルから映像トラックを取り出すために必要なボックス群を定義するモジュール
//!
//! 全てのボックスはデコード専用で、未対応のボックスは [`UnknownBox`] としてスキップされる
use crate::{BoxHeader, BoxSize, BoxType, Decode, Error, Result, basic_types::with_box_type};

pub use crate::boxes_moov_tree::{
    Co64Box, CttsBox, CttsEntry, HdlrBox, MdhdBox, MdiaBox, MinfBox, MoovBox, StblBox, StcoBox,
    StscBox, StscEntry, StsdBox, StssBox, StszBox, SttsBox, SttsEntry, TkhdBox, TrakBox,
};
pub use crate::boxes_sample_entry::{
    Av1cBox, AvccBox, HvccBox, HvccNalUnitArray, SampleEntry, VideoSampleEntry,
    VisualSampleEntryFields, VpccBox,
};

/// ボックスのデコード処理で必須の子ボックスが存在するかどうかをチェックする
pub(crate) fn check_mandatory_box<T>(maybe_box: Option<T>, expected: &str, parent: &str) -> Result<T> {
    maybe_box.ok_or_else(|| {
        Error::invalid_data(format!(
            "Missing mandatory '{expected}' box in '{parent}' box"
        ))
    })
}

/// [`FtypBox`] で使用されるブランド定義
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Brand([u8; 4]);

impl Brand {
    /// [ISO/IEC 14496-12] `isom` ブランド
    pub const ISOM: Self = Self::new(*b"isom");

    /// [ISO/IEC 14496-12] `mp41` ブランド
    pub const MP41: Self = Self::new(*b"mp41");

    /// 指定されたバイト列に対応するブランドを返す
    pub const fn new(brand: [u8; 4]) -> Self {
        Self(brand)
    }

    /// このブランドを表すバイト列を返す
    pub const fn get(self) -> [u8; 4] {
        self.0
    }
}

impl std::fmt::Debug for Brand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Ok(s) = std::str::from_utf8(&self.0) {
            f.debug_tuple("Brand").field(&s).finish()
        } else {
            f.debug_tuple("Brand").field(&self.0).finish()
        }
    }
}

impl Decode for Brand {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (brand, size) = <[u8; 4]>::decode(buf)?;
        Ok((Self(brand), size))
    }
}

/// [ISO/IEC 14496-12] FileTypeBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl FtypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ftyp");
}

impl Decode for FtypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let major_brand = Brand::decode_at(payload, &mut offset)?;
            let minor_version = u32::decode_at(payload, &mut offset)?;
            let mut compatible_brands = Vec::new();
            while offset + 4 <= payload.len() {
                compatible_brands.push(Brand::decode_at(payload, &mut offset)?);
            }

            Ok((
                Self {
                    major_brand,
                    minor_version,
                    compatible_brands,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

/// このライブラリが扱わないボックス
///
/// ペイロードはコピーせずにスキップし、種別とサイズのみを保持する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownBox {
    /// ボックス種別
    pub box_type: BoxType,

    /// ボックスサイズ
    pub box_size: BoxSize,

    /// ペイロードのバイト数
    pub payload_size: usize,
}

impl Decode for UnknownBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        Ok((
            Self {
                box_type: header.box_type,
                box_size: header.box_size,
                payload_size: payload.len(),
            },
            header.external_size() + payload.len(),
        ))
    }
}

/// MP4 ファイルのトップレベルに配置されるボックス
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum RootBox {
    Moov(MoovBox),
    Unknown(UnknownBox),
}

impl Decode for RootBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        match header.box_type {
            MoovBox::TYPE => MoovBox::decode(buf).map(|(b, n)| (Self::Moov(b), n)),
            _ => UnknownBox::decode(buf).map(|(b, n)| (Self::Unknown(b), n)),
        }
    }
}
