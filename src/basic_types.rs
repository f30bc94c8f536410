use std::ops::{BitAnd, Shl, Shr, Sub};

use crate::{
    Decode, Error, Result,
    boxes::{FtypBox, RootBox},
};

/// MP4 ファイルを表す構造体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4File<B = RootBox> {
    /// MP4 ファイルの先頭に位置する `ftyp` ボックス
    pub ftyp_box: FtypBox,

    /// `ftyp` に続くボックス群
    pub boxes: Vec<B>,
}

impl<B: Decode> Decode for Mp4File<B> {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let ftyp_box = FtypBox::decode_at(buf, &mut offset)?;

        let mut boxes = Vec::new();
        while offset < buf.len() {
            boxes.push(B::decode_at(buf, &mut offset)?);
        }
        Ok((Self { ftyp_box, boxes }, offset))
    }
}

/// ボックスに共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxHeader {
    /// ボックスの種別
    pub box_type: BoxType,

    /// ボックスのサイズ
    pub box_size: BoxSize,
}

impl BoxHeader {
    /// ヘッダーをエンコードした際のバイト数を返す
    pub fn external_size(self) -> usize {
        self.box_type.external_size() + self.box_size.external_size()
    }

    /// ボックスのヘッダーと、それに続くペイロード部分のバイト列をデコードする
    ///
    /// サイズが 0 のボックスは、バッファの末尾までをペイロードとして扱う。
    /// ヘッダーが示すサイズがバッファに収まらない場合にはエラーとなる。
    pub fn decode_header_and_payload(buf: &[u8]) -> Result<(Self, &[u8])> {
        let (header, header_size) = Self::decode(buf)?;
        let payload = if header.box_size.get() == 0 {
            &buf[header_size..]
        } else {
            let box_size = usize::try_from(header.box_size.get()).map_err(|_| {
                Error::invalid_data("Box size exceeds the addressable range")
                    .with_box_type(header.box_type)
            })?;
            if buf.len() < box_size {
                return Err(Error::invalid_data(format!(
                    "Box size exceeds the remaining data: box_size={box_size}, available={}",
                    buf.len()
                ))
                .with_box_type(header.box_type));
            }
            &buf[header_size..box_size]
        };
        Ok((header, payload))
    }
}

impl Decode for BoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let box_size = u32::decode_at(buf, &mut offset)?;
        let box_type = <[u8; 4]>::decode_at(buf, &mut offset)?;

        // [NOTE] largesize は usertype よりも前に配置される
        let box_size = if box_size == 1 {
            BoxSize::U64(u64::decode_at(buf, &mut offset)?)
        } else {
            BoxSize::U32(box_size)
        };

        let box_type = if box_type == *b"uuid" {
            BoxType::Uuid(<[u8; 16]>::decode_at(buf, &mut offset)?)
        } else {
            BoxType::Normal(box_type)
        };

        if box_size.get() != 0 && box_size.get() < offset as u64 {
            return Err(Error::invalid_data(format!(
                "Too small box size: actual={}, expected={offset} or more",
                box_size.get(),
            ))
            .with_box_type(box_type));
        };

        Ok((Self { box_type, box_size }, offset))
    }
}

/// フルボックスに共通のヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxHeader {
    /// バージョン
    pub version: u8,

    /// フラグ
    pub flags: FullBoxFlags,
}

impl Decode for FullBoxHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let version = u8::decode_at(buf, &mut offset)?;
        let flags = FullBoxFlags::decode_at(buf, &mut offset)?;
        Ok((Self { version, flags }, offset))
    }
}

/// フルボックスのヘッダー部分に含まれるビットフラグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullBoxFlags(u32);

impl FullBoxFlags {
    /// [`u32`] を受け取って、対応するビットフラグを作成する
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// このビットフラグに対応する [`u32`] 値を返す
    pub const fn get(self) -> u32 {
        self.0
    }

    /// 指定されたビット位置のフラグがセットされているかどうかを判定する
    pub const fn is_set(self, i: usize) -> bool {
        (self.0 & (1 << i)) != 0
    }
}

impl Decode for FullBoxFlags {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(3, buf)?;
        Ok((Self(u32::from_be_bytes([0, buf[0], buf[1], buf[2]])), 3))
    }
}

/// ボックスのサイズ
///
/// ボックスのサイズは原則として、ヘッダー部分とペイロード部分のサイズを足した値となる。
/// ただし、MP4 ファイルの末尾にあるボックスについてはサイズを 0 とすることで、ペイロードが可変長（追記可能）なボックスとして扱うことが可能となっている。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum BoxSize {
    U32(u32),
    U64(u64),
}

impl BoxSize {
    /// ファイル末尾に位置する可変長のボックスを表すための特別な値
    pub const VARIABLE_SIZE: Self = Self::U32(0);

    /// ボックスのサイズの値を取得する
    pub const fn get(self) -> u64 {
        match self {
            BoxSize::U32(v) => v as u64,
            BoxSize::U64(v) => v,
        }
    }

    /// [`BoxHeader`] 内のサイズフィールドのバイト数を返す
    pub const fn external_size(self) -> usize {
        match self {
            BoxSize::U32(_) => 4,
            BoxSize::U64(_) => 4 + 8,
        }
    }
}

/// ボックスの種別
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoxType {
    /// 四文字で表現される通常のボックス種別
    Normal([u8; 4]),

    /// UUID 形式のボックス種別
    Uuid([u8; 16]),
}

impl BoxType {
    /// 種別を表すバイト列を返す
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BoxType::Normal(ty) => &ty[..],
            BoxType::Uuid(ty) => &ty[..],
        }
    }

    /// [`BoxHeader`] 内のボックス種別フィールドのバイト数を返す
    pub const fn external_size(self) -> usize {
        if matches!(self, Self::Normal(_)) {
            4
        } else {
            4 + 16
        }
    }

    /// 自分が `expected` と同じ種別であるかをチェックする
    pub fn expect(self, expected: Self) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::invalid_data(format!(
                "Expected box type `{expected}`, but got `{self}`"
            )))
        }
    }
}

impl std::fmt::Debug for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoxType::Normal(ty) => {
                if let Ok(ty) = std::str::from_utf8(ty) {
                    f.debug_tuple("BoxType").field(&ty).finish()
                } else {
                    f.debug_tuple("BoxType").field(ty).finish()
                }
            }
            BoxType::Uuid(ty) => f.debug_tuple("BoxType").field(ty).finish(),
        }
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let BoxType::Normal(ty) = self
            && let Ok(ty) = std::str::from_utf8(&ty[..])
        {
            return write!(f, "{ty}");
        }
        write!(f, "{:?}", self.as_bytes())
    }
}

/// 固定小数点数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixedPointNumber<I, F = I> {
    /// 整数部
    pub integer: I,

    /// 小数部
    pub fraction: F,
}

impl<I: Decode, F: Decode> Decode for FixedPointNumber<I, F> {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let integer = I::decode_at(buf, &mut offset)?;
        let fraction = F::decode_at(buf, &mut offset)?;
        Ok((Self { integer, fraction }, offset))
    }
}

/// `A` か `B` のどちらかの値を保持する列挙型
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Either<A, B> {
    A(A),
    B(B),
}

/// 任意のビット数の非負の整数を表現するための型
///
/// - `T`: 数値の内部的な型。 最低限 `BITS` 分の数値を表現可能な型である必要がある。
/// - `BITS`: 数値のビット数
/// - `OFFSET`: 一つの `T` に複数の [`Uint`] 値がパックされる場合の、この数値のオフセット位置（ビット数）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uint<T, const BITS: u32, const OFFSET: u32 = 0>(T);

impl<T, const BITS: u32, const OFFSET: u32> Uint<T, BITS, OFFSET>
where
    T: Shr<u32, Output = T>
        + Shl<u32, Output = T>
        + BitAnd<Output = T>
        + Sub<Output = T>
        + From<u8>,
{
    /// 指定された数値を受け取ってインスタンスを作成する
    pub const fn new(v: T) -> Self {
        Self(v)
    }

    /// このインスタンスが表現する整数値を返す
    pub fn get(self) -> T {
        self.0
    }

    /// `T` が保持するビット列の `OFFSET` 位置から `BITS` 分のビット列に対応する整数値を返す
    pub fn from_bits(v: T) -> Self {
        Self((v >> OFFSET) & ((T::from(1) << BITS) - T::from(1)))
    }
}

/// ボックスのデコード処理を実行し、失敗した場合にはエラーにボックス種別を付与する
pub(crate) fn with_box_type<T, F>(box_type: BoxType, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    f().map_err(|e| e.with_box_type(box_type))
}
