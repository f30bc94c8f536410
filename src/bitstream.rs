//! H.264 / H.265 のビットストリームを扱うための補助関数群
//!
//! MP4 内のサンプルは NAL ユニットの前にビッグエンディアンの長さフィールドが付与された形式
//! （AVCC / HVCC 形式）で格納されているが、デコーダーによっては各 NAL ユニットの前に
//! スタートコードを置いた Annex B 形式を要求するため、その相互変換とパラメーターセットの探索を行う
use crate::{Error, Result};

/// Annex B 形式で NAL ユニットの前に置かれる 4 バイトのスタートコード
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// 複数のバイト列を連結した新しいバイト列を返す
pub fn concat<T: AsRef<[u8]>>(parts: &[T]) -> Vec<u8> {
    let size = parts.iter().map(|p| p.as_ref().len()).sum();
    let mut buf = Vec::with_capacity(size);
    for part in parts {
        buf.extend_from_slice(part.as_ref());
    }
    buf
}

/// NAL ユニットヘッダーの構文
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalUnitSyntax {
    /// H.264 (1 バイトヘッダー、種別は下位 5 ビット)
    Avc,

    /// H.265 (2 バイトヘッダー、種別は先頭バイトの 1..7 ビット目)
    Hevc,
}

impl NalUnitSyntax {
    /// H.264 の SPS
    pub const AVC_SPS: u8 = 7;

    /// H.264 の PPS
    pub const AVC_PPS: u8 = 8;

    /// H.265 の VPS
    pub const HEVC_VPS: u8 = 32;

    /// H.265 の SPS
    pub const HEVC_SPS: u8 = 33;

    /// H.265 の PPS
    pub const HEVC_PPS: u8 = 34;

    /// NAL ユニットの先頭バイトから種別を取り出す
    pub const fn nal_unit_type(self, header: u8) -> u8 {
        match self {
            Self::Avc => header & 0x1F,
            Self::Hevc => (header >> 1) & 0x3F,
        }
    }
}

/// 長さプレフィックス付きの NAL ユニット列を走査するイテレーター
///
/// 長さフィールドがデータ末尾を超える場合にはエラーを返し、以降は何も返さない
#[derive(Debug, Clone)]
pub struct LengthPrefixedNalUnits<'a> {
    data: &'a [u8],
    length_size: usize,
    offset: usize,
    failed: bool,
}

impl<'a> Iterator for LengthPrefixedNalUnits<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }

        let Some(length_field) = self.data.get(self.offset..self.offset + self.length_size) else {
            self.failed = true;
            return Some(Err(Error::invalid_data(format!(
                "Truncated NAL unit length field at offset {}",
                self.offset
            ))));
        };
        let size = length_field
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));

        let start = self.offset + self.length_size;
        let Some(unit) = start
            .checked_add(size)
            .and_then(|end| self.data.get(start..end))
        else {
            self.failed = true;
            return Some(Err(Error::invalid_data(format!(
                "NAL unit size {size} at offset {} exceeds sample size {}",
                self.offset,
                self.data.len()
            ))));
        };
        self.offset = start + size;
        Some(Ok(unit))
    }
}

/// 長さプレフィックス付きの NAL ユニット列を走査するイテレーターを返す
///
/// `length_size` は長さフィールドのバイト数で 1 から 4 の範囲である必要がある
pub fn length_prefixed_nal_units(data: &[u8], length_size: usize) -> Result<LengthPrefixedNalUnits<'_>> {
    if !(1..=4).contains(&length_size) {
        return Err(Error::invalid_input(format!(
            "Invalid NAL unit length size: {length_size}"
        )));
    }
    Ok(LengthPrefixedNalUnits {
        data,
        length_size,
        offset: 0,
        failed: false,
    })
}

/// 各 NAL ユニットの前に 4 バイトのスタートコードを付与して連結する
pub fn start_code_prefixed<I, T>(units: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut buf = Vec::new();
    for unit in units {
        buf.extend_from_slice(&START_CODE);
        buf.extend_from_slice(unit.as_ref());
    }
    buf
}

/// 長さプレフィックス付きのサンプルを Annex B 形式に変換する
///
/// 長さ 0 の NAL ユニットは出力から除かれる
pub fn length_prefixed_to_annexb(data: &[u8], length_size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(data.len() + data.len() / 8);
    for unit in length_prefixed_nal_units(data, length_size)? {
        let unit = unit?;
        if unit.is_empty() {
            continue;
        }
        buf.extend_from_slice(&START_CODE);
        buf.extend_from_slice(unit);
    }
    Ok(buf)
}

/// Annex B 形式のバイト列を NAL ユニット（スタートコードを含まない）に分割する
///
/// 3 バイト (`00 00 01`) と 4 バイト (`00 00 00 01`) のスタートコードの両方を扱う
pub fn annexb_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut i = 0;
    let mut unit_start = None;
    while i + 3 <= data.len() {
        let sc_len = if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            3
        } else if i + 4 <= data.len()
            && data[i] == 0
            && data[i + 1] == 0
            && data[i + 2] == 0
            && data[i + 3] == 1
        {
            4
        } else {
            i += 1;
            continue;
        };

        if let Some(start) = unit_start
            && start < i
        {
            units.push(&data[start..i]);
        }
        i += sc_len;
        unit_start = Some(i);
    }
    if let Some(start) = unit_start
        && start < data.len()
    {
        units.push(&data[start..]);
    }
    units
}

/// NAL ユニットからエミュレーション防止バイト (`00 00 03` の `03`) を取り除いた RBSP を返す
pub fn to_rbsp(unit: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(unit.len());
    let mut zeros = 0;
    for &b in unit {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        rbsp.push(b);
    }
    rbsp
}

/// サンプル内から見つかったパラメーターセット
///
/// 種別ごとに最初に見つかったものだけを保持する
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    /// VPS (H.265 のみ)
    pub vps: Option<Vec<u8>>,

    /// SPS
    pub sps: Option<Vec<u8>>,

    /// PPS
    pub pps: Option<Vec<u8>>,
}

impl ParameterSets {
    /// 長さプレフィックス付きのサンプルを走査して、まだ見つかっていないパラメーターセットを埋める
    ///
    /// 壊れた NAL ユニットに到達した時点で、そのサンプルの走査を打ち切る
    pub fn scan(&mut self, sample: &[u8], length_size: usize, syntax: NalUnitSyntax) -> Result<()> {
        for unit in length_prefixed_nal_units(sample, length_size)? {
            let Ok(unit) = unit else {
                break;
            };
            let Some(&header) = unit.first() else {
                continue;
            };

            let slot = match (syntax, syntax.nal_unit_type(header)) {
                (NalUnitSyntax::Avc, NalUnitSyntax::AVC_SPS) => &mut self.sps,
                (NalUnitSyntax::Avc, NalUnitSyntax::AVC_PPS) => &mut self.pps,
                (NalUnitSyntax::Hevc, NalUnitSyntax::HEVC_VPS) => &mut self.vps,
                (NalUnitSyntax::Hevc, NalUnitSyntax::HEVC_SPS) => &mut self.sps,
                (NalUnitSyntax::Hevc, NalUnitSyntax::HEVC_PPS) => &mut self.pps,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(unit.to_vec());
            }
        }
        Ok(())
    }

    /// デコーダーの初期化に必要なパラメーターセットが揃っているかどうか
    pub fn is_complete(&self, syntax: NalUnitSyntax) -> bool {
        let vps_ok = syntax == NalUnitSyntax::Avc || self.vps.is_some();
        vps_ok && self.sps.is_some() && self.pps.is_some()
    }

    /// VPS / SPS / PPS の順にスタートコードを付与して連結したバイト列を返す
    pub fn to_annexb(&self) -> Vec<u8> {
        start_code_prefixed(
            [&self.vps, &self.sps, &self.pps]
                .into_iter()
                .filter_map(|ps| ps.as_deref()),
        )
    }
}
