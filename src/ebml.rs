//! EBML (WebM / Matroska の基盤となるバイナリ形式) の要素を読み書きするための関数群
//!
//! 書き込みは全てメモリ上のバッファに対して行うため失敗しない
use crate::{Error, Result};

/// サイズフィールドの最大バイト数
pub const MAX_VINT_SIZE: usize = 8;

/// 要素 ID を書き込む
///
/// 要素 ID はマーカービットを含んだ形で定義されているので、先頭のゼロバイトを除いてそのまま書き込む
pub fn write_element_id(buf: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    buf.extend_from_slice(&bytes[start..]);
}

/// 値を可変長整数として表現するのに必要な最小のバイト数を返す
///
/// 全ビットが 1 のパターンは「サイズ不明」を表す予約値なので使わない
pub fn vint_size(value: u64) -> usize {
    (1..MAX_VINT_SIZE)
        .find(|n| value < (1u64 << (7 * n)) - 1)
        .unwrap_or(MAX_VINT_SIZE)
}

/// 可変長整数を最小のバイト数で書き込む
pub fn write_vint(buf: &mut Vec<u8>, value: u64) {
    let size = vint_size(value);
    let marker = 1u64 << (7 * size);
    let bytes = (value | marker).to_be_bytes();
    buf.extend_from_slice(&bytes[MAX_VINT_SIZE - size..]);
}

/// 子要素を含む要素 (マスター要素) を書き込む
pub fn write_master_element(buf: &mut Vec<u8>, id: u32, content: &[u8]) {
    write_binary_element(buf, id, content);
}

/// バイナリ要素を書き込む
pub fn write_binary_element(buf: &mut Vec<u8>, id: u32, data: &[u8]) {
    write_element_id(buf, id);
    write_vint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// 符号なし整数要素を最小のバイト数で書き込む
pub fn write_uint_element(buf: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    write_binary_element(buf, id, &bytes[start..]);
}

/// 符号なし整数要素を常に 8 バイトで書き込む
///
/// 後から値を確定させる要素 (SeekPosition など) のサイズを固定したい場合に使う
pub fn write_uint_element_fixed(buf: &mut Vec<u8>, id: u32, value: u64) {
    write_binary_element(buf, id, &value.to_be_bytes());
}

/// 浮動小数点数要素を 8 バイトで書き込む
pub fn write_float_element(buf: &mut Vec<u8>, id: u32, value: f64) {
    write_binary_element(buf, id, &value.to_be_bytes());
}

/// 文字列要素を書き込む
pub fn write_string_element(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_binary_element(buf, id, value.as_bytes());
}

/// 要素のヘッダー部分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHeader {
    /// 要素 ID (マーカービットを含む)
    pub id: u32,

    /// データ部分のバイト数
    pub data_size: u64,

    /// ヘッダー部分のバイト数
    pub header_size: usize,
}

impl ElementHeader {
    /// バッファの先頭から要素のヘッダーを読み込む
    ///
    /// サイズ不明の要素は扱わない
    pub fn read(buf: &[u8]) -> Result<Self> {
        let (id, id_size) = read_vint_raw(buf, 4)?;
        let (size, size_size) = read_vint_raw(&buf[id_size..], MAX_VINT_SIZE)?;
        let data_size = size & ((1u64 << (7 * size_size)) - 1);
        if data_size == (1u64 << (7 * size_size)) - 1 {
            return Err(Error::unsupported("Unknown-sized EBML elements are not supported"));
        }
        Ok(Self {
            id: id as u32,
            data_size,
            header_size: id_size + size_size,
        })
    }

    /// バッファの先頭から要素を読み込んで、ヘッダーとデータ部分を返す
    pub fn read_element(buf: &[u8]) -> Result<(Self, &[u8])> {
        let header = Self::read(buf)?;
        let end = usize::try_from(header.data_size)
            .ok()
            .and_then(|n| header.header_size.checked_add(n))
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                Error::invalid_data(format!(
                    "EBML element exceeds the buffer: id=0x{:X}, size={}",
                    header.id, header.data_size
                ))
            })?;
        Ok((header, &buf[header.header_size..end]))
    }
}

/// マーカービットを残したまま可変長整数を読み込む
fn read_vint_raw(buf: &[u8], max_size: usize) -> Result<(u64, usize)> {
    let first = *buf.first().ok_or_else(Error::insufficient_buffer)?;
    let size = first.leading_zeros() as usize + 1;
    if size > max_size {
        return Err(Error::invalid_data(format!(
            "Invalid EBML variable-length integer: first byte=0x{first:02X}"
        )));
    }
    let bytes = buf.get(..size).ok_or_else(Error::insufficient_buffer)?;
    let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Ok((value, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vint_uses_minimum_size() {
        let mut buf = Vec::new();
        write_vint(&mut buf, 1);
        assert_eq!(buf, [0x81]);

        buf.clear();
        write_vint(&mut buf, 127);
        assert_eq!(buf, [0x40, 0x7F]);

        buf.clear();
        write_vint(&mut buf, 0x3FFF);
        assert_eq!(buf, [0x20, 0x3F, 0xFF]);
    }

    #[test]
    fn uint_element_is_minimal() {
        let mut buf = Vec::new();
        write_uint_element(&mut buf, 0xD7, 0);
        assert_eq!(buf, [0xD7, 0x81, 0x00]);

        buf.clear();
        write_uint_element(&mut buf, 0x2AD7B1, 1_000_000);
        assert_eq!(buf, [0x2A, 0xD7, 0xB1, 0x83, 0x0F, 0x42, 0x40]);
    }

    #[test]
    fn element_header_is_read_back() {
        let mut buf = Vec::new();
        write_string_element(&mut buf, 0x4282, "webm");
        let (header, data) = ElementHeader::read_element(&buf).expect("valid element");
        assert_eq!(header.id, 0x4282);
        assert_eq!(header.header_size, 3);
        assert_eq!(data, b"webm");
    }

    #[test]
    fn truncated_element_is_rejected() {
        let buf = [0x42, 0x82, 0x84, b'w'];
        assert!(ElementHeader::read_element(&buf).is_err());
        assert!(ElementHeader::read(&[]).is_err());
    }
}
