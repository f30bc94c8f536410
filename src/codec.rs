use std::{
    backtrace::Backtrace,
    num::{NonZeroU16, NonZeroU32},
    panic::Location,
};

use crate::BoxType;

/// ボックスのデコード処理用の Result 型
pub type Result<T> = std::result::Result<T, Error>;

/// デコード操作のエラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 入力データの形式または構造が無効である
    InvalidInput,

    /// データコンテンツが無効または破損している
    InvalidData,

    /// デコード対象のバッファが途中で終わっている
    InsufficientBuffer,

    /// 操作またはデータ形式がサポートされていない
    Unsupported,

    /// その他の予期しないエラー
    Other,
}

/// エラー型
pub struct Error {
    /// 発生したエラーの種類
    pub kind: ErrorKind,

    /// エラーが発生した理由
    pub reason: String,

    /// エラーが作成されたソースコードの場所
    pub location: &'static Location<'static>,

    /// エラーが発生した MP4 ボックスの種類
    pub box_type: Option<BoxType>,

    /// エラー発生箇所を示すバックトレース
    ///
    /// バックトレースは `RUST_BACKTRACE` 環境変数が設定されていない場合には取得されない
    pub backtrace: Backtrace,
}

impl Error {
    /// [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self::with_reason(kind, String::new())
    }

    /// エラー理由つきで [`Error`] インスタンスを生成する
    #[track_caller]
    pub fn with_reason<T: Into<String>>(kind: ErrorKind, reason: T) -> Self {
        Self {
            kind,
            reason: reason.into(),
            location: Location::caller(),
            box_type: None,
            backtrace: Backtrace::capture(),
        }
    }

    #[track_caller]
    pub(crate) fn unsupported<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::Unsupported, reason)
    }

    #[track_caller]
    pub(crate) fn invalid_input<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvalidInput, reason)
    }

    #[track_caller]
    pub(crate) fn invalid_data<T: Into<String>>(reason: T) -> Self {
        Self::with_reason(ErrorKind::InvalidData, reason)
    }

    #[track_caller]
    pub(crate) fn insufficient_buffer() -> Self {
        Self::with_reason(ErrorKind::InsufficientBuffer, "Unexpected end of data")
    }

    #[track_caller]
    pub(crate) fn check_buffer_size(required_size: usize, buf: &[u8]) -> Result<()> {
        if buf.len() < required_size {
            Err(Self::insufficient_buffer())
        } else {
            Ok(())
        }
    }

    /// エラーが発生したボックスの種類を設定する
    ///
    /// より内側のボックスで既に設定されている場合には、そちらが優先される
    pub(crate) fn with_box_type(mut self, box_type: BoxType) -> Self {
        if self.box_type.is_none() {
            self.box_type = Some(box_type);
        }
        self
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ty) = self.box_type {
            write!(f, "[{ty}] ")?;
        }

        write!(f, "{:?}: {}", self.kind, self.reason)?;
        write!(f, " (at {}:{})", self.location.file(), self.location.line())?;
        if self.backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            write!(f, "\n\nBacktrace:\n{}", self.backtrace)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

/// バイト列から `Self` に変換するためのトレイト
pub trait Decode: Sized {
    /// バイト列からこの型の値をデコードする
    ///
    /// 成功時には、デコードされた値とデコードに消費されたバイト数のタプルが、
    /// 失敗時には [`Error`] が返される
    fn decode(buf: &[u8]) -> Result<(Self, usize)>;

    /// オフセット位置からバイト列をデコードし、オフセットを自動で進める
    fn decode_at(buf: &[u8], offset: &mut usize) -> Result<Self> {
        let rest = buf.get(*offset..).ok_or_else(Error::insufficient_buffer)?;
        let (decoded, size) = Self::decode(rest)?;
        *offset += size;
        Ok(decoded)
    }
}

impl Decode for u8 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(1, buf)?;
        Ok((buf[0], 1))
    }
}

impl Decode for u16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(2, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1]]), 2))
    }
}

impl Decode for u32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(4, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]), 4))
    }
}

impl Decode for u64 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(8, buf)?;
        let bytes = [
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ];
        Ok((Self::from_be_bytes(bytes), 8))
    }
}

impl Decode for i16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(2, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1]]), 2))
    }
}

impl Decode for i32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(4, buf)?;
        Ok((Self::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]), 4))
    }
}

impl Decode for NonZeroU16 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u16::decode(buf)?;
        NonZeroU16::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::invalid_data("Expected a non-zero integer, but got 0"))
    }
}

impl Decode for NonZeroU32 {
    #[track_caller]
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (v, size) = u32::decode(buf)?;
        NonZeroU32::new(v)
            .map(|nz| (nz, size))
            .ok_or_else(|| Error::invalid_data("Expected a non-zero integer, but got 0"))
    }
}

impl<T: Decode + Default + Copy, const N: usize> Decode for [T; N] {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut items = [T::default(); N];
        let mut offset = 0;

        for item in &mut items {
            *item = T::decode_at(buf, &mut offset)?;
        }

        Ok((items, offset))
    }
}
