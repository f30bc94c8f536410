use std::num::NonZeroU32;

use crate::{
    BoxType, Either,
    boxes::{CttsBox, StblBox, StszBox, SttsBox},
};

/// [`SampleTableAccessor`] の構築時に検出された、サンプルテーブルの不整合を表すエラー
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SampleTableAccessorError {
    /// `stts` や `ctts` が表すサンプル数が `stsz` のサンプル数に足りない
    SampleCountMismatch {
        /// 不整合が見つかったボックスの種別
        box_type: BoxType,

        /// `stsz` ボックスが示すサンプル数
        expected: u32,

        /// 対象ボックスのエントリーが表すサンプル数の合計
        actual: u64,
    },

    /// `stsc` ボックスのエントリーが参照するチャンク番号が不正
    InvalidFirstChunk {
        /// 不正なエントリーの位置
        entry_index: usize,

        /// エントリーの first_chunk 値
        first_chunk: NonZeroU32,

        /// `stco` / `co64` ボックスが保持するチャンク数
        chunk_count: u32,
    },

    /// 全チャンクに格納可能なサンプル数が、トラックのサンプル数に足りない
    InsufficientChunkCapacity {
        /// `stsz` ボックスが示すサンプル数
        sample_count: u32,

        /// `stsc` と `stco` / `co64` から計算される格納可能なサンプル数
        capacity: u64,
    },
}

impl std::fmt::Debug for SampleTableAccessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for SampleTableAccessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SampleCountMismatch {
                box_type,
                expected,
                actual,
            } => write!(
                f,
                "'{box_type}' box covers {actual} samples, but the track has {expected} samples"
            ),
            Self::InvalidFirstChunk {
                entry_index,
                first_chunk,
                chunk_count,
            } => write!(
                f,
                "Invalid first_chunk {first_chunk} in 'stsc' entry #{entry_index} (chunk count: {chunk_count})"
            ),
            Self::InsufficientChunkCapacity {
                sample_count,
                capacity,
            } => write!(
                f,
                "Chunks can hold only {capacity} samples, but the track has {sample_count} samples"
            ),
        }
    }
}

impl std::error::Error for SampleTableAccessorError {}

/// [`StblBox`] をラップして、その中の情報を簡単かつ効率的に取り出せるようにするための構造体
///
/// 構築時にサンプルテーブル間の整合性が検証されるため、
/// [`SampleTableAccessor::samples()`] は全てのサンプルを取りこぼしなく走査できる
#[derive(Debug)]
pub struct SampleTableAccessor<'a> {
    stbl_box: &'a StblBox,
    sample_count: u32,
    stts_table: Vec<(u32, u32)>, // (累計サンプル数、尺）
}

impl<'a> SampleTableAccessor<'a> {
    /// 引数で渡された [`StblBox`] 用の [`SampleTableAccessor`] インスタンスを生成する
    pub fn new(stbl_box: &'a StblBox) -> Result<Self, SampleTableAccessorError> {
        let sample_count = stbl_box.stsz_box.sample_count();

        let mut stts_table = Vec::new();
        let mut stts_sample_count = 0u64;
        for entry in &stbl_box.stts_box.entries {
            if entry.sample_count == 0 {
                continue;
            }
            stts_table.push((stts_sample_count.min(u64::from(u32::MAX)) as u32, entry.sample_delta));
            stts_sample_count += u64::from(entry.sample_count);
        }
        if stts_sample_count < u64::from(sample_count) {
            return Err(SampleTableAccessorError::SampleCountMismatch {
                box_type: SttsBox::TYPE,
                expected: sample_count,
                actual: stts_sample_count,
            });
        }

        if let Some(ctts_box) = &stbl_box.ctts_box {
            let ctts_sample_count: u64 = ctts_box
                .entries
                .iter()
                .map(|e| u64::from(e.sample_count))
                .sum();
            if ctts_sample_count < u64::from(sample_count) {
                return Err(SampleTableAccessorError::SampleCountMismatch {
                    box_type: CttsBox::TYPE,
                    expected: sample_count,
                    actual: ctts_sample_count,
                });
            }
        }

        let this = Self {
            stbl_box,
            sample_count,
            stts_table,
        };
        this.check_chunk_capacity()?;
        Ok(this)
    }

    fn check_chunk_capacity(&self) -> Result<(), SampleTableAccessorError> {
        let chunk_count = self.chunk_count();
        let entries = &self.stbl_box.stsc_box.entries;

        let mut capacity = 0u64;
        for (i, entry) in entries.iter().enumerate() {
            let first_chunk = u64::from(entry.first_chunk.get());
            let next_first_chunk = entries
                .get(i + 1)
                .map_or(u64::from(chunk_count) + 1, |e| u64::from(e.first_chunk.get()));

            // 最初のエントリーは 1 番目のチャンクから始まり、以降は昇順に並んでいる必要がある
            if (i == 0 && first_chunk != 1) || next_first_chunk <= first_chunk {
                return Err(SampleTableAccessorError::InvalidFirstChunk {
                    entry_index: i,
                    first_chunk: entry.first_chunk,
                    chunk_count,
                });
            }
            capacity += (next_first_chunk - first_chunk) * u64::from(entry.samples_per_chunk);
        }

        if capacity < u64::from(self.sample_count) {
            return Err(SampleTableAccessorError::InsufficientChunkCapacity {
                sample_count: self.sample_count,
                capacity,
            });
        }
        Ok(())
    }

    /// トラック内のサンプルの数を取得する
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// トラック内のチャンクの数を取得する
    pub fn chunk_count(&self) -> u32 {
        match &self.stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.len() as u32,
            Either::B(b) => b.chunk_offsets.len() as u32,
        }
    }

    /// 指定されたサンプルの尺を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_duration(&self, sample_index: NonZeroU32) -> Option<u32> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let i = self
            .stts_table
            .partition_point(|x| x.0 <= sample_index.get() - 1);
        self.stts_table.get(i.checked_sub(1)?).map(|x| x.1)
    }

    /// 指定されたサンプルのデータサイズ（バイト数）を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_size(&self, sample_index: NonZeroU32) -> Option<u32> {
        sample_size(self.stbl_box, self.sample_count, sample_index)
    }

    /// 指定されたサンプルが同期サンプルかどうかを判定する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn is_sync_sample(&self, sample_index: NonZeroU32) -> Option<bool> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let Some(stss_box) = &self.stbl_box.stss_box else {
            // stss ボックスが存在しない場合は全てが同期サンプル扱い
            return Some(true);
        };

        Some(stss_box.sample_numbers.binary_search(&sample_index).is_ok())
    }

    /// 指定されたチャンクのファイル内でのバイト位置を返す
    ///
    /// 存在しないチャンクが指定された場合には [`None`] が返される
    pub fn chunk_offset(&self, chunk_index: NonZeroU32) -> Option<u64> {
        chunk_offset(self.stbl_box, chunk_index)
    }

    /// 全てのサンプルを先頭から順に走査するイテレーターを返す
    pub fn samples(&self) -> SampleIter<'a> {
        SampleIter {
            stbl_box: self.stbl_box,
            sample_count: self.sample_count,
            next_sample: 0,
            stts_index: 0,
            stts_remaining: 0,
            stts_delta: 0,
            decode_time: 0,
            ctts_index: 0,
            ctts_remaining: 0,
            ctts_offset: 0,
            stss_index: 0,
            stsc_index: 0,
            chunk: 0,
            chunk_remaining: 0,
            data_offset: 0,
        }
    }
}

fn sample_size(stbl_box: &StblBox, sample_count: u32, sample_index: NonZeroU32) -> Option<u32> {
    if sample_count < sample_index.get() {
        return None;
    }

    let i = sample_index.get() as usize - 1;
    match &stbl_box.stsz_box {
        StszBox::Fixed { sample_size, .. } => Some(sample_size.get()),
        StszBox::Variable { entry_sizes } => entry_sizes.get(i).copied(),
    }
}

fn chunk_offset(stbl_box: &StblBox, chunk_index: NonZeroU32) -> Option<u64> {
    let i = chunk_index.get() as usize - 1;
    match &stbl_box.stco_or_co64_box {
        Either::A(b) => b.chunk_offsets.get(i).copied().map(u64::from),
        Either::B(b) => b.chunk_offsets.get(i).copied(),
    }
}

/// サンプルのファイル内での位置とタイミング情報
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleLocation {
    /// トラック内でのサンプル番号（1 始まり）
    pub number: NonZeroU32,

    /// ファイル先頭からのデータのバイト位置
    pub data_offset: u64,

    /// データのバイト数
    pub data_size: u32,

    /// デコード時刻（トラックのタイムスケール単位）
    pub decode_time: u64,

    /// デコード時刻から表示時刻までのオフセット（`ctts` がない場合は 0）
    pub composition_offset: i64,

    /// サンプルの尺（トラックのタイムスケール単位）
    pub duration: u32,

    /// 同期サンプル（キーフレーム）かどうか
    pub is_sync: bool,
}

impl SampleLocation {
    /// 表示時刻（トラックのタイムスケール単位）を返す
    pub fn composition_time(&self) -> i64 {
        i64::try_from(self.decode_time)
            .unwrap_or(i64::MAX)
            .saturating_add(self.composition_offset)
    }
}

/// [`SampleTableAccessor::samples()`] が返すイテレーター
///
/// 各テーブルのカーソルを保持しているため、全体の走査はサンプル数に対して線形時間で終わる
#[derive(Debug, Clone)]
pub struct SampleIter<'a> {
    stbl_box: &'a StblBox,
    sample_count: u32,
    next_sample: u32,
    stts_index: usize,
    stts_remaining: u32,
    stts_delta: u32,
    decode_time: u64,
    ctts_index: usize,
    ctts_remaining: u32,
    ctts_offset: i64,
    stss_index: usize,
    stsc_index: usize,
    chunk: u32,
    chunk_remaining: u32,
    data_offset: u64,
}

impl SampleIter<'_> {
    fn next_chunk_slot(&mut self) -> Option<u64> {
        let entries = &self.stbl_box.stsc_box.entries;
        while self.chunk_remaining == 0 {
            self.chunk = self.chunk.checked_add(1)?;
            while entries
                .get(self.stsc_index + 1)
                .is_some_and(|e| e.first_chunk.get() <= self.chunk)
            {
                self.stsc_index += 1;
            }
            self.chunk_remaining = entries.get(self.stsc_index)?.samples_per_chunk;
            self.data_offset = chunk_offset(self.stbl_box, NonZeroU32::new(self.chunk)?)?;
        }
        self.chunk_remaining -= 1;
        Some(self.data_offset)
    }

    fn next_decode_time(&mut self) -> Option<(u64, u32)> {
        while self.stts_remaining == 0 {
            let entry = self.stbl_box.stts_box.entries.get(self.stts_index)?;
            self.stts_index += 1;
            self.stts_remaining = entry.sample_count;
            self.stts_delta = entry.sample_delta;
        }
        self.stts_remaining -= 1;
        let decode_time = self.decode_time;
        self.decode_time = self.decode_time.saturating_add(u64::from(self.stts_delta));
        Some((decode_time, self.stts_delta))
    }

    fn next_composition_offset(&mut self) -> Option<i64> {
        let Some(ctts_box) = &self.stbl_box.ctts_box else {
            return Some(0);
        };
        while self.ctts_remaining == 0 {
            let entry = ctts_box.entries.get(self.ctts_index)?;
            self.ctts_index += 1;
            self.ctts_remaining = entry.sample_count;
            self.ctts_offset = entry.sample_offset;
        }
        self.ctts_remaining -= 1;
        Some(self.ctts_offset)
    }

    fn is_sync(&mut self, number: NonZeroU32) -> bool {
        let Some(stss_box) = &self.stbl_box.stss_box else {
            return true;
        };
        let numbers = &stss_box.sample_numbers;
        while numbers.get(self.stss_index).is_some_and(|n| *n < number) {
            self.stss_index += 1;
        }
        numbers.get(self.stss_index) == Some(&number)
    }
}

impl Iterator for SampleIter<'_> {
    type Item = SampleLocation;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_sample >= self.sample_count {
            return None;
        }
        let number = NonZeroU32::new(self.next_sample + 1)?;

        let data_offset = self.next_chunk_slot()?;
        let data_size = sample_size(self.stbl_box, self.sample_count, number)?;
        self.data_offset = self.data_offset.saturating_add(u64::from(data_size));

        let (decode_time, duration) = self.next_decode_time()?;
        let composition_offset = self.next_composition_offset()?;
        let is_sync = self.is_sync(number);

        self.next_sample += 1;
        Some(SampleLocation {
            number,
            data_offset,
            data_size,
            decode_time,
            composition_offset,
            duration,
            is_sync,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.sample_count - self.next_sample) as usize;
        (0, Some(remaining))
    }
}
