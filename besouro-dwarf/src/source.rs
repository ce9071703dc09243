//! デバッグ情報サービスのインターフェース
//!
//! シンボル解決はこのトレイトを通してのみデバッグ情報を参照します。
//! 実装は [`crate::DwarfLoader`]（gimliによるDWARF解析）です。

use crate::Result;

/// 半開区間 `[begin, end)` のアドレス範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub begin: u64,
    pub end: u64,
}

impl AddressRange {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// アドレスが範囲内にあるかどうか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.begin && addr < self.end
    }
}

/// デバッグ情報エントリの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    CompileUnit,
    /// DW_TAG_subprogram
    Function,
    /// DW_TAG_inlined_subroutine
    InlinedFunction,
    LexicalBlock,
    Other,
}

impl EntryKind {
    pub fn from_tag(tag: gimli::DwTag) -> Self {
        match tag {
            gimli::DW_TAG_compile_unit | gimli::DW_TAG_partial_unit => EntryKind::CompileUnit,
            gimli::DW_TAG_subprogram => EntryKind::Function,
            gimli::DW_TAG_inlined_subroutine => EntryKind::InlinedFunction,
            gimli::DW_TAG_lexical_block => EntryKind::LexicalBlock,
            _ => EntryKind::Other,
        }
    }
}

/// コンパイルユニット内のエントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    pub kind: EntryKind,
    pub name: Option<String>,
    pub linkage_name: Option<String>,
    /// エントリがカバーするアドレス範囲（宣言のみの場合は空）
    pub ranges: Vec<AddressRange>,
}

impl DebugEntry {
    /// アドレスを含む範囲を返す
    pub fn range_containing(&self, addr: u64) -> Option<AddressRange> {
        self.ranges.iter().copied().find(|r| r.contains(addr))
    }
}

/// 行番号テーブルの1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    pub address: u64,
    pub file: String,
    pub line: u64,
    pub column: Option<u64>,
    pub is_stmt: bool,
}

/// デバッグ情報サービス
///
/// コンパイルユニットの列挙、ユニット内エントリの列挙、アドレス範囲の取得、
/// 行番号テーブルの検索を提供します。
pub trait DebugInfoSource {
    /// コンパイルユニットのハンドル
    type Unit;

    /// すべてのコンパイルユニット
    fn units(&self) -> &[Self::Unit];

    /// ユニットのアドレス範囲
    fn unit_ranges(&self, unit: &Self::Unit) -> Result<Vec<AddressRange>>;

    /// ユニット内のエントリ（深さ優先順）
    fn entries(&self, unit: &Self::Unit) -> Result<Vec<DebugEntry>>;

    /// 行番号テーブルから `address` ちょうどの行を検索する
    fn line_row(&self, unit: &Self::Unit, address: u64) -> Result<Option<LineRow>>;
}
