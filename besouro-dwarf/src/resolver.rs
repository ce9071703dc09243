//! シンボル解決機能
//!
//! プログラムカウンタの値から、それを含む関数エントリとソース行を求めます。
//! どちらの検索も静的なデバッグ情報だけを参照するため、プロセスの状態に関係なく呼び出せます。

use crate::source::{AddressRange, DebugEntry, DebugInfoSource, EntryKind, LineRow};
use crate::{utils, Result};
use tracing::trace;

/// 検索結果
///
/// 見つからないことはエラーではなく、呼び出し側が両方の場合を扱います。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// `Option` に変換する
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotFound,
        }
    }
}

/// 関数エントリ（DW_TAG_subprogram）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    /// DW_AT_name
    pub name: Option<String>,
    /// DW_AT_linkage_name（マングル名）
    pub linkage_name: Option<String>,
    /// 検索アドレスを含む範囲
    pub range: AddressRange,
    /// 関数の全範囲
    pub ranges: Vec<AddressRange>,
}

impl FunctionEntry {
    fn from_entry(entry: &DebugEntry, range: AddressRange) -> Self {
        Self {
            name: entry.name.clone(),
            linkage_name: entry.linkage_name.clone(),
            range,
            ranges: entry.ranges.clone(),
        }
    }

    /// 関数の先頭アドレス
    pub fn low_pc(&self) -> u64 {
        self.ranges.iter().map(|r| r.begin).min().unwrap_or(self.range.begin)
    }

    /// 表示用の名前（リンケージ名があればデマングルしたもの）
    pub fn display_name(&self) -> String {
        match (&self.linkage_name, &self.name) {
            (Some(linkage), _) => utils::demangle(linkage),
            (None, Some(name)) => name.clone(),
            (None, None) => "<anonymous>".to_string(),
        }
    }
}

/// シンボル解決器
pub struct SymbolResolver<S: DebugInfoSource> {
    source: S,
}

impl<S: DebugInfoSource> SymbolResolver<S> {
    /// デバッグ情報サービスからシンボル解決器を作成する
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// `pc` をアドレス範囲に含むコンパイルユニットを列挙する
    fn units_containing(&self, pc: u64) -> Result<Vec<&S::Unit>> {
        let mut units = Vec::new();
        for unit in self.source.units() {
            let ranges = self.source.unit_ranges(unit)?;
            if ranges.iter().any(|r| r.contains(pc)) {
                units.push(unit);
            }
        }
        Ok(units)
    }

    /// `pc` を含む関数エントリを検索する
    pub fn function_at(&self, pc: u64) -> Result<Lookup<FunctionEntry>> {
        for unit in self.units_containing(pc)? {
            for entry in self.source.entries(unit)? {
                if entry.kind != EntryKind::Function {
                    continue;
                }
                if let Some(range) = entry.range_containing(pc) {
                    trace!("function at 0x{:x}: {:?}", pc, entry.name);
                    return Ok(Lookup::Found(FunctionEntry::from_entry(&entry, range)));
                }
            }
        }

        Ok(Lookup::NotFound)
    }

    /// `pc` に対応する行番号テーブルの行を検索する
    ///
    /// 行の開始アドレスと `pc` が一致する場合のみ見つかったとみなします。
    pub fn line_at(&self, pc: u64) -> Result<Lookup<LineRow>> {
        for unit in self.units_containing(pc)? {
            if let Some(row) = self.source.line_row(unit, pc)? {
                return Ok(Lookup::Found(row));
            }
        }

        Ok(Lookup::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// テスト用のコンパイルユニット
    struct FakeUnit {
        ranges: Vec<AddressRange>,
        entries: Vec<DebugEntry>,
        rows: Vec<LineRow>,
    }

    struct FakeSource {
        units: Vec<FakeUnit>,
    }

    impl DebugInfoSource for FakeSource {
        type Unit = FakeUnit;

        fn units(&self) -> &[FakeUnit] {
            &self.units
        }

        fn unit_ranges(&self, unit: &FakeUnit) -> Result<Vec<AddressRange>> {
            Ok(unit.ranges.clone())
        }

        fn entries(&self, unit: &FakeUnit) -> Result<Vec<DebugEntry>> {
            Ok(unit.entries.clone())
        }

        fn line_row(&self, unit: &FakeUnit, address: u64) -> Result<Option<LineRow>> {
            Ok(unit.rows.iter().find(|r| r.address == address).cloned())
        }
    }

    fn entry(kind: EntryKind, name: &str, begin: u64, end: u64) -> DebugEntry {
        DebugEntry {
            kind,
            name: Some(name.to_string()),
            linkage_name: None,
            ranges: vec![AddressRange::new(begin, end)],
        }
    }

    fn row(address: u64, line: u64) -> LineRow {
        LineRow {
            address,
            file: "/src/main.c".to_string(),
            line,
            column: None,
            is_stmt: true,
        }
    }

    fn resolver() -> SymbolResolver<FakeSource> {
        SymbolResolver::new(FakeSource {
            units: vec![
                FakeUnit {
                    ranges: vec![AddressRange::new(0x1000, 0x1100)],
                    entries: vec![
                        entry(EntryKind::CompileUnit, "main.c", 0x1000, 0x1100),
                        entry(EntryKind::LexicalBlock, "", 0x1000, 0x1040),
                        entry(EntryKind::Function, "main", 0x1000, 0x1040),
                        entry(EntryKind::Function, "helper", 0x1040, 0x1080),
                    ],
                    rows: vec![row(0x1000, 3), row(0x1004, 4), row(0x1040, 10)],
                },
                FakeUnit {
                    ranges: vec![AddressRange::new(0x2000, 0x2100)],
                    entries: vec![entry(EntryKind::Function, "util", 0x2000, 0x2020)],
                    rows: vec![row(0x2000, 1)],
                },
            ],
        })
    }

    #[test]
    fn test_function_at_finds_enclosing_function() {
        let resolver = resolver();

        let found = resolver.function_at(0x1044).unwrap().found().unwrap();
        assert_eq!(found.name.as_deref(), Some("helper"));
        assert_eq!(found.range, AddressRange::new(0x1040, 0x1080));
        assert_eq!(found.low_pc(), 0x1040);

        let found = resolver.function_at(0x2010).unwrap().found().unwrap();
        assert_eq!(found.display_name(), "util");
    }

    #[test]
    fn test_function_at_skips_non_function_entries() {
        let found = resolver().function_at(0x1000).unwrap().found().unwrap();
        assert_eq!(found.name.as_deref(), Some("main"));
    }

    #[test]
    fn test_function_at_outside_every_unit_is_not_found() {
        let resolver = resolver();
        assert_eq!(resolver.function_at(0).unwrap(), Lookup::NotFound);
        assert_eq!(resolver.function_at(0x1100).unwrap(), Lookup::NotFound);
        assert_eq!(resolver.function_at(u64::MAX).unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_function_at_inside_unit_without_function_is_not_found() {
        assert_eq!(resolver().function_at(0x10f0).unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_line_at_exact_row() {
        let row = resolver().line_at(0x1004).unwrap().found().unwrap();
        assert_eq!(row.line, 4);
        assert_eq!(row.file, "/src/main.c");
    }

    #[test]
    fn test_line_at_between_rows_is_not_found() {
        let resolver = resolver();
        assert_eq!(resolver.line_at(0x1002).unwrap(), Lookup::NotFound);
        assert_eq!(resolver.line_at(0x3000).unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_display_name_prefers_demangled_linkage_name() {
        let function = FunctionEntry {
            name: Some("write".to_string()),
            linkage_name: Some("_ZN4core3fmt5write17h2b2c1a5e8c3b3e0fE".to_string()),
            range: AddressRange::new(0, 1),
            ranges: vec![AddressRange::new(0, 1)],
        };
        assert_eq!(function.display_name(), "core::fmt::write");
    }

    #[test]
    fn test_lookup_conversions() {
        assert_eq!(Lookup::from(Some(1)).map(|v| v + 1), Lookup::Found(2));
        assert_eq!(Lookup::<i32>::from(None), Lookup::NotFound);
        assert!(!Lookup::<i32>::NotFound.is_found());
    }
}
