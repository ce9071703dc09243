//! ELFとDWARFの読み込み機能

use crate::source::{AddressRange, DebugEntry, DebugInfoSource, EntryKind, LineRow};
use crate::{utils, Result};
use object::{Object, ObjectSection};
use std::fs;
use std::path::Path;
use tracing::debug;

/// 本クレートで扱うDWARFセクションのリーダー型
pub type DwarfSlice = gimli::EndianSlice<'static, gimli::RunTimeEndian>;

/// DWARFローダー
///
/// デバッガの生存期間中、読み取り専用のデバッグ情報ビューとして保持されます。
pub struct DwarfLoader {
    /// ファイルの内容
    file_data: &'static [u8],
    /// オブジェクトファイル
    object_file: object::File<'static>,
    /// DWARFコンテキスト
    dwarf: gimli::Dwarf<DwarfSlice>,
    /// 解析済みのコンパイルユニット
    units: Vec<gimli::Unit<DwarfSlice>>,
}

impl DwarfLoader {
    /// ELFファイルからDWARF情報を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // デバッグ情報はデバッガの終了まで参照されるため、'staticライフタイムで保持する
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        let dwarf = load_dwarf(&object_file)?;

        let mut units = Vec::new();
        let mut headers = dwarf.units();
        while let Some(header) = headers.next()? {
            units.push(dwarf.unit(header)?);
        }

        debug!(path = %path.display(), units = units.len(), "loaded debug info");

        Ok(Self {
            file_data,
            object_file,
            dwarf,
            units,
        })
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// 同じファイルからDWARFコンテキストを新たに構築する
    ///
    /// addr2lineのコンテキストなど、DWARFを所有する必要がある利用者向けです。
    pub fn load_dwarf(&self) -> Result<gimli::Dwarf<DwarfSlice>> {
        let object_file = object::File::parse(self.file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file: {}", e))?;
        load_dwarf(&object_file)
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIE実行ファイルの場合、DWARFのアドレスはオフセットであり、
    /// 実行時ベースアドレスを加算する必要があります。
    pub fn is_pie(&self) -> bool {
        use object::ObjectKind;

        // ET_DYN = PIE実行ファイルまたは共有ライブラリ、ET_EXEC = 非PIE実行ファイル
        matches!(self.object_file.kind(), ObjectKind::Dynamic)
    }
}

/// オブジェクトファイルからDWARFセクションを読み込む
fn load_dwarf(object_file: &object::File<'static>) -> Result<gimli::Dwarf<DwarfSlice>> {
    let endian = if object_file.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> Result<DwarfSlice> {
        let data = object_file
            .section_by_name(id.name())
            .and_then(|section| section.data().ok())
            .unwrap_or(&[]);
        Ok(gimli::EndianSlice::new(data, endian))
    };

    gimli::Dwarf::load(load_section)
        .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))
}

impl DebugInfoSource for DwarfLoader {
    type Unit = gimli::Unit<DwarfSlice>;

    fn units(&self) -> &[Self::Unit] {
        &self.units
    }

    fn unit_ranges(&self, unit: &Self::Unit) -> Result<Vec<AddressRange>> {
        utils::collect_ranges(self.dwarf.unit_ranges(unit)?)
    }

    fn entries(&self, unit: &Self::Unit) -> Result<Vec<DebugEntry>> {
        let mut entries = Vec::new();
        let mut cursor = unit.entries();

        while let Some((_, entry)) = cursor.next_dfs()? {
            let kind = EntryKind::from_tag(entry.tag());
            if kind == EntryKind::Other {
                continue;
            }

            entries.push(DebugEntry {
                kind,
                name: utils::entry_string(&self.dwarf, unit, entry, gimli::DW_AT_name)?,
                linkage_name: utils::entry_string(&self.dwarf, unit, entry, gimli::DW_AT_linkage_name)?,
                ranges: utils::entry_ranges(&self.dwarf, unit, entry)?,
            });
        }

        Ok(entries)
    }

    fn line_row(&self, unit: &Self::Unit, address: u64) -> Result<Option<LineRow>> {
        let program = match &unit.line_program {
            Some(program) => program.clone(),
            None => return Ok(None),
        };

        let mut rows = program.rows();
        while let Some((header, row)) = rows.next_row()? {
            if row.end_sequence() || row.address() != address {
                continue;
            }

            let line = match row.line() {
                Some(line) => line.get(),
                None => continue,
            };

            let file = match row.file(header) {
                Some(file) => utils::file_path(&self.dwarf, unit, header, file)?,
                None => String::new(),
            };

            let column = match row.column() {
                gimli::ColumnType::LeftEdge => None,
                gimli::ColumnType::Column(column) => Some(column.get()),
            };

            return Ok(Some(LineRow {
                address,
                file,
                line,
                column,
                is_stmt: row.is_stmt(),
            }));
        }

        Ok(None)
    }
}
