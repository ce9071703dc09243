//! DWARF解析のユーティリティ関数

use crate::{AddressRange, Result};
use gimli::Reader;
use std::path::PathBuf;

/// 文字列属性を取得する
///
/// エントリ自身に属性がない場合は DW_AT_specification / DW_AT_abstract_origin を1段だけ辿ります。
pub fn entry_string<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &gimli::DebuggingInformationEntry<R>,
    attr: gimli::DwAt,
) -> Result<Option<String>> {
    if let Some(value) = entry.attr_value(attr)? {
        return Ok(Some(attr_to_string(dwarf, unit, value)?));
    }

    for origin in [gimli::DW_AT_specification, gimli::DW_AT_abstract_origin] {
        if let Some(gimli::AttributeValue::UnitRef(offset)) = entry.attr_value(origin)? {
            let origin_entry = unit.entry(offset)?;
            if let Some(value) = origin_entry.attr_value(attr)? {
                return Ok(Some(attr_to_string(dwarf, unit, value)?));
            }
        }
    }

    Ok(None)
}

/// 文字列形式の属性値を文字列に変換する
pub fn attr_to_string<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    value: gimli::AttributeValue<R>,
) -> Result<String> {
    let raw = dwarf.attr_string(unit, value)?;
    Ok(raw.to_string_lossy()?.into_owned())
}

/// エントリのアドレス範囲を取得する
///
/// DW_AT_low_pc/DW_AT_high_pc と DW_AT_ranges の両方に対応します。
pub fn entry_ranges<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    entry: &gimli::DebuggingInformationEntry<R>,
) -> Result<Vec<AddressRange>> {
    collect_ranges(dwarf.die_ranges(unit, entry)?)
}

/// 範囲イテレータから有効な範囲だけを集める
///
/// 空の範囲と、リンカがセクション削除時に0へ書き換えた範囲は除外します。
pub fn collect_ranges<R: Reader>(mut iter: gimli::RangeIter<R>) -> Result<Vec<AddressRange>> {
    let mut ranges = Vec::new();
    while let Some(range) = iter.next()? {
        if range.begin != 0 && range.begin < range.end {
            ranges.push(AddressRange::new(range.begin, range.end));
        }
    }
    Ok(ranges)
}

/// 行番号テーブルのファイルエントリからパスを組み立てる
pub fn file_path<R: Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    header: &gimli::LineProgramHeader<R>,
    file: &gimli::FileEntry<R>,
) -> Result<String> {
    let mut path = PathBuf::new();

    if let Some(comp_dir) = &unit.comp_dir {
        path.push(comp_dir.to_string_lossy()?.as_ref());
    }

    // 絶対パスの場合は push が前の要素を置き換える
    if let Some(directory) = file.directory(header) {
        path.push(attr_to_string(dwarf, unit, directory)?);
    }
    path.push(attr_to_string(dwarf, unit, file.path_name())?);

    Ok(path.display().to_string())
}

/// シンボル名をデマングルする
///
/// Rustのシンボルのみデマングルし、それ以外はそのまま返します。
pub fn demangle(name: &str) -> String {
    match rustc_demangle::try_demangle(name) {
        Ok(demangled) => format!("{:#}", demangled),
        Err(_) => name.to_string(),
    }
}
