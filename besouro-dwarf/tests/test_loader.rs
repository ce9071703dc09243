//! DWARFローダーとシンボル解決のテスト
//!
//! テスト実行ファイル自身のデバッグ情報を読み込んで検証します。

use besouro_dwarf::{DwarfLoader, LineInfoProvider, Lookup, SymbolResolver, SymbolTable};

/// シンボル解決の対象となる関数
#[no_mangle]
#[inline(never)]
pub extern "C" fn besouro_probe_function(x: u64) -> u64 {
    x.wrapping_mul(3).wrapping_add(1)
}

fn load_self() -> DwarfLoader {
    let exe = std::env::current_exe().expect("Failed to get current executable path");
    DwarfLoader::load(&exe).expect("Failed to load DWARF from test executable")
}

fn probe_address(table: &SymbolTable) -> u64 {
    assert_eq!(std::hint::black_box(besouro_probe_function)(1), 4);
    table
        .resolve("besouro_probe_function")
        .expect("Should find besouro_probe_function in the symbol table")
}

#[test]
fn test_function_at_probe() {
    let loader = load_self();
    let table = SymbolTable::new(&loader);
    let addr = probe_address(&table);

    let resolver = SymbolResolver::new(loader);

    let function = resolver
        .function_at(addr)
        .expect("Failed to search debug info")
        .found()
        .expect("Should find the function containing the probe");
    assert_eq!(function.name.as_deref(), Some("besouro_probe_function"));
    assert_eq!(function.low_pc(), addr);

    // 関数の途中のアドレスも同じ関数に解決される
    let inside = resolver.function_at(addr + 1).unwrap().found().unwrap();
    assert_eq!(inside.name, function.name);
}

#[test]
fn test_line_at_function_entry() {
    let loader = load_self();
    let table = SymbolTable::new(&loader);
    let addr = probe_address(&table);

    let resolver = SymbolResolver::new(loader);
    let row = resolver
        .line_at(addr)
        .expect("Failed to search line table")
        .found()
        .expect("Function entry should start a line table row");

    assert_eq!(row.address, addr);
    assert!(row.line > 0);
    assert!(row.file.ends_with("test_loader.rs"), "unexpected file {}", row.file);
}

#[test]
fn test_lookup_miss_outside_units() {
    let resolver = SymbolResolver::new(load_self());

    assert_eq!(resolver.function_at(0).unwrap(), Lookup::NotFound);
    assert_eq!(resolver.function_at(u64::MAX).unwrap(), Lookup::NotFound);
    assert_eq!(resolver.line_at(u64::MAX).unwrap(), Lookup::NotFound);
}

#[test]
fn test_nearest_line_inside_function() {
    let loader = load_self();
    let table = SymbolTable::new(&loader);
    let addr = probe_address(&table);

    let provider = LineInfoProvider::new(&loader).expect("Failed to build line info provider");
    let info = provider
        .lookup(addr + 1)
        .expect("Failed to look up line")
        .found()
        .expect("Should find a line covering the probe function");

    assert!(info.file.ends_with("test_loader.rs"), "unexpected file {}", info.file);
    assert!(info.line > 0);
}

#[test]
fn test_reverse_resolve_probe() {
    let loader = load_self();
    let table = SymbolTable::new(&loader);
    let addr = probe_address(&table);

    let sym = table.reverse_resolve(addr).expect("Should reverse resolve the probe");
    assert_eq!(sym.name, "besouro_probe_function");
}
