//! ELFシンボルテーブル

use crate::{utils, DwarfLoader};
use object::{Object, ObjectSymbol, SymbolKind};
use std::collections::HashMap;

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let demangled_name = utils::demangle(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// 表示用の名前を取得
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }
}

/// 関数シンボルのテーブル
///
/// アドレスはリンク時のものです。PIEの場合、呼び出し側でロードバイアスを加算します。
pub struct SymbolTable {
    /// シンボル名 -> シンボル情報のマップ（マングル名とデマングル名の両方で登録）
    symbols_by_name: HashMap<String, Symbol>,
    /// アドレス順にソートされたシンボル
    symbols_by_address: Vec<Symbol>,
}

impl SymbolTable {
    /// DWARFローダーのオブジェクトファイルからシンボルテーブルを作成する
    pub fn new(loader: &DwarfLoader) -> Self {
        let symbols = loader
            .object_file()
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.address() != 0)
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some(Symbol::new(name.to_string(), symbol.address(), symbol.size()))
            });

        Self::from_symbols(symbols)
    }

    /// シンボルの列からテーブルを作成する
    pub fn from_symbols(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let mut symbols_by_name = HashMap::new();
        let mut symbols_by_address = Vec::new();

        for sym in symbols {
            symbols_by_name.insert(sym.demangled_name.clone(), sym.clone());
            symbols_by_name.insert(sym.name.clone(), sym.clone());
            symbols_by_address.push(sym);
        }

        symbols_by_address.sort_by_key(|s| s.address);

        Self {
            symbols_by_name,
            symbols_by_address,
        }
    }

    /// シンボル名（マングル名またはデマングル名）からアドレスを解決する
    pub fn resolve(&self, name: &str) -> Option<u64> {
        self.symbols_by_name.get(name).map(|s| s.address)
    }

    /// アドレスを含むシンボルを検索する
    pub fn reverse_resolve(&self, addr: u64) -> Option<&Symbol> {
        let idx = self.symbols_by_address.partition_point(|s| s.address <= addr);
        let sym = self.symbols_by_address.get(idx.checked_sub(1)?)?;

        if sym.size == 0 || addr < sym.address + sym.size {
            Some(sym)
        } else {
            None
        }
    }

    /// シンボルの数
    pub fn len(&self) -> usize {
        self.symbols_by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_address.is_empty()
    }
}
