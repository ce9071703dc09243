//! Besouro DWARF デバッグ情報解析
//!
//! このクレートは、ELFファイルとDWARFデバッグ情報の解析機能を提供します。
//! プログラムカウンタから関数エントリとソース行を求めるシンボル解決、
//! ELFシンボルテーブルの検索、最寄りのソース位置の検索を行います。

pub mod lines;
pub mod loader;
pub mod resolver;
pub mod source;
pub mod symbols;
pub mod utils;

pub use lines::{LineInfo, LineInfoProvider};
pub use loader::DwarfLoader;
pub use resolver::{FunctionEntry, Lookup, SymbolResolver};
pub use source::{AddressRange, DebugEntry, DebugInfoSource, EntryKind, LineRow};
pub use symbols::{Symbol, SymbolTable};

/// DWARF解析の結果型
pub type Result<T> = anyhow::Result<T>;
