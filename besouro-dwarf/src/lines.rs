//! ソース行情報

use crate::loader::DwarfSlice;
use crate::{DwarfLoader, Lookup, Result};

/// ソース行情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

/// ソース行情報の取得
///
/// [`crate::SymbolResolver::line_at`] と異なり、行の開始アドレスに一致しなくても
/// そのアドレスを含む最寄りの行を返します。停止位置の表示に使います。
pub struct LineInfoProvider {
    context: addr2line::Context<DwarfSlice>,
}

impl LineInfoProvider {
    /// ソース行情報プロバイダを作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let context = addr2line::Context::from_dwarf(loader.load_dwarf()?)
            .map_err(|e| anyhow::anyhow!("Failed to build line table context: {}", e))?;
        Ok(Self { context })
    }

    /// アドレスからソース行情報を取得する
    pub fn lookup(&self, addr: u64) -> Result<Lookup<LineInfo>> {
        let location = self
            .context
            .find_location(addr)
            .map_err(|e| anyhow::anyhow!("Failed to look up 0x{:x}: {}", addr, e))?;

        Ok(location
            .and_then(|loc| {
                Some(LineInfo {
                    file: loc.file?.to_string(),
                    line: loc.line?,
                    column: loc.column,
                })
            })
            .into())
    }
}
