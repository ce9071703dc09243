//! デバッガのエラー種別

/// 実行制御で発生するエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebuggerError {
    /// プロセスが起動されていない
    #[error("Not attached to a process")]
    NotLaunched,

    /// プロセスは既に終了している
    #[error("The process has terminated")]
    ProcessTerminated,

    /// 命令の境界ではないアドレスにブレークポイントを設定しようとした
    #[error("0x{0:x} is not an instruction boundary")]
    NotInstructionBoundary(u64),

    /// シンボルが見つからない
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// レジスタ名が不明
    #[error("Unknown register: {0}")]
    UnknownRegister(String),

    /// DWARF情報がロードされていない
    #[error("DWARF information not loaded")]
    DwarfNotLoaded,
}
