//! ターゲット制御のエラー種別

/// 呼び出し側で判別できるターゲット制御エラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// 有効なブレークポイントを再度有効化しようとした
    #[error("breakpoint at 0x{0:x} is already enabled")]
    AlreadyEnabled(u64),

    /// 無効なブレークポイントを再度無効化しようとした
    #[error("breakpoint at 0x{0:x} is not enabled")]
    NotEnabled(u64),

    /// トレース対象の子プロセスを起動できなかった
    #[error("failed to launch traced process: {0}")]
    LaunchFailed(String),
}
