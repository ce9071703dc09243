//! ブレークポイント機能

use crate::{Result, TargetError, WordMemory};

/// INT3命令のオペコード
pub const INT3_OPCODE: u8 = 0xCC;

/// ワードの最下位バイトを置き換える
fn replace_low_byte(word: u64, byte: u8) -> u64 {
    (word & !0xFF) | u64::from(byte)
}

/// ソフトウェアブレークポイント（INT3命令）
///
/// 有効化と無効化は厳密に交互に呼び出す必要があります。
/// 二重の有効化は保存済みの元バイトを失わせるため、エラーとして拒否します。
#[derive(Debug)]
pub struct SoftwareBreakpoint {
    address: u64,
    original_byte: u8,
    enabled: bool,
}

impl SoftwareBreakpoint {
    /// ブレークポイントを作成する（無効状態）
    pub fn new(address: u64) -> Self {
        Self {
            address,
            original_byte: 0,
            enabled: false,
        }
    }

    /// ブレークポイントのアドレスを取得する
    pub fn address(&self) -> u64 {
        self.address
    }

    /// ブレークポイントが有効かどうか
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 直近の有効化で保存した元のバイトを取得する
    pub fn original_byte(&self) -> u8 {
        self.original_byte
    }

    /// INT3の下に書き込まれたバイトを、無効化時に戻すバイトとして記録する
    ///
    /// 有効なブレークポイントの位置にユーザーが書き込んだ場合に使います。
    pub fn replace_original_byte(&mut self, byte: u8) -> Result<()> {
        if !self.enabled {
            return Err(TargetError::NotEnabled(self.address).into());
        }
        self.original_byte = byte;
        Ok(())
    }

    /// ブレークポイントを設定する
    ///
    /// アドレスの1ワードを読み取り、最下位バイトを保存してから
    /// 0xCC（INT3）に置き換えたワードを書き戻します。
    pub fn enable(&mut self, memory: &impl WordMemory) -> Result<()> {
        if self.enabled {
            return Err(TargetError::AlreadyEnabled(self.address).into());
        }

        let word = memory.read_word(self.address)?;
        self.original_byte = (word & 0xFF) as u8;
        memory.write_word(self.address, replace_low_byte(word, INT3_OPCODE))?;

        self.enabled = true;
        Ok(())
    }

    /// ブレークポイントを解除する
    ///
    /// 最下位バイトを保存しておいた元のバイトに戻します。
    pub fn disable(&mut self, memory: &impl WordMemory) -> Result<()> {
        if !self.enabled {
            return Err(TargetError::NotEnabled(self.address).into());
        }

        let word = memory.read_word(self.address)?;
        memory.write_word(self.address, replace_low_byte(word, self.original_byte))?;

        self.enabled = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// ワード単位の書き込みを記録するテスト用メモリ
    #[derive(Default)]
    struct FakeMemory {
        words: RefCell<HashMap<u64, u64>>,
        writes: RefCell<usize>,
    }

    impl FakeMemory {
        fn with_word(addr: u64, word: u64) -> Self {
            let memory = Self::default();
            memory.words.borrow_mut().insert(addr, word);
            memory
        }

        fn word(&self, addr: u64) -> u64 {
            self.words.borrow().get(&addr).copied().unwrap_or(0)
        }
    }

    impl WordMemory for FakeMemory {
        fn read_word(&self, addr: u64) -> Result<u64> {
            Ok(self.word(addr))
        }

        fn write_word(&self, addr: u64, word: u64) -> Result<()> {
            *self.writes.borrow_mut() += 1;
            self.words.borrow_mut().insert(addr, word);
            Ok(())
        }
    }

    #[test]
    fn test_enable_patches_low_byte_only() {
        let memory = FakeMemory::with_word(0x1000, 0x1122_3344_5566_7748);
        let mut bp = SoftwareBreakpoint::new(0x1000);

        bp.enable(&memory).unwrap();

        assert!(bp.is_enabled());
        assert_eq!(bp.original_byte(), 0x48);
        assert_eq!(memory.word(0x1000), 0x1122_3344_5566_77CC);
    }

    #[test]
    fn test_enable_disable_round_trip() {
        let original = 0xdead_beef_0000_00e8;
        let memory = FakeMemory::with_word(0x4000, original);
        let mut bp = SoftwareBreakpoint::new(0x4000);

        bp.enable(&memory).unwrap();
        assert_eq!(memory.word(0x4000) & 0xFF, u64::from(INT3_OPCODE));

        bp.disable(&memory).unwrap();
        assert!(!bp.is_enabled());
        assert_eq!(memory.word(0x4000), original);
    }

    #[test]
    fn test_disable_restores_byte_from_latest_enable() {
        let memory = FakeMemory::with_word(0x2000, 0x55);
        let mut bp = SoftwareBreakpoint::new(0x2000);

        bp.enable(&memory).unwrap();
        bp.disable(&memory).unwrap();

        // 2回目の有効化の前に命令が書き換えられた
        memory.write_word(0x2000, 0x90).unwrap();

        bp.enable(&memory).unwrap();
        assert_eq!(bp.original_byte(), 0x90);
        bp.disable(&memory).unwrap();
        assert_eq!(memory.word(0x2000), 0x90);
    }

    #[test]
    fn test_double_enable_is_rejected() {
        let memory = FakeMemory::with_word(0x3000, 0x41);
        let mut bp = SoftwareBreakpoint::new(0x3000);
        bp.enable(&memory).unwrap();
        let writes = *memory.writes.borrow();

        let err = bp.enable(&memory).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TargetError>(),
            Some(&TargetError::AlreadyEnabled(0x3000))
        );
        assert_eq!(*memory.writes.borrow(), writes);
        assert_eq!(bp.original_byte(), 0x41);
    }

    #[test]
    fn test_replaced_original_byte_is_restored_on_disable() {
        let memory = FakeMemory::with_word(0x5000, 0x48);
        let mut bp = SoftwareBreakpoint::new(0x5000);
        bp.enable(&memory).unwrap();

        bp.replace_original_byte(0x90).unwrap();
        assert_eq!(bp.original_byte(), 0x90);

        bp.disable(&memory).unwrap();
        assert_eq!(memory.word(0x5000), 0x90);

        let err = bp.replace_original_byte(0x55).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TargetError>(),
            Some(&TargetError::NotEnabled(0x5000))
        );
    }

    #[test]
    fn test_double_disable_is_rejected() {
        let memory = FakeMemory::with_word(0x3000, 0x41);
        let mut bp = SoftwareBreakpoint::new(0x3000);

        let err = bp.disable(&memory).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TargetError>(),
            Some(&TargetError::NotEnabled(0x3000))
        );
        assert_eq!(*memory.writes.borrow(), 0);
        assert_eq!(memory.word(0x3000), 0x41);
    }
}
