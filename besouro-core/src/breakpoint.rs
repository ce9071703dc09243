//! ブレークポイント管理

use crate::Result;
use besouro_target::{SoftwareBreakpoint, WordMemory, INT3_OPCODE};
use std::collections::HashMap;
use tracing::debug;

/// ブレークポイントの集合
///
/// アドレスごとに1つのソフトウェアブレークポイント（INT3）を所有します。
#[derive(Debug, Default)]
pub struct BreakpointSet {
    breakpoints: HashMap<u64, SoftwareBreakpoint>,
}

impl BreakpointSet {
    /// 空のブレークポイント集合を作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// ブレークポイントを追加し、有効化する
    ///
    /// 同じアドレスに既存のブレークポイントがある場合は置き換えます。
    /// 新しいブレークポイントが本来の命令バイトを保存できるよう、先に既存のものを無効化します。
    pub fn insert_and_enable(&mut self, address: u64, memory: &impl WordMemory) -> Result<()> {
        if let Some(previous) = self.breakpoints.get_mut(&address) {
            if previous.is_enabled() {
                debug!("replacing enabled breakpoint at 0x{:x}", address);
                previous.disable(memory)?;
            }
        }

        let mut bp = SoftwareBreakpoint::new(address);
        bp.enable(memory)?;
        self.breakpoints.insert(address, bp);
        Ok(())
    }

    /// アドレスのブレークポイントを取得する
    pub fn get(&self, address: u64) -> Option<&SoftwareBreakpoint> {
        self.breakpoints.get(&address)
    }

    /// アドレスのブレークポイントを可変参照で取得する
    pub fn get_mut(&mut self, address: u64) -> Option<&mut SoftwareBreakpoint> {
        self.breakpoints.get_mut(&address)
    }

    /// アドレスに有効なブレークポイントがあるかどうか
    pub fn is_enabled_at(&self, address: u64) -> bool {
        self.get(address).is_some_and(|bp| bp.is_enabled())
    }

    /// 全てのブレークポイントをアドレス順に取得する
    pub fn all(&self) -> Vec<&SoftwareBreakpoint> {
        let mut all: Vec<_> = self.breakpoints.values().collect();
        all.sort_by_key(|bp| bp.address());
        all
    }

    /// ブレークポイントの数を取得する
    pub fn count(&self) -> usize {
        self.breakpoints.len()
    }

    /// メモリから読み取ったバイト列のうち、有効なブレークポイントのINT3を元のバイトに戻す
    ///
    /// `bytes` は `base` から始まるメモリの内容です。
    pub fn restore_original_bytes(&self, base: u64, bytes: &mut [u8]) {
        let end = base.saturating_add(bytes.len() as u64);
        for bp in self.breakpoints.values() {
            if bp.is_enabled() && bp.address() >= base && bp.address() < end {
                bytes[(bp.address() - base) as usize] = bp.original_byte();
            }
        }
    }

    /// これから書き込むバイト列のうち、有効なブレークポイントの位置をINT3に差し替える
    ///
    /// 差し替えたアドレスと本来書き込むはずだったバイトの組を返します。
    /// 書き込みが成功したら [`BreakpointSet::record_written_bytes`] に渡してください。
    pub fn overlay_write(&self, base: u64, bytes: &mut [u8]) -> Vec<(u64, u8)> {
        let end = base.saturating_add(bytes.len() as u64);
        let mut covered = Vec::new();
        for bp in self.breakpoints.values() {
            if bp.is_enabled() && bp.address() >= base && bp.address() < end {
                let index = (bp.address() - base) as usize;
                covered.push((bp.address(), bytes[index]));
                bytes[index] = INT3_OPCODE;
            }
        }
        covered
    }

    /// INT3の下に書き込まれたバイトを各ブレークポイントの元のバイトとして記録する
    pub fn record_written_bytes(&mut self, written: &[(u64, u8)]) -> Result<()> {
        for &(address, byte) in written {
            if let Some(bp) = self.breakpoints.get_mut(&address) {
                bp.replace_original_byte(byte)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeMemory {
        words: RefCell<HashMap<u64, u64>>,
        fail_writes: Cell<bool>,
    }

    impl FakeMemory {
        fn byte(&self, addr: u64) -> u8 {
            (self.words.borrow().get(&addr).copied().unwrap_or(0) & 0xFF) as u8
        }
    }

    impl WordMemory for FakeMemory {
        fn read_word(&self, addr: u64) -> Result<u64> {
            Ok(self.words.borrow().get(&addr).copied().unwrap_or(0))
        }

        fn write_word(&self, addr: u64, word: u64) -> Result<()> {
            if self.fail_writes.get() {
                anyhow::bail!("write to 0x{:x} failed", addr);
            }
            self.words.borrow_mut().insert(addr, word);
            Ok(())
        }
    }

    #[test]
    fn test_insert_enables_breakpoint() {
        let memory = FakeMemory::default();
        memory.write_word(0x1000, 0x55).unwrap();

        let mut set = BreakpointSet::new();
        set.insert_and_enable(0x1000, &memory).unwrap();

        assert!(set.is_enabled_at(0x1000));
        assert!(!set.is_enabled_at(0x1001));
        assert_eq!(memory.byte(0x1000), INT3_OPCODE);
        assert_eq!(set.get(0x1000).unwrap().original_byte(), 0x55);
    }

    #[test]
    fn test_same_address_replaces_previous() {
        let memory = FakeMemory::default();
        memory.write_word(0x1000, 0x55).unwrap();

        let mut set = BreakpointSet::new();
        set.insert_and_enable(0x1000, &memory).unwrap();
        set.insert_and_enable(0x1000, &memory).unwrap();

        assert_eq!(set.count(), 1);
        let bp = set.get(0x1000).unwrap();
        assert!(bp.is_enabled());
        // 置き換え後も本来の命令バイトを保持している
        assert_eq!(bp.original_byte(), 0x55);
        assert_eq!(memory.byte(0x1000), INT3_OPCODE);

        set.get_mut(0x1000).unwrap().disable(&memory).unwrap();
        assert_eq!(memory.byte(0x1000), 0x55);
    }

    #[test]
    fn test_failed_replacement_keeps_tracking_breakpoint() {
        let memory = FakeMemory::default();
        memory.write_word(0x1000, 0x55).unwrap();

        let mut set = BreakpointSet::new();
        set.insert_and_enable(0x1000, &memory).unwrap();

        memory.fail_writes.set(true);
        assert!(set.insert_and_enable(0x1000, &memory).is_err());

        // INT3はメモリに残っているので、ブレークポイントも有効なまま残る
        assert_eq!(set.count(), 1);
        assert!(set.is_enabled_at(0x1000));
        assert_eq!(memory.byte(0x1000), INT3_OPCODE);
        assert_eq!(set.get(0x1000).unwrap().original_byte(), 0x55);
    }

    #[test]
    fn test_overlay_write_keeps_trap_and_records_byte() {
        let memory = FakeMemory::default();
        memory.write_word(0x1002, 0x48).unwrap();

        let mut set = BreakpointSet::new();
        set.insert_and_enable(0x1002, &memory).unwrap();

        let mut bytes = [0x90_u8; 4];
        let written = set.overlay_write(0x1000, &mut bytes);
        assert_eq!(bytes, [0x90, 0x90, INT3_OPCODE, 0x90]);
        assert_eq!(written, vec![(0x1002, 0x90)]);

        set.record_written_bytes(&written).unwrap();
        let mut read = [INT3_OPCODE; 4];
        set.restore_original_bytes(0x1000, &mut read);
        assert_eq!(read[2], 0x90);

        set.get_mut(0x1002).unwrap().disable(&memory).unwrap();
        assert_eq!(memory.byte(0x1002), 0x90);
    }

    #[test]
    fn test_all_is_sorted_by_address() {
        let memory = FakeMemory::default();
        let mut set = BreakpointSet::new();
        for addr in [0x3000, 0x1000, 0x2000] {
            set.insert_and_enable(addr, &memory).unwrap();
        }

        let addresses: Vec<u64> = set.all().iter().map(|bp| bp.address()).collect();
        assert_eq!(addresses, vec![0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn test_restore_original_bytes() {
        let memory = FakeMemory::default();
        memory.write_word(0x1002, 0x48).unwrap();
        memory.write_word(0x1010, 0x90).unwrap();

        let mut set = BreakpointSet::new();
        set.insert_and_enable(0x1002, &memory).unwrap();
        set.insert_and_enable(0x1010, &memory).unwrap();

        let mut bytes = [0xCC_u8; 4];
        set.restore_original_bytes(0x1000, &mut bytes);
        assert_eq!(bytes, [0xCC, 0xCC, 0x48, 0xCC]);
    }
}
