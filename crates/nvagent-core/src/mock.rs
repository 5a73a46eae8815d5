//! Recording mocks shared by the unit tests

extern crate std;

use std::vec;
use std::vec::Vec;

use crate::config::AgentOptions;
use crate::error::{Error, HalOp, Result};
use crate::hal::NvMemory;
use crate::mmio::MemoryMappedIo;
use crate::status::StatusWord;

/// Operation recorded by [`MockMemory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    EraseSector(u32),
    EraseAll,
    Program(u32, usize),
    Read(u32, usize),
    Map,
}

/// Byte-addressable memory that records every call
///
/// Programming overwrites; stuck bytes keep their value regardless of
/// what is programmed, which is how tests model corruption.
pub struct MockMemory {
    pub mem: Vec<u8>,
    pub ops: Vec<Op>,
    pub stuck: Vec<(u32, u8)>,
    pub has_window: bool,
    /// Caps the mapped window, modelling a controller that maps less
    pub window_limit: Option<usize>,
    pub fail_program_at: Option<u32>,
    pub fail_erase: bool,
}

impl MockMemory {
    pub fn new(size: usize) -> Self {
        Self {
            mem: vec![0xFF; size],
            ops: Vec::new(),
            stuck: Vec::new(),
            has_window: false,
            window_limit: None,
            fail_program_at: None,
            fail_erase: false,
        }
    }

    pub fn with_window(size: usize) -> Self {
        Self {
            has_window: true,
            ..Self::new(size)
        }
    }

    pub fn programs(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, Op::Program(..)))
            .count()
    }

    pub fn erases(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, Op::EraseSector(_) | Op::EraseAll))
            .count()
    }

    fn apply_stuck(&mut self) {
        for &(addr, value) in &self.stuck {
            self.mem[addr as usize] = value;
        }
    }
}

impl NvMemory for MockMemory {
    fn erase_sector(&mut self, addr: u32, _timeout: u32) -> Result<()> {
        self.ops.push(Op::EraseSector(addr));
        if self.fail_erase {
            return Err(Error::Timeout {
                op: HalOp::EraseSector,
                addr,
            });
        }
        let start = addr as usize;
        self.mem[start..start + 4096].fill(0xFF);
        self.apply_stuck();
        Ok(())
    }

    fn erase_all(&mut self, _timeout: u32) -> Result<()> {
        self.ops.push(Op::EraseAll);
        if self.fail_erase {
            return Err(Error::Timeout {
                op: HalOp::EraseAll,
                addr: 0,
            });
        }
        self.mem.fill(0xFF);
        self.apply_stuck();
        Ok(())
    }

    fn program_page(&mut self, addr: u32, data: &[u8], _timeout: u32) -> Result<()> {
        self.ops.push(Op::Program(addr, data.len()));
        if self.fail_program_at == Some(addr) {
            return Err(Error::Timeout {
                op: HalOp::ProgramPage,
                addr,
            });
        }
        let start = addr as usize;
        self.mem[start..start + data.len()].copy_from_slice(data);
        self.apply_stuck();
        Ok(())
    }

    fn read_page(&mut self, addr: u32, buf: &mut [u8], _timeout: u32) -> Result<()> {
        self.ops.push(Op::Read(addr, buf.len()));
        let start = addr as usize;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        Ok(())
    }

    fn enable_mapped_read(&mut self, _timeout: u32) -> Result<bool> {
        self.ops.push(Op::Map);
        Ok(self.has_window)
    }

    fn mapped_window(&self, addr: u32, len: usize) -> Option<&[u8]> {
        if !self.has_window {
            return None;
        }
        let start = addr as usize;
        let len = self.window_limit.map_or(len, |limit| len.min(limit));
        self.mem.get(start..start + len)
    }
}

/// Shared memory double that records every status store
pub struct MockIo {
    pub buffer: Vec<u8>,
    pub status: StatusWord,
    pub register: u32,
    pub writes: Vec<StatusWord>,
    /// Register values handed out on successive triggers
    pub triggers: Vec<u32>,
    pub options: Option<AgentOptions>,
}

impl MockIo {
    pub fn new(buffer: Vec<u8>, register: u32) -> Self {
        Self {
            buffer,
            status: StatusWord::from_raw(0),
            register,
            writes: Vec::new(),
            triggers: Vec::new(),
            options: None,
        }
    }
}

impl MemoryMappedIo for MockIo {
    fn source(&self) -> &[u8] {
        &self.buffer
    }

    fn read_status(&self) -> StatusWord {
        self.status
    }

    fn write_status(&mut self, word: StatusWord) {
        self.status = word;
        self.writes.push(word);
    }

    fn read_request_register(&self) -> u32 {
        self.register
    }

    fn read_options(&self) -> Option<AgentOptions> {
        self.options
    }

    fn await_trigger(&mut self) -> bool {
        if self.triggers.is_empty() {
            return false;
        }
        self.register = self.triggers.remove(0);
        true
    }
}
