//! Emulated target RAM shared by host and agent

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use nvagent_core::config::AgentOptions;
use nvagent_core::error::{Error, Result};
use nvagent_core::mmio::{Addresses, Mailbox, MemoryMappedIo};
use nvagent_core::status::StatusWord;
use zerocopy::{FromBytes, IntoBytes};

/// Start of target RAM, where the agent's buffer goes by default
pub const RAM_BASE: u32 = 0x0200_0000;

/// What the host does before releasing a looping agent again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// New request register value
    pub request: u32,
    /// New source buffer contents, if the host reloads it
    pub data: Option<Vec<u8>>,
    /// Status word the host leaves before release, if any
    pub status: Option<StatusWord>,
}

impl Trigger {
    /// Re-run with a new request and the buffer left as it is
    pub fn request(request: u32) -> Self {
        Self {
            request,
            data: None,
            status: None,
        }
    }

    /// Reload the buffer and re-run with a new request
    pub fn with_data(request: u32, data: Vec<u8>) -> Self {
        Self {
            request,
            data: Some(data),
            status: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Region {
    Buffer,
    Mailbox,
}

/// Source buffer and control block as the agent sees them
///
/// The host side methods ([`TargetRam::load`], [`TargetRam::set_request`],
/// [`TargetRam::write_memory`], [`TargetRam::queue_trigger`]) play the
/// debugger; [`MemoryMappedIo`] is the agent's view. Every status store is
/// kept in a history so tests can check the sentinel/final ordering.
#[derive(Debug)]
pub struct TargetRam {
    buffer: Vec<u8>,
    mailbox: Mailbox,
    addresses: Addresses,
    triggers: VecDeque<Trigger>,
    status_history: Vec<StatusWord>,
}

impl TargetRam {
    /// RAM with a zeroed `buffer_size` byte source buffer at [`RAM_BASE`]
    /// and the control block right after it
    pub fn new(buffer_size: usize) -> Self {
        Self::with_addresses(
            buffer_size,
            Addresses {
                buffer: RAM_BASE,
                mailbox: RAM_BASE + buffer_size as u32,
            },
        )
    }

    /// RAM with the buffer and control block at board-specific addresses
    pub fn with_addresses(buffer_size: usize, addresses: Addresses) -> Self {
        Self {
            buffer: vec![0x00; buffer_size],
            mailbox: Mailbox::default(),
            addresses,
            triggers: VecDeque::new(),
            status_history: Vec::new(),
        }
    }

    /// Where the buffer and control block live
    pub fn addresses(&self) -> Addresses {
        self.addresses
    }

    /// Copy `data` to the start of the source buffer, zeroing the rest
    ///
    /// # Errors
    /// * `BufferTooSmall` - If `data` is longer than the buffer
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.buffer.len() {
            return Err(Error::BufferTooSmall);
        }
        self.buffer[..data.len()].copy_from_slice(data);
        self.buffer[data.len()..].fill(0x00);
        Ok(())
    }

    fn locate(&self, addr: u32, len: usize) -> Result<(Region, usize)> {
        let end = addr as u64 + len as u64;
        let regions = [
            (Region::Buffer, self.addresses.buffer, self.buffer.len()),
            (Region::Mailbox, self.addresses.mailbox, Mailbox::SIZE),
        ];
        for (region, base, size) in regions {
            let base = base as u64;
            if addr as u64 >= base && end <= base + size as u64 {
                return Ok((region, (addr as u64 - base) as usize));
            }
        }
        Err(Error::AddressOutOfBounds)
    }

    /// Write target memory the way a debugger does
    ///
    /// # Errors
    /// * `AddressOutOfBounds` - If the range is not inside the buffer or
    ///   inside the control block
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let (region, offset) = self.locate(addr, data.len())?;
        let bytes = match region {
            Region::Buffer => &mut self.buffer[..],
            Region::Mailbox => self.mailbox.as_mut_bytes(),
        };
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read target memory the way a debugger does
    ///
    /// # Errors
    /// * `AddressOutOfBounds` - Same as [`TargetRam::write_memory`]
    pub fn read_memory(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let (region, offset) = self.locate(addr, buf.len())?;
        let bytes = match region {
            Region::Buffer => &self.buffer[..],
            Region::Mailbox => self.mailbox.as_bytes(),
        };
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    /// Store a 32-bit word at `addr`
    ///
    /// # Errors
    /// * `InvalidAlignment` - If `addr` is not word aligned
    /// * `AddressOutOfBounds` - Same as [`TargetRam::write_memory`]
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        if addr % 4 != 0 {
            return Err(Error::InvalidAlignment);
        }
        self.write_memory(addr, &value.to_ne_bytes())
    }

    /// Load a 32-bit word from `addr`
    ///
    /// # Errors
    /// Same as [`TargetRam::write_word`]
    pub fn read_word(&self, addr: u32) -> Result<u32> {
        if addr % 4 != 0 {
            return Err(Error::InvalidAlignment);
        }
        let mut bytes = [0u8; 4];
        self.read_memory(addr, &mut bytes)?;
        Ok(u32::from_ne_bytes(bytes))
    }

    /// Write the request register
    pub fn set_request(&mut self, request: u32) {
        self.mailbox.request = request;
    }

    /// Write the status word from the host side
    pub fn set_status(&mut self, word: StatusWord) {
        self.mailbox.status = word.raw();
    }

    /// Poll the status word
    pub fn status(&self) -> StatusWord {
        self.mailbox.status_word()
    }

    /// Every status word the agent stored, oldest first
    pub fn status_history(&self) -> &[StatusWord] {
        &self.status_history
    }

    /// The control block
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// The control block as the host reads it over the debug link
    pub fn mailbox_bytes(&self) -> &[u8] {
        self.mailbox.as_bytes()
    }

    /// Overwrite the control block with bytes written over the debug link
    ///
    /// # Errors
    /// * `BufferTooSmall` - If `bytes` is not exactly one control block
    pub fn write_mailbox_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.mailbox = Mailbox::read_from_bytes(bytes).map_err(|_| Error::BufferTooSmall)?;
        Ok(())
    }

    /// Queue a release of the looping agent
    pub fn queue_trigger(&mut self, trigger: Trigger) {
        self.triggers.push_back(trigger);
    }

    /// Triggers not consumed yet
    pub fn pending_triggers(&self) -> usize {
        self.triggers.len()
    }
}

impl MemoryMappedIo for TargetRam {
    fn source(&self) -> &[u8] {
        &self.buffer
    }

    fn read_status(&self) -> StatusWord {
        self.mailbox.status_word()
    }

    fn write_status(&mut self, word: StatusWord) {
        self.mailbox.status = word.raw();
        self.status_history.push(word);
    }

    fn read_request_register(&self) -> u32 {
        self.mailbox.request
    }

    fn read_options(&self) -> Option<AgentOptions> {
        self.mailbox.options()
    }

    fn await_trigger(&mut self) -> bool {
        let Some(trigger) = self.triggers.pop_front() else {
            log::debug!("No host trigger queued, agent parks");
            return false;
        };

        if let Some(data) = trigger.data {
            if self.load(&data).is_err() {
                log::warn!(
                    "Trigger data of {} bytes does not fit the {} byte buffer, keeping the old contents",
                    data.len(),
                    self.buffer.len()
                );
            }
        }
        if let Some(word) = trigger.status {
            self.mailbox.status = word.raw();
        }
        self.mailbox.request = trigger.request;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvagent_core::status::{Status, StatusLayout};

    #[test]
    fn test_load_pads_with_zero() {
        let mut ram = TargetRam::new(8);
        ram.load(&[0xFF; 8]).unwrap();
        ram.load(&[1, 2, 3]).unwrap();
        assert_eq!(ram.source(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(ram.load(&[0; 9]), Err(Error::BufferTooSmall));
    }

    #[test]
    fn test_debug_link_access() {
        let addresses = Addresses {
            buffer: 0x0200_0000,
            mailbox: 0x0200_1000,
        };
        let mut ram = TargetRam::with_addresses(4096, addresses);

        ram.write_memory(0x0200_0010, &[0xDE, 0xAD]).unwrap();
        assert_eq!(&ram.source()[0x10..0x12], &[0xDE, 0xAD]);

        ram.write_word(addresses.request(), 0x3000).unwrap();
        assert_eq!(ram.read_request_register(), 0x3000);
        ram.write_word(addresses.options(), AgentOptions::SCAN_ALL.bits())
            .unwrap();
        assert_eq!(ram.read_options(), Some(AgentOptions::SCAN_ALL));

        ram.write_status(StatusWord::from_raw(2));
        assert_eq!(ram.read_word(addresses.status()), Ok(2));

        assert_eq!(ram.read_word(0x0200_1002), Err(Error::InvalidAlignment));
        // Past the control block, and a write straddling the buffer end
        assert_eq!(ram.read_word(0x0200_1010), Err(Error::AddressOutOfBounds));
        assert_eq!(
            ram.write_memory(0x0200_0FFE, &[0; 4]),
            Err(Error::AddressOutOfBounds)
        );
    }

    #[test]
    fn test_mailbox_over_debug_link() {
        let mut ram = TargetRam::new(16);
        ram.set_request(0x3000);
        ram.write_status(StatusWord::BUSY);

        let bytes = ram.mailbox_bytes().to_vec();
        assert_eq!(bytes.len(), Mailbox::SIZE);

        let mut other = TargetRam::new(16);
        other.write_mailbox_bytes(&bytes).unwrap();
        assert_eq!(other.read_request_register(), 0x3000);
        assert!(other.status().is_busy());
        assert_eq!(other.write_mailbox_bytes(&bytes[..8]), Err(Error::BufferTooSmall));
    }

    #[test]
    fn test_triggers_in_order() {
        let mut ram = TargetRam::new(4);
        ram.queue_trigger(Trigger::request(0x1000));
        let start = StatusWord::encode(StatusLayout::Extended, &Status::Start { page_count: 2 });
        ram.queue_trigger(Trigger {
            status: Some(start),
            ..Trigger::with_data(0x2000, vec![0xAB; 4])
        });

        assert!(ram.await_trigger());
        assert_eq!(ram.read_request_register(), 0x1000);
        assert_eq!(ram.source(), &[0x00; 4]);

        assert!(ram.await_trigger());
        assert_eq!(ram.read_request_register(), 0x2000);
        assert_eq!(ram.source(), &[0xAB; 4]);
        assert_eq!(ram.read_status(), start);

        assert!(!ram.await_trigger());
        assert_eq!(ram.pending_triggers(), 0);
    }

    #[test]
    fn test_status_history() {
        let mut ram = TargetRam::new(4);
        ram.set_status(StatusWord::from_raw(0x55));
        ram.write_status(StatusWord::BUSY);
        ram.write_status(StatusWord::from_raw(0));
        // Host-side writes are not part of the agent's history
        assert_eq!(
            ram.status_history(),
            &[StatusWord::BUSY, StatusWord::from_raw(0)]
        );
    }
}
