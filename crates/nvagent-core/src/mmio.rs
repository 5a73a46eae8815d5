//! Shared memory between host and agent
//!
//! The host reaches the agent only through target RAM: a source buffer it
//! fills before triggering a pass, and a small control block ([`Mailbox`])
//! holding the status word and the pass request. The agent sees both
//! through the [`MemoryMappedIo`] context object; on target that is
//! [`VolatileIo`], in tests and simulations an in-memory implementation.
//!
//! # Ownership
//!
//! There is no locking. While a pass runs, the region belongs to the
//! agent; the host only touches it while the core is halted or after the
//! status word left the START sentinel.

use core::ptr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::AgentOptions;
use crate::status::StatusWord;

/// Accessors for the host-shared region
pub trait MemoryMappedIo {
    /// The host-populated source buffer
    fn source(&self) -> &[u8];

    /// Current value of the status word
    fn read_status(&self) -> StatusWord;

    /// Publish a status word
    ///
    /// Must be a single aligned 32-bit store so the host never reads a
    /// torn value.
    fn write_status(&mut self, word: StatusWord);

    /// Value the host left in the request register
    fn read_request_register(&self) -> u32;

    /// Options the host asks for in this pass
    ///
    /// `None` keeps the configuration the agent was built with.
    fn read_options(&self) -> Option<AgentOptions> {
        None
    }

    /// Wait until the host releases the agent for another pass
    ///
    /// Returning `false` parks the agent for good (until external reset).
    fn await_trigger(&mut self) -> bool;
}

/// Control block layout shared with the host
///
/// All fields are 32-bit words in target byte order. The host reads and
/// writes this block over the debug link; [`zerocopy`] lets it convert the
/// raw bytes without hand-written offsets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Mailbox {
    /// Status word (see [`crate::status`])
    pub status: u32,
    /// Pass request: target offset or byte length, depending on the build
    pub request: u32,
    /// [`AgentOptions`] bits the host asks for, zero for the built-in
    /// configuration
    pub options: u32,
    /// Reserved, zero
    pub reserved: u32,
}

impl Mailbox {
    /// Size of the block in bytes
    pub const SIZE: usize = core::mem::size_of::<Self>();
    /// Byte offset of the status word
    pub const STATUS_OFFSET: usize = core::mem::offset_of!(Mailbox, status);
    /// Byte offset of the request word
    pub const REQUEST_OFFSET: usize = core::mem::offset_of!(Mailbox, request);
    /// Byte offset of the options word
    pub const OPTIONS_OFFSET: usize = core::mem::offset_of!(Mailbox, options);

    /// The status field as a status word
    pub fn status_word(&self) -> StatusWord {
        StatusWord::from_raw(self.status)
    }

    /// The options field, unknown bits dropped
    ///
    /// A zero field means the host asks for nothing.
    pub fn options(&self) -> Option<AgentOptions> {
        (self.options != 0).then(|| AgentOptions::from_bits_truncate(self.options))
    }
}

/// Where the source buffer and the [`Mailbox`] live in target RAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addresses {
    /// Start of the source buffer
    pub buffer: u32,
    /// Start of the control block
    pub mailbox: u32,
}

impl Addresses {
    /// Address of the status word
    pub fn status(&self) -> u32 {
        self.mailbox + Mailbox::STATUS_OFFSET as u32
    }

    /// Address of the request word
    pub fn request(&self) -> u32 {
        self.mailbox + Mailbox::REQUEST_OFFSET as u32
    }

    /// Address of the options word
    pub fn options(&self) -> u32 {
        self.mailbox + Mailbox::OPTIONS_OFFSET as u32
    }
}

/// [`MemoryMappedIo`] over raw target addresses
///
/// Every access is volatile: the host changes the region behind the
/// compiler's back while the core is halted.
pub struct VolatileIo<T> {
    buffer: *const u8,
    buffer_len: usize,
    mailbox: *mut Mailbox,
    trigger: T,
}

impl<T: FnMut() -> bool> VolatileIo<T> {
    /// Bind to a buffer and mailbox at fixed addresses
    ///
    /// `trigger` implements [`MemoryMappedIo::await_trigger`], typically a
    /// short delay returning `true` for the looping agent.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `buffer..buffer + buffer_len` is readable for the agent's lifetime
    /// - `mailbox` is valid, 4-byte aligned, and not used by other code
    /// - the host only writes the region under the halt/poll discipline
    pub unsafe fn new(buffer: *const u8, buffer_len: usize, mailbox: *mut Mailbox, trigger: T) -> Self {
        Self {
            buffer,
            buffer_len,
            mailbox,
            trigger,
        }
    }

    /// Bind to the placement of a board profile
    ///
    /// # Safety
    ///
    /// Same as [`VolatileIo::new`], for the addresses in `addresses`.
    pub unsafe fn at(addresses: &Addresses, buffer_len: usize, trigger: T) -> Self {
        Self::new(
            addresses.buffer as usize as *const u8,
            buffer_len,
            addresses.mailbox as usize as *mut Mailbox,
            trigger,
        )
    }
}

impl<T: FnMut() -> bool> MemoryMappedIo for VolatileIo<T> {
    fn source(&self) -> &[u8] {
        // SAFETY: validity of the range is a precondition of `new`
        unsafe { core::slice::from_raw_parts(self.buffer, self.buffer_len) }
    }

    fn read_status(&self) -> StatusWord {
        // SAFETY: `mailbox` is valid and aligned per `new`
        let raw = unsafe { ptr::read_volatile(ptr::addr_of!((*self.mailbox).status)) };
        StatusWord::from_raw(raw)
    }

    fn write_status(&mut self, word: StatusWord) {
        // SAFETY: `mailbox` is valid and aligned per `new`; an aligned u32
        // volatile store is a single bus write
        unsafe { ptr::write_volatile(ptr::addr_of_mut!((*self.mailbox).status), word.raw()) }
    }

    fn read_request_register(&self) -> u32 {
        // SAFETY: `mailbox` is valid and aligned per `new`
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.mailbox).request)) }
    }

    fn read_options(&self) -> Option<AgentOptions> {
        // SAFETY: `mailbox` is valid and aligned per `new`
        let mailbox = Mailbox {
            options: unsafe { ptr::read_volatile(ptr::addr_of!((*self.mailbox).options)) },
            ..Default::default()
        };
        mailbox.options()
    }

    fn await_trigger(&mut self) -> bool {
        (self.trigger)()
    }
}
