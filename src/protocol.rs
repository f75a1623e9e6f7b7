//! ISP instruction set and ATmega8 device geometry.
//!
//! Every instruction is a 4 byte frame `(op, addr_hi, addr_lo, data)`. The
//! target shifts out its response while the frame is shifted in, echoing the
//! previous byte one position late, and the 4th response byte carries the
//! result of read instructions.

/// Total flash size in bytes
pub const FLASH_SIZE: usize = 8 * 1024;

/// Flash page size in 16-bit words
pub const PAGE_SIZE_WORDS: usize = 32;

/// Flash page size in bytes
pub const PAGE_SIZE_BYTES: usize = 64;

/// Number of pages in flash
pub const PAGE_COUNT: usize = FLASH_SIZE / PAGE_SIZE_BYTES;

/// Size of a single instruction (and response) frame
pub const INSTRUCTION_SIZE: usize = 4;

/// Default transfer buffer size, one page worth of load instructions
pub const BUFFER_SIZE: usize = PAGE_SIZE_BYTES * INSTRUCTION_SIZE;

/// Expected signature (Atmel, 8 KiB flash, ATmega8)
pub const SIGNATURE: [u8; 3] = [0x1E, 0x93, 0x07];

/// Reset line hold time for a reset pulse
pub const RESET_DELAY_MS: u32 = 100;

/// Settle time after chip erase, page write and fuse write
pub const WRITE_DELAY_MS: u32 = 10;

const _: () = assert!(PAGE_SIZE_BYTES == PAGE_SIZE_WORDS * 2);
const _: () = assert!(FLASH_SIZE % PAGE_SIZE_BYTES == 0);

/// Instruction opcodes (first frame byte)
pub mod opcode {
    /// Programming enable, chip erase and fuse writes (selected by 2nd byte)
    pub const ISP_CONTROL: u8 = 0xAC;
    /// Read signature byte
    pub const READ_SIGNATURE: u8 = 0x30;
    /// Read fuse bits, bit 3 selects the high fuse
    pub const READ_FUSE: u8 = 0x50;
    /// Read program memory, bit 3 selects the high byte
    pub const READ_PROGRAM: u8 = 0x20;
    /// Load program memory page, bit 3 selects the high byte
    pub const LOAD_PAGE: u8 = 0x40;
    /// Write program memory page
    pub const WRITE_PAGE: u8 = 0x4C;

    /// Second byte of the programming enable instruction, echoed on success
    pub const PROGRAMMING_ENABLE: u8 = 0x53;
    /// Second byte of the chip erase instruction
    pub const CHIP_ERASE: u8 = 0x80;
    /// Second byte of the write fuse instruction, bit 3 selects the high fuse
    pub const WRITE_FUSE: u8 = 0xA0;

    /// High byte / high fuse select bit
    pub const HIGH_BIT: u8 = 0x08;
}

/// Fuse register selector
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Fuse {
    Low,
    High,
}

impl Fuse {
    fn select(self) -> u8 {
        match self {
            Fuse::Low => 0,
            Fuse::High => opcode::HIGH_BIT,
        }
    }
}

impl core::fmt::Display for Fuse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Fuse::Low => write!(f, "low"),
            Fuse::High => write!(f, "high"),
        }
    }
}

/// Build an instruction frame
pub fn encode(op: u8, b2: u8, b3: u8, b4: u8) -> [u8; INSTRUCTION_SIZE] {
    [op, b2, b3, b4]
}

/// Fetch the result byte from a response frame
pub fn decode_result(response: &[u8]) -> u8 {
    response[INSTRUCTION_SIZE - 1]
}

/// Byte select bit for the given byte offset, odd offsets address the high byte
fn byte_select(offset: usize) -> u8 {
    if offset % 2 == 1 {
        opcode::HIGH_BIT
    } else {
        0
    }
}

pub fn programming_enable() -> [u8; INSTRUCTION_SIZE] {
    encode(opcode::ISP_CONTROL, opcode::PROGRAMMING_ENABLE, 0x00, 0x00)
}

pub fn chip_erase() -> [u8; INSTRUCTION_SIZE] {
    encode(opcode::ISP_CONTROL, opcode::CHIP_ERASE, 0x00, 0x00)
}

pub fn read_signature(addr: u8) -> [u8; INSTRUCTION_SIZE] {
    encode(opcode::READ_SIGNATURE, 0x00, addr, 0x00)
}

pub fn read_fuse(fuse: Fuse) -> [u8; INSTRUCTION_SIZE] {
    encode(opcode::READ_FUSE | fuse.select(), 0x00, 0x00, 0x00)
}

pub fn write_fuse(fuse: Fuse, value: u8) -> [u8; INSTRUCTION_SIZE] {
    encode(
        opcode::ISP_CONTROL,
        opcode::WRITE_FUSE | fuse.select(),
        0x00,
        value,
    )
}

/// Read the byte at `offset` bytes past `word_address`
pub fn read_program(word_address: u16, offset: usize) -> [u8; INSTRUCTION_SIZE] {
    let addr = word_address.wrapping_add((offset / 2) as u16);
    encode(
        opcode::READ_PROGRAM | byte_select(offset),
        (addr >> 8) as u8,
        (addr & 0xFF) as u8,
        0x00,
    )
}

/// Load `data` into the page buffer at byte `offset` within the page.
///
/// Only the intra-page word address is sent, the page is selected on commit.
pub fn load_page(offset: usize, data: u8) -> [u8; INSTRUCTION_SIZE] {
    encode(
        opcode::LOAD_PAGE | byte_select(offset),
        0x00,
        (offset / 2) as u8,
        data,
    )
}

/// Commit the page buffer to flash page `page`
pub fn write_page(page: usize) -> [u8; INSTRUCTION_SIZE] {
    encode(
        opcode::WRITE_PAGE,
        ((page >> 3) & 0xFF) as u8,
        ((page << 5) & 0xFF) as u8,
        0x00,
    )
}
