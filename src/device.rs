pub const BLOCK_SIZE: usize = 512;

/// One addressable unit of the medium. Always caller-owned; the block
/// engine fills or drains it and never keeps a reference past the call.
pub type Block = [u8; BLOCK_SIZE];

/// The only view of storage the FAT layer gets. Addresses count 512-byte
/// blocks regardless of how the underlying card addresses itself.
pub trait BlockDevice {
    type Error;

    fn read_block(&mut self, address: u32, out: &mut Block) -> Result<(), Self::Error>;
    fn write_block(&mut self, address: u32, data: &Block) -> Result<(), Self::Error>;
    fn erase_blocks(&mut self, start: u32, end: u32) -> Result<(), Self::Error>;
}
