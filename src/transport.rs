use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

/// Byte-serial link to the card. One full-duplex exchange per call; receive
/// is an exchange of the 0xFF fill byte. Chip-select stays under explicit
/// caller control so one logical command sequence owns the bus end to end.
pub trait Transport {
    type Error;

    fn init_master_mode(&mut self) -> Result<(), Self::Error>;
    fn transfer_byte(&mut self, byte: u8) -> Result<u8, Self::Error>;
    fn assert_select(&mut self);
    fn deassert_select(&mut self);
    fn delay_us(&mut self, us: u32);
}

pub struct SpiTransport<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
}

impl<SPI, CS, D> SpiTransport<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, mut cs: CS, delay: D) -> Self {
        let _ = cs.set_high();
        Self { spi, cs, delay }
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }
}

impl<SPI, CS, D> Transport for SpiTransport<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = SPI::Error;

    fn init_master_mode(&mut self) -> Result<(), Self::Error> {
        let _ = self.cs.set_high();
        self.spi.flush()
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut frame = [byte];
        self.spi.transfer_in_place(&mut frame)?;
        Ok(frame[0])
    }

    fn assert_select(&mut self) {
        let _ = self.cs.set_low();
    }

    fn deassert_select(&mut self) {
        let _ = self.cs.set_high();
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}
