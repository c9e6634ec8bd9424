//! Minimal MFRC522 driver: enough to detect an ISO 14443A tag and read the
//! cascade level 1 serial number.

use embedded_hal::spi::SpiDevice;
use log::debug;

use crate::messages::{UID_LEN, Uid};
use crate::rfid::{RfidError, TagReader};

// Registers
const COMMAND_REG: u8 = 0x01;
const COMM_IEN_REG: u8 = 0x02;
const COMM_IRQ_REG: u8 = 0x04;
const ERROR_REG: u8 = 0x06;
const FIFO_DATA_REG: u8 = 0x09;
const FIFO_LEVEL_REG: u8 = 0x0A;
const CONTROL_REG: u8 = 0x0C;
const BIT_FRAMING_REG: u8 = 0x0D;
const MODE_REG: u8 = 0x11;
const TX_CONTROL_REG: u8 = 0x14;
const TX_AUTO_REG: u8 = 0x15;
const T_MODE_REG: u8 = 0x2A;
const T_PRESCALER_REG: u8 = 0x2B;
const T_RELOAD_REG_H: u8 = 0x2C;
const T_RELOAD_REG_L: u8 = 0x2D;
const VERSION_REG: u8 = 0x37;

// Reader commands
const PCD_IDLE: u8 = 0x00;
const PCD_TRANSCEIVE: u8 = 0x0C;
const PCD_RESETPHASE: u8 = 0x0F;

// Tag commands
const PICC_REQIDL: u8 = 0x26;
const PICC_ANTICOLL: u8 = 0x93;

const IRQ_EN: u8 = 0x77;
const IRQ_WAIT: u8 = 0x30;
const IRQ_TIMER: u8 = 0x01;
const ERROR_MASK: u8 = 0x1B;
const POWER_DOWN: u8 = 0x10;
const START_SEND: u8 = 0x80;
const FIFO_FLUSH: u8 = 0x80;
const FIFO_MAX: usize = 16;
const MAX_IRQ_POLLS: usize = 2000;
const MAX_RESET_POLLS: usize = 100;

/// ATQA answer to a REQA, in bits.
const ATQA_BITS: usize = 16;

pub struct Mfrc522<SPI> {
    spi: SPI,
}

type Result<T, E> = std::result::Result<T, RfidError<E>>;

impl<SPI: SpiDevice> Mfrc522<SPI> {
    pub fn new(spi: SPI) -> Self {
        Mfrc522 { spi }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), SPI::Error> {
        self.spi
            .write(&[(reg << 1) & 0x7E, value])
            .map_err(RfidError::Spi)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, SPI::Error> {
        let mut buf = [((reg << 1) & 0x7E) | 0x80, 0];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(RfidError::Spi)?;
        Ok(buf[1])
    }

    fn set_bits(&mut self, reg: u8, mask: u8) -> Result<(), SPI::Error> {
        let value = self.read_reg(reg)?;
        self.write_reg(reg, value | mask)
    }

    fn clear_bits(&mut self, reg: u8, mask: u8) -> Result<(), SPI::Error> {
        let value = self.read_reg(reg)?;
        self.write_reg(reg, value & !mask)
    }

    /// Soft-resets the chip and programs the timer, modulation and antenna.
    pub fn init(&mut self) -> Result<(), SPI::Error> {
        self.write_reg(COMMAND_REG, PCD_RESETPHASE)?;
        let mut ready = false;
        for _ in 0..MAX_RESET_POLLS {
            if self.read_reg(COMMAND_REG)? & POWER_DOWN == 0 {
                ready = true;
                break;
            }
        }
        if !ready {
            return Err(RfidError::Timeout);
        }

        // Timer: TAuto, prescaler 0xD3E, reload 30 => about 25ms
        self.write_reg(T_MODE_REG, 0x8D)?;
        self.write_reg(T_PRESCALER_REG, 0x3E)?;
        self.write_reg(T_RELOAD_REG_L, 30)?;
        self.write_reg(T_RELOAD_REG_H, 0)?;
        // 100% ASK
        self.write_reg(TX_AUTO_REG, 0x40)?;
        // CRC preset 0x6363
        self.write_reg(MODE_REG, 0x3D)?;
        self.antenna_on()
    }

    fn antenna_on(&mut self) -> Result<(), SPI::Error> {
        let value = self.read_reg(TX_CONTROL_REG)?;
        if value & 0x03 != 0x03 {
            self.set_bits(TX_CONTROL_REG, 0x03)?;
        }
        Ok(())
    }

    pub fn version(&mut self) -> Result<u8, SPI::Error> {
        self.read_reg(VERSION_REG)
    }

    /// Sends `data` to the tag and returns the answer with its length in bits.
    fn transceive(&mut self, data: &[u8]) -> Result<(Vec<u8>, usize), SPI::Error> {
        self.write_reg(COMM_IEN_REG, IRQ_EN | 0x80)?;
        self.write_reg(COMM_IRQ_REG, 0x7F)?;
        self.write_reg(FIFO_LEVEL_REG, FIFO_FLUSH)?;
        self.write_reg(COMMAND_REG, PCD_IDLE)?;

        for &b in data {
            self.write_reg(FIFO_DATA_REG, b)?;
        }

        self.write_reg(COMMAND_REG, PCD_TRANSCEIVE)?;
        self.set_bits(BIT_FRAMING_REG, START_SEND)?;

        let mut irq = 0;
        for _ in 0..MAX_IRQ_POLLS {
            irq = self.read_reg(COMM_IRQ_REG)?;
            if irq & (IRQ_WAIT | IRQ_TIMER) != 0 {
                break;
            }
        }
        self.clear_bits(BIT_FRAMING_REG, START_SEND)?;

        if irq & IRQ_WAIT == 0 {
            return Err(if irq & IRQ_TIMER != 0 {
                RfidError::NoTag
            } else {
                RfidError::Timeout
            });
        }

        let error = self.read_reg(ERROR_REG)?;
        if error & ERROR_MASK != 0 {
            return Err(RfidError::Protocol(error));
        }

        let level = (self.read_reg(FIFO_LEVEL_REG)? & 0x7F) as usize;
        let last_bits = (self.read_reg(CONTROL_REG)? & 0x07) as usize;
        let bits = if last_bits != 0 {
            level.saturating_sub(1) * 8 + last_bits
        } else {
            level * 8
        };

        let count = level.min(FIFO_MAX);
        let mut answer = Vec::with_capacity(count);
        for _ in 0..count {
            answer.push(self.read_reg(FIFO_DATA_REG)?);
        }
        Ok((answer, bits))
    }
}

impl<SPI: SpiDevice> TagReader for Mfrc522<SPI> {
    type Error = RfidError<SPI::Error>;

    fn is_card(&mut self) -> std::result::Result<bool, Self::Error> {
        // REQA is a short frame of 7 bits
        self.write_reg(BIT_FRAMING_REG, 0x07)?;
        match self.transceive(&[PICC_REQIDL]) {
            Ok((_, bits)) => Ok(bits == ATQA_BITS),
            Err(RfidError::NoTag) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_card_serial(&mut self) -> std::result::Result<Uid, Self::Error> {
        self.write_reg(BIT_FRAMING_REG, 0x00)?;
        let (answer, _) = self.transceive(&[PICC_ANTICOLL, 0x20])?;

        let serial: [u8; UID_LEN] = answer
            .as_slice()
            .try_into()
            .map_err(|_| RfidError::BadLength(answer.len()))?;
        let check = serial[..UID_LEN - 1].iter().fold(0, |acc, b| acc ^ b);
        if check != serial[UID_LEN - 1] {
            debug!("Serial {:02x?} failed check byte {:#04x}", serial, check);
            return Err(RfidError::Checksum);
        }
        Ok(Uid::new(serial))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::convert::Infallible;

    use embedded_hal::spi::{ErrorType, Operation};

    use super::*;

    /// Register-level stand-in for the chip with an optional tag in its field.
    struct FakeChip {
        regs: [u8; 64],
        fifo: VecDeque<u8>,
        tag: Option<[u8; UID_LEN]>,
        atqa: Vec<u8>,
        error: u8,
    }

    impl FakeChip {
        fn new(tag: Option<[u8; UID_LEN]>) -> Self {
            FakeChip {
                regs: [0; 64],
                fifo: VecDeque::new(),
                tag,
                atqa: vec![0x04, 0x00],
                error: 0,
            }
        }

        fn write_reg(&mut self, reg: u8, value: u8) {
            match reg {
                COMM_IRQ_REG => {
                    if value & 0x80 != 0 {
                        self.regs[reg as usize] |= value & 0x7F;
                    } else {
                        self.regs[reg as usize] &= !value;
                    }
                }
                FIFO_LEVEL_REG => {
                    if value & FIFO_FLUSH != 0 {
                        self.fifo.clear();
                    }
                }
                FIFO_DATA_REG => self.fifo.push_back(value),
                BIT_FRAMING_REG => {
                    self.regs[reg as usize] = value;
                    if value & START_SEND != 0 && self.regs[COMMAND_REG as usize] == PCD_TRANSCEIVE
                    {
                        self.exchange();
                    }
                }
                COMMAND_REG if value == PCD_RESETPHASE => {
                    self.regs = [0; 64];
                    self.fifo.clear();
                }
                _ => self.regs[reg as usize] = value,
            }
        }

        fn read_reg(&mut self, reg: u8) -> u8 {
            match reg {
                FIFO_LEVEL_REG => self.fifo.len() as u8,
                FIFO_DATA_REG => self.fifo.pop_front().unwrap_or(0),
                ERROR_REG => self.error,
                VERSION_REG => 0x92,
                _ => self.regs[reg as usize],
            }
        }

        fn exchange(&mut self) {
            let sent: Vec<u8> = self.fifo.drain(..).collect();
            let answer = match (sent.as_slice(), self.tag) {
                ([PICC_REQIDL], Some(_)) => Some(self.atqa.clone()),
                ([PICC_ANTICOLL, 0x20], Some(tag)) => Some(tag.to_vec()),
                _ => None,
            };
            let irq = &mut self.regs[COMM_IRQ_REG as usize];
            match answer {
                Some(answer) => {
                    self.fifo.extend(answer);
                    *irq |= IRQ_WAIT;
                }
                None => *irq |= IRQ_TIMER,
            }
        }
    }

    impl ErrorType for FakeChip {
        type Error = Infallible;
    }

    impl SpiDevice for FakeChip {
        fn transaction(
            &mut self,
            operations: &mut [Operation<'_, u8>],
        ) -> std::result::Result<(), Infallible> {
            for op in operations {
                match op {
                    Operation::Write(buf) => self.write_reg((buf[0] >> 1) & 0x3F, buf[1]),
                    Operation::TransferInPlace(buf) => buf[1] = self.read_reg((buf[0] >> 1) & 0x3F),
                    _ => panic!("unexpected SPI operation"),
                }
            }
            Ok(())
        }
    }

    const TAG: [u8; UID_LEN] = [0xde, 0xad, 0xbe, 0xef, 0x22];

    #[test]
    fn test_init() {
        let mut reader = Mfrc522::new(FakeChip::new(None));
        reader.init().unwrap();
        assert_eq!(reader.version().unwrap(), 0x92);
        assert_eq!(reader.spi.regs[TX_CONTROL_REG as usize] & 0x03, 0x03);
        assert_eq!(reader.spi.regs[T_MODE_REG as usize], 0x8D);
        assert_eq!(reader.spi.regs[MODE_REG as usize], 0x3D);
    }

    #[test]
    fn test_no_card() {
        let mut reader = Mfrc522::new(FakeChip::new(None));
        reader.init().unwrap();
        assert!(!reader.is_card().unwrap());
        assert!(matches!(reader.read_card_serial(), Err(RfidError::NoTag)));
    }

    #[test]
    fn test_read_card() {
        let mut reader = Mfrc522::new(FakeChip::new(Some(TAG)));
        reader.init().unwrap();
        assert!(reader.is_card().unwrap());
        assert_eq!(reader.read_card_serial().unwrap(), Uid::new(TAG));
        // StartSend is cleared after every exchange
        assert_eq!(reader.spi.regs[BIT_FRAMING_REG as usize] & START_SEND, 0);
    }

    #[test]
    fn test_bad_check_byte() {
        let mut reader = Mfrc522::new(FakeChip::new(Some([0xde, 0xad, 0xbe, 0xef, 0x00])));
        reader.init().unwrap();
        assert!(reader.is_card().unwrap());
        assert!(matches!(reader.read_card_serial(), Err(RfidError::Checksum)));
    }

    #[test]
    fn test_protocol_error() {
        let mut chip = FakeChip::new(Some(TAG));
        chip.error = 0x02;
        let mut reader = Mfrc522::new(chip);
        reader.init().unwrap();
        assert!(matches!(reader.is_card(), Err(RfidError::Protocol(0x02))));
    }

    #[test]
    fn test_short_atqa_is_not_a_card() {
        let mut chip = FakeChip::new(Some(TAG));
        chip.atqa = vec![0x04];
        let mut reader = Mfrc522::new(chip);
        reader.init().unwrap();
        assert!(!reader.is_card().unwrap());
    }
}
