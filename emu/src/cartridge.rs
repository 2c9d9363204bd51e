//! Game pak: ROM image, header and backup memory.
//!
//! The backup type is not declared anywhere in the header; like most
//! emulators we scan the ROM for the library version strings the official
//! SDK embeds ("SRAM_V", "FLASH1M_V", ...) and instantiate the matching
//! chip.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{Bytes, serde_as};

const HEADER_SIZE: usize = 0xC0;
const SRAM_SIZE: usize = 0x8000;
const FLASH_BANK_SIZE: usize = 0x1_0000;

#[derive(Debug)]
pub enum CartridgeError {
    /// The image is smaller than the 192-byte header.
    TooSmall(usize),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall(size) => {
                write!(f, "rom image of {size} bytes is smaller than the header")
            }
        }
    }
}

impl std::error::Error for CartridgeError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartridgeHeader {
    pub title: String,
    pub game_code: String,
    pub maker_code: String,
}

impl CartridgeHeader {
    fn parse(rom: &[u8]) -> Self {
        let text = |range: std::ops::Range<usize>| {
            String::from_utf8_lossy(&rom[range])
                .trim_end_matches('\0')
                .to_string()
        };
        // 0xB2 is a fixed value on licensed carts; homebrew often skips it.
        if rom[0xB2] != 0x96 {
            tracing::warn!("header fixed byte is {:#04X}, expected 0x96", rom[0xB2]);
        }
        Self {
            title: text(0xA0..0xAC),
            game_code: text(0xAC..0xB0),
            maker_code: text(0xB0..0xB2),
        }
    }
}

/// Which backup chip the cartridge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    None,
    Sram,
    Flash64K,
    Flash128K,
    Eeprom,
}

impl std::str::FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "sram" => Ok(Self::Sram),
            "flash64k" | "flash" => Ok(Self::Flash64K),
            "flash128k" | "flash1m" => Ok(Self::Flash128K),
            "eeprom" => Ok(Self::Eeprom),
            other => Err(format!(
                "unknown backup kind '{other}' (expected none, sram, flash64k, flash128k or eeprom)"
            )),
        }
    }
}

impl BackupKind {
    /// SDK version strings are word aligned somewhere in the ROM.
    fn detect(rom: &[u8]) -> Self {
        let contains = |needle: &[u8]| {
            rom.chunks(4)
                .enumerate()
                .any(|(i, _)| rom[i * 4..].starts_with(needle))
        };
        if contains(b"FLASH1M_V") {
            Self::Flash128K
        } else if contains(b"FLASH512_V") || contains(b"FLASH_V") {
            Self::Flash64K
        } else if contains(b"SRAM_V") {
            Self::Sram
        } else if contains(b"EEPROM_V") {
            Self::Eeprom
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FlashState {
    Ready,
    FirstUnlock,
    SecondUnlock,
}

/// Atmel/Macronix style flash command machine, enough for the command
/// sequences the SDK flash driver issues.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flash {
    #[serde_as(as = "Bytes")]
    data: Vec<u8>,
    banks: usize,
    bank: usize,
    state: FlashState,
    id_mode: bool,
    erase_armed: bool,
    write_pending: bool,
    bank_pending: bool,
}

impl Flash {
    fn new(banks: usize) -> Self {
        Self {
            data: vec![0xFF; banks * FLASH_BANK_SIZE],
            banks,
            bank: 0,
            state: FlashState::Ready,
            id_mode: false,
            erase_armed: false,
            write_pending: false,
            bank_pending: false,
        }
    }

    /// Manufacturer and device id, reported in id mode.
    fn chip_id(&self) -> [u8; 2] {
        if self.banks == 2 {
            [0xC2, 0x09] // Macronix 1 Mbit
        } else {
            [0xBF, 0xD4] // SST 512 Kbit
        }
    }

    fn read(&self, offset: usize) -> u8 {
        if self.id_mode && offset < 2 {
            return self.chip_id()[offset];
        }
        self.data[self.bank * FLASH_BANK_SIZE + offset]
    }

    fn write(&mut self, offset: usize, value: u8) {
        if self.write_pending {
            // Flash programming can only clear bits until an erase.
            self.data[self.bank * FLASH_BANK_SIZE + offset] &= value;
            self.write_pending = false;
            return;
        }
        if self.bank_pending && offset == 0 {
            self.bank = usize::from(value & 1).min(self.banks - 1);
            self.bank_pending = false;
            return;
        }

        match (self.state, offset, value) {
            (FlashState::Ready, 0x5555, 0xAA) => self.state = FlashState::FirstUnlock,
            (FlashState::FirstUnlock, 0x2AAA, 0x55) => self.state = FlashState::SecondUnlock,
            (FlashState::SecondUnlock, 0x5555, command) => {
                self.state = FlashState::Ready;
                match command {
                    0x90 => self.id_mode = true,
                    0xF0 => self.id_mode = false,
                    0x80 => self.erase_armed = true,
                    0x10 if self.erase_armed => {
                        self.data.fill(0xFF);
                        self.erase_armed = false;
                    }
                    0xA0 => self.write_pending = true,
                    0xB0 if self.banks == 2 => self.bank_pending = true,
                    _ => {
                        tracing::debug!("unknown flash command {command:#04X}");
                    }
                }
            }
            (FlashState::SecondUnlock, sector, 0x30) if self.erase_armed => {
                let base = self.bank * FLASH_BANK_SIZE + (sector & 0xF000);
                self.data[base..base + 0x1000].fill(0xFF);
                self.erase_armed = false;
                self.state = FlashState::Ready;
            }
            _ => self.state = FlashState::Ready,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Backup {
    None,
    Sram(#[serde_as(as = "Bytes")] Vec<u8>),
    Flash(Flash),
    /// Serial EEPROM is not wired up; accesses read back as ready.
    Eeprom,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cartridge {
    pub header: CartridgeHeader,
    /// The ROM itself is not part of snapshots; it is re-attached on load.
    #[serde(skip)]
    rom: Vec<u8>,
    pub backup: Backup,
    /// Whether a GPIO real-time clock is fitted. Only the presence flag
    /// is modeled; the serial protocol is not.
    pub rtc_present: bool,
}

impl Cartridge {
    /// Loads a cartridge, detecting the backup chip from the ROM image.
    pub fn new(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        if rom.len() < HEADER_SIZE {
            return Err(CartridgeError::TooSmall(rom.len()));
        }
        let kind = BackupKind::detect(&rom);
        Self::build(rom, kind)
    }

    /// Loads a cartridge with a forced backup chip, for images the ID
    /// string scan gets wrong (homebrew without SDK strings, mostly).
    pub fn with_backup(rom: Vec<u8>, kind: BackupKind) -> Result<Self, CartridgeError> {
        if rom.len() < HEADER_SIZE {
            return Err(CartridgeError::TooSmall(rom.len()));
        }
        Self::build(rom, kind)
    }

    fn build(rom: Vec<u8>, kind: BackupKind) -> Result<Self, CartridgeError> {
        let header = CartridgeHeader::parse(&rom);
        tracing::info!(
            title = %header.title,
            game_code = %header.game_code,
            backup = ?kind,
            size = rom.len(),
            "cartridge loaded"
        );
        if kind == BackupKind::Eeprom {
            tracing::warn!("eeprom backup detected but not implemented, saves will not work");
        }

        let backup = match kind {
            BackupKind::None => Backup::None,
            BackupKind::Sram => Backup::Sram(vec![0xFF; SRAM_SIZE]),
            BackupKind::Flash64K => Backup::Flash(Flash::new(1)),
            BackupKind::Flash128K => Backup::Flash(Flash::new(2)),
            BackupKind::Eeprom => Backup::Eeprom,
        };
        Ok(Self {
            header,
            rom,
            backup,
            rtc_present: false,
        })
    }

    /// Re-attaches the ROM image after a snapshot restore.
    pub fn attach_rom(&mut self, rom: Vec<u8>) {
        self.rom = rom;
    }

    /// Detaches the ROM image, leaving the cartridge empty.
    pub fn take_rom(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.rom)
    }

    /// Reads past the end of the ROM see the address bus itself: the
    /// cartridge latches `address / 2` as 16-bit data.
    #[must_use]
    pub fn read_rom(&self, offset: u32) -> u8 {
        self.rom.get(offset as usize).copied().unwrap_or_else(|| {
            let latched = (offset / 2) as u16;
            latched.to_le_bytes()[(offset & 1) as usize]
        })
    }

    #[must_use]
    pub fn read_backup(&self, address: u32) -> u8 {
        match &self.backup {
            Backup::None => 0xFF,
            Backup::Sram(data) => data[(address as usize) & (SRAM_SIZE - 1)],
            Backup::Flash(flash) => flash.read((address as usize) & 0xFFFF),
            Backup::Eeprom => 1,
        }
    }

    pub fn write_backup(&mut self, address: u32, value: u8) {
        match &mut self.backup {
            Backup::None | Backup::Eeprom => {}
            Backup::Sram(data) => data[(address as usize) & (SRAM_SIZE - 1)] = value,
            Backup::Flash(flash) => flash.write((address as usize) & 0xFFFF, value),
        }
    }

    /// The raw backup contents, for writing a save file.
    #[must_use]
    pub fn backup_data(&self) -> Option<&[u8]> {
        match &self.backup {
            Backup::Sram(data) => Some(data),
            Backup::Flash(flash) => Some(&flash.data),
            Backup::None | Backup::Eeprom => None,
        }
    }

    /// Restores backup contents from a save file, if the size matches.
    pub fn load_backup_data(&mut self, contents: &[u8]) {
        match &mut self.backup {
            Backup::Sram(data) if data.len() == contents.len() => {
                data.copy_from_slice(contents);
            }
            Backup::Flash(flash) if flash.data.len() == contents.len() => {
                flash.data.copy_from_slice(contents);
            }
            _ => tracing::warn!(
                "save file of {} bytes does not match the backup chip",
                contents.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rom_with(id: &[u8]) -> Vec<u8> {
        let mut rom = vec![0; 0x1000];
        rom[0xA0..0xAC].copy_from_slice(b"HALCYONTEST\0");
        rom[0xAC..0xB0].copy_from_slice(b"AHCE");
        rom[0xB2] = 0x96;
        rom[0x400..0x400 + id.len()].copy_from_slice(id);
        rom
    }

    #[test]
    fn header_fields() {
        let cartridge = Cartridge::new(rom_with(b"")).unwrap();
        assert_eq!(cartridge.header.title, "HALCYONTEST");
        assert_eq!(cartridge.header.game_code, "AHCE");
    }

    #[test]
    fn rejects_truncated_image() {
        assert!(matches!(
            Cartridge::new(vec![0; 0x40]),
            Err(CartridgeError::TooSmall(0x40))
        ));
    }

    #[test]
    fn backup_detection_from_id_strings() {
        let detect = |id: &[u8]| BackupKind::detect(&rom_with(id));
        assert_eq!(detect(b"SRAM_V113"), BackupKind::Sram);
        assert_eq!(detect(b"FLASH_V120"), BackupKind::Flash64K);
        assert_eq!(detect(b"FLASH512_V130"), BackupKind::Flash64K);
        assert_eq!(detect(b"FLASH1M_V102"), BackupKind::Flash128K);
        assert_eq!(detect(b"EEPROM_V124"), BackupKind::Eeprom);
        assert_eq!(detect(b""), BackupKind::None);
    }

    #[test]
    fn forced_backup_kind_overrides_detection() {
        // The ROM advertises SRAM, the caller knows better.
        let cartridge =
            Cartridge::with_backup(rom_with(b"SRAM_V113"), BackupKind::Flash64K).unwrap();
        assert!(matches!(cartridge.backup, Backup::Flash(_)));

        let cartridge = Cartridge::with_backup(rom_with(b""), BackupKind::Sram).unwrap();
        assert!(matches!(cartridge.backup, Backup::Sram(_)));
    }

    #[test]
    fn backup_kind_parses_from_flag_values() {
        assert_eq!("sram".parse(), Ok(BackupKind::Sram));
        assert_eq!("FLASH128K".parse(), Ok(BackupKind::Flash128K));
        assert_eq!("flash".parse(), Ok(BackupKind::Flash64K));
        assert!("sdcard".parse::<BackupKind>().is_err());
    }

    #[test]
    fn rom_reads_out_of_bounds_return_address_pattern() {
        let cartridge = Cartridge::new(vec![0xAB; 0x100]).unwrap();
        assert_eq!(cartridge.read_rom(0x50), 0xAB);
        // 0x2000 / 2 = 0x1000, low byte first.
        assert_eq!(cartridge.read_rom(0x2000), 0x00);
        assert_eq!(cartridge.read_rom(0x2001), 0x10);
    }

    #[test]
    fn sram_round_trip() {
        let mut cartridge = Cartridge::new(rom_with(b"SRAM_V113")).unwrap();
        cartridge.write_backup(0x0E00_0010, 0x42);
        assert_eq!(cartridge.read_backup(0x0E00_0010), 0x42);
        // Mirrored every 32K.
        assert_eq!(cartridge.read_backup(0x0E00_8010), 0x42);
    }

    #[test]
    fn flash_chip_id_sequence() {
        let mut cartridge = Cartridge::new(rom_with(b"FLASH1M_V102")).unwrap();
        cartridge.write_backup(0x0E00_5555, 0xAA);
        cartridge.write_backup(0x0E00_2AAA, 0x55);
        cartridge.write_backup(0x0E00_5555, 0x90);
        assert_eq!(cartridge.read_backup(0x0E00_0000), 0xC2);
        assert_eq!(cartridge.read_backup(0x0E00_0001), 0x09);

        cartridge.write_backup(0x0E00_5555, 0xAA);
        cartridge.write_backup(0x0E00_2AAA, 0x55);
        cartridge.write_backup(0x0E00_5555, 0xF0);
        assert_eq!(cartridge.read_backup(0x0E00_0000), 0xFF);
    }

    #[test]
    fn flash_program_and_sector_erase() {
        let mut cartridge = Cartridge::new(rom_with(b"FLASH_V120")).unwrap();

        let unlock = |c: &mut Cartridge| {
            c.write_backup(0x0E00_5555, 0xAA);
            c.write_backup(0x0E00_2AAA, 0x55);
        };

        unlock(&mut cartridge);
        cartridge.write_backup(0x0E00_5555, 0xA0);
        cartridge.write_backup(0x0E00_1234, 0x5A);
        assert_eq!(cartridge.read_backup(0x0E00_1234), 0x5A);

        unlock(&mut cartridge);
        cartridge.write_backup(0x0E00_5555, 0x80);
        unlock(&mut cartridge);
        cartridge.write_backup(0x0E00_1000, 0x30);
        assert_eq!(cartridge.read_backup(0x0E00_1234), 0xFF);
    }

    #[test]
    fn flash_bank_switch() {
        let mut cartridge = Cartridge::new(rom_with(b"FLASH1M_V102")).unwrap();
        let unlock = |c: &mut Cartridge| {
            c.write_backup(0x0E00_5555, 0xAA);
            c.write_backup(0x0E00_2AAA, 0x55);
        };

        unlock(&mut cartridge);
        cartridge.write_backup(0x0E00_5555, 0xA0);
        cartridge.write_backup(0x0E00_0100, 0x11);

        unlock(&mut cartridge);
        cartridge.write_backup(0x0E00_5555, 0xB0);
        cartridge.write_backup(0x0E00_0000, 1);

        assert_eq!(cartridge.read_backup(0x0E00_0100), 0xFF);

        unlock(&mut cartridge);
        cartridge.write_backup(0x0E00_5555, 0xB0);
        cartridge.write_backup(0x0E00_0000, 0);
        assert_eq!(cartridge.read_backup(0x0E00_0100), 0x11);
    }
}
