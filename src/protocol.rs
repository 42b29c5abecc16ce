//! Low-level USB protocol types and constants for LaserShark communication.

use bitflags::bitflags;
use byteorder::{WriteBytesExt, LE};
use std::io;

/// USB Vendor ID for LaserShark devices.
pub const LASERSHARK_VID: u16 = 0x1fc9;

/// USB Product ID for LaserShark devices.
pub const LASERSHARK_PID: u16 = 0x04d8;

/// Control interface number.
pub const CONTROL_INTERFACE: u8 = 0;

/// Data interface number.
pub const DATA_INTERFACE: u8 = 1;

/// Alternate setting selecting bulk (rather than isochronous) transfers on the data interface.
pub const DATA_ALT_SETTING: u8 = 1;

/// Control endpoint (bulk out).
pub const ENDPOINT_CONTROL_OUT: u8 = 0x01;

/// Control endpoint (bulk in).
pub const ENDPOINT_CONTROL_IN: u8 = 0x81;

/// Data endpoint (bulk out).
pub const ENDPOINT_DATA_OUT: u8 = 0x03;

/// Size of every control response frame.
pub const CONTROL_PACKET_SIZE: usize = 64;

/// Firmware major version whose sample layout [`Sample`] implements.
pub const SUPPORTED_FIRMWARE_MAJOR: u32 = 2;

// Command bytes
/// Enable or disable laser output.
pub const CMD_SET_OUTPUT: u8 = 0x80;
/// Set ILDA sample rate.
pub const CMD_SET_ILDA_RATE: u8 = 0x82;
/// Get ILDA sample rate.
pub const CMD_GET_ILDA_RATE: u8 = 0x83;
/// Get maximum ILDA sample rate.
pub const CMD_GET_MAX_ILDA_RATE: u8 = 0x84;
/// Get maximum DAC value (device resolution).
pub const CMD_GET_DAC_MAX: u8 = 0x88;
/// Get the number of samples the ring buffer can hold.
pub const CMD_GET_RINGBUFFER_SAMPLE_COUNT: u8 = 0x89;
/// Get the number of unfilled samples in the ring buffer.
pub const CMD_GET_RINGBUFFER_EMPTY_SAMPLE_COUNT: u8 = 0x8A;
/// Get firmware major version.
pub const CMD_GET_FW_MAJOR_VERSION: u8 = 0x8B;
/// Get firmware minor version.
pub const CMD_GET_FW_MINOR_VERSION: u8 = 0x8C;
/// Clear ring buffer. The value byte is ignored.
pub const CMD_CLEAR_RINGBUFFER: u8 = 0x8D;

/// Value byte for [`CMD_SET_OUTPUT`] enabling output.
pub const OUTPUT_ENABLE: u8 = 0x01;
/// Value byte for [`CMD_SET_OUTPUT`] disabling output.
pub const OUTPUT_DISABLE: u8 = 0x00;

/// Size of a single sample record in bytes.
pub const SAMPLE_SIZE_BYTES: usize = 8;

/// Width of the intensity and deflection channels on V2.x hardware.
pub const DAC_BITS: u32 = 12;

/// Mask for the intensity bits of channel A.
pub const CHANNEL_A_MASK: u16 = (1 << DAC_BITS) - 1;

/// Intensity values above this switch the "on" bit.
pub const HALF_SCALE: u16 = 1 << (DAC_BITS - 1);

/// Status byte returned in every control response.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    Success,
    Fail,
    Unknown,
}

impl CommandStatus {
    pub const SUCCESS: u8 = 0x00;
    pub const FAIL: u8 = 0x01;
    pub const UNKNOWN: u8 = 0xFF;

    /// Interpret a raw status byte. Anything unrecognised is `Unknown`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::SUCCESS => CommandStatus::Success,
            Self::FAIL => CommandStatus::Fail,
            _ => CommandStatus::Unknown,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            CommandStatus::Success => Self::SUCCESS,
            CommandStatus::Fail => Self::FAIL,
            CommandStatus::Unknown => Self::UNKNOWN,
        }
    }
}

bitflags! {
    /// Flag bits sharing the first word of a sample with channel A.
    ///
    /// Bits 12 and 13 are reserved padding.
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
    pub struct SampleControl: u16 {
        /// Laser "on" (intensity above half scale).
        const ON = 1 << 14;
        /// Interleave flag for channel A.
        const INTERLEAVE = 1 << 15;
    }
}

/// A single LaserShark V2.x sample record.
///
/// The record is four little-endian 16-bit words:
///
/// 0. channel A intensity (lower 12 bits), 2 pad bits, `ON`, `INTERLEAVE`
/// 1. channel B intensity
/// 2. X deflection
/// 3. Y deflection
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Sample {
    pub a: u16,
    pub control: SampleControl,
    pub b: u16,
    pub x: u16,
    pub y: u16,
}

impl Sample {
    /// Build a sample from an 8-bit pixel intensity at a deflection.
    ///
    /// The intensity is widened to the DAC bit width and mirrored on both
    /// channels. Interleave is always set.
    pub fn from_intensity(x: u16, y: u16, intensity: u8) -> Self {
        let value = intensity_to_dac(intensity);
        let mut control = SampleControl::INTERLEAVE;
        if value > HALF_SCALE {
            control |= SampleControl::ON;
        }
        Sample {
            a: value,
            control,
            b: value,
            x,
            y,
        }
    }

    /// A blanked point at the given deflection.
    pub fn blank_at(x: u16, y: u16) -> Self {
        Self::from_intensity(x, y, 0)
    }

    pub fn is_on(&self) -> bool {
        self.control.contains(SampleControl::ON)
    }

    pub fn is_interleaved(&self) -> bool {
        self.control.contains(SampleControl::INTERLEAVE)
    }

    /// The first wire word: channel A bits plus control flags.
    pub fn control_word(&self) -> u16 {
        (self.a & CHANNEL_A_MASK) | self.control.bits()
    }

    /// Write the sample as little-endian bytes.
    pub fn write_to<W: WriteBytesExt>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LE>(self.control_word())?;
        writer.write_u16::<LE>(self.b)?;
        writer.write_u16::<LE>(self.x)?;
        writer.write_u16::<LE>(self.y)?;
        Ok(())
    }

    /// Convert the sample to raw bytes for USB transmission.
    pub fn to_bytes(&self) -> [u8; SAMPLE_SIZE_BYTES] {
        let mut bytes = [0u8; SAMPLE_SIZE_BYTES];
        // Writing into a slice of exactly SAMPLE_SIZE_BYTES cannot run short.
        let _ = self.write_to(&mut bytes[..]);
        bytes
    }

    /// Decode a sample from its wire representation.
    pub fn from_bytes(bytes: &[u8; SAMPLE_SIZE_BYTES]) -> Self {
        let word0 = u16::from_le_bytes([bytes[0], bytes[1]]);
        Sample {
            a: word0 & CHANNEL_A_MASK,
            control: SampleControl::from_bits_truncate(word0),
            b: u16::from_le_bytes([bytes[2], bytes[3]]),
            x: u16::from_le_bytes([bytes[4], bytes[5]]),
            y: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }
}

/// Widen an 8-bit intensity to the device's native intensity field.
pub fn intensity_to_dac(intensity: u8) -> u16 {
    (intensity as u16) << (DAC_BITS - 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_byte() {
        assert_eq!(CommandStatus::from_byte(0x00), CommandStatus::Success);
        assert_eq!(CommandStatus::from_byte(0x01), CommandStatus::Fail);
        assert_eq!(CommandStatus::from_byte(0xFF), CommandStatus::Unknown);
        assert_eq!(CommandStatus::from_byte(0x42), CommandStatus::Unknown);
    }

    #[test]
    fn test_intensity_widening() {
        assert_eq!(intensity_to_dac(0), 0);
        assert_eq!(intensity_to_dac(1), 16);
        assert_eq!(intensity_to_dac(255), 4080);
    }

    #[test]
    fn test_on_bit_threshold() {
        // 128 << 4 == 2048 which is not above half scale.
        assert!(!Sample::from_intensity(0, 0, 128).is_on());
        assert!(Sample::from_intensity(0, 0, 129).is_on());
        assert!(!Sample::blank_at(5, 5).is_on());
        assert!(Sample::blank_at(5, 5).is_interleaved());
    }

    #[test]
    fn test_wire_layout() {
        let sample = Sample::from_intensity(0x0102, 0x0304, 255);
        let bytes = sample.to_bytes();
        // 4080 | ON | INTERLEAVE == 0xCFF0
        assert_eq!(&bytes[0..2], &[0xF0, 0xCF]);
        assert_eq!(&bytes[2..4], &4080u16.to_le_bytes());
        assert_eq!(&bytes[4..6], &[0x02, 0x01]);
        assert_eq!(&bytes[6..8], &[0x04, 0x03]);
    }

    #[test]
    fn test_pad_bits_stay_clear() {
        let word = Sample::from_intensity(0, 0, 255).control_word();
        assert_eq!(word & 0x3000, 0);
    }

    #[test]
    fn test_from_bytes_recovers_fields() {
        let sample = Sample::from_intensity(10, 20, 200);
        assert_eq!(Sample::from_bytes(&sample.to_bytes()), sample);
    }
}
