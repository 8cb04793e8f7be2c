use std::fs;
use std::path::Path;

use crate::error::FirmwareError;

/// A contiguous run of bytes destined for program memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Offset from the start of flash.
    pub offset: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Firmware {
    pub segments: Vec<Segment>,
}

impl Firmware {
    /// Load an Intel HEX image (`.hex`/`.ihex`) or a raw binary placed at
    /// offset 0.
    pub fn load(path: &Path) -> Result<Self, FirmwareError> {
        let io_err = |source: std::io::Error| FirmwareError::Io {
            path: path.to_path_buf(),
            source,
        };
        let is_hex = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex"))
            .unwrap_or(false);

        if is_hex {
            let text = fs::read_to_string(path).map_err(io_err)?;
            parse_ihex(&text).map_err(|(line, reason)| FirmwareError::Parse {
                path: path.to_path_buf(),
                line,
                reason,
            })
        } else {
            let data = fs::read(path).map_err(io_err)?;
            Ok(Firmware::from_binary(data))
        }
    }

    pub fn from_binary(data: Vec<u8>) -> Self {
        Firmware {
            segments: vec![Segment { offset: 0, data }],
        }
    }

    /// Total number of bytes across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check_fits(&self, flash_size: usize) -> Result<(), FirmwareError> {
        match self
            .segments
            .iter()
            .find(|s| s.offset + s.data.len() > flash_size)
        {
            Some(segment) => Err(FirmwareError::OutOfRange {
                offset: segment.offset,
                len: segment.data.len(),
                flash_size,
            }),
            None => Ok(()),
        }
    }
}

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_SEGMENT: u8 = 0x02;
const RECORD_START_SEGMENT: u8 = 0x03;
const RECORD_EXT_LINEAR: u8 = 0x04;
const RECORD_START_LINEAR: u8 = 0x05;

/// Parse Intel HEX text. Errors carry the 1-based line number.
pub fn parse_ihex(text: &str) -> Result<Firmware, (usize, String)> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut base: usize = 0;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let body = line
            .strip_prefix(':')
            .ok_or_else(|| (line_no, "record does not start with ':'".to_string()))?;
        let bytes = decode_hex(body).map_err(|reason| (line_no, reason))?;
        if bytes.len() < 5 {
            return Err((line_no, "record too short".to_string()));
        }

        let count = bytes[0] as usize;
        if bytes.len() != count + 5 {
            return Err((line_no, format!("byte count {} does not match record length", count)));
        }
        let checksum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if checksum != 0 {
            return Err((line_no, "checksum mismatch".to_string()));
        }

        let address = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let kind = bytes[3];
        let data = &bytes[4..4 + count];

        match kind {
            RECORD_DATA => {
                let offset = base + address;
                // extend the previous segment when contiguous
                match segments.last_mut() {
                    Some(last) if last.offset + last.data.len() == offset => {
                        last.data.extend_from_slice(data)
                    }
                    _ => segments.push(Segment {
                        offset,
                        data: data.to_vec(),
                    }),
                }
            }
            RECORD_EOF => return Ok(Firmware { segments }),
            RECORD_EXT_SEGMENT if count == 2 => {
                base = (u16::from_be_bytes([data[0], data[1]]) as usize) << 4;
            }
            RECORD_EXT_LINEAR if count == 2 => {
                base = (u16::from_be_bytes([data[0], data[1]]) as usize) << 16;
            }
            RECORD_EXT_SEGMENT | RECORD_EXT_LINEAR => {
                return Err((line_no, "extended address record must carry 2 bytes".to_string()))
            }
            RECORD_START_SEGMENT | RECORD_START_LINEAR => {}
            other => return Err((line_no, format!("unsupported record type {:02X}", other))),
        }
    }

    Err((text.lines().count(), "missing end-of-file record".to_string()))
}

fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    if text.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex digits at column {}", i + 2))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &str = "\
:10000000A9018D00009000EAEAEAEAEAEAEAEAEAEF
:04001000000000806C
:00000001FF
";

    #[test]
    fn test_parse_contiguous_records() {
        let firmware = parse_ihex(IMAGE).unwrap();
        assert_eq!(firmware.segments.len(), 1);
        assert_eq!(firmware.segments[0].offset, 0);
        assert_eq!(firmware.len(), 20);
        assert_eq!(&firmware.segments[0].data[..3], &[0xA9, 0x01, 0x8D]);
    }

    #[test]
    fn test_extended_linear_address() {
        let text = ":020000040001F9\n:0100000042BD\n:00000001FF\n";
        let firmware = parse_ihex(text).unwrap();
        assert_eq!(firmware.segments[0].offset, 0x1_0000);
        assert!(firmware.check_fits(32 * 1024).is_err());
    }

    #[test]
    fn test_extended_address_needs_two_bytes() {
        let text = ":0100000401FA\n:00000001FF\n";
        let (line, reason) = parse_ihex(text).unwrap_err();
        assert_eq!(line, 1);
        assert_eq!(reason, "extended address record must carry 2 bytes");
    }

    #[test]
    fn test_checksum_mismatch() {
        let text = ":0100000042BE\n:00000001FF\n";
        let (line, reason) = parse_ihex(text).unwrap_err();
        assert_eq!(line, 1);
        assert!(reason.contains("checksum"));
    }

    #[test]
    fn test_missing_eof() {
        let (line, _) = parse_ihex(":0100000042BD\n").unwrap_err();
        assert_eq!(line, 1);
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let hex = dir.path().join("fw.hex");
        std::fs::write(&hex, IMAGE).unwrap();
        assert_eq!(Firmware::load(&hex).unwrap().len(), 20);

        let bin = dir.path().join("fw.bin");
        std::fs::write(&bin, [1, 2, 3]).unwrap();
        assert_eq!(Firmware::load(&bin).unwrap(), Firmware::from_binary(vec![1, 2, 3]));
    }
}
