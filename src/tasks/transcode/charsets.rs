// src/tasks/transcode/charsets.rs

//! Supported charsets and their incremental decoders / encoders.
//!
//! Decoders take raw chunks and append text to a `String`, holding back
//! incomplete sequences until the next chunk. Encoders do the reverse.

use std::collections::HashMap;
use std::fmt;

use encoding_rs::{DecoderResult, Encoding, EncoderResult};

use crate::tasks::TaskError;

use super::ebcdic;

const BOM: char = '\u{FEFF}';

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

#[derive(Copy, Clone)]
pub enum Charset {
    Utf8 { bom: bool },
    Utf16 { endian: Endian, bom: bool },
    Utf32 { endian: Endian, bom: bool },
    Latin1,
    Ebcdic(&'static [u16; 256]),
    Legacy(&'static Encoding),
}

/// Canonical names, in the order they are listed to users.
const CHARSETS: &[(&str, Charset)] = &[
    ("UTF-8", Charset::Utf8 { bom: false }),
    ("UTF-8 BOM", Charset::Utf8 { bom: true }),
    ("UTF-16BE", Charset::Utf16 { endian: Endian::Big, bom: false }),
    ("UTF-16LE", Charset::Utf16 { endian: Endian::Little, bom: false }),
    ("UTF-16BE BOM", Charset::Utf16 { endian: Endian::Big, bom: true }),
    ("UTF-16LE BOM", Charset::Utf16 { endian: Endian::Little, bom: true }),
    ("UTF-32BE", Charset::Utf32 { endian: Endian::Big, bom: false }),
    ("UTF-32LE", Charset::Utf32 { endian: Endian::Little, bom: false }),
    ("UTF-32BE BOM", Charset::Utf32 { endian: Endian::Big, bom: true }),
    ("UTF-32LE BOM", Charset::Utf32 { endian: Endian::Little, bom: true }),
    ("IBM Code Page 273", Charset::Ebcdic(&ebcdic::CP273)),
    ("IBM Code Page 500", Charset::Ebcdic(&ebcdic::CP500)),
    ("IBM Code Page 1141", Charset::Ebcdic(&ebcdic::CP1141)),
    ("IBM Code Page 1148", Charset::Ebcdic(&ebcdic::CP1148)),
    ("IBM Code Page 866", Charset::Legacy(encoding_rs::IBM866)),
    ("ISO 8859-1", Charset::Latin1),
    ("ISO 8859-2", Charset::Legacy(encoding_rs::ISO_8859_2)),
    ("ISO 8859-3", Charset::Legacy(encoding_rs::ISO_8859_3)),
    ("ISO 8859-4", Charset::Legacy(encoding_rs::ISO_8859_4)),
    ("ISO 8859-5", Charset::Legacy(encoding_rs::ISO_8859_5)),
    ("ISO 8859-6", Charset::Legacy(encoding_rs::ISO_8859_6)),
    ("ISO 8859-7", Charset::Legacy(encoding_rs::ISO_8859_7)),
    ("ISO 8859-8", Charset::Legacy(encoding_rs::ISO_8859_8)),
    ("ISO 8859-10", Charset::Legacy(encoding_rs::ISO_8859_10)),
    ("ISO 8859-13", Charset::Legacy(encoding_rs::ISO_8859_13)),
    ("ISO 8859-14", Charset::Legacy(encoding_rs::ISO_8859_14)),
    ("ISO 8859-15", Charset::Legacy(encoding_rs::ISO_8859_15)),
    ("ISO 8859-16", Charset::Legacy(encoding_rs::ISO_8859_16)),
    ("KOI8-R", Charset::Legacy(encoding_rs::KOI8_R)),
    ("KOI8-U", Charset::Legacy(encoding_rs::KOI8_U)),
    ("Macintosh", Charset::Legacy(encoding_rs::MACINTOSH)),
    ("Macintosh Cyrillic", Charset::Legacy(encoding_rs::X_MAC_CYRILLIC)),
    ("Windows 874", Charset::Legacy(encoding_rs::WINDOWS_874)),
    ("Windows 1250", Charset::Legacy(encoding_rs::WINDOWS_1250)),
    ("Windows 1251", Charset::Legacy(encoding_rs::WINDOWS_1251)),
    ("Windows 1252", Charset::Legacy(encoding_rs::WINDOWS_1252)),
    ("Windows 1253", Charset::Legacy(encoding_rs::WINDOWS_1253)),
    ("Windows 1254", Charset::Legacy(encoding_rs::WINDOWS_1254)),
    ("Windows 1255", Charset::Legacy(encoding_rs::WINDOWS_1255)),
    ("Windows 1256", Charset::Legacy(encoding_rs::WINDOWS_1256)),
    ("Windows 1257", Charset::Legacy(encoding_rs::WINDOWS_1257)),
    ("Windows 1258", Charset::Legacy(encoding_rs::WINDOWS_1258)),
];

/// A charset together with the name it was configured under.
#[derive(Clone, Copy)]
pub struct NamedCharset {
    pub name: &'static str,
    pub charset: Charset,
}

impl fmt::Debug for NamedCharset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for NamedCharset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl PartialEq for NamedCharset {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Look a charset up by name, ignoring case.
pub fn lookup(name: &str) -> Result<NamedCharset, TaskError> {
    let wanted = name.trim();
    CHARSETS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(wanted))
        .map(|(n, c)| NamedCharset { name: n, charset: *c })
        .ok_or_else(|| TaskError::InvalidCharset(name.to_string()))
}

/// Every supported charset name.
pub fn names() -> impl Iterator<Item = &'static str> {
    CHARSETS.iter().map(|(n, _)| *n)
}

fn malformed(name: &str) -> TaskError {
    TaskError::Other(anyhow::anyhow!("the input is not valid {} text", name))
}

fn unmappable(name: &str, c: char) -> TaskError {
    TaskError::Other(anyhow::anyhow!(
        "character {:?} (U+{:04X}) cannot be represented in {}",
        c,
        c as u32,
        name
    ))
}

enum DecoderState {
    Rs(encoding_rs::Decoder),
    Utf16 { endian: Endian, bom: bool, high: Option<u16> },
    Utf32 { endian: Endian, bom: bool },
    Table(&'static [u16; 256]),
    Latin1,
}

pub struct TextDecoder {
    name: &'static str,
    state: DecoderState,
    pending: Vec<u8>,
    started: bool,
}

impl TextDecoder {
    pub fn new(charset: NamedCharset) -> Self {
        let state = match charset.charset {
            Charset::Utf8 { bom: true } => {
                DecoderState::Rs(encoding_rs::UTF_8.new_decoder_with_bom_removal())
            }
            Charset::Utf8 { bom: false } => {
                DecoderState::Rs(encoding_rs::UTF_8.new_decoder_without_bom_handling())
            }
            Charset::Legacy(enc) => DecoderState::Rs(enc.new_decoder_without_bom_handling()),
            Charset::Utf16 { endian, bom } => DecoderState::Utf16 { endian, bom, high: None },
            Charset::Utf32 { endian, bom } => DecoderState::Utf32 { endian, bom },
            Charset::Ebcdic(table) => DecoderState::Table(table),
            Charset::Latin1 => DecoderState::Latin1,
        };
        Self {
            name: charset.name,
            state,
            pending: Vec::new(),
            started: false,
        }
    }

    /// Decode `input` onto `out`. `last` flushes held-back bytes, failing
    /// if they do not form a complete character.
    pub fn decode(&mut self, input: &[u8], last: bool, out: &mut String) -> Result<(), TaskError> {
        let name = self.name;
        match &mut self.state {
            DecoderState::Rs(decoder) => {
                let mut rest = input;
                loop {
                    let needed = decoder
                        .max_utf8_buffer_length_without_replacement(rest.len())
                        .ok_or_else(|| malformed(name))?;
                    out.reserve(needed);
                    let (result, read) =
                        decoder.decode_to_string_without_replacement(rest, out, last);
                    rest = &rest[read..];
                    match result {
                        DecoderResult::InputEmpty => break,
                        DecoderResult::OutputFull => continue,
                        DecoderResult::Malformed(_, _) => return Err(malformed(name)),
                    }
                }
            }
            DecoderState::Table(table) => {
                out.extend(input.iter().filter_map(|b| char::from_u32(u32::from(table[*b as usize]))));
            }
            DecoderState::Latin1 => out.extend(input.iter().map(|b| char::from(*b))),
            DecoderState::Utf16 { endian, bom, high } => {
                self.pending.extend_from_slice(input);
                let whole = self.pending.len() - self.pending.len() % 2;
                for pair in self.pending[..whole].chunks_exact(2) {
                    let bytes = [pair[0], pair[1]];
                    let unit = match endian {
                        Endian::Big => u16::from_be_bytes(bytes),
                        Endian::Little => u16::from_le_bytes(bytes),
                    };
                    if !self.started {
                        self.started = true;
                        if *bom && unit == 0xFEFF {
                            continue;
                        }
                        if *bom && unit == 0xFFFE {
                            *endian = match endian {
                                Endian::Big => Endian::Little,
                                Endian::Little => Endian::Big,
                            };
                            continue;
                        }
                    }
                    match (unit, high.take()) {
                        (0xD800..=0xDBFF, None) => *high = Some(unit),
                        (0xDC00..=0xDFFF, Some(h)) => {
                            let code = 0x10000 + ((u32::from(h) - 0xD800) << 10) + (u32::from(unit) - 0xDC00);
                            out.push(char::from_u32(code).ok_or_else(|| malformed(name))?);
                        }
                        (0xD800..=0xDFFF, _) | (_, Some(_)) => return Err(malformed(name)),
                        (_, None) => {
                            out.push(char::from_u32(u32::from(unit)).ok_or_else(|| malformed(name))?);
                        }
                    }
                }
                self.pending.drain(..whole);
                if last && (!self.pending.is_empty() || high.is_some()) {
                    return Err(malformed(name));
                }
            }
            DecoderState::Utf32 { endian, bom } => {
                self.pending.extend_from_slice(input);
                let whole = self.pending.len() - self.pending.len() % 4;
                for quad in self.pending[..whole].chunks_exact(4) {
                    let bytes = [quad[0], quad[1], quad[2], quad[3]];
                    let code = match endian {
                        Endian::Big => u32::from_be_bytes(bytes),
                        Endian::Little => u32::from_le_bytes(bytes),
                    };
                    if !self.started {
                        self.started = true;
                        if *bom && code == 0xFEFF {
                            continue;
                        }
                        if *bom && code == 0xFFFE_0000 {
                            *endian = match endian {
                                Endian::Big => Endian::Little,
                                Endian::Little => Endian::Big,
                            };
                            continue;
                        }
                    }
                    out.push(char::from_u32(code).ok_or_else(|| malformed(name))?);
                }
                self.pending.drain(..whole);
                if last && !self.pending.is_empty() {
                    return Err(malformed(name));
                }
            }
        }
        self.started = true;
        Ok(())
    }
}

enum EncoderState {
    Utf8,
    Utf16(Endian),
    Utf32(Endian),
    Latin1,
    Table(HashMap<char, u8>),
    Rs(encoding_rs::Encoder),
}

pub struct TextEncoder {
    name: &'static str,
    state: EncoderState,
    bom_pending: bool,
}

impl TextEncoder {
    pub fn new(charset: NamedCharset) -> Self {
        let (state, bom) = match charset.charset {
            Charset::Utf8 { bom } => (EncoderState::Utf8, bom),
            Charset::Utf16 { endian, bom } => (EncoderState::Utf16(endian), bom),
            Charset::Utf32 { endian, bom } => (EncoderState::Utf32(endian), bom),
            Charset::Latin1 => (EncoderState::Latin1, false),
            Charset::Ebcdic(table) => {
                let reverse = table
                    .iter()
                    .enumerate()
                    .filter_map(|(b, cp)| char::from_u32(u32::from(*cp)).map(|c| (c, b as u8)))
                    .collect();
                (EncoderState::Table(reverse), false)
            }
            Charset::Legacy(enc) => (EncoderState::Rs(enc.new_encoder()), false),
        };
        Self {
            name: charset.name,
            state,
            bom_pending: bom,
        }
    }

    /// Encode `text` onto `out`.
    pub fn encode(&mut self, text: &str, last: bool, out: &mut Vec<u8>) -> Result<(), TaskError> {
        let name = self.name;
        let mut chars: Box<dyn Iterator<Item = char> + '_> = if self.bom_pending {
            self.bom_pending = false;
            Box::new(std::iter::once(BOM).chain(text.chars()))
        } else {
            Box::new(text.chars())
        };

        match &mut self.state {
            EncoderState::Utf8 => {
                for c in chars.by_ref() {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
            EncoderState::Utf16(endian) => {
                for c in chars.by_ref() {
                    let mut buf = [0u16; 2];
                    for unit in c.encode_utf16(&mut buf) {
                        match endian {
                            Endian::Big => out.extend_from_slice(&unit.to_be_bytes()),
                            Endian::Little => out.extend_from_slice(&unit.to_le_bytes()),
                        }
                    }
                }
            }
            EncoderState::Utf32(endian) => {
                for c in chars.by_ref() {
                    match endian {
                        Endian::Big => out.extend_from_slice(&(c as u32).to_be_bytes()),
                        Endian::Little => out.extend_from_slice(&(c as u32).to_le_bytes()),
                    }
                }
            }
            EncoderState::Latin1 => {
                for c in chars.by_ref() {
                    let b = u8::try_from(c as u32).map_err(|_| unmappable(name, c))?;
                    out.push(b);
                }
            }
            EncoderState::Table(reverse) => {
                for c in chars.by_ref() {
                    out.push(*reverse.get(&c).ok_or_else(|| unmappable(name, c))?);
                }
            }
            EncoderState::Rs(encoder) => {
                let text: String = chars.collect();
                let mut rest = text.as_str();
                loop {
                    let needed = encoder
                        .max_buffer_length_from_utf8_without_replacement(rest.len())
                        .ok_or_else(|| unmappable(name, '\u{FFFD}'))?;
                    out.reserve(needed);
                    let (result, read) =
                        encoder.encode_from_utf8_to_vec_without_replacement(rest, out, last);
                    rest = &rest[read..];
                    match result {
                        EncoderResult::InputEmpty => break,
                        EncoderResult::OutputFull => continue,
                        EncoderResult::Unmappable(c) => return Err(unmappable(name, c)),
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(from: &str, to: &str, input: &[u8]) -> Result<Vec<u8>, TaskError> {
        let mut dec = TextDecoder::new(lookup(from)?);
        let mut enc = TextEncoder::new(lookup(to)?);
        let mut text = String::new();
        dec.decode(input, true, &mut text)?;
        let mut out = Vec::new();
        enc.encode(&text, true, &mut out)?;
        Ok(out)
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(lookup("utf-16le bom").unwrap().name, "UTF-16LE BOM");
        assert!(matches!(lookup("EBCDIC"), Err(TaskError::InvalidCharset(_))));
        assert!(names().any(|n| n == "Windows 1252"));
    }

    #[test]
    fn utf8_to_ebcdic_and_back() {
        let ebcdic = convert("UTF-8", "IBM Code Page 1148", "Hé €".as_bytes()).unwrap();
        assert_eq!(ebcdic, vec![0xC8, 0x51, 0x40, 0x9F]);
        let back = convert("IBM Code Page 1148", "UTF-8", &ebcdic).unwrap();
        assert_eq!(back, "Hé €".as_bytes());
    }

    #[test]
    fn bom_variants() {
        let out = convert("UTF-8", "UTF-16BE BOM", b"A").unwrap();
        assert_eq!(out, vec![0xFE, 0xFF, 0x00, 0x41]);

        let out = convert("UTF-16LE BOM", "UTF-8", &[0xFF, 0xFE, 0x41, 0x00]).unwrap();
        assert_eq!(out, b"A");

        let out = convert("UTF-8 BOM", "UTF-8", &[0xEF, 0xBB, 0xBF, b'x']).unwrap();
        assert_eq!(out, b"x");
    }

    #[test]
    fn split_surrogate_pairs_are_joined_across_chunks() {
        let mut dec = TextDecoder::new(lookup("UTF-16BE").unwrap());
        let mut text = String::new();
        dec.decode(&[0xD8, 0x3D, 0xDE], false, &mut text).unwrap();
        dec.decode(&[0x00], true, &mut text).unwrap();
        assert_eq!(text, "\u{1F600}");
    }

    #[test]
    fn unmappable_and_malformed_input_fail() {
        assert!(convert("UTF-8", "ISO 8859-1", "€".as_bytes()).is_err());
        assert!(convert("UTF-8", "Windows 1252", "中".as_bytes()).is_err());
        assert!(convert("UTF-8", "UTF-16LE", &[0xC3]).is_err());
        assert!(convert("UTF-16LE", "UTF-8", &[0x41]).is_err());
    }

    #[test]
    fn latin1_maps_bytes_to_code_points() {
        let out = convert("ISO 8859-1", "UTF-8", &[0x80, 0xE9]).unwrap();
        assert_eq!(out, "\u{80}é".as_bytes());
    }
}
