//! GridConnect text rendering and parsing.
//!
//! A frame is written as `:` + format + identifier + kind + data + `;`:
//!
//! * format `X` with eight hex digits of 29-bit identifier, or `S` with three
//!   hex digits of 11-bit identifier;
//! * kind `N` for a data frame or `R` for a remote request;
//! * data as two uppercase hex digits per byte.
//!
//! `:X195B4123N0102;` is an extended data frame with id `0x195B4123` and
//! payload `[0x01, 0x02]`. In doubled output every character is emitted
//! twice, for links that drop single bytes.

use crate::error::{CodecError, CodecResult};
use crate::frame::{CanFrame, MAX_DATA};

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Longest rendered frame, undoubled: `:X` + 8 + `N` + 16 + `;`.
pub const MAX_FRAME_TEXT: usize = 28;

fn push(out: &mut Vec<u8>, byte: u8, double: bool) {
    out.push(byte);
    if double {
        out.push(byte);
    }
}

/// Appends the text form of `frame` to `out`.
pub fn render_into(frame: &CanFrame, double: bool, out: &mut Vec<u8>) {
    out.reserve(if double { MAX_FRAME_TEXT * 2 } else { MAX_FRAME_TEXT });
    push(out, b':', double);
    let digits = if frame.is_extended() {
        push(out, b'X', double);
        8
    } else {
        push(out, b'S', double);
        3
    };
    for shift in (0..digits).rev() {
        push(out, HEX[((frame.id() >> (shift * 4)) & 0xF) as usize], double);
    }
    push(out, if frame.is_remote() { b'R' } else { b'N' }, double);
    for byte in frame.data() {
        push(out, HEX[(byte >> 4) as usize], double);
        push(out, HEX[(byte & 0xF) as usize], double);
    }
    push(out, b';', double);
}

/// Renders `frame` into a fresh buffer.
pub fn render(frame: &CanFrame, double: bool) -> Vec<u8> {
    let mut out = Vec::new();
    render_into(frame, double, &mut out);
    out
}

fn hex_value(byte: u8) -> CodecResult<u8> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        other => Err(CodecError::InvalidHex(other as char)),
    }
}

/// Parses a frame body, i.e. the text between `:` and `;`.
pub fn parse_body(body: &[u8]) -> CodecResult<CanFrame> {
    let (&format, rest) = body.split_first().ok_or(CodecError::Empty)?;
    let (extended, max_digits) = match format.to_ascii_uppercase() {
        b'X' => (true, 8),
        b'S' => (false, 3),
        other => return Err(CodecError::UnknownFormat(other as char)),
    };

    let kind_at = rest
        .iter()
        .position(|b| matches!(b.to_ascii_uppercase(), b'N' | b'R'))
        .ok_or(CodecError::MissingKind)?;
    let (id_text, tail) = rest.split_at(kind_at);
    if id_text.is_empty() || id_text.len() > max_digits {
        return Err(CodecError::IdentifierLength {
            digits: id_text.len(),
            max: max_digits,
        });
    }
    let mut id = 0u32;
    for &digit in id_text {
        id = (id << 4) | u32::from(hex_value(digit)?);
    }

    let remote = tail[0].to_ascii_uppercase() == b'R';
    let data_text = &tail[1..];
    if data_text.len() % 2 != 0 {
        return Err(CodecError::OddData);
    }
    if data_text.len() / 2 > MAX_DATA {
        return Err(CodecError::DataTooLong(data_text.len() / 2));
    }
    let mut data = [0u8; MAX_DATA];
    for (slot, pair) in data.iter_mut().zip(data_text.chunks_exact(2)) {
        *slot = (hex_value(pair[0])? << 4) | hex_value(pair[1])?;
    }

    CanFrame::build(id, extended, remote, &data[..data_text.len() / 2])
}
