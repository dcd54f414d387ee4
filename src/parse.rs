/// Cursor over the NUL-delimited fields of a response payload.
///
/// The payload is split once, up front, and consumed strictly
/// front-to-back; fields are kept as raw byte segments and only decoded
/// to text when a string field is actually read.
#[derive(Debug)]
pub struct Slots<'a> {
    slots: Vec<&'a [u8]>,
    cursor: usize,
}

impl<'a> Slots<'a> {
    /// Split a payload on NUL bytes. Like the wire format itself, a
    /// payload whose last field is NUL-terminated yields a trailing
    /// empty slot.
    pub fn split(payload: &'a [u8]) -> Self {
        Slots {
            slots: payload.split(|byte| *byte == 0).collect(),
            cursor: 0,
        }
    }

    /// Number of fields not yet consumed.
    pub fn remaining(&self) -> usize {
        self.slots.len() - self.cursor
    }

    /// Consume the front field as raw bytes.
    pub fn next_raw(&mut self) -> Option<&'a [u8]> {
        let slot = self.slots.get(self.cursor)?;
        self.cursor += 1;
        Some(slot)
    }

    /// Consume the front field as text. Decoding is lossy: the printable
    /// content of string fields is not validated.
    pub fn next_string(&mut self) -> Option<String> {
        self.next_raw()
            .map(|slot| String::from_utf8_lossy(slot).into_owned())
    }

    /// Consume the front field as a decimal integer.
    pub fn next_int(&mut self) -> Option<i32> {
        let slot = self.next_raw()?;
        std::str::from_utf8(slot).ok()?.parse().ok()
    }
}

/// Decode the signed variable-length integer used by the 64-player legacy
/// dialect to number clients.
///
/// Byte 0 carries the sign in bit 6 and the low 6 value bits; while bit 7
/// of the current byte is set, each continuation byte contributes its low
/// 7 bits, up to 5 bytes total. Bytes of the field past the decoded
/// prefix are discarded.
pub fn unpack_int(field: &[u8]) -> i32 {
    let Some(&first) = field.first() else {
        return 0;
    };

    let sign: u8 = (first >> 6) & 0x01;
    let mut value: i32 = (first & 0x3f) as i32;
    let mut byte: u8 = first;
    let mut offset: usize = 0;

    while byte & 0x80 != 0 {
        offset += 1;
        let Some(&next) = field.get(offset) else {
            break;
        };
        byte = next;
        value |= ((byte & 0x7f) as i32) << (offset * 7 - 1);
        if offset == 4 {
            break;
        }
    }

    if sign != 0 {
        value = value.wrapping_neg();
    }
    value
}
