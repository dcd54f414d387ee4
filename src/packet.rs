use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::TeeQueryError;

/// Teeworlds servers chunk their responses at 1400 bytes plus IP/UDP
/// headers; 2048 leaves headroom for servers that don't.
pub const MAX_PACKET_SIZE: usize = 2048;

/// The random values embedded in a request and (partially) echoed back by
/// the server. Live for one request/response exchange only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken {
    /// Echoed back as the low byte of the response token field.
    pub token: u8,
    /// Echoed back as bits 8..24 of the response token field, but only by
    /// the extended protocol variants.
    pub extra_token: u16,
}

/// The fixed 15-byte "give info" request.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestPacket {
    token: RequestToken,
}

impl RequestPacket {
    const SIZE: usize = 15;

    const MAGIC_RANGE: Range<usize> = 0..2;
    const EXTRA_TOKEN_RANGE: Range<usize> = 2..4;
    const PADDING_RANGE: Range<usize> = 6..10;
    const COMMAND_RANGE: Range<usize> = 10..14;
    const TOKEN_OFFSET: usize = 14;

    const MAGIC: &'static [u8; 2] = b"xe";
    const COMMAND: &'static [u8; 4] = b"gie3";

    /// Build a request with fresh random tokens. Fails only if the OS
    /// randomness source does.
    pub fn new() -> Result<Self, TeeQueryError> {
        let mut random: [u8; 3] = [0u8; 3];
        OsRng.try_fill_bytes(&mut random)?;

        let token = RequestToken {
            extra_token: BigEndian::read_u16(&random[0..2]),
            token: random[2],
        };
        Ok(RequestPacket { token })
    }

    /// Serializes the request into its wire form:
    /// `"xe"` + extraToken(2, BE) + `00 00` + `ff ff ff ff` + `"gie3"` + token(1).
    pub fn pack(&self) -> [u8; Self::SIZE] {
        let mut payload: [u8; Self::SIZE] = [0u8; Self::SIZE];
        payload[Self::MAGIC_RANGE].copy_from_slice(Self::MAGIC);
        BigEndian::write_u16(&mut payload[Self::EXTRA_TOKEN_RANGE], self.token.extra_token);
        payload[Self::PADDING_RANGE].fill(0xff);
        payload[Self::COMMAND_RANGE].copy_from_slice(Self::COMMAND);
        payload[Self::TOKEN_OFFSET] = self.token.token;
        payload
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }
}

/// The four historical dialects a server may answer in, distinguished by
/// the 4-byte type tag of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// `inf3`: the original info response, up to 16 clients.
    Vanilla,
    /// `dtsf`: the 64-player legacy extension; the packet numbers its
    /// client records with a varint ordinal so packets can continue
    /// each other.
    Legacy64,
    /// `iext`: the extended response, with map crc/size and a per-client
    /// reserved trailing field.
    Ext,
    /// `iex+`: continuation packet for [Variant::Ext], carrying only more
    /// client records.
    ExtMore,
}

impl Variant {
    fn from_tag(tag: &[u8]) -> Option<Variant> {
        match tag {
            b"inf3" => Some(Variant::Vanilla),
            b"dtsf" => Some(Variant::Legacy64),
            b"iext" => Some(Variant::Ext),
            b"iex+" => Some(Variant::ExtMore),
            _ => None,
        }
    }

    /// Whether the response's token field also carries an extraToken that
    /// must be validated.
    pub fn validate_as_ext(&self) -> bool {
        matches!(self, Variant::Ext | Variant::ExtMore)
    }

    /// Whether the response starts with the full header field set.
    /// Continuation packets carry client records only.
    pub fn has_header(&self) -> bool {
        !matches!(self, Variant::ExtMore)
    }

    /// Whether the header includes map crc and map size fields.
    pub fn has_map_details(&self) -> bool {
        matches!(self, Variant::Ext)
    }

    /// Whether every client record ends with an extra reserved field.
    pub fn has_client_trailer(&self) -> bool {
        matches!(self, Variant::Ext)
    }

    /// The most client records a single response may carry.
    pub fn client_cap(&self) -> usize {
        match self {
            Variant::Vanilla => 16,
            _ => 64,
        }
    }
}

/// An inbound datagram split into its variant tag and field payload.
#[derive(Debug, PartialEq, Eq)]
pub struct ResponsePacket<'a> {
    variant: Variant,
    body: &'a [u8],
}

impl<'a> ResponsePacket<'a> {
    const TAG_RANGE: Range<usize> = 10..14;
    const BODY_OFFSET: usize = 14;

    /// Classify an incoming datagram. A short packet or an unrecognized
    /// type tag means the datagram cannot be interpreted at all; there is
    /// nothing to partially decode.
    pub fn unpack(incoming: &'a [u8]) -> Option<Self> {
        if incoming.len() < Self::BODY_OFFSET {
            debug!("discarding short packet ({} bytes)", incoming.len());
            return None;
        }

        let tag: &[u8] = &incoming[Self::TAG_RANGE];
        let Some(variant) = Variant::from_tag(tag) else {
            debug!("discarding packet with unknown type tag {:?}", tag);
            return None;
        };

        Some(ResponsePacket {
            variant,
            body: &incoming[Self::BODY_OFFSET..],
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn body(&self) -> &'a [u8] {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let request = RequestPacket::new().unwrap();
        let packed = request.pack();

        assert_eq!(packed.len(), 15);
        assert_eq!(&packed[0..2], b"xe");
        assert_eq!(BigEndian::read_u16(&packed[2..4]), request.token().extra_token);
        assert_eq!(&packed[4..6], &[0, 0]);
        assert_eq!(&packed[6..10], &[0xff; 4]);
        assert_eq!(&packed[10..14], b"gie3");
        assert_eq!(packed[14], request.token().token);
    }

    #[test]
    fn classifies_known_tags() {
        let cases: [(&[u8; 4], Variant); 4] = [
            (b"inf3", Variant::Vanilla),
            (b"dtsf", Variant::Legacy64),
            (b"iext", Variant::Ext),
            (b"iex+", Variant::ExtMore),
        ];
        for (tag, variant) in cases {
            let mut raw = vec![0u8; 10];
            raw.extend_from_slice(tag);
            raw.extend_from_slice(b"123\0");
            let packet = ResponsePacket::unpack(&raw).unwrap();
            assert_eq!(packet.variant(), variant);
            assert_eq!(packet.body(), b"123\0");
        }
    }

    #[test]
    fn rejects_unknown_tag_and_short_packet() {
        let mut raw = vec![0u8; 10];
        raw.extend_from_slice(b"nope");
        assert!(ResponsePacket::unpack(&raw).is_none());
        assert!(ResponsePacket::unpack(&raw[..8]).is_none());
    }

    #[test]
    fn variant_rules() {
        assert_eq!(Variant::Vanilla.client_cap(), 16);
        assert_eq!(Variant::Legacy64.client_cap(), 64);
        assert!(!Variant::Vanilla.validate_as_ext());
        assert!(!Variant::Legacy64.validate_as_ext());
        assert!(Variant::Ext.validate_as_ext());
        assert!(Variant::ExtMore.validate_as_ext());
        assert!(!Variant::ExtMore.has_header());
        assert!(Variant::Ext.has_client_trailer());
    }
}
