use std::collections::HashSet;

use log::debug;

use crate::error::TeeQueryError;
use crate::packet::{RequestToken, ResponsePacket, Variant};
use crate::parse::{unpack_int, Slots};

/// One connected client slot, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Player name
    pub name: String,
    /// Clan tag
    pub clan: String,
    /// Country code
    pub country: i32,
    /// Current score
    pub score: i32,
    /// Whether the client is spectating rather than playing
    pub is_spectator: bool,
}

/// Server information decoded from one info response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Game version the server runs
    pub version: String,
    /// Server name
    pub name: String,
    /// Current map
    pub map: String,
    /// Map crc, reported by the extended variant only
    pub map_crc: Option<i32>,
    /// Map size in bytes, reported by the extended variant only
    pub map_size: Option<i32>,
    /// Game type (e.g. `dm`, `ctf`)
    pub game_type: String,
    /// Is the server password protected?
    pub password: bool,
    /// Players currently in game
    pub player_count: i32,
    /// Player slot limit
    pub max_player_count: i32,
    /// Connected clients actually decoded from this response
    pub client_count: i32,
    /// Client slot limit
    pub max_client_count: i32,
    /// Per-client details, in wire order
    pub clients: Vec<Client>,
}

/// Decoder for one request/response exchange.
///
/// Carries the exchange state explicitly: the tokens the request was sent
/// with, and the packet indices and client ordinals already seen, so that
/// late or duplicate packets from the same exchange are recognized.
/// Decoding a packet is a pure synchronous computation over its bytes.
#[derive(Debug)]
pub struct InfoDecoder {
    request: RequestToken,
    ignore_token: bool,
    ext_packets: HashSet<i32>,
    client_ordinals: HashSet<i32>,
}

impl InfoDecoder {
    /// A client record on the wire: name, clan, country, score and the
    /// spectator flag.
    const CLIENT_FIELDS: usize = 5;

    pub fn new(request: RequestToken, ignore_token: bool) -> Self {
        InfoDecoder {
            request,
            ignore_token,
            ext_packets: HashSet::new(),
            client_ordinals: HashSet::new(),
        }
    }

    /// Decode one inbound datagram.
    ///
    /// `Ok(None)` means the packet could not be interpreted (unknown tag,
    /// out-of-range packet number, duplicate packet, truncated fields) —
    /// the exchange itself did not fail. Token mismatches are real errors
    /// unless the decoder was built with `ignore_token`.
    pub fn decode(&mut self, incoming: &[u8]) -> Result<Option<ServerInfo>, TeeQueryError> {
        let Some(packet) = ResponsePacket::unpack(incoming) else {
            return Ok(None);
        };
        let variant = packet.variant();
        let mut slots = Slots::split(packet.body());

        // a token field that does not parse validates as zero, so a
        // garbled echo still fails token validation instead of passing
        // as undecodable
        let raw_token = slots.next_int().unwrap_or(0);
        self.validate_token(raw_token, variant)?;

        let mut info = ServerInfo::default();
        if variant.has_header() {
            if Self::decode_header(&mut slots, variant, &mut info).is_none() {
                debug!("response header is truncated");
                return Ok(None);
            }
        }

        // 64legacy packets number their clients; the packet states the
        // ordinal of its first record.
        let mut clientnum: i32 = 0;
        if variant == Variant::Legacy64 {
            let Some(field) = slots.next_raw() else {
                return Ok(None);
            };
            clientnum = unpack_int(field);
            if !(0..64).contains(&clientnum) {
                debug!("rejecting 64legacy packet starting at ordinal {clientnum}");
                return Ok(None);
            }
        }

        if variant == Variant::ExtMore {
            let Some(packetnum) = slots.next_int() else {
                return Ok(None);
            };
            // 0 is reserved for the primary ext packet
            if packetnum <= 0 || packetnum >= 64 {
                debug!("ext continuation packet number {packetnum} out of range");
                return Ok(None);
            }
            if !self.ext_packets.insert(packetnum) {
                debug!("duplicate ext continuation packet {packetnum}");
                return Ok(None);
            }
        }

        if variant == Variant::Ext {
            let Some(_reserved) = slots.next_raw() else {
                return Ok(None);
            };
            if !self.ext_packets.insert(0) {
                debug!("duplicate primary ext packet");
                return Ok(None);
            }
        }

        let cap = variant.client_cap();
        while slots.remaining() > 0 && (info.client_count as usize) < cap {
            if slots.remaining() < Self::CLIENT_FIELDS {
                break;
            }
            let Some(client) = Self::decode_client(&mut slots, variant) else {
                break;
            };

            // an ordinal counts as seen only once its record was actually
            // consumed; a truncated tail must not shadow the ordinal a
            // continuation packet will restate
            let mut add_client = true;
            if variant == Variant::Legacy64 && !self.client_ordinals.insert(clientnum) {
                add_client = false;
            }

            if add_client {
                info.clients.push(client);
                info.client_count += 1;
            }
            clientnum += 1;
        }

        debug!(
            "decoded {:?} response: {} clients",
            variant, info.client_count
        );
        Ok(Some(info))
    }

    fn validate_token(&self, raw_token: i32, variant: Variant) -> Result<(), TeeQueryError> {
        let got = (raw_token & 0xff) as u8;
        if got != self.request.token {
            debug!("token mismatch: {got} != {}", self.request.token);
            if !self.ignore_token {
                return Err(TeeQueryError::InvalidToken {
                    got,
                    expected: self.request.token,
                });
            }
        }

        if variant.validate_as_ext() {
            let got = ((raw_token & 0xffff00) >> 8) as u16;
            if got != self.request.extra_token {
                debug!("extra token mismatch: {got} != {}", self.request.extra_token);
                if !self.ignore_token {
                    return Err(TeeQueryError::InvalidExtraToken {
                        got,
                        expected: self.request.extra_token,
                    });
                }
            }
        }
        Ok(())
    }

    /// Decode the fixed header fields, in wire order. `None` on a missing
    /// or malformed field.
    fn decode_header(
        slots: &mut Slots,
        variant: Variant,
        info: &mut ServerInfo,
    ) -> Option<()> {
        info.version = slots.next_string()?;
        info.name = slots.next_string()?;
        info.map = slots.next_string()?;

        if variant.has_map_details() {
            info.map_crc = Some(slots.next_int()?);
            info.map_size = Some(slots.next_int()?);
        }

        info.game_type = slots.next_string()?;
        info.password = slots.next_int()? == 1;
        info.player_count = slots.next_int()?;
        info.max_player_count = slots.next_int()?;
        // the advertised client count is discarded; the count is rebuilt
        // from the records actually decoded
        let _advertised = slots.next_int()?;
        info.max_client_count = slots.next_int()?;
        Some(())
    }

    /// Decode one client record. `None` on a malformed integer field,
    /// which ends the list with whatever was already decoded.
    fn decode_client(slots: &mut Slots, variant: Variant) -> Option<Client> {
        let client = Client {
            name: slots.next_string()?,
            clan: slots.next_string()?,
            country: slots.next_int()?,
            score: slots.next_int()?,
            is_spectator: slots.next_int()? == 0,
        };
        if variant.has_client_trailer() {
            slots.next_raw();
        }
        Some(client)
    }
}
