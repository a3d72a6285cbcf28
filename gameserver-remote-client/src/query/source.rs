use super::{QueryPlayer, QueryResult};
use crate::net::{connect_udp, timed};
use crate::ErrorKind;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use futures::future::BoxFuture;
use log::debug;
use std::io::Cursor;
use std::time::{Duration, SystemTime};
use tokio::net::UdpSocket;

const SINGLE_PACKET: i32 = -1;
const SPLIT_PACKET: i32 = -2;

const A2S_INFO: u8 = 0x54;
const A2S_PLAYER: u8 = 0x55;
const S2A_INFO: u8 = 0x49;
const S2A_INFO_GOLDSOURCE: u8 = 0x6d;
const S2A_PLAYER: u8 = 0x44;
const S2C_CHALLENGE: u8 = 0x41;

const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
const NO_CHALLENGE: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

const RECEIVE_BUFFER_LEN: usize = 4096;
const MAX_FRAGMENTS: usize = 32;

/// Servers may answer a challenged request with yet another challenge; give up after this many.
const MAX_CHALLENGE_ROUNDS: usize = 3;

pub(super) fn query(
    host: &str,
    port: u16,
    timeout: Duration,
) -> BoxFuture<'_, crate::Result<QueryResult>> {
    Box::pin(async move {
        let socket = connect_udp((host, port), timeout).await?;

        let info = parse_info(&request(&socket, timeout, A2S_INFO).await?)?;

        let players = request(&socket, timeout, A2S_PLAYER)
            .await
            .and_then(|response| parse_players(&response));
        let players = match players {
            Ok(players) => players,
            Err(err) => {
                debug!("player list query to {}:{} failed: {}", host, port, err);
                Vec::new()
            }
        };

        Ok(QueryResult {
            query_time: SystemTime::now(),
            online: true,
            name: info.name,
            map: info.map,
            players_num: info.players,
            max_players_num: info.max_players,
            players,
        })
    })
}

fn request_packet(kind: u8, challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut packet = SINGLE_PACKET.to_le_bytes().to_vec();
    packet.push(kind);

    match kind {
        A2S_INFO => {
            packet.extend_from_slice(INFO_PAYLOAD);
            if let Some(challenge) = challenge {
                packet.extend_from_slice(&challenge);
            }
        }
        _ => packet.extend_from_slice(&challenge.unwrap_or(NO_CHALLENGE)),
    }
    packet
}

/// Sends a request, answering `S2C_CHALLENGE` replies, and returns the final response payload.
async fn request(socket: &UdpSocket, timeout: Duration, kind: u8) -> crate::Result<Vec<u8>> {
    let mut challenge = None;

    for _ in 0..=MAX_CHALLENGE_ROUNDS {
        timed(timeout, "send query", socket.send(&request_packet(kind, challenge))).await?;
        let response = receive(socket, timeout).await?;

        match response.first() {
            Some(&S2C_CHALLENGE) => {
                let bytes = response
                    .get(1..5)
                    .ok_or(ErrorKind::InvalidChallengeResponse)?;
                challenge = Some([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            Some(_) => return Ok(response),
            None => return Err(ErrorKind::InvalidPacket("empty response").into()),
        }
    }

    Err(ErrorKind::InvalidChallengeResponse.into())
}

/// Receives one logical response, reassembling split packets, and strips the packet header.
async fn receive(socket: &UdpSocket, timeout: Duration) -> crate::Result<Vec<u8>> {
    let mut buf = vec![0u8; RECEIVE_BUFFER_LEN];
    let len = timed(timeout, "receive query response", socket.recv(&mut buf)).await?;
    let datagram = &buf[..len];

    if datagram.len() < 5 {
        return Err(ErrorKind::InvalidPacket("truncated response").into());
    }

    match LittleEndian::read_i32(&datagram[..4]) {
        SINGLE_PACKET => Ok(datagram[4..].to_vec()),
        SPLIT_PACKET => {
            let first = Fragment::parse(datagram)?;
            let mut reassembly = Reassembly::new(&first)?;
            reassembly.insert(first)?;

            while !reassembly.is_complete() {
                let len = timed(timeout, "receive query response", socket.recv(&mut buf)).await?;
                reassembly.insert(Fragment::parse(&buf[..len])?)?;
            }
            reassembly.finish()
        }
        _ => Err(ErrorKind::InvalidPacket("unknown packet header").into()),
    }
}

/// One datagram of a split response, in the Source engine layout.
#[derive(Debug)]
pub(crate) struct Fragment {
    id: i32,
    total: u8,
    number: u8,
    payload: Vec<u8>,
}

impl Fragment {
    // header(4) + id(4) + total(1) + number(1) + size(2)
    const HEADER_LEN: usize = 12;

    pub fn parse(datagram: &[u8]) -> crate::Result<Self> {
        if datagram.len() < Self::HEADER_LEN {
            return Err(ErrorKind::InvalidPacket("truncated split packet").into());
        }
        if LittleEndian::read_i32(&datagram[..4]) != SPLIT_PACKET {
            return Err(ErrorKind::InvalidPacket("expected a split packet").into());
        }

        let id = LittleEndian::read_i32(&datagram[4..8]);
        if id as u32 & 0x8000_0000 != 0 {
            let message = "compressed split packets are not supported";
            return Err(ErrorKind::InvalidPacket(message).into());
        }

        Ok(Fragment {
            id,
            total: datagram[8],
            number: datagram[9],
            payload: datagram[Self::HEADER_LEN..].to_vec(),
        })
    }
}

/// Collects the fragments of one split response.
pub(crate) struct Reassembly {
    id: i32,
    fragments: Vec<Option<Vec<u8>>>,
}

impl Reassembly {
    pub fn new(first: &Fragment) -> crate::Result<Self> {
        let total = first.total as usize;
        if total == 0 || total > MAX_FRAGMENTS {
            return Err(ErrorKind::InvalidPacket("bad split packet count").into());
        }

        Ok(Reassembly {
            id: first.id,
            fragments: vec![None; total],
        })
    }

    pub fn insert(&mut self, fragment: Fragment) -> crate::Result<()> {
        if fragment.id != self.id || fragment.total as usize != self.fragments.len() {
            return Err(ErrorKind::InvalidPacket("split packet from another response").into());
        }

        let slot = self
            .fragments
            .get_mut(fragment.number as usize)
            .ok_or(ErrorKind::InvalidPacket("split packet number out of range"))?;
        *slot = Some(fragment.payload);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.fragments.iter().all(Option::is_some)
    }

    /// Joins the fragments in order and strips the single-packet header they carry.
    pub fn finish(self) -> crate::Result<Vec<u8>> {
        let joined: Vec<u8> = self.fragments.into_iter().flatten().flatten().collect();

        if joined.len() < 5 || LittleEndian::read_i32(&joined[..4]) != SINGLE_PACKET {
            return Err(ErrorKind::InvalidPacket("bad reassembled packet header").into());
        }
        Ok(joined[4..].to_vec())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Info {
    pub name: String,
    pub map: String,
    pub players: usize,
    pub max_players: usize,
}

fn truncated(_: std::io::Error) -> crate::Error {
    ErrorKind::InvalidPacket("truncated response").into()
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> crate::Result<String> {
    let data: &[u8] = *cursor.get_ref();
    let start = cursor.position() as usize;
    let rest = data.get(start..).unwrap_or_default();
    let len = rest
        .iter()
        .position(|b| *b == 0)
        .ok_or(ErrorKind::InvalidPacket("unterminated string"))?;

    cursor.set_position((start + len + 1) as u64);
    Ok(String::from_utf8_lossy(&rest[..len]).into_owned())
}

pub(crate) fn parse_info(payload: &[u8]) -> crate::Result<Info> {
    let mut cursor = Cursor::new(payload);

    match cursor.read_u8().map_err(truncated)? {
        S2A_INFO => {
            let _protocol = cursor.read_u8().map_err(truncated)?;
            let name = read_string(&mut cursor)?;
            let map = read_string(&mut cursor)?;
            let _folder = read_string(&mut cursor)?;
            let _game = read_string(&mut cursor)?;
            let _app_id = cursor.read_i16::<LittleEndian>().map_err(truncated)?;
            let players = cursor.read_u8().map_err(truncated)?;
            let max_players = cursor.read_u8().map_err(truncated)?;

            Ok(Info {
                name,
                map,
                players: players as usize,
                max_players: max_players as usize,
            })
        }
        S2A_INFO_GOLDSOURCE => {
            let _address = read_string(&mut cursor)?;
            let name = read_string(&mut cursor)?;
            let map = read_string(&mut cursor)?;
            let _folder = read_string(&mut cursor)?;
            let _game = read_string(&mut cursor)?;
            let players = cursor.read_u8().map_err(truncated)?;
            let max_players = cursor.read_u8().map_err(truncated)?;

            Ok(Info {
                name,
                map,
                players: players as usize,
                max_players: max_players as usize,
            })
        }
        _ => Err(ErrorKind::InvalidPacket("unexpected info response type").into()),
    }
}

pub(crate) fn parse_players(payload: &[u8]) -> crate::Result<Vec<QueryPlayer>> {
    let mut cursor = Cursor::new(payload);

    if cursor.read_u8().map_err(truncated)? != S2A_PLAYER {
        return Err(ErrorKind::InvalidPacket("unexpected player response type").into());
    }
    let count = cursor.read_u8().map_err(truncated)?;

    let mut players = Vec::with_capacity(count as usize);
    for _ in 0..count {
        // Busy servers cut the list short, keep whatever arrived
        match read_player(&mut cursor) {
            Ok(player) => players.push(player),
            Err(_) => break,
        }
    }

    Ok(players)
}

fn read_player(cursor: &mut Cursor<&[u8]>) -> crate::Result<QueryPlayer> {
    let _index = cursor.read_u8().map_err(truncated)?;
    let name = read_string(cursor)?;
    let score = cursor.read_i32::<LittleEndian>().map_err(truncated)?;
    let _duration = cursor.read_f32::<LittleEndian>().map_err(truncated)?;

    Ok(QueryPlayer {
        name,
        score: score as i64,
    })
}
