//! Wire protocol message definitions
//! These are the binary envelope and body types for client-server communication

pub mod codec;

use std::fmt;

use prost::Message;

pub use codec::{decode_envelope, decode_message, encode, encode_raw, Body, CodecError};

/// Wire protocol version carried in every envelope.
///
/// Version 0 (legacy, field absent) and the current version are accepted;
/// anything else is rejected before dispatch.
pub const CURRENT_VERSION: i32 = 1;

/// Top-level envelope message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MsgType {
    Ping = 1,
    Pong = 2,
    LoginReq = 10,
    LoginResp = 11,
    ReconnectReq = 12,
    ReconnectResp = 13,
    MatchReq = 20,
    MatchResp = 21,
    PlayerInput = 30,
    SkillCast = 31,
    RoomSnapshot = 40,
    RoomOver = 41,
    ErrorResp = 90,
}

impl MsgType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Ping),
            2 => Some(Self::Pong),
            10 => Some(Self::LoginReq),
            11 => Some(Self::LoginResp),
            12 => Some(Self::ReconnectReq),
            13 => Some(Self::ReconnectResp),
            20 => Some(Self::MatchReq),
            21 => Some(Self::MatchResp),
            30 => Some(Self::PlayerInput),
            31 => Some(Self::SkillCast),
            40 => Some(Self::RoomSnapshot),
            41 => Some(Self::RoomOver),
            90 => Some(Self::ErrorResp),
            _ => None,
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::LoginReq => "LOGIN_REQ",
            Self::LoginResp => "LOGIN_RESP",
            Self::ReconnectReq => "RECONNECT_REQ",
            Self::ReconnectResp => "RECONNECT_RESP",
            Self::MatchReq => "MATCH_REQ",
            Self::MatchResp => "MATCH_RESP",
            Self::PlayerInput => "PLAYER_INPUT",
            Self::SkillCast => "SKILL_CAST",
            Self::RoomSnapshot => "ROOM_SNAPSHOT",
            Self::RoomOver => "ROOM_OVER",
            Self::ErrorResp => "ERROR_RESP",
        };
        f.write_str(name)
    }
}

/// Envelope wraps all payloads to allow a single decoder
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(int32, tag = "1")]
    pub msg_type: i32,
    #[prost(uint64, tag = "2")]
    pub seq: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
    #[prost(int32, tag = "4")]
    pub version: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Ping {
    #[prost(int64, tag = "1")]
    pub client_ts: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Pong {
    #[prost(int64, tag = "1")]
    pub client_ts: i64,
    #[prost(int64, tag = "2")]
    pub server_ts: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginReq {
    #[prost(string, tag = "1")]
    pub username: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct LoginResp {
    #[prost(string, tag = "1")]
    pub player_id: String,
    #[prost(string, tag = "2")]
    pub access_token: String,
    #[prost(string, tag = "3")]
    pub reconnect_token: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReconnectReq {
    #[prost(string, tag = "1")]
    pub reconnect_token: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReconnectResp {
    #[prost(string, tag = "1")]
    pub player_id: String,
    #[prost(string, tag = "2")]
    pub room_id: String,
    #[prost(bool, tag = "3")]
    pub ok: bool,
    #[prost(string, tag = "4")]
    pub reason: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MatchReq {
    #[prost(string, tag = "1")]
    pub mode: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MatchResp {
    #[prost(string, tag = "1")]
    pub match_id: String,
    #[prost(string, tag = "2")]
    pub room_id: String,
    #[prost(string, repeated, tag = "3")]
    pub players: Vec<String>,
}

/// Per-tick movement delta, clamped server-side
#[derive(Clone, PartialEq, Message)]
pub struct PlayerInput {
    #[prost(float, tag = "1")]
    pub dx: f32,
    #[prost(float, tag = "2")]
    pub dy: f32,
}

#[derive(Clone, PartialEq, Message)]
pub struct SkillCast {
    #[prost(int32, tag = "1")]
    pub skill_id: i32,
    #[prost(string, tag = "2")]
    pub target_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PlayerSnapshot {
    #[prost(string, tag = "1")]
    pub player_id: String,
    #[prost(float, tag = "2")]
    pub x: f32,
    #[prost(float, tag = "3")]
    pub y: f32,
    #[prost(int32, tag = "4")]
    pub hp: i32,
    #[prost(int32, tag = "5")]
    pub skill_cd: i32,
}

/// Full-state broadcast sent every tick; clients do not replay inputs
#[derive(Clone, PartialEq, Message)]
pub struct RoomSnapshot {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(int64, tag = "2")]
    pub tick: i64,
    #[prost(message, repeated, tag = "3")]
    pub players: Vec<PlayerSnapshot>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RoomOver {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(string, tag = "2")]
    pub winner_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ErrorResp {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Typed outbound payload paired with its envelope tag.
///
/// Sessions and rooms hand these to the send path, which does the envelope
/// encoding with the right per-session sequence number.
#[derive(Debug, Clone)]
pub enum ServerBody {
    Pong(Pong),
    LoginResp(LoginResp),
    ReconnectResp(ReconnectResp),
    MatchResp(MatchResp),
    RoomSnapshot(RoomSnapshot),
    RoomOver(RoomOver),
    Error(ErrorResp),
}

impl ServerBody {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Pong(_) => MsgType::Pong,
            Self::LoginResp(_) => MsgType::LoginResp,
            Self::ReconnectResp(_) => MsgType::ReconnectResp,
            Self::MatchResp(_) => MsgType::MatchResp,
            Self::RoomSnapshot(_) => MsgType::RoomSnapshot,
            Self::RoomOver(_) => MsgType::RoomOver,
            Self::Error(_) => MsgType::ErrorResp,
        }
    }

    pub fn encode_body(&self) -> Vec<u8> {
        match self {
            Self::Pong(m) => m.encode_to_vec(),
            Self::LoginResp(m) => m.encode_to_vec(),
            Self::ReconnectResp(m) => m.encode_to_vec(),
            Self::MatchResp(m) => m.encode_to_vec(),
            Self::RoomSnapshot(m) => m.encode_to_vec(),
            Self::RoomOver(m) => m.encode_to_vec(),
            Self::Error(m) => m.encode_to_vec(),
        }
    }
}
