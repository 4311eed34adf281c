//! Envelope encoding and decoding
//!
//! The codec is pure: it turns typed messages into length-delimited binary
//! envelopes and back, and never touches connection or session state.

use prost::Message;

use super::{
    Envelope, ErrorResp, LoginReq, LoginResp, MatchReq, MatchResp, MsgType, Ping, PlayerInput,
    Pong, ReconnectReq, ReconnectResp, RoomOver, RoomSnapshot, SkillCast, CURRENT_VERSION,
};

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope")]
    BadEnvelope(#[source] prost::DecodeError),

    #[error("malformed {0} body")]
    BadBody(MsgType, #[source] prost::DecodeError),

    #[error("unknown message type: {0}")]
    UnknownType(i32),
}

/// A decoded envelope body, tagged by message type
#[derive(Debug, Clone)]
pub enum Body {
    Ping(Ping),
    Pong(Pong),
    LoginReq(LoginReq),
    LoginResp(LoginResp),
    ReconnectReq(ReconnectReq),
    ReconnectResp(ReconnectResp),
    MatchReq(MatchReq),
    MatchResp(MatchResp),
    PlayerInput(PlayerInput),
    SkillCast(SkillCast),
    RoomSnapshot(RoomSnapshot),
    RoomOver(RoomOver),
    ErrorResp(ErrorResp),
}

/// Wrap a typed payload into an envelope and serialize it
pub fn encode<M: Message>(msg_type: MsgType, msg: &M, seq: u64) -> Vec<u8> {
    encode_raw(msg_type, msg.encode_to_vec(), seq)
}

/// Wrap already-serialized body bytes into an envelope
pub fn encode_raw(msg_type: MsgType, body: Vec<u8>, seq: u64) -> Vec<u8> {
    Envelope {
        msg_type: msg_type as i32,
        seq,
        body,
        version: CURRENT_VERSION,
    }
    .encode_to_vec()
}

/// Deserialize an envelope from raw bytes
pub fn decode_envelope(data: &[u8]) -> Result<Envelope, CodecError> {
    Envelope::decode(data).map_err(CodecError::BadEnvelope)
}

/// Deserialize an envelope and its payload into a typed body
pub fn decode_message(data: &[u8]) -> Result<(MsgType, u64, Body), CodecError> {
    let env = decode_envelope(data)?;
    let msg_type = MsgType::from_i32(env.msg_type).ok_or(CodecError::UnknownType(env.msg_type))?;
    let body = decode_body(msg_type, &env.body)?;
    Ok((msg_type, env.seq, body))
}

/// Decode body bytes according to the envelope tag
pub fn decode_body(msg_type: MsgType, body: &[u8]) -> Result<Body, CodecError> {
    let bad = |e| CodecError::BadBody(msg_type, e);
    let body = match msg_type {
        MsgType::Ping => Body::Ping(Ping::decode(body).map_err(bad)?),
        MsgType::Pong => Body::Pong(Pong::decode(body).map_err(bad)?),
        MsgType::LoginReq => Body::LoginReq(LoginReq::decode(body).map_err(bad)?),
        MsgType::LoginResp => Body::LoginResp(LoginResp::decode(body).map_err(bad)?),
        MsgType::ReconnectReq => Body::ReconnectReq(ReconnectReq::decode(body).map_err(bad)?),
        MsgType::ReconnectResp => Body::ReconnectResp(ReconnectResp::decode(body).map_err(bad)?),
        MsgType::MatchReq => Body::MatchReq(MatchReq::decode(body).map_err(bad)?),
        MsgType::MatchResp => Body::MatchResp(MatchResp::decode(body).map_err(bad)?),
        MsgType::PlayerInput => Body::PlayerInput(PlayerInput::decode(body).map_err(bad)?),
        MsgType::SkillCast => Body::SkillCast(SkillCast::decode(body).map_err(bad)?),
        MsgType::RoomSnapshot => Body::RoomSnapshot(RoomSnapshot::decode(body).map_err(bad)?),
        MsgType::RoomOver => Body::RoomOver(RoomOver::decode(body).map_err(bad)?),
        MsgType::ErrorResp => Body::ErrorResp(ErrorResp::decode(body).map_err(bad)?),
    };
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::super::PlayerSnapshot;
    use super::*;

    #[test]
    fn login_req_roundtrip() {
        let data = encode(
            MsgType::LoginReq,
            &LoginReq {
                username: "ada".to_string(),
            },
            7,
        );

        let (msg_type, seq, body) = decode_message(&data).unwrap();
        assert_eq!(msg_type, MsgType::LoginReq);
        assert_eq!(seq, 7);
        match body {
            Body::LoginReq(req) => assert_eq!(req.username, "ada"),
            other => panic!("wrong body: {:?}", other),
        }
    }

    #[test]
    fn snapshot_roundtrip_preserves_players() {
        let snap = RoomSnapshot {
            room_id: "room-1".to_string(),
            tick: 42,
            players: vec![
                PlayerSnapshot {
                    player_id: "a".to_string(),
                    x: -50.0,
                    y: 0.0,
                    hp: 100,
                    skill_cd: 0,
                },
                PlayerSnapshot {
                    player_id: "b".to_string(),
                    x: 50.0,
                    y: 0.0,
                    hp: 90,
                    skill_cd: 20,
                },
            ],
        };

        let data = encode(MsgType::RoomSnapshot, &snap, 3);
        let (_, _, body) = decode_message(&data).unwrap();
        match body {
            Body::RoomSnapshot(decoded) => {
                assert_eq!(decoded.tick, 42);
                assert_eq!(decoded.players.len(), 2);
                let b = decoded
                    .players
                    .iter()
                    .find(|p| p.player_id == "b")
                    .unwrap();
                assert_eq!(b.hp, 90);
                assert_eq!(b.skill_cd, 20);
            }
            other => panic!("wrong body: {:?}", other),
        }
    }

    #[test]
    fn envelope_carries_current_version() {
        let data = encode(MsgType::Ping, &Ping { client_ts: 1 }, 0);
        let env = decode_envelope(&data).unwrap();
        assert_eq!(env.version, CURRENT_VERSION);
    }

    #[test]
    fn garbage_fails_as_bad_envelope() {
        let err = decode_message(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CodecError::BadEnvelope(_)));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let data = encode_raw_with_type(99, Vec::new());
        let err = decode_message(&data).unwrap_err();
        assert!(matches!(err, CodecError::UnknownType(99)));
    }

    #[test]
    fn mismatched_body_fails_as_bad_body() {
        // A RoomSnapshot body is not a valid Ping (string field where a
        // varint is expected).
        let snap = RoomSnapshot {
            room_id: "x".repeat(64),
            tick: 1,
            players: Vec::new(),
        };
        let data = encode_raw(MsgType::Ping, snap.encode_to_vec(), 0);
        let err = decode_message(&data).unwrap_err();
        assert!(matches!(err, CodecError::BadBody(MsgType::Ping, _)));
    }

    fn encode_raw_with_type(msg_type: i32, body: Vec<u8>) -> Vec<u8> {
        Envelope {
            msg_type,
            seq: 0,
            body,
            version: CURRENT_VERSION,
        }
        .encode_to_vec()
    }
}
