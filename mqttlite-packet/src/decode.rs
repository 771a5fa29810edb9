use core::convert::TryFrom;
use core::str;

use nom::bytes::complete::tag;
use nom::combinator::{map, map_opt, map_res, verify};
use nom::error::{context, make_error, ErrorKind};
use nom::multi::length_data;
use nom::number::complete::{be_u16, be_u8};
use nom::sequence::tuple;
use nom::IResult;
use thiserror::Error;

use crate::packet::*;

/// Decoding failures.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A remaining-length continuation bit survived four bytes.
    #[error("malformed remaining length")]
    MalformedRemainingLength,
    /// A control packet this client does not handle, notably the QoS 2
    /// delivery packets.
    #[error("unsupported packet type {0:#04x}")]
    UnsupportedPacketType(u8),
    /// The declared packet length exceeds the available input.
    #[error("truncated packet")]
    TruncatedPacket,
    /// The packet body does not follow the wire format.
    #[error("malformed packet")]
    MalformedPacket,
}

const CONTINUATION_BIT: u8 = 0x80;

/// Largest value the remaining-length field can represent.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Decodes the remaining-length variable byte integer.
///
/// Returns the value and the number of bytes consumed, or `Ok(None)` when
/// `input` ends before the terminating byte (read more and retry).
pub fn decode_variable_length(input: &[u8]) -> Result<Option<(usize, usize)>, DecodeError> {
    let mut value = 0;
    for (i, byte) in input.iter().enumerate() {
        if i == 4 {
            return Err(DecodeError::MalformedRemainingLength);
        }
        value += usize::from(byte & !CONTINUATION_BIT) << (7 * i);
        if byte & CONTINUATION_BIT == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if input.len() >= 4 {
        Err(DecodeError::MalformedRemainingLength)
    } else {
        Ok(None)
    }
}

/// Splits one packet off the front of `input`.
///
/// Returns the packet together with the total number of bytes it occupied
/// (`1 + remaining-length bytes + remaining length`).
pub fn read_packet(input: &[u8]) -> Result<(Packet<'_>, usize), DecodeError> {
    if input.len() < 2 {
        return Err(DecodeError::TruncatedPacket);
    }
    let (remaining_length, remlen_bytes) =
        decode_variable_length(&input[1..])?.ok_or(DecodeError::TruncatedPacket)?;
    let total = 1 + remlen_bytes + remaining_length;
    if input.len() < total {
        return Err(DecodeError::TruncatedPacket);
    }

    let type_nibble = input[0] >> 4;
    let packet_flags = input[0] & 0x0F;
    let body = &input[1 + remlen_bytes..total];

    let packet_type =
        Type::try_from(type_nibble).map_err(|_| DecodeError::UnsupportedPacketType(type_nibble))?;

    let packet = match packet_type {
        Type::CONNECT => body_packet(Connect::parse(body), Packet::Connect)?,
        Type::CONNACK => body_packet(ConnectAck::parse(body), Packet::ConnectAck)?,
        Type::PUBLISH => {
            let flags = PublishFlags::from_bits_truncate(packet_flags);
            body_packet(Publish::parse(flags, body), Packet::Publish)?
        }
        Type::PUBACK => body_packet(PublishAck::parse(body), Packet::PublishAck)?,
        Type::SUBSCRIBE => body_packet(Subscribe::parse(body), Packet::Subscribe)?,
        Type::SUBACK => body_packet(SubscribeAck::parse(body), Packet::SubscribeAck)?,
        Type::UNSUBSCRIBE => body_packet(Unsubscribe::parse(body), Packet::Unsubscribe)?,
        Type::UNSUBACK => body_packet(UnsubscribeAck::parse(body), Packet::UnsubscribeAck)?,
        Type::PINGREQ => Packet::Ping,
        Type::PINGRESP => Packet::Pong,
        Type::DISCONNECT => Packet::Disconnect,
        Type::PUBREC | Type::PUBREL | Type::PUBCOMP => {
            return Err(DecodeError::UnsupportedPacketType(type_nibble));
        }
    };

    Ok((packet, total))
}

fn body_packet<'a, B>(
    parsed: IResult<&'a [u8], B>,
    wrap: impl FnOnce(B) -> Packet<'a>,
) -> Result<Packet<'a>, DecodeError> {
    match parsed {
        Ok((_, body)) => Ok(wrap(body)),
        Err(_) => Err(DecodeError::MalformedPacket),
    }
}

/// Text fields in the Control Packets are encoded as UTF-8 strings.
fn utf8_str(input: &[u8]) -> IResult<&[u8], &str> {
    context("utf8 string", map_res(length_data(be_u16), str::from_utf8))(input)
}

/// The Topic Name identifies the information channel to which payload data is published.
fn topic_name(input: &[u8]) -> IResult<&[u8], &str> {
    context(
        "topic name",
        verify(utf8_str, |s: &str| s.bytes().all(|c| c != b'#')),
    )(input)
}

/// An expression contained in a Subscription, to indicate an interest in one or more topics.
///
/// A Topic Filter can include wildcard characters.
fn topic_filter(input: &[u8]) -> IResult<&[u8], &str> {
    context("topic filter", utf8_str)(input)
}

fn packet_id(input: &[u8]) -> IResult<&[u8], PacketId> {
    context("packet id", be_u16)(input)
}

impl<'a> Connect<'a> {
    fn parse(input: &'a [u8]) -> IResult<&'a [u8], Connect<'a>> {
        let (input, (_, _, flags, keep_alive)) = tuple((
            context("protocol name", tag(PROTOCOL_NAME)),
            context(
                "protocol level",
                verify(be_u8, |&level| level == PROTOCOL_LEVEL),
            ),
            context("flags", map_opt(be_u8, ConnectFlags::from_bits)),
            context("keepalive", be_u16),
        ))(input)?;
        let (input, client_id) = context("client id", utf8_str)(input)?;
        let (input, last_will) = if flags.contains(ConnectFlags::LAST_WILL) {
            let qos = match flags.will_qos() {
                Some(qos) => qos,
                None => return Err(nom::Err::Error(make_error(input, ErrorKind::Verify))),
            };
            let (input, (topic, message)) = tuple((
                context("will topic", utf8_str),
                context("will message", length_data(be_u16)),
            ))(input)?;

            (
                input,
                Some(LastWill {
                    qos,
                    retain: flags.contains(ConnectFlags::WILL_RETAIN),
                    topic,
                    message,
                }),
            )
        } else {
            (input, None)
        };
        let (input, username) = if flags.contains(ConnectFlags::USERNAME) {
            context("username", map(utf8_str, Some))(input)?
        } else {
            (input, None)
        };
        let (input, password) = if flags.contains(ConnectFlags::PASSWORD) {
            context("password", map(length_data(be_u16), Some))(input)?
        } else {
            (input, None)
        };

        Ok((
            input,
            Connect {
                clean_session: flags.contains(ConnectFlags::CLEAN_SESSION),
                keep_alive,
                client_id,
                last_will,
                username,
                password,
            },
        ))
    }
}

impl ConnectAck {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        map(
            tuple((
                context("flags", map_opt(be_u8, ConnectAckFlags::from_bits)),
                context("return code", map_res(be_u8, ConnectReturnCode::try_from)),
            )),
            |(flags, return_code)| ConnectAck {
                session_present: flags.contains(ConnectAckFlags::SESSION_PRESENT),
                return_code,
            },
        )(input)
    }
}

impl<'a> Publish<'a> {
    fn parse(flags: PublishFlags, input: &'a [u8]) -> IResult<&'a [u8], Publish<'a>> {
        let (input, topic) = topic_name(input)?;
        let qos = match flags.qos() {
            Some(qos) => qos,
            None => return Err(nom::Err::Error(make_error(input, ErrorKind::Verify))),
        };
        let (payload, packet_id) = if qos >= QoS::AtLeastOnce {
            map(packet_id, Some)(input)?
        } else {
            (input, None)
        };

        Ok((
            &[][..],
            Publish {
                dup: flags.contains(PublishFlags::DUP),
                qos,
                retain: flags.contains(PublishFlags::RETAIN),
                topic,
                packet_id,
                payload,
            },
        ))
    }
}

impl PublishAck {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        map(packet_id, |packet_id| Self { packet_id })(input)
    }
}

impl<'a> Subscribe<'a> {
    fn parse(input: &'a [u8]) -> IResult<&'a [u8], Subscribe<'a>> {
        map(
            tuple((
                packet_id,
                context(
                    "subscription",
                    tuple((topic_filter, context("QoS", map_res(be_u8, QoS::try_from)))),
                ),
            )),
            |(packet_id, (topic_filter, qos))| Subscribe {
                packet_id,
                topic_filter,
                qos,
            },
        )(input)
    }
}

impl SubscribeAck {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        map(
            tuple((
                packet_id,
                context(
                    "return code",
                    map_opt(be_u8, |b| {
                        if b == Self::FAILURE {
                            Some(SubscribeReturnCode::Failure)
                        } else {
                            QoS::try_from(b).ok().map(SubscribeReturnCode::Success)
                        }
                    }),
                ),
            )),
            |(packet_id, return_code)| SubscribeAck {
                packet_id,
                return_code,
            },
        )(input)
    }
}

impl<'a> Unsubscribe<'a> {
    fn parse(input: &'a [u8]) -> IResult<&'a [u8], Unsubscribe<'a>> {
        map(
            tuple((packet_id, topic_filter)),
            |(packet_id, topic_filter)| Unsubscribe {
                packet_id,
                topic_filter,
            },
        )(input)
    }
}

impl UnsubscribeAck {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        map(packet_id, |packet_id| Self { packet_id })(input)
    }
}

#[cfg(test)]
mod tests {
    use crate::encode::WriteTo;

    use super::*;

    #[test]
    fn test_variable_length() {
        macro_rules! assert_variable_length (
            ($bytes:expr, $res:expr) => {{
                assert_eq!(
                    decode_variable_length($bytes),
                    Ok(Some(($res, $bytes.len())))
                );
            }};
        );

        assert_variable_length!(b"\x00", 0);
        assert_variable_length!(b"\x7f", 127);
        assert_variable_length!(b"\x80\x01", 128);
        assert_variable_length!(b"\xff\x7f", 16383);
        assert_variable_length!(b"\x80\x80\x01", 16384);
        assert_variable_length!(b"\xff\xff\x7f", 2097151);
        assert_variable_length!(b"\x80\x80\x80\x01", 2097152);
        assert_variable_length!(b"\xff\xff\xff\x7f", MAX_REMAINING_LENGTH);

        // trailing bytes are left alone
        assert_eq!(decode_variable_length(b"\x7f\x7f"), Ok(Some((127, 1))));

        // incomplete sequences wait for more input
        assert_eq!(decode_variable_length(b""), Ok(None));
        assert_eq!(decode_variable_length(b"\xff\xff\xff"), Ok(None));

        // a continuation bit on the fourth byte is a protocol violation
        assert_eq!(
            decode_variable_length(b"\xff\xff\xff\xff"),
            Err(DecodeError::MalformedRemainingLength)
        );
        assert_eq!(
            decode_variable_length(b"\xff\xff\xff\xff\x7f"),
            Err(DecodeError::MalformedRemainingLength)
        );
    }

    #[test]
    fn test_variable_length_round_trip() {
        for &n in &[0, 1, 127, 128, 16383, 16384, 2097151, 2097152, MAX_REMAINING_LENGTH] {
            let mut buf = Vec::new();
            let header = FixedHeader {
                packet_type: Type::PUBLISH,
                packet_flags: 0,
                remaining_length: n,
            };
            header.write_to(&mut buf);
            assert_eq!(
                decode_variable_length(&buf[1..]),
                Ok(Some((n, buf.len() - 1)))
            );
        }
    }

    #[test]
    fn test_connect() {
        assert_eq!(
            read_packet(b"\x10\x1D\x00\x04MQTT\x04\xC0\x00\x3C\x00\x0512345\x00\x04user\x00\x04pass"),
            Ok((
                Packet::Connect(Connect {
                    clean_session: false,
                    keep_alive: 60,
                    client_id: "12345",
                    last_will: None,
                    username: Some("user"),
                    password: Some(b"pass"),
                }),
                31,
            ))
        );

        assert_eq!(
            read_packet(b"\x10\x21\x00\x04MQTT\x04\x0C\x00\x3C\x00\x0512345\x00\x05topic\x00\x07message"),
            Ok((
                Packet::Connect(Connect {
                    clean_session: false,
                    keep_alive: 60,
                    client_id: "12345",
                    last_will: Some(LastWill {
                        qos: QoS::AtLeastOnce,
                        retain: false,
                        topic: "topic",
                        message: b"message",
                    }),
                    username: None,
                    password: None,
                }),
                35,
            ))
        );

        assert_eq!(
            read_packet(b"\x10\x06\x00\x02MQ\x04\x00"),
            Err(DecodeError::MalformedPacket),
            "invalid protocol name"
        );
        assert_eq!(
            read_packet(b"\x10\x08\x00\x04MQTT\x03\x00"),
            Err(DecodeError::MalformedPacket),
            "invalid protocol level"
        );
        assert_eq!(
            read_packet(b"\x10\x08\x00\x04MQTT\x04\xff"),
            Err(DecodeError::MalformedPacket),
            "reserved connect flag set"
        );
    }

    #[test]
    fn test_connect_ack() {
        assert_eq!(
            read_packet(b"\x20\x02\x00\x00"),
            Ok((
                Packet::ConnectAck(ConnectAck {
                    session_present: false,
                    return_code: ConnectReturnCode::ConnectionAccepted,
                }),
                4,
            ))
        );
        assert_eq!(
            read_packet(b"\x20\x02\x01\x04"),
            Ok((
                Packet::ConnectAck(ConnectAck {
                    session_present: true,
                    return_code: ConnectReturnCode::BadUserNameOrPassword,
                }),
                4,
            ))
        );
        assert_eq!(
            read_packet(b"\x20\x02\x03\x04"),
            Err(DecodeError::MalformedPacket),
            "invalid ack flags"
        );
    }

    #[test]
    fn test_publish() {
        assert_eq!(
            read_packet(b"\x32\x0D\x00\x05topic\x43\x21data"),
            Ok((
                Packet::Publish(Publish {
                    dup: false,
                    retain: false,
                    qos: QoS::AtLeastOnce,
                    topic: "topic",
                    packet_id: Some(0x4321),
                    payload: b"data",
                }),
                15,
            ))
        );
        assert_eq!(
            read_packet(b"\x30\x0b\x00\x05topicdata"),
            Ok((
                Packet::Publish(Publish {
                    dup: false,
                    retain: false,
                    qos: QoS::AtMostOnce,
                    topic: "topic",
                    packet_id: None,
                    payload: b"data",
                }),
                13,
            ))
        );
        assert_eq!(
            read_packet(b"\x30\x05\x00\x01t\x68\x69"),
            Ok((
                Packet::Publish(Publish {
                    dup: false,
                    retain: false,
                    qos: QoS::AtMostOnce,
                    topic: "t",
                    packet_id: None,
                    payload: b"hi",
                }),
                7,
            ))
        );
        // QoS bits 0b11 are a protocol violation
        assert_eq!(
            read_packet(b"\x36\x0b\x00\x05topicdata"),
            Err(DecodeError::MalformedPacket)
        );

        assert_eq!(
            read_packet(b"\x40\x02\x43\x21"),
            Ok((Packet::PublishAck(PublishAck { packet_id: 0x4321 }), 4))
        );
    }

    #[test]
    fn test_unsupported_packet_types() {
        // the QoS 2 delivery packets
        assert_eq!(
            read_packet(b"\x50\x02\x43\x21"),
            Err(DecodeError::UnsupportedPacketType(5))
        );
        assert_eq!(
            read_packet(b"\x62\x02\x43\x21"),
            Err(DecodeError::UnsupportedPacketType(6))
        );
        assert_eq!(
            read_packet(b"\x70\x02\x43\x21"),
            Err(DecodeError::UnsupportedPacketType(7))
        );
        // reserved type nibbles
        assert_eq!(
            read_packet(b"\x00\x00"),
            Err(DecodeError::UnsupportedPacketType(0))
        );
        assert_eq!(
            read_packet(b"\xf0\x00"),
            Err(DecodeError::UnsupportedPacketType(15))
        );
    }

    #[test]
    fn test_truncated() {
        assert_eq!(read_packet(b""), Err(DecodeError::TruncatedPacket));
        assert_eq!(read_packet(b"\x30"), Err(DecodeError::TruncatedPacket));
        assert_eq!(
            read_packet(b"\x30\x0b\x00\x05top"),
            Err(DecodeError::TruncatedPacket),
            "body shorter than the declared remaining length"
        );
        assert_eq!(
            read_packet(b"\x30\xff\xff\xff\xff\x00"),
            Err(DecodeError::MalformedRemainingLength)
        );
    }

    #[test]
    fn test_subscribe() {
        assert_eq!(
            read_packet(b"\x82\x09\x12\x34\x00\x04test\x01"),
            Ok((
                Packet::Subscribe(Subscribe {
                    packet_id: 0x1234,
                    topic_filter: "test",
                    qos: QoS::AtLeastOnce,
                }),
                11,
            ))
        );

        assert_eq!(
            read_packet(b"\x90\x03\x12\x34\x01"),
            Ok((
                Packet::SubscribeAck(SubscribeAck {
                    packet_id: 0x1234,
                    return_code: SubscribeReturnCode::Success(QoS::AtLeastOnce),
                }),
                5,
            ))
        );
        assert_eq!(
            read_packet(b"\x90\x03\x12\x34\x80"),
            Ok((
                Packet::SubscribeAck(SubscribeAck {
                    packet_id: 0x1234,
                    return_code: SubscribeReturnCode::Failure,
                }),
                5,
            ))
        );
        assert_eq!(
            read_packet(b"\x90\x03\x12\x34\x45"),
            Err(DecodeError::MalformedPacket),
            "invalid subscribe return code"
        );

        assert_eq!(
            read_packet(b"\xa2\x08\x12\x34\x00\x04test"),
            Ok((
                Packet::Unsubscribe(Unsubscribe {
                    packet_id: 0x1234,
                    topic_filter: "test",
                }),
                10,
            ))
        );
        assert_eq!(
            read_packet(b"\xb0\x02\x43\x21"),
            Ok((Packet::UnsubscribeAck(UnsubscribeAck { packet_id: 0x4321 }), 4))
        );

        assert_eq!(
            read_packet(b"\x82\x04\x42\x42\x00\x00"),
            Err(DecodeError::MalformedPacket),
            "no QoS for topic filter"
        );
        assert_eq!(
            read_packet(b"\x82\x03\x42\x42\x00"),
            Err(DecodeError::MalformedPacket),
            "truncated string length prefix"
        );
    }

    #[test]
    fn test_ping_pong() {
        assert_eq!(read_packet(b"\xc0\x00"), Ok((Packet::Ping, 2)));
        assert_eq!(read_packet(b"\xd0\x00"), Ok((Packet::Pong, 2)));
        assert_eq!(read_packet(b"\xe0\x00"), Ok((Packet::Disconnect, 2)));
    }

    #[test]
    fn test_round_trip() {
        let payload = b"data";
        let packets = vec![
            Packet::Connect(Connect {
                clean_session: true,
                keep_alive: 60,
                client_id: "c",
                last_will: Some(LastWill {
                    qos: QoS::AtLeastOnce,
                    retain: true,
                    topic: "will",
                    message: b"gone",
                }),
                username: Some("u"),
                password: Some(b"p"),
            }),
            Packet::ConnectAck(ConnectAck {
                session_present: true,
                return_code: ConnectReturnCode::ConnectionAccepted,
            }),
            Packet::Publish(Publish {
                dup: false,
                retain: false,
                qos: QoS::AtMostOnce,
                topic: "t",
                packet_id: None,
                payload,
            }),
            Packet::Publish(Publish {
                dup: true,
                retain: true,
                qos: QoS::AtLeastOnce,
                topic: "t",
                packet_id: Some(7),
                payload,
            }),
            Packet::PublishAck(PublishAck { packet_id: 7 }),
            Packet::Subscribe(Subscribe {
                packet_id: 1,
                topic_filter: "a/b/#",
                qos: QoS::AtLeastOnce,
            }),
            Packet::SubscribeAck(SubscribeAck {
                packet_id: 1,
                return_code: SubscribeReturnCode::Success(QoS::AtMostOnce),
            }),
            Packet::Unsubscribe(Unsubscribe {
                packet_id: 2,
                topic_filter: "a/b/#",
            }),
            Packet::UnsubscribeAck(UnsubscribeAck { packet_id: 2 }),
            Packet::Ping,
            Packet::Pong,
            Packet::Disconnect,
        ];

        for packet in packets {
            let mut buf = Vec::new();
            packet.write_to(&mut buf);
            assert_eq!(buf.len(), packet.size());
            assert_eq!(read_packet(&buf), Ok((packet, buf.len())));
        }
    }
}
