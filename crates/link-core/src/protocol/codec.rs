//! Text codec for encoding and decoding link-server protocol messages.
//!
//! Wire format:
//! ```text
//! <PREFIX> <KEYWORD>[ <payload>]
//! ```
//! `<PREFIX>` is one of `CLIENT`, `NOTIFY`, `SERVER`, `BROADCAST`.  Payloads
//! are either a single device name or a list of tab-separated fields and
//! newline-terminated records.  Trailing CR, LF and NUL bytes are ignored on
//! decode so that clients which append a line terminator are still accepted.

use thiserror::Error;
use tracing::trace;

use crate::domain::status::{DeviceListing, DeviceStatusLine, StatusReport};
use crate::protocol::messages::{
    Broadcast, ClientCommand, Inbound, PeerNotice, ServerReply, BROADCAST_PREFIX, CLIENT_PREFIX,
    FIELD_SEPARATOR, NOTIFY_PREFIX, RECORD_SEPARATOR, SERVER_PREFIX,
};

/// Errors that can occur during message decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The datagram is not valid UTF-8 text.
    #[error("datagram is not valid UTF-8")]
    NotUtf8,

    /// The datagram does not start with a prefix valid in this direction.
    #[error("unrecognised message prefix in {0:?}")]
    UnknownPrefix(String),

    /// The prefix was valid but the command keyword was not.
    #[error("unrecognised {prefix} command {keyword:?}")]
    UnknownCommand {
        prefix: &'static str,
        keyword: String,
    },

    /// A command that names a device arrived without one.
    #[error("{0} requires a device name")]
    MissingDeviceName(&'static str),

    /// A status line could not be parsed.
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    /// A multi-record payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes a datagram received by the server.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the datagram is not a recognised `CLIENT` or
/// `NOTIFY` message.
///
/// # Examples
///
/// ```rust
/// use link_core::{decode_inbound, ClientCommand, Inbound};
///
/// let msg = decode_inbound(b"CLIENT UP modem1\n").unwrap();
/// assert_eq!(msg, Inbound::Client(ClientCommand::Up("modem1".to_string())));
/// ```
pub fn decode_inbound(bytes: &[u8]) -> Result<Inbound, ProtocolError> {
    let decoded = datagram_text(bytes).and_then(|text| {
        if let Some(body) = text.strip_prefix(CLIENT_PREFIX) {
            decode_client_command(body).map(Inbound::Client)
        } else if let Some(body) = text.strip_prefix(NOTIFY_PREFIX) {
            decode_peer_notice(body).map(Inbound::Peer)
        } else {
            Err(ProtocolError::UnknownPrefix(truncate_for_error(text)))
        }
    });

    if let Err(e) = &decoded {
        trace!("rejected {} byte inbound datagram: {e}", bytes.len());
    }
    decoded
}

/// Encodes a client or peer message as it is sent to the server.
pub fn encode_inbound(msg: &Inbound) -> String {
    match msg {
        Inbound::Client(cmd) => match cmd.device() {
            Some(name) => format!("{CLIENT_PREFIX}{} {name}", cmd.keyword()),
            None => format!("{CLIENT_PREFIX}{}", cmd.keyword()),
        },
        Inbound::Peer(notice) => {
            format!("{NOTIFY_PREFIX}{} {}", notice.keyword(), notice.device())
        }
    }
}

/// Encodes a unicast reply from the server.
///
/// # Examples
///
/// ```rust
/// use link_core::{encode_reply, ServerReply};
///
/// let reply = ServerReply::ClientStatus(vec!["modem1".into(), "isdn0".into()]);
/// assert_eq!(encode_reply(&reply), "SERVER CLIENT_STATUS modem1\tisdn0");
/// ```
pub fn encode_reply(reply: &ServerReply) -> String {
    match reply {
        ServerReply::Devices(listings) => {
            let mut out = format!("{SERVER_PREFIX}DEVICES ");
            for listing in listings {
                out.push_str(&listing.to_string());
                out.push(RECORD_SEPARATOR);
            }
            out
        }
        ServerReply::Status(line) => format!("{SERVER_PREFIX}STATUS {line}"),
        ServerReply::ClientStatus(names) => {
            let joined = names.join(&FIELD_SEPARATOR.to_string());
            format!("{SERVER_PREFIX}CLIENT_STATUS {joined}")
        }
    }
}

/// Decodes a unicast reply from the server (client side).
///
/// # Errors
///
/// Returns [`ProtocolError`] if the datagram is not a recognised `SERVER`
/// message or its payload is malformed.
pub fn decode_reply(bytes: &[u8]) -> Result<ServerReply, ProtocolError> {
    let text = datagram_text(bytes)?;
    let body = text
        .strip_prefix(SERVER_PREFIX)
        .ok_or_else(|| ProtocolError::UnknownPrefix(truncate_for_error(text)))?;
    let (keyword, payload) = split_keyword(body);

    match keyword {
        "DEVICES" => {
            let listings = records(payload)
                .map(|record| {
                    let (name, description) =
                        record.split_once(FIELD_SEPARATOR).ok_or_else(|| {
                            ProtocolError::MalformedPayload(format!(
                                "device listing without description: {record:?}"
                            ))
                        })?;
                    Ok(DeviceListing {
                        name: name.to_string(),
                        description: description.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ServerReply::Devices(listings))
        }
        "STATUS" => parse_status_line(payload).map(ServerReply::Status),
        "CLIENT_STATUS" => {
            let names = payload
                .split(FIELD_SEPARATOR)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
            Ok(ServerReply::ClientStatus(names))
        }
        other => Err(ProtocolError::UnknownCommand {
            prefix: "SERVER",
            keyword: other.to_string(),
        }),
    }
}

/// Encodes a multicast announcement.
///
/// # Examples
///
/// ```rust
/// use link_core::{encode_broadcast, Broadcast};
///
/// assert_eq!(encode_broadcast(&Broadcast::Init), "BROADCAST INIT");
/// ```
pub fn encode_broadcast(msg: &Broadcast) -> String {
    match msg {
        Broadcast::Init => format!("{BROADCAST_PREFIX}INIT"),
        Broadcast::Quit => format!("{BROADCAST_PREFIX}QUIT"),
        Broadcast::Status(lines) => {
            let mut out = format!("{BROADCAST_PREFIX}STATUS ");
            for line in lines {
                out.push_str(&line.to_string());
                out.push(RECORD_SEPARATOR);
            }
            out
        }
    }
}

/// Decodes a multicast announcement (listener side).
///
/// # Errors
///
/// Returns [`ProtocolError`] if the datagram is not a recognised `BROADCAST`
/// message or a status line is malformed.
pub fn decode_broadcast(bytes: &[u8]) -> Result<Broadcast, ProtocolError> {
    let text = datagram_text(bytes)?;
    let body = text
        .strip_prefix(BROADCAST_PREFIX)
        .ok_or_else(|| ProtocolError::UnknownPrefix(truncate_for_error(text)))?;
    let (keyword, payload) = split_keyword(body);

    match keyword {
        "INIT" => Ok(Broadcast::Init),
        "QUIT" => Ok(Broadcast::Quit),
        "STATUS" => records(payload)
            .map(parse_status_line)
            .collect::<Result<Vec<_>, _>>()
            .map(Broadcast::Status),
        other => Err(ProtocolError::UnknownCommand {
            prefix: "BROADCAST",
            keyword: other.to_string(),
        }),
    }
}

/// Parses `<name>\t<statusline>`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedStatusLine`] if the separator is missing,
/// the state keyword is unknown, or `UP` lacks its two numeric parameters.
pub fn parse_status_line(line: &str) -> Result<DeviceStatusLine, ProtocolError> {
    let malformed = || ProtocolError::MalformedStatusLine(line.to_string());
    let (name, status) = line.split_once(FIELD_SEPARATOR).ok_or_else(malformed)?;
    if name.is_empty() {
        return Err(malformed());
    }

    let mut words = status.split(' ');
    let report = match words.next() {
        Some("DOWN") => StatusReport::Down,
        Some("CONNECTING") => StatusReport::Connecting,
        Some("DISCONNECTING") => StatusReport::Disconnecting,
        Some("UP") => {
            let seconds_up = words
                .next()
                .and_then(|w| w.parse().ok())
                .ok_or_else(malformed)?;
            let clients = words
                .next()
                .and_then(|w| w.parse().ok())
                .ok_or_else(malformed)?;
            StatusReport::Up {
                seconds_up,
                clients,
            }
        }
        _ => return Err(malformed()),
    };
    if words.next().is_some() {
        return Err(malformed());
    }

    Ok(DeviceStatusLine {
        name: name.to_string(),
        report,
    })
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn decode_client_command(body: &str) -> Result<ClientCommand, ProtocolError> {
    let (keyword, arg) = split_keyword(body);
    let device = |keyword: &'static str| -> Result<String, ProtocolError> {
        if arg.is_empty() {
            Err(ProtocolError::MissingDeviceName(keyword))
        } else {
            Ok(arg.to_string())
        }
    };

    match keyword {
        "PING" => Ok(ClientCommand::Ping),
        "DEVICES" => Ok(ClientCommand::Devices),
        "CLIENT_STATUS" => Ok(ClientCommand::ClientStatus),
        "UP" => device("UP").map(ClientCommand::Up),
        "DOWN" => device("DOWN").map(ClientCommand::Down),
        "FORCE_DOWN" => device("FORCE_DOWN").map(ClientCommand::ForceDown),
        "STATUS" => device("STATUS").map(ClientCommand::Status),
        other => Err(ProtocolError::UnknownCommand {
            prefix: "CLIENT",
            keyword: truncate_for_error(other),
        }),
    }
}

fn decode_peer_notice(body: &str) -> Result<PeerNotice, ProtocolError> {
    let (keyword, arg) = split_keyword(body);
    match keyword {
        "ISUP" | "ISDOWN" if arg.is_empty() => Err(ProtocolError::MissingDeviceName(
            if keyword == "ISUP" { "ISUP" } else { "ISDOWN" },
        )),
        "ISUP" => Ok(PeerNotice::IsUp(arg.to_string())),
        "ISDOWN" => Ok(PeerNotice::IsDown(arg.to_string())),
        other => Err(ProtocolError::UnknownCommand {
            prefix: "NOTIFY",
            keyword: truncate_for_error(other),
        }),
    }
}

/// Validates UTF-8 and strips trailing line terminators / NUL padding.
fn datagram_text(bytes: &[u8]) -> Result<&str, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
    Ok(text.trim_end_matches(['\r', '\n', '\0']))
}

/// Splits `KEYWORD rest` at the first space; `rest` is empty when absent.
fn split_keyword(body: &str) -> (&str, &str) {
    body.split_once(' ').unwrap_or((body, ""))
}

/// Iterates over the non-empty newline-separated records of a payload.
fn records(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.is_empty())
}

fn truncate_for_error(text: &str) -> String {
    text.chars().take(32).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLog;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_decode_client_up_with_device_name() {
        // Arrange / Act
        let msg = decode_inbound(b"CLIENT UP modem1").unwrap();

        // Assert
        assert_eq!(msg, Inbound::Client(ClientCommand::Up("modem1".to_string())));
    }

    #[test]
    fn test_decode_strips_trailing_newline_and_nul() {
        let msg = decode_inbound(b"CLIENT DOWN modem1\r\n\0").unwrap();
        assert_eq!(
            msg,
            Inbound::Client(ClientCommand::Down("modem1".to_string()))
        );
    }

    #[test]
    fn test_decode_distinguishes_status_from_client_status() {
        assert_eq!(
            decode_inbound(b"CLIENT STATUS modem1").unwrap(),
            Inbound::Client(ClientCommand::Status("modem1".to_string()))
        );
        assert_eq!(
            decode_inbound(b"CLIENT CLIENT_STATUS").unwrap(),
            Inbound::Client(ClientCommand::ClientStatus)
        );
    }

    #[test]
    fn test_decode_device_name_keeps_inner_spaces() {
        let msg = decode_inbound(b"CLIENT UP office link").unwrap();
        assert_eq!(
            msg,
            Inbound::Client(ClientCommand::Up("office link".to_string()))
        );
    }

    #[test]
    fn test_decode_peer_notices() {
        assert_eq!(
            decode_inbound(b"NOTIFY ISUP modem1").unwrap(),
            Inbound::Peer(PeerNotice::IsUp("modem1".to_string()))
        );
        assert_eq!(
            decode_inbound(b"NOTIFY ISDOWN modem1").unwrap(),
            Inbound::Peer(PeerNotice::IsDown("modem1".to_string()))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_prefix() {
        let result = decode_inbound(b"HELLO world");
        assert!(matches!(result, Err(ProtocolError::UnknownPrefix(_))));
    }

    #[test]
    fn test_rejected_inbound_datagram_is_traced() {
        // Arrange
        let captured = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(captured.clone())
            .finish();

        // Act
        let result = tracing::subscriber::with_default(subscriber, || {
            decode_inbound(b"HELLO world")
        });

        // Assert
        assert!(result.is_err());
        let log = captured.contents();
        assert!(log.contains("TRACE"), "log was {log:?}");
        assert!(log.contains("rejected 11 byte inbound datagram"), "log was {log:?}");
    }

    #[test]
    fn test_accepted_inbound_datagram_is_not_traced() {
        let captured = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(captured.clone())
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || {
            decode_inbound(b"CLIENT PING")
        });

        assert!(result.is_ok());
        assert!(captured.contents().is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_client_command() {
        let result = decode_inbound(b"CLIENT REBOOT modem1");
        assert_eq!(
            result,
            Err(ProtocolError::UnknownCommand {
                prefix: "CLIENT",
                keyword: "REBOOT".to_string()
            })
        );
    }

    #[test]
    fn test_decode_rejects_up_without_device() {
        assert_eq!(
            decode_inbound(b"CLIENT UP"),
            Err(ProtocolError::MissingDeviceName("UP"))
        );
        assert_eq!(
            decode_inbound(b"NOTIFY ISDOWN "),
            Err(ProtocolError::MissingDeviceName("ISDOWN"))
        );
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert_eq!(
            decode_inbound(&[0x43, 0xFF, 0xFE]),
            Err(ProtocolError::NotUtf8)
        );
    }

    #[test]
    fn test_encode_devices_reply_terminates_every_record() {
        // Arrange
        let reply = ServerReply::Devices(vec![
            DeviceListing {
                name: "modem1".to_string(),
                description: "Dial-up".to_string(),
            },
            DeviceListing {
                name: "isdn0".to_string(),
                description: "ISDN".to_string(),
            },
        ]);

        // Act
        let text = encode_reply(&reply);

        // Assert
        assert_eq!(text, "SERVER DEVICES modem1\tDial-up\nisdn0\tISDN\n");
    }

    #[test]
    fn test_encode_status_reply() {
        let reply = ServerReply::Status(DeviceStatusLine {
            name: "modem1".to_string(),
            report: StatusReport::Connecting,
        });
        assert_eq!(encode_reply(&reply), "SERVER STATUS modem1\tCONNECTING");
    }

    #[test]
    fn test_encode_empty_client_status_keeps_trailing_space() {
        assert_eq!(
            encode_reply(&ServerReply::ClientStatus(Vec::new())),
            "SERVER CLIENT_STATUS "
        );
    }

    #[test]
    fn test_encode_status_broadcast() {
        let msg = Broadcast::Status(vec![
            DeviceStatusLine {
                name: "modem1".to_string(),
                report: StatusReport::Up {
                    seconds_up: 5,
                    clients: 3,
                },
            },
            DeviceStatusLine {
                name: "isdn0".to_string(),
                report: StatusReport::Down,
            },
        ]);
        assert_eq!(
            encode_broadcast(&msg),
            "BROADCAST STATUS modem1\tUP 5 3\nisdn0\tDOWN\n"
        );
    }

    #[test]
    fn test_parse_status_line_rejects_up_without_parameters() {
        let result = parse_status_line("modem1\tUP");
        assert!(matches!(result, Err(ProtocolError::MalformedStatusLine(_))));
    }

    #[test]
    fn test_parse_status_line_rejects_unknown_state() {
        let result = parse_status_line("modem1\tSLEEPING");
        assert!(matches!(result, Err(ProtocolError::MalformedStatusLine(_))));
    }

    #[test]
    fn test_decode_reply_rejects_broadcast_prefix() {
        let result = decode_reply(b"BROADCAST INIT");
        assert!(matches!(result, Err(ProtocolError::UnknownPrefix(_))));
    }

    #[test]
    fn test_decode_empty_status_broadcast_has_no_lines() {
        assert_eq!(
            decode_broadcast(b"BROADCAST STATUS ").unwrap(),
            Broadcast::Status(Vec::new())
        );
    }
}
