//! The `CLIPSSH/1` / `gitssh/2` wire envelope (spec §3).
//!
//! `Kind` is modeled as one adjacently-tagged enum rather than a bare
//! string discriminant plus a separate untyped body — the same shape
//! the teacher's broker protocol uses for its own control messages —
//! so every variant carries its own fields and an unknown/malformed
//! `kind` simply fails to deserialize instead of needing a second
//! validation pass against `body`.

use crate::constants::{PROTOCOL_CLIPSSH_V1, PROTOCOL_GITSSH_V2};
use serde::{Deserialize, Serialize};

/// Which protocol (and therefore which subset of [`Kind`] variants) an
/// envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "CLIPSSH/1")]
    ClipsshV1,
    #[serde(rename = "gitssh/2")]
    GitsshV2,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClipsshV1 => PROTOCOL_CLIPSSH_V1,
            Self::GitsshV2 => PROTOCOL_GITSSH_V2,
        }
    }
}

/// `source`/`target` of an envelope: which end of the session sent or
/// should receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl Role {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

/// Signal name forwarded by `pty_signal` to the PTY's foreground
/// process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PtySignalName {
    #[serde(rename = "INT")]
    Int,
    #[serde(rename = "QUIT")]
    Quit,
    #[serde(rename = "TSTP")]
    Tstp,
}

/// Every envelope kind across both protocols, tagged on the wire as
/// `"kind": "<snake_case variant>"` with the variant's fields nested
/// under `"body"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Kind {
    /// Client → server: open a session.
    ConnectReq { source: Role },
    /// Server → client: session accepted, shell spawned.
    ///
    /// `cols`/`rows` are only meaningful for `gitssh/2`, whose PTY has a
    /// size to report; CLIPSSH/1 has no PTY and always sends `None`.
    ConnectAck {
        session_id: String,
        user: String,
        host: String,
        cwd: String,
        cols: Option<u16>,
        rows: Option<u16>,
    },
    /// Server → client: another session is already active.
    Busy { session_id: String },
    /// Either direction: graceful teardown.
    Disconnect,
    /// Either direction: a `Protocol`/`Session`/`Timeout`-class failure
    /// the peer should know about, without tearing down the session.
    Error { code: String, message: String },

    // CLIPSSH/1 (command/reply)
    /// Client → server: execute once through the shell, non-interactively.
    Cmd { text: String },
    /// Server → client: a chunk of captured stdout.
    Stdout {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Server → client: a chunk of captured stderr.
    Stderr {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Server → client: the command finished.
    Exit { code: i32 },

    // gitssh/2 (interactive PTY)
    /// Client → server: raw terminal input bytes.
    PtyInput {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Server → client: raw PTY master output bytes.
    PtyOutput {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Client → server: terminal was resized.
    PtyResize { cols: u16, rows: u16 },
    /// Client → server: forward a signal to the PTY foreground group.
    PtySignal { name: PtySignalName },
    /// Server → client: the shell exited.
    PtyClosed { exit_status: Option<i32> },
}

impl Kind {
    /// The `kind` discriminant as it appears on the wire, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectReq { .. } => "connect_req",
            Self::ConnectAck { .. } => "connect_ack",
            Self::Busy { .. } => "busy",
            Self::Disconnect => "disconnect",
            Self::Error { .. } => "error",
            Self::Cmd { .. } => "cmd",
            Self::Stdout { .. } => "stdout",
            Self::Stderr { .. } => "stderr",
            Self::Exit { .. } => "exit",
            Self::PtyInput { .. } => "pty_input",
            Self::PtyOutput { .. } => "pty_output",
            Self::PtyResize { .. } => "pty_resize",
            Self::PtySignal { .. } => "pty_signal",
            Self::PtyClosed { .. } => "pty_closed",
        }
    }
}

/// A single wire message (spec §3). Envelopes are value objects; they
/// cross layers by move, never by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub protocol: Protocol,
    #[serde(flatten)]
    pub kind: Kind,
    pub session_id: String,
    pub msg_id: String,
    pub seq: u64,
    /// Producer wall clock, informational only — never used for
    /// ordering (that's `seq`'s job).
    pub ts: i64,
    pub source: Role,
    pub target: Role,
}

impl Envelope {
    /// Construct a new envelope with a fresh `msg_id` and the current
    /// wall-clock timestamp.
    #[must_use]
    pub fn new(protocol: Protocol, kind: Kind, session_id: String, seq: u64, source: Role) -> Self {
        Self {
            protocol,
            kind,
            session_id,
            msg_id: uuid::Uuid::new_v4().to_string(),
            seq,
            ts: chrono::Utc::now().timestamp(),
            source,
            target: source.other(),
        }
    }

    /// Encode to canonical UTF-8 JSON (spec §6: "no trailing whitespace,
    /// keys in any order").
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from JSON. Malformed input is an `Encoding` error at the
    /// transport layer, never surfaced past it (spec §7).
    pub fn decode(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        base64::engine::general_purpose::STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_req_round_trips_through_json() {
        let envelope = Envelope::new(
            Protocol::GitsshV2,
            Kind::ConnectReq { source: Role::Client },
            String::new(),
            0,
            Role::Client,
        );
        let json = envelope.encode().unwrap();
        let decoded = Envelope::decode(&json).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn binary_body_round_trips_as_base64() {
        let envelope = Envelope::new(
            Protocol::GitsshV2,
            Kind::PtyOutput { data: vec![0, 1, 2, 255, 0, 128] },
            "sess-1".to_string(),
            3,
            Role::Server,
        );
        let json = envelope.encode().unwrap();
        assert!(json.contains("\"body\""));
        assert!(!json.contains("\"data\":[")); // not a raw JSON byte array
        let decoded = Envelope::decode(&json).unwrap();
        match decoded.kind {
            Kind::PtyOutput { data } => assert_eq!(data, vec![0, 1, 2, 255, 0, 128]),
            other => panic!("expected PtyOutput, got {other:?}"),
        }
    }

    #[test]
    fn wire_tag_matches_spec_kind_names() {
        let envelope = Envelope::new(
            Protocol::ClipsshV1,
            Kind::Cmd { text: "ls -la".to_string() },
            "sess-1".to_string(),
            1,
            Role::Client,
        );
        let json = envelope.encode().unwrap();
        assert!(json.contains("\"kind\":\"cmd\""));
        assert_eq!(envelope.kind.name(), "cmd");
    }

    #[test]
    fn protocol_strings_match_constants() {
        assert_eq!(Protocol::ClipsshV1.as_str(), PROTOCOL_CLIPSSH_V1);
        assert_eq!(Protocol::GitsshV2.as_str(), PROTOCOL_GITSSH_V2);
    }

    #[test]
    fn role_other_is_an_involution() {
        assert_eq!(Role::Client.other(), Role::Server);
        assert_eq!(Role::Server.other(), Role::Client);
        assert_eq!(Role::Client.other().other(), Role::Client);
    }

    #[test]
    fn disconnect_has_no_body_field() {
        let envelope = Envelope::new(Protocol::GitsshV2, Kind::Disconnect, "sess-1".to_string(), 9, Role::Server);
        let json = envelope.encode().unwrap();
        assert!(!json.contains("\"body\""));
    }

    #[test]
    fn connect_ack_omits_pty_size_for_clipssh_v1() {
        let envelope = Envelope::new(
            Protocol::ClipsshV1,
            Kind::ConnectAck {
                session_id: "sess-1".to_string(),
                user: "alice".to_string(),
                host: "box".to_string(),
                cwd: "/home/alice".to_string(),
                cols: None,
                rows: None,
            },
            "sess-1".to_string(),
            0,
            Role::Server,
        );
        let json = envelope.encode().unwrap();
        let decoded = Envelope::decode(&json).unwrap();
        match decoded.kind {
            Kind::ConnectAck { cols, rows, .. } => {
                assert_eq!(cols, None);
                assert_eq!(rows, None);
            }
            other => panic!("expected ConnectAck, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_fails_to_decode() {
        let malformed = r#"{"protocol":"gitssh/2","kind":"teleport","body":{},"session_id":"x","msg_id":"y","seq":0,"ts":0,"source":"client","target":"server"}"#;
        assert!(Envelope::decode(malformed).is_err());
    }
}
