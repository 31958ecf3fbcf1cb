//! Transport registry: maps a selected medium to a boxed [`Transport`],
//! the way the teacher's `client/registry.rs` maps a client id to a
//! boxed `Client` — generalized here from "look up an already-open
//! client" to "open the medium a CLI flag named".
//!
//! `sshg`/`sshgd` are the only binaries that need this: `sshc`/`sshcd`
//! only ever speak clipboard and open [`crate::transport::clipboard::ClipboardTransport`]
//! directly.

use crate::session::envelope::Role;
use crate::transport::audio::{AudioTransport, AudioTransportConfig};
use crate::transport::drive::{DriveTransport, DriveTransportConfig};
use crate::transport::git::GitTransport;
use crate::transport::serial::{SerialTransport, SerialTransportConfig};
use crate::transport::{Transport, TransportError};
use std::path::PathBuf;

/// Which interactive (`gitssh/2`) medium to open (spec §6 `--transport`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Git,
    GoogleDrive,
    UsbSerial,
    AudioModem,
}

impl TransportKind {
    /// Parse `--transport`'s accepted values.
    pub fn parse(value: &str) -> Result<Self, TransportError> {
        match value {
            "git" => Ok(Self::Git),
            "google-drive" => Ok(Self::GoogleDrive),
            "usb-serial" => Ok(Self::UsbSerial),
            "audio-modem" => Ok(Self::AudioModem),
            other => Err(TransportError::TransportSetup(format!(
                "unknown --transport {other:?} (expected git, google-drive, usb-serial, or audio-modem)"
            ))),
        }
    }

    /// Whether the session layer should retransmit unacknowledged
    /// outbound envelopes itself (spec §4.7): serial and audio already
    /// retry at L1, everything else needs L3's help.
    #[must_use]
    pub fn retry_policy(self) -> crate::app::RetryPolicy {
        match self {
            Self::Git | Self::GoogleDrive => crate::app::RetryPolicy::L3Retry,
            Self::UsbSerial | Self::AudioModem => crate::app::RetryPolicy::L1Authoritative,
        }
    }
}

/// Every per-medium setting a `gitssh/2` binary's CLI flags can set,
/// bundled so [`open`] takes one argument regardless of which
/// [`TransportKind`] ends up selected.
#[derive(Debug, Clone, Default)]
pub struct InteractiveTransportConfig {
    pub git_local_repo: Option<PathBuf>,
    pub git_upstream_url: Option<String>,
    pub drive_client_secrets: Option<PathBuf>,
    pub drive_token_path: Option<PathBuf>,
    pub serial_port: Option<String>,
    pub audio: AudioTransportConfig,
}

/// Open the medium named by `kind` for `role`, mirroring the teacher's
/// registry lookup but constructing-on-demand rather than fetching an
/// already-registered instance, since clipssh opens exactly one
/// transport per process rather than managing a pool of them.
pub async fn open(kind: TransportKind, role: Role, config: InteractiveTransportConfig) -> Result<Box<dyn Transport>, TransportError> {
    match kind {
        TransportKind::Git => {
            let local_repo = config.git_local_repo.ok_or_else(|| TransportError::TransportSetup("--local-repo is required for --transport git".into()))?;
            let upstream_url =
                config.git_upstream_url.ok_or_else(|| TransportError::TransportSetup("--upstream-url is required for --transport git".into()))?;
            let transport = GitTransport::open(role, local_repo, upstream_url).await?;
            Ok(Box::new(transport))
        }
        TransportKind::GoogleDrive => {
            let client_secrets = config
                .drive_client_secrets
                .ok_or_else(|| TransportError::TransportSetup("--drive-client-secrets is required for --transport google-drive".into()))?;
            let token_path = match config.drive_token_path {
                Some(path) => path,
                None => crate::config::Config::default_drive_token_path()
                    .map_err(|e| TransportError::TransportSetup(format!("failed to determine default drive token path: {e}")))?,
            };
            let transport = DriveTransport::open(role, DriveTransportConfig::new(client_secrets, token_path)).await?;
            Ok(Box::new(transport))
        }
        TransportKind::UsbSerial => {
            let port_name = config.serial_port.ok_or_else(|| TransportError::TransportSetup("--serial-port is required for --transport usb-serial".into()))?;
            let transport = SerialTransport::open(SerialTransportConfig::new(port_name))?;
            Ok(Box::new(transport))
        }
        TransportKind::AudioModem => {
            let transport = match role {
                Role::Server => AudioTransport::open_server(config.audio)?,
                Role::Client => AudioTransport::open_client(config.audio)?,
            };
            Ok(Box::new(transport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_documented_transport_name() {
        assert_eq!(TransportKind::parse("git").unwrap(), TransportKind::Git);
        assert_eq!(TransportKind::parse("google-drive").unwrap(), TransportKind::GoogleDrive);
        assert_eq!(TransportKind::parse("usb-serial").unwrap(), TransportKind::UsbSerial);
        assert_eq!(TransportKind::parse("audio-modem").unwrap(), TransportKind::AudioModem);
    }

    #[test]
    fn rejects_unknown_transport_names() {
        assert!(TransportKind::parse("carrier-pigeon").is_err());
    }

    #[test]
    fn retry_policy_matches_the_l1_vs_l3_split() {
        assert_eq!(TransportKind::Git.retry_policy(), crate::app::RetryPolicy::L3Retry);
        assert_eq!(TransportKind::GoogleDrive.retry_policy(), crate::app::RetryPolicy::L3Retry);
        assert_eq!(TransportKind::UsbSerial.retry_policy(), crate::app::RetryPolicy::L1Authoritative);
        assert_eq!(TransportKind::AudioModem.retry_policy(), crate::app::RetryPolicy::L1Authoritative);
    }
}
