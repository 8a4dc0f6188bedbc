use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use comply_rules::lifecycle::Capability;
use comply_signing::KeyAlgorithm;
use uuid::Uuid;

/// Operator tool for the compliance engine.
///
/// Reads configuration from the environment (and `.env`), connects to
/// PostgreSQL and the configured signing provider.
#[derive(Parser, Debug)]
#[command(name = "complyctl", version, about = "Operate the compliance evaluation engine")]
pub struct CliArgs {
    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse and validate every policy document under a directory.
    Validate { dir: PathBuf },

    /// Apply pending database migrations.
    Migrate,

    /// Generate key material for a local signing provider.
    Keygen {
        #[arg(long, value_enum, default_value_t = KeyAlgorithmArg::Ed25519)]
        algorithm: KeyAlgorithmArg,
        /// Identifier recorded next to every signature made with the key.
        #[arg(long)]
        key_id: String,
        /// Write the settings to this file instead of stdout. Never overwrites.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that open the store and the signing provider.
#[derive(Subcommand, Debug)]
pub enum StoreCommand {
    /// Save every new policy version under a directory as a draft.
    Import { dir: PathBuf },

    /// Move a policy version through its lifecycle.
    Transition {
        policy_id: Uuid,
        /// submit, approve, reject or retire
        transition: String,
        /// Name recorded on the approval record.
        #[arg(long, env = "COMPLY_ACTOR")]
        actor: String,
        /// Capabilities held by the actor.
        #[arg(long = "capability", value_enum, required = true)]
        capabilities: Vec<CapabilityArg>,
        /// Required for approve and reject.
        #[arg(long, default_value = "")]
        justification: String,
    },

    /// Ingest and evaluate events from a JSON file (one object or an array).
    Submit {
        #[arg(long)]
        file: PathBuf,
    },

    /// Retry signing of hashed events whose signature was deferred.
    SignPending {
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },

    /// Re-run evaluation for stored events not yet marked processed.
    ProcessPending {
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },

    /// Walk a user's event stream and check every link and signature.
    VerifyChain { stream: String },

    /// Write a signed bundle of violations created in a period.
    Export {
        #[arg(long)]
        from: DateTime<Utc>,
        #[arg(long)]
        to: DateTime<Utc>,
        #[arg(long)]
        out: PathBuf,
    },

    /// Check an export bundle's file hashes and signature.
    VerifyBundle { dir: PathBuf },

    /// Estimate a user's risk of future violations.
    Score { user: String },

    /// Re-sign every event signed under the previous key with the current one.
    ///
    /// The previous key is read from the `PREVIOUS_SIGNING_*` settings.
    RotateKeys {
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Count the affected events without changing anything.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAlgorithmArg {
    Hmac,
    Ed25519,
}

impl From<KeyAlgorithmArg> for KeyAlgorithm {
    fn from(arg: KeyAlgorithmArg) -> Self {
        match arg {
            KeyAlgorithmArg::Hmac => KeyAlgorithm::Hmac,
            KeyAlgorithmArg::Ed25519 => KeyAlgorithm::Ed25519,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityArg {
    Submit,
    Approve,
    Reject,
    Retire,
}

impl From<CapabilityArg> for Capability {
    fn from(arg: CapabilityArg) -> Self {
        match arg {
            CapabilityArg::Submit => Capability::SubmitPolicy,
            CapabilityArg::Approve => Capability::ApprovePolicy,
            CapabilityArg::Reject => Capability::RejectPolicy,
            CapabilityArg::Retire => Capability::RetirePolicy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transition_with_capabilities() {
        let id = Uuid::new_v4();
        let args = CliArgs::try_parse_from([
            "complyctl",
            "transition",
            &id.to_string(),
            "approve",
            "--actor",
            "alice",
            "--capability",
            "approve",
            "--capability",
            "retire",
            "--justification",
            "reviewed",
        ])
        .unwrap();
        match args.command {
            Command::Store(StoreCommand::Transition {
                policy_id,
                transition,
                actor,
                capabilities,
                justification,
            }) => {
                assert_eq!(policy_id, id);
                assert_eq!(transition, "approve");
                assert_eq!(actor, "alice");
                assert_eq!(capabilities, vec![CapabilityArg::Approve, CapabilityArg::Retire]);
                assert_eq!(justification, "reviewed");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_export_period() {
        let args = CliArgs::try_parse_from([
            "complyctl",
            "--json",
            "export",
            "--from",
            "2024-06-01T00:00:00Z",
            "--to",
            "2024-07-01T00:00:00Z",
            "--out",
            "bundle",
        ])
        .unwrap();
        assert!(args.json);
        assert!(matches!(args.command, Command::Store(StoreCommand::Export { .. })));
    }

    #[test]
    fn transition_requires_a_capability() {
        let id = Uuid::new_v4().to_string();
        let err = CliArgs::try_parse_from(["complyctl", "transition", &id, "submit", "--actor", "bob"]);
        assert!(err.is_err());
    }

    #[test]
    fn parses_key_commands() {
        let args = CliArgs::try_parse_from(["complyctl", "keygen", "--key-id", "k2"]).unwrap();
        match args.command {
            Command::Keygen { algorithm, key_id, out } => {
                assert_eq!(algorithm, KeyAlgorithmArg::Ed25519);
                assert_eq!(key_id, "k2");
                assert!(out.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = CliArgs::try_parse_from(["complyctl", "rotate-keys", "--dry-run"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Store(StoreCommand::RotateKeys {
                batch_size: 100,
                dry_run: true
            })
        ));
        assert!(CliArgs::try_parse_from(["complyctl", "keygen"]).is_err());
    }
}
