use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use quantumauth_device::{
    HardwareKeyConfig, HardwareSigner, InMemorySealer, Sealer, SealerConfig, SoftwareSigner,
    new_sealer, open_hardware_signer,
};
use quantumauth_request::{
    RequestSigner, SignOptions, SignRequest, VerifyOptions, VerifyRequest, verify_signed_request,
};
use quantumauth_vault::{PqKeyVault, PqVaultConfig};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "quantumauth", version, about = "QuantumAuth signed-request tool")]
struct Args {
    /// PQ envelope path (default: pqkeys.json.enc under the user config dir).
    #[arg(long, env = "QUANTUMAUTH_PQ_KEY_FILE")]
    pq_key_file: Option<PathBuf>,

    /// Label scoping the sealed DEK.
    #[arg(long, env = "QUANTUMAUTH_LABEL", default_value = "quantumauth")]
    label: String,

    /// TCTI override, e.g. `swtpm:host=127.0.0.1,port=2321`.
    #[arg(long, env = "QUANTUMAUTH_TPM2_TCTI")]
    tcti: Option<String>,

    /// Explicit persistent handle (hex, e.g. 0x8100A001) instead of the scan range.
    #[arg(long, value_parser = parse_handle)]
    handle: Option<u32>,

    /// Evict and recreate the hardware signing key.
    #[arg(long)]
    force_new: bool,

    /// Use a software P-256 signer and an in-memory sealer instead of the
    /// hardware device. The PQ envelope is only usable within this run.
    #[arg(long)]
    software_signer: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print both public keys, creating the PQ envelope on first run.
    Keys,
    /// Sign a request and print its header set.
    Sign {
        #[arg(long, default_value = "POST")]
        method: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        app_id: String,
        #[arg(long)]
        backend_host: String,
        /// Signing timestamp (seconds since epoch; defaults to now).
        #[arg(long)]
        ts: Option<i64>,
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        device_id: Uuid,
        /// Challenge id (defaults to a fresh UUID v4).
        #[arg(long)]
        challenge_id: Option<Uuid>,
        /// Request body; use --body-file for binary payloads.
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// Include the base64 canonical echo header.
        #[arg(long)]
        echo_canonical: bool,
    },
    /// Verify a captured header set against a body.
    Verify {
        #[arg(long)]
        method: String,
        #[arg(long)]
        path: String,
        /// JSON object of header name to value, as emitted by `sign --json`.
        #[arg(long)]
        headers_file: PathBuf,
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        #[arg(long)]
        body_file: Option<PathBuf>,
    },
}

fn parse_handle(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid handle {s:?}: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    // Keep a temp dir alive for the software-signer demo path so a throwaway
    // envelope never lands at the real default location.
    let mut scratch: Option<tempfile::TempDir> = None;

    let (hardware, sealer): (Arc<dyn HardwareSigner>, Arc<dyn Sealer>) = if args.software_signer {
        (
            Arc::new(SoftwareSigner::generate()),
            Arc::new(InMemorySealer::default()),
        )
    } else {
        let hardware = open_hardware_signer(HardwareKeyConfig {
            handle: args.handle,
            force_new: args.force_new,
            tcti: args.tcti.clone(),
            ..HardwareKeyConfig::default()
        })
        .await
        .context("open hardware signer")?;
        let sealer = new_sealer(SealerConfig {
            owner_auth: None,
            tcti: args.tcti.clone(),
        });
        (hardware, sealer)
    };

    let pq_key_file = match (&args.pq_key_file, args.software_signer) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => {
            let dir = tempfile::tempdir().context("create scratch dir")?;
            let path = dir.path().join("pqkeys.json.enc");
            scratch = Some(dir);
            Some(path)
        }
        (None, false) => None,
    };

    let vault = PqKeyVault::new(
        sealer,
        PqVaultConfig {
            key_file_path: pq_key_file,
            label: args.label.clone(),
        },
    )
    .context("configure PQ vault")?;
    vault.ensure().await.context("ensure PQ keypair")?;

    let signer = RequestSigner::new(hardware, Arc::new(vault));

    let result = run(&args.cmd, &signer).await;
    signer.close().await.ok();
    drop(scratch);
    result
}

async fn run(cmd: &Command, signer: &RequestSigner) -> anyhow::Result<()> {
    match cmd {
        Command::Keys => {
            let out = serde_json::json!({
                "tpm_public_key_b64": signer.hardware().public_key_b64(),
                "pq_public_key_b64": signer.vault().public_key_b64().await?,
                "pq_key_file": signer.vault().key_file_path().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Sign {
            method,
            path,
            app_id,
            backend_host,
            ts,
            user_id,
            device_id,
            challenge_id,
            body,
            body_file,
            echo_canonical,
        } => {
            let body = read_body(body.as_deref(), body_file.as_deref()).await?;
            let timestamp = match ts {
                Some(ts) => *ts,
                None => SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .context("system clock before epoch")?
                    .as_secs() as i64,
            };

            let headers = signer
                .sign(
                    &SignRequest {
                        method,
                        path,
                        app_id,
                        backend_host,
                        timestamp,
                        challenge_id: challenge_id.unwrap_or_else(Uuid::new_v4),
                        user_id: *user_id,
                        device_id: *device_id,
                        body: &body,
                    },
                    &SignOptions {
                        include_canonical_echo: *echo_canonical,
                        ..SignOptions::default()
                    },
                )
                .await
                .context("sign request")?;

            let map = headers.to_header_map().context("render headers")?;
            let mut out = serde_json::Map::new();
            for (name, value) in &map {
                out.insert(
                    name.to_string(),
                    serde_json::Value::String(value.to_str().unwrap_or_default().to_string()),
                );
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Verify {
            method,
            path,
            headers_file,
            body,
            body_file,
        } => {
            let body = read_body(body.as_deref(), body_file.as_deref()).await?;
            let raw = tokio::fs::read(headers_file)
                .await
                .with_context(|| format!("read {}", headers_file.display()))?;
            let parsed: serde_json::Map<String, serde_json::Value> =
                serde_json::from_slice(&raw).context("parse headers file")?;

            let mut map = http::HeaderMap::new();
            for (name, value) in &parsed {
                let name = http::header::HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("header name {name:?}"))?;
                let value = value
                    .as_str()
                    .with_context(|| format!("header {name} is not a string"))?;
                map.insert(name, http::HeaderValue::from_str(value)?);
            }

            let verified = verify_signed_request(
                VerifyRequest {
                    method,
                    path,
                    headers: &map,
                    body: &body,
                },
                &VerifyOptions::default(),
            )
            .await
            .context("verification failed")?;

            println!(
                "ok: app={} aud={} user={} device={} ts={}",
                verified.app_id,
                verified.audience,
                verified.user_id,
                verified.device_id,
                verified.timestamp
            );
        }
    }
    Ok(())
}

async fn read_body(body: Option<&str>, body_file: Option<&std::path::Path>) -> anyhow::Result<Vec<u8>> {
    match (body, body_file) {
        (Some(body), _) => Ok(body.as_bytes().to_vec()),
        (None, Some(path)) => tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display())),
        (None, None) => Ok(Vec::new()),
    }
}
