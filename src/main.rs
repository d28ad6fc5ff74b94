use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use ssh_key::Certificate;
use uuid::Uuid;

use kamini::audit_sink::StdoutSink;
use kamini::auth::{OidcAuthenticator, OidcConfig};
use kamini::authorize::{AllowListAuthorizer, AllowListConfig};
use kamini::config::{self, Config};
use kamini::domain::TtlPolicy;
use kamini::keystore::DiskKeyStore;
use kamini::logging::StdLogger;
use kamini::service::ca_public_key::GetCaPublicKeyService;
use kamini::service::sign_user::{SignUserInput, SignUserService};
use kamini::service::{AuditSink, Logger, SerialStore, SystemClock};
use kamini::signer::OpenSshSigner;
use kamini::storage::{FileSerialStore, MemorySerialStore};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// config file path
    #[arg(short = 'c', long)]
    config_file: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request a signed user certificate
    Issue {
        /// file containing the OIDC bearer token
        #[arg(long)]
        token_file: PathBuf,
        /// file containing the SSH public key to sign (authorized-keys line)
        #[arg(long)]
        public_key_file: PathBuf,
        /// requested certificate lifetime in seconds (0 = policy default)
        #[arg(long, default_value_t = 0)]
        ttl_secs: u64,
        /// where to write the certificate; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the CA public key in authorized-keys format
    CaPubkey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::read_config(&args.config_file)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log.level.clone()),
    )
    .init();
    if config.log.format != "text" {
        warn!("log format {:?} not supported, using text", config.log.format);
    }

    match args.command {
        Command::Issue {
            token_file,
            public_key_file,
            ttl_secs,
            out,
        } => run_issue(config, token_file, public_key_file, ttl_secs, out).await,
        Command::CaPubkey => run_ca_pubkey(config).await,
    }
}

async fn run_issue(
    config: Config,
    token_file: PathBuf,
    public_key_file: PathBuf,
    ttl_secs: u64,
    out: Option<PathBuf>,
) -> Result<()> {
    let log: Arc<dyn Logger> = Arc::new(StdLogger::new());

    let keys = Arc::new(DiskKeyStore::new(config.signer.ca_key.clone(), log.clone()));
    let signer = Arc::new(OpenSshSigner::new(keys, log.clone()));

    let serials: Arc<dyn SerialStore> =
        if config.storage.serial_file.as_os_str().is_empty() {
            warn!("storage.serial_file not set, serials will not survive restarts");
            Arc::new(MemorySerialStore::new(log.clone()))
        } else {
            Arc::new(FileSerialStore::new(
                config.storage.serial_file.clone(),
                log.clone(),
            )?)
        };

    let audit: Arc<dyn AuditSink> = match config.audit.sink.as_str() {
        "" | "stdout" => Arc::new(StdoutSink::new(log.clone())),
        other => bail!("unknown audit sink: {}", other),
    };

    let oidc = &config.auth.oidc;
    let auth = Arc::new(
        OidcAuthenticator::discover(
            OidcConfig {
                issuer_url: oidc.issuer_url.clone(),
                client_id: oidc.client_id.clone(),
                skip_client_id_check: oidc.skip_client_id_check,
                username_claim: oidc.claims.username.clone(),
                email_claim: oidc.claims.email.clone(),
                roles_claim: oidc.claims.roles.clone(),
                groups_claim: oidc.claims.groups.clone(),
                http_timeout: Duration::from_secs(oidc.http_timeout_secs),
                jwks_ttl: Duration::ZERO,
            },
            log.clone(),
        )
        .await?,
    );

    let authz = Arc::new(AllowListAuthorizer::new(AllowListConfig {
        allow_roles: config.authorize.allow_roles.clone(),
        allow_groups: config.authorize.allow_groups.clone(),
        principal_templates: config.authorize.principal_templates.clone(),
        default_ttl: Duration::from_secs(config.authorize.default_ttl_secs),
        source_cidrs: config.authorize.source_cidrs.clone(),
    }));

    let service = SignUserService {
        log: log.clone(),
        auth,
        authz,
        serials,
        signer,
        audit,
        clock: Arc::new(SystemClock),
        ttl: TtlPolicy {
            default: Duration::from_secs(config.authorize.default_ttl_secs),
            max: Duration::from_secs(config.authorize.max_ttl_secs),
        },
    };

    let bearer = fs::read_to_string(&token_file)
        .with_context(|| format!("read token file {}", token_file.display()))?
        .trim()
        .to_string();
    let public_key_authorized = fs::read_to_string(&public_key_file)
        .with_context(|| format!("read public key file {}", public_key_file.display()))?
        .trim()
        .to_string();

    let input = SignUserInput {
        bearer,
        public_key_authorized,
        requested_ttl: Duration::from_secs(ttl_secs),
        source_ip: String::new(),
        trace_id: Uuid::new_v4().to_string(),
    };

    let timeout = Duration::from_secs(config.server.request_timeout_secs);
    let output = tokio::time::timeout(timeout, service.execute(input))
        .await
        .context("request timed out")??;

    // Clients and sshd consume the text form, so marshal the raw wire
    // bytes back into an authorized-keys style line.
    let cert = Certificate::from_bytes(&output.certificate)?;
    let cert_line = cert.to_openssh()?;
    match out {
        Some(path) => {
            fs::write(&path, format!("{}\n", cert_line))
                .with_context(|| format!("write certificate {}", path.display()))?;
            info!("wrote certificate to {}", path.display());
        }
        None => println!("{}", cert_line),
    }
    info!(
        "issued serial={} key_id={} principals={} not_after={}",
        output.serial,
        output.key_id,
        output.principals.join(","),
        output.not_after.to_rfc3339()
    );
    Ok(())
}

async fn run_ca_pubkey(config: Config) -> Result<()> {
    let log: Arc<dyn Logger> = Arc::new(StdLogger::new());
    let service = GetCaPublicKeyService {
        keys: Arc::new(DiskKeyStore::new(config.signer.ca_key, log.clone())),
        log,
    };
    let public = service.execute().await?;
    println!("{}", public.to_openssh()?);
    info!(
        "ca fingerprint {}",
        public.fingerprint(ssh_key::HashAlg::Sha256)
    );
    Ok(())
}
