//! `secretless run`: resolve a secrets map and run a command with the values
//! in its environment.

pub mod secrets;
pub mod temp;

pub use secrets::{parse_secrets, SecretSpec};
pub use temp::TempFactory;

use crate::secrets::{Provider, ProviderError, Providers};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SummonError {
    #[error("the secrets map references providers but none is configured")]
    NoProvider,

    #[error("more than one provider is configured ({}); choose one with --provider", .0.join(", "))]
    AmbiguousProvider(Vec<String>),

    #[error("provider '{0}' is not configured")]
    ProviderNotFound(String),

    #[error("unable to fetch '{id}' for {variable}: {source}")]
    Retrieval {
        variable: String,
        id: String,
        #[source]
        source: ProviderError,
    },

    #[error("invalid secrets map: {0}")]
    Parse(String),

    #[error("invalid entry for {name}: {message}")]
    InvalidEntry { name: String, message: String },

    #[error("no command given")]
    EmptyCommand,

    #[error("unable to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The provider `!var` entries read from: `requested` by name, else the only
/// one configured.
pub fn select_provider<'a>(
    providers: &'a Providers,
    requested: Option<&str>,
) -> Result<&'a Arc<dyn Provider>, SummonError> {
    if let Some(name) = requested {
        return providers
            .find(name)
            .ok_or_else(|| SummonError::ProviderNotFound(name.to_string()));
    }
    let mut all = providers.iter();
    match (all.next(), all.next()) {
        (None, _) => Err(SummonError::NoProvider),
        (Some(only), None) => Ok(only),
        (Some(_), Some(_)) => Err(SummonError::AmbiguousProvider(
            providers.iter().map(|p| p.name().to_string()).collect(),
        )),
    }
}

/// Resolve every entry into `NAME=value` pairs. File entries are written to
/// `temp_files` and exported as the file path.
pub async fn build_environment(
    providers: &Providers,
    requested: Option<&str>,
    secrets: &[(String, SecretSpec)],
    temp_files: &mut TempFactory,
) -> Result<Vec<(String, OsString)>, SummonError> {
    let provider = if secrets.iter().any(|(_, spec)| spec.is_reference()) {
        Some(select_provider(providers, requested)?)
    } else {
        None
    };

    let mut environment = Vec::with_capacity(secrets.len());
    for (name, spec) in secrets {
        let value = match spec {
            SecretSpec::Literal(value) | SecretSpec::File(value) => value.as_bytes().to_vec(),
            SecretSpec::Var(id) | SecretSpec::VarFile(id) => {
                let provider = provider.ok_or(SummonError::NoProvider)?;
                provider
                    .value(id)
                    .await
                    .map_err(|source| SummonError::Retrieval {
                        variable: name.clone(),
                        id: id.clone(),
                        source,
                    })?
            }
        };

        let value = if spec.is_file() {
            temp_files.push(&value)?.into_os_string()
        } else {
            OsString::from_vec(value)
        };
        environment.push((name.clone(), value));
    }
    Ok(environment)
}

/// The shell-style exit code for a finished child.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

/// Run `command` with `environment` added to ours, forwarding SIGINT and
/// SIGTERM to it. Returns the child's exit code.
pub async fn run_command(
    command: &[String],
    environment: Vec<(String, OsString)>,
) -> Result<i32, SummonError> {
    let (program, args) = command.split_first().ok_or(SummonError::EmptyCommand)?;

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let mut child = Command::new(program)
        .args(args)
        .envs(environment)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| SummonError::Spawn {
            command: program.clone(),
            source,
        })?;
    let pid = child.id().map(|id| Pid::from_raw(id as i32));
    debug!("Started '{}' as pid {:?}", program, pid);

    let status = loop {
        let forward = tokio::select! {
            status = child.wait() => break status?,
            _ = interrupt.recv() => Signal::SIGINT,
            _ = terminate.recv() => Signal::SIGTERM,
        };
        if let Some(pid) = pid {
            if let Err(e) = kill(pid, forward) {
                warn!("Unable to forward {} to pid {}: {}", forward, pid, e);
            }
        }
    };

    Ok(exit_code(status))
}

/// Resolve `secrets` and run `command` with them. Temp files are removed
/// once the command exits.
pub async fn run(
    providers: &Providers,
    requested: Option<&str>,
    secrets: &[(String, SecretSpec)],
    command: &[String],
) -> Result<i32, SummonError> {
    if command.is_empty() {
        return Err(SummonError::EmptyCommand);
    }
    let mut temp_files = TempFactory::new();
    let environment = build_environment(providers, requested, secrets, &mut temp_files).await?;
    let code = run_command(command, environment).await;
    drop(temp_files);
    code
}
