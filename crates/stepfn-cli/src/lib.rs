#![allow(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::panic, clippy::unwrap_used))]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use stepfn_client_core::config::{DEFAULT_SHARE_ORIGIN, parse_execute_path};
use stepfn_client_core::route::fragment_from_link;
use stepfn_client_core::{
    ExecuteDisposition, ExecutePath, FileStorage, LoadDisposition, MemoryNavigation,
    SessionController, SessionError,
};
use stepfn_sync_client::{SyncClient, SyncClientConfig};

pub const ENV_STATE_PATH: &str = "STEPFN_STATE_PATH";
const STATE_FILE_NAME: &str = "state.v1.json";

type CliSession = SessionController<SyncClient, Arc<FileStorage>, MemoryNavigation>;

#[derive(Debug, Parser)]
#[command(name = "stepfn")]
#[command(about = "Run, save, and share step function playground documents")]
pub struct StepfnCli {
    /// Execution service base URL (overrides STEPFN_API_BASE_URL)
    #[arg(long, global = true)]
    pub api_base_url: Option<String>,
    /// Execute endpoint: `execute` or `sfn` (overrides STEPFN_EXECUTE_PATH)
    #[arg(long, global = true, value_parser = parse_execute_path_arg)]
    pub execute_path: Option<ExecutePath>,
    /// Local state file holding the draft and capability keys
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
    /// Origin used when printing share links
    #[arg(long, global = true, default_value = DEFAULT_SHARE_ORIGIN)]
    pub share_origin: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a document, saving it and printing its output
    Run(RunArgs),
    /// Print a document without executing it
    Show(ShowArgs),
    /// Replace the local draft with the example document
    New,
    /// Copy a shared document into the local draft so it can be saved as your own
    Fork(ForkArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Share link, fragment, or id; the local draft when omitted
    #[arg(long)]
    pub link: Option<String>,
    /// Replace the definition with the contents of this file before executing
    #[arg(long)]
    pub definition: Option<PathBuf>,
    #[arg(long)]
    pub script: Option<PathBuf>,
    #[arg(long)]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(long)]
    pub link: Option<String>,
}

#[derive(Debug, Args)]
pub struct ForkArgs {
    #[arg(long)]
    pub link: String,
}

fn parse_execute_path_arg(raw: &str) -> Result<ExecutePath, String> {
    parse_execute_path(raw).ok_or_else(|| format!("expected `execute` or `sfn`, got `{raw}`"))
}

pub fn run() -> Result<()> {
    let cli = StepfnCli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_command(cli))
}

async fn run_command(cli: StepfnCli) -> Result<()> {
    let client = SyncClient::new(client_config(&cli)?).context("invalid service configuration")?;
    let state_path = resolve_state_path(cli.state_file.as_deref())?;
    tracing::debug!(
        base_url = client.base_url(),
        execute_path = client.execute_path().as_str(),
        state_path = %state_path.display(),
        "Resolved CLI settings"
    );
    let storage = Arc::new(
        FileStorage::load(state_path.clone())
            .with_context(|| format!("failed to open {}", state_path.display()))?,
    );

    match cli.command {
        Commands::Run(args) => run_document(client, storage, &cli.share_origin, args).await,
        Commands::Show(args) => show_document(client, storage, &cli.share_origin, args).await,
        Commands::New => new_document(client, storage).await,
        Commands::Fork(args) => fork_document(client, storage, args).await,
    }
}

fn client_config(cli: &StepfnCli) -> Result<SyncClientConfig> {
    let mut config = SyncClientConfig::from_env().context("invalid STEPFN_* environment")?;
    if let Some(base_url) = &cli.api_base_url {
        config.base_url.clone_from(base_url);
    }
    if let Some(execute_path) = cli.execute_path {
        config.execute_path = execute_path;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    Ok(config)
}

/// Flag, then `STEPFN_STATE_PATH`, then the platform data directory.
pub fn resolve_state_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(ENV_STATE_PATH).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("stepfn").join(STATE_FILE_NAME))
        .with_context(|| {
            format!("no local data directory; pass --state-file or set {ENV_STATE_PATH}")
        })
}

async fn open_session(
    client: SyncClient,
    storage: Arc<FileStorage>,
    link: Option<&str>,
) -> Result<CliSession> {
    let fragment = link.map(fragment_from_link).unwrap_or_default();
    let session = SessionController::new(client, storage, MemoryNavigation::new(fragment));
    let disposition = session
        .start()
        .await
        .with_context(|| format!("failed to open {}", link.unwrap_or("the local draft")))?;
    match disposition {
        LoadDisposition::Loaded { id } => tracing::info!(id = %id, "Opened saved document"),
        LoadDisposition::Draft { restored } => {
            tracing::info!(restored, "Opened local draft");
        }
        LoadDisposition::Unchanged => {}
    }
    Ok(session)
}

/// Reads an optional replacement for one document field.
pub fn read_field(path: Option<&Path>) -> Result<Option<String>> {
    path.map(|path| {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    })
    .transpose()
}

async fn run_document(
    client: SyncClient,
    storage: Arc<FileStorage>,
    share_origin: &str,
    args: RunArgs,
) -> Result<()> {
    let definition = read_field(args.definition.as_deref())?;
    let script = read_field(args.script.as_deref())?;
    let input = read_field(args.input.as_deref())?;

    let session = open_session(client, storage, args.link.as_deref()).await?;
    if let Some(definition) = definition {
        session.edit_definition(definition)?;
    }
    if let Some(script) = script {
        session.edit_script(script)?;
    }
    if let Some(input) = input {
        session.edit_input(input)?;
    }

    match session.execute().await {
        Ok(ExecuteDisposition::Completed {
            id,
            new_id_assigned,
        }) => {
            println!("{}", session.document().output);
            if let Some(link) = session.share_link(share_origin) {
                if new_id_assigned {
                    eprintln!("saved as {id}: {link}");
                } else {
                    eprintln!("updated {link}");
                }
            }
            Ok(())
        }
        Ok(ExecuteDisposition::Dropped) => bail!("an execute is already in flight"),
        Err(SessionError::Execution { cause }) => {
            println!("{cause}");
            bail!("execution failed")
        }
        Err(error) => Err(error).context("execute failed"),
    }
}

async fn show_document(
    client: SyncClient,
    storage: Arc<FileStorage>,
    share_origin: &str,
    args: ShowArgs,
) -> Result<()> {
    let session = open_session(client, storage, args.link.as_deref()).await?;
    let source = session.document().source();
    println!(
        "{}",
        serde_json::to_string_pretty(&source).context("failed to encode document")?
    );
    match session.share_link(share_origin) {
        Some(link) => eprintln!("share link: {link}"),
        None => eprintln!("local draft (not saved yet)"),
    }
    Ok(())
}

async fn new_document(client: SyncClient, storage: Arc<FileStorage>) -> Result<()> {
    let session = open_session(client, storage, None).await?;
    session.new_document()?;
    eprintln!("local draft reset to the example");
    Ok(())
}

async fn fork_document(client: SyncClient, storage: Arc<FileStorage>, args: ForkArgs) -> Result<()> {
    let session = open_session(client, storage, Some(args.link.as_str())).await?;
    session.fork()?;
    eprintln!("copied into the local draft; `stepfn run` saves it under a new link");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::Parser;
    use clap::error::ErrorKind;

    use super::*;

    #[test]
    fn cli_requires_subcommand() {
        let err = match StepfnCli::try_parse_from(["stepfn"]) {
            Ok(_) => panic!("expected missing subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        let err = match StepfnCli::try_parse_from(["stepfn", "unknown-subcommand"]) {
            Ok(_) => panic!("expected invalid subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = StepfnCli::try_parse_from([
            "stepfn",
            "run",
            "--link",
            "https://stepfn.dev/#/sfn/abc123",
            "--input",
            "input.json",
            "--execute-path",
            "sfn",
            "--timeout-ms",
            "5000",
        ])
        .expect("parse run");

        assert_eq!(cli.execute_path, Some(ExecutePath::Sfn));
        assert_eq!(cli.timeout_ms, Some(5000));
        assert_eq!(cli.share_origin, DEFAULT_SHARE_ORIGIN);
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.link.as_deref(), Some("https://stepfn.dev/#/sfn/abc123"));
        assert_eq!(args.input.as_deref(), Some(Path::new("input.json")));
        assert!(args.definition.is_none());
    }

    #[test]
    fn invalid_execute_path_is_rejected() {
        let err = match StepfnCli::try_parse_from(["stepfn", "--execute-path", "run", "new"]) {
            Ok(_) => panic!("expected execute path validation error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn fork_requires_a_link() {
        let err = match StepfnCli::try_parse_from(["stepfn", "fork"]) {
            Ok(_) => panic!("expected missing link error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn state_file_flag_wins() {
        let path = resolve_state_path(Some(Path::new("/tmp/stepfn-state.json")))
            .expect("resolve state path");
        assert_eq!(path, PathBuf::from("/tmp/stepfn-state.json"));
    }

    #[test]
    fn field_files_are_read_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("input.json");
        std::fs::write(&path, "{\"a\": 1}\n").expect("write input");

        assert_eq!(
            read_field(Some(path.as_path())).expect("read field"),
            Some("{\"a\": 1}\n".to_string())
        );
        assert_eq!(read_field(None).expect("no field"), None);

        let missing = read_field(Some(dir.path().join("missing.json").as_path()));
        assert!(missing.is_err());
    }
}
