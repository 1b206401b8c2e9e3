// mxbulk - bulk configuration CLI for the SecureSphere MX REST API
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod client;
mod config;
mod operation;
mod render;
mod row;
mod runner;
mod session;

use crate::client::ApiClient;
use crate::config::{Config, Scope, resolve, save};
use crate::operation::{
    AUDIT_REPORTS_PATH, CREATE_DB_CONNECTION, CREATE_PROTECTED_IP, GET_AGENT_MONITORING_RULE,
    HttpMethod, OperationSpec, RequestTarget, UPDATE_SERVER_OS,
};
use crate::render::{OutputFormat, RenderOpts};
use crate::row::{Row, read_csv};
use crate::runner::{BulkRunner, prepare};
use crate::session::authenticate;
use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mxbulk",
    version,
    about = "Bulk configuration CLI for the SecureSphere MX REST API"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "HOST",
        help = "MX management server address (otherwise read from config)"
    )]
    host: Option<String>,

    #[arg(long, global = true, help = "MX API port (defaults to 8083)")]
    port: Option<u16>,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Full base URL, e.g. https://10.0.0.5:8083 (wins over --host/--port)"
    )]
    base_url: Option<String>,

    #[arg(
        long,
        global = true,
        env = "MXBULK_LOGIN_TOKEN",
        hide_env_values = true,
        value_name = "BASE64",
        help = "Basic token (base64 of user:password) for the login call"
    )]
    login_token: Option<String>,

    #[arg(
        long,
        global = true,
        env = "MXBULK_API_TOKEN",
        hide_env_values = true,
        value_name = "BASE64",
        help = "Basic token sent on every call after login"
    )]
    api_token: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Verify the MX TLS certificate (off by default for self-signed appliances)"
    )]
    verify_tls: bool,

    #[arg(
        long,
        global = true,
        conflicts_with = "verify_tls",
        help = "Skip TLS certificate verification even if the config enables it"
    )]
    no_verify_tls: bool,

    #[arg(long, global = true, value_name = "SECONDS", help = "Request timeout")]
    timeout: Option<u64>,

    #[arg(
        long,
        short = 'o',
        value_enum,
        default_value_t = OutputFormat::Pretty,
        global = true,
        help = "Output format (propagates to subcommands)"
    )]
    output: OutputFormat,

    #[arg(
        long,
        value_name = "COLUMN",
        global = true,
        help = "Sort table rows by column (ascending)"
    )]
    sort_by: Option<String>,

    #[arg(
        long,
        value_name = "TEXT",
        global = true,
        help = "Filter table rows containing TEXT (case-insensitive)"
    )]
    filter: Option<String>,

    #[arg(
        long,
        short = 'v',
        global = true,
        help = "Log every request and response (tokens are never logged)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist the connection flags given on this invocation
    Configure {
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
    },
    /// Show current configuration (tokens masked)
    ConfigShow,
    /// Log in and report the session cookie pair
    Login,
    /// Database connection (alias) operations
    #[command(subcommand)]
    DbConnection(DbConnectionCommand),
    /// Protected IP operations
    #[command(subcommand)]
    ProtectedIp(ProtectedIpCommand),
    /// Server group server operations
    #[command(subcommand)]
    Server(ServerCommand),
    /// Agent monitoring rule operations
    #[command(subcommand)]
    Amr(AmrCommand),
    /// DB audit report configuration operations
    #[command(subcommand)]
    AuditReport(AuditReportCommand),
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Args)]
struct BatchArgs {
    #[arg(
        long,
        short = 'i',
        value_name = "CSV",
        default_value = "input.csv",
        help = "CSV file with one row per change"
    )]
    input: PathBuf,

    #[arg(long, help = "Show the requests that would be sent without logging in")]
    dry_run: bool,
}

#[derive(Subcommand)]
enum DbConnectionCommand {
    /// POST one database connection per CSV row
    Create(BatchArgs),
}

#[derive(Subcommand)]
enum ProtectedIpCommand {
    /// POST one protected (and server group) IP per CSV row
    Create(BatchArgs),
}

#[derive(Subcommand)]
enum ServerCommand {
    /// PUT the OS type of one server group IP per CSV row
    UpdateOs(BatchArgs),
}

#[derive(Subcommand)]
enum AmrCommand {
    /// Retrieve agent monitoring rules by name
    Get {
        #[arg(
            long = "rule",
            value_name = "NAME",
            required_unless_present = "input",
            help = "Rule name (repeatable)"
        )]
        rules: Vec<String>,

        #[arg(
            long,
            short = 'i',
            value_name = "CSV",
            conflicts_with = "rules",
            help = "CSV file with a rule_name column"
        )]
        input: Option<PathBuf>,

        #[arg(long, help = "Show the requests that would be sent without logging in")]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum AuditReportCommand {
    /// GET all flattened DB audit report configurations
    List,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => Scope::Local,
            ScopeArg::User => Scope::User,
        }
    }
}

struct RunContext {
    cwd: PathBuf,
    overrides: Config,
    output: OutputFormat,
    render_opts: RenderOpts,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let cwd = std::env::current_dir().context("reading current directory")?;

    let ctx = RunContext {
        cwd,
        overrides: Config {
            host: cli.host.clone(),
            port: cli.port,
            base_url: cli.base_url.clone(),
            login_token: cli.login_token.clone(),
            api_token: cli.api_token.clone(),
            verify_tls: match (cli.verify_tls, cli.no_verify_tls) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            timeout_secs: cli.timeout,
        },
        output: cli.output,
        render_opts: RenderOpts {
            sort_by: cli.sort_by.clone(),
            filter: cli.filter.clone(),
        },
    };

    match cli.command {
        Commands::Configure { scope } => {
            if ctx.overrides == Config::default() {
                return Err(anyhow!(
                    "nothing to save; pass e.g. --host, --login-token or --api-token"
                ));
            }
            let existing = config::load_scope(scope.into(), &ctx.cwd)?;
            let updated = config::merge(existing, ctx.overrides.clone());
            let path = save(scope.into(), &updated, &ctx.cwd)?;
            println!("Saved configuration to {}", path.display());
        }
        Commands::ConfigShow => {
            let merged = config::load(&ctx.cwd)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&config::masked(&merged))?
            );
        }
        Commands::Login => {
            let settings = resolve(&ctx.cwd, ctx.overrides.clone())?;
            let client = ApiClient::new(&settings)?;
            let session = authenticate(&client, &settings.login_token)?;
            println!("Login successful at {}", settings.base_url);
            println!("Session cookie: {}", session.masked_cookie());
        }
        Commands::DbConnection(DbConnectionCommand::Create(batch)) => {
            run_batch(&ctx, &CREATE_DB_CONNECTION, read_csv(&batch.input)?, batch.dry_run, false)?
        }
        Commands::ProtectedIp(ProtectedIpCommand::Create(batch)) => {
            run_batch(&ctx, &CREATE_PROTECTED_IP, read_csv(&batch.input)?, batch.dry_run, false)?
        }
        Commands::Server(ServerCommand::UpdateOs(batch)) => {
            run_batch(&ctx, &UPDATE_SERVER_OS, read_csv(&batch.input)?, batch.dry_run, false)?
        }
        Commands::Amr(AmrCommand::Get {
            rules,
            input,
            dry_run,
        }) => {
            let rows = match input {
                Some(path) => read_csv(&path)?,
                None => rules
                    .iter()
                    .map(|name| Row::new().with("rule_name", name.as_str()))
                    .collect(),
            };
            run_batch(&ctx, &GET_AGENT_MONITORING_RULE, rows, dry_run, true)?
        }
        Commands::AuditReport(AuditReportCommand::List) => {
            let client = connect(&ctx)?;
            let response = client.request(
                HttpMethod::Get,
                &RequestTarget::from_path(AUDIT_REPORTS_PATH),
                None,
            )?;
            if response.status != 200 {
                return Err(anyhow!(
                    "listing audit report configurations failed with HTTP {}: {}",
                    response.status,
                    response.body
                ));
            }
            render::render_response(
                response,
                ctx.output,
                &ctx.render_opts,
                Some(&["name", "id", "policy", "type", "schedule"]),
            )?
        }
        Commands::Completion { shell } => {
            use clap_complete::{generate, shells};
            let mut cmd = Cli::command();
            let bin = cmd.get_name().to_string();
            match shell {
                CompletionShell::Bash => {
                    generate(shells::Bash, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Zsh => {
                    generate(shells::Zsh, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Fish => {
                    generate(shells::Fish, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::PowerShell => {
                    generate(shells::PowerShell, &mut cmd, bin, &mut std::io::stdout())
                }
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "mxbulk=debug" } else { "mxbulk=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Logs in and returns a client carrying the session headers.
fn connect(ctx: &RunContext) -> Result<ApiClient> {
    let settings = resolve(&ctx.cwd, ctx.overrides.clone())?;
    let api_token = settings.api_token()?.to_string();
    let client = ApiClient::new(&settings)?;
    let session = authenticate(&client, &settings.login_token)?;
    info!(established_at = %session.established_at, "session ready");
    client.with_session(&api_token, &session)
}

fn run_batch(
    ctx: &RunContext,
    spec: &OperationSpec,
    rows: Vec<Row>,
    dry_run: bool,
    show_data: bool,
) -> Result<()> {
    if dry_run {
        for (idx, row) in rows.iter().enumerate() {
            match prepare(spec, row) {
                Ok(prepared) => println!("{}", render::plan_line(idx + 1, &prepared)?),
                Err(err) => println!("[row {}] would be skipped: {}", idx + 1, err),
            }
        }
        if rows.is_empty() {
            warn!(operation = spec.name, "input has no rows; nothing to do");
        }
        return Ok(());
    }

    // Log in even for an empty input so bad credentials still fail the run.
    let client = connect(ctx)?;
    if rows.is_empty() {
        warn!(operation = spec.name, "input has no rows; nothing to do");
        return Ok(());
    }
    warn_foreign_rows(&rows, client.api_base().host_str());

    let runner = BulkRunner::new(&client);
    let summary = match ctx.output {
        OutputFormat::Json => runner.run(spec, &rows),
        _ => runner.run_with(spec, &rows, |outcome| {
            if let Err(err) = render::print_outcome(spec, outcome, ctx.output, show_data) {
                warn!(%err, "could not print outcome");
            }
        }),
    };
    render::print_summary(&summary, ctx.output, &ctx.render_opts)
}

// Every call goes to the session MX, whatever the row's MX-IP column says.
fn warn_foreign_rows(rows: &[Row], session_host: Option<&str>) {
    let Some(host) = session_host else { return };
    for (idx, row) in rows.iter().enumerate() {
        if let Some(row_mx) = row.text("MX-IP")
            && row_mx != host
        {
            warn!(
                row = idx + 1,
                row_mx = %row_mx,
                session_mx = host,
                "row names a different MX; sending it to the session MX"
            );
        }
    }
}
