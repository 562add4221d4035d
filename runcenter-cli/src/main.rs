mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "runcenter")]
#[command(about = "Run flow node handlers in isolated execution contexts")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to $RUNCENTER_CONFIG, then built-in defaults)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a handler and stream its lifecycle events as JSON lines
    Run {
        /// Handler source file ("-" reads stdin)
        #[arg(short, long, conflicts_with = "request")]
        file: Option<PathBuf>,

        /// Complete ExecRequest JSON document ("-" reads stdin)
        #[arg(short, long)]
        request: Option<PathBuf>,

        /// Source dialect (javascript, typescript)
        #[arg(short, long, default_value = "javascript")]
        language: String,

        /// Handler input as JSON
        #[arg(short, long)]
        input: Option<String>,

        /// Hard timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Run identifier (random when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Variables exposed to the handler as context.env (KEY=VALUE)
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },
    /// Invoke a registered capability
    Invoke {
        /// Capability name
        capability: String,

        /// Arguments as a JSON array
        #[arg(short, long, default_value = "[]")]
        args: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_guard = commands::init_logging(cli.verbose, cli.log_file.as_deref())?;

    let code = match cli.command {
        Commands::Run {
            file,
            request,
            language,
            input,
            timeout_ms,
            run_id,
            env,
        } => {
            let request = match request {
                Some(path) => commands::load_request(&path)?,
                None => commands::build_request(
                    file.as_deref(),
                    &language,
                    input.as_deref(),
                    timeout_ms,
                    run_id,
                    &env,
                )?,
            };
            commands::execute_run(cli.config.as_deref(), request).await?
        }
        Commands::Invoke { capability, args } => commands::execute_invoke(capability, &args).await?,
        Commands::Config => {
            commands::execute_config(cli.config.as_deref())?;
            0
        }
    };

    // Flush the file appender before exiting
    drop(log_guard);
    std::process::exit(code);
}
