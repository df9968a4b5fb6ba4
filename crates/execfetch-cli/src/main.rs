//! execfetch entry point.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use execfetch::{merge_files, Fetcher, SourceSpec};
use execfetch_cli::config::{resolve_config_path, BatchConfig};
use execfetch_cli::inspect;
use execfetch_cli::{fetch_single, BatchRunner, SourceOutcome};

#[derive(Parser)]
#[command(
    name = "execfetch",
    about = "Pull coverage execution data from running agents and merge .exec files",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump execution data from an agent listening in TCP server mode.
    Tcp {
        #[arg(long)]
        hostname: String,

        #[arg(long, allow_negative_numbers = true)]
        port: i64,

        /// Where to write the dump (default: target/execfetch/jacoco.exec).
        #[arg(long)]
        output_file: Option<PathBuf>,

        /// Clear the agent's probes after the dump.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        reset_after_fetch: bool,
    },

    /// Dump execution data through the remote management interface.
    Rpc {
        /// Locator such as service:jmx:rmi:///jndi/rmi://host:9999/jmxrmi.
        #[arg(long)]
        service_url: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,

        /// Where to write the dump (default: target/execfetch/jacoco.exec).
        #[arg(long)]
        output_file: Option<PathBuf>,

        /// Clear the agent's probes after the dump.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        reset_after_fetch: bool,

        /// Exit with an error instead of a warning when the fetch fails.
        #[arg(long)]
        fail_on_error: bool,
    },

    /// Fetch every source listed in a JSON config file.
    ///
    /// The config is looked up in order: --config, $EXECFETCH_CONFIG,
    /// ./.execfetch/batch.json, ./execfetch.json.
    Batch {
        #[arg(long)]
        config: Option<String>,

        /// Stop at the first failing source.
        #[arg(long)]
        fail_on_error: bool,

        /// Merge the fetched files afterwards.
        #[arg(long)]
        merge: bool,
    },

    /// Merge .exec files into a new file.
    Merge {
        /// Destination; must not exist yet.
        #[arg(short, long)]
        output: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// List the sessions and execution records of an .exec file.
    Info {
        file: PathBuf,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   execfetch completions bash > ~/.local/share/bash-completion/completions/execfetch
    ///   execfetch completions zsh > ~/.zfunc/_execfetch
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Tcp {
            hostname,
            port,
            output_file,
            reset_after_fetch,
        } => {
            let source = SourceSpec {
                output_file,
                reset_after_fetch,
                ..SourceSpec::tcp(hostname, port)
            };
            print_outcome(&fetch_single(&Fetcher::new(), &source, true)?);
        }

        Commands::Rpc {
            service_url,
            username,
            password,
            output_file,
            reset_after_fetch,
            fail_on_error,
        } => {
            let source = SourceSpec {
                username,
                password,
                output_file,
                reset_after_fetch,
                ..SourceSpec::locator(service_url)
            };
            print_outcome(&fetch_single(&Fetcher::new(), &source, fail_on_error)?);
        }

        Commands::Batch {
            config,
            fail_on_error,
            merge,
        } => {
            let path = resolve_config_path(config.as_deref());
            let mut config = BatchConfig::load(&path)?;
            config.fail_on_error |= fail_on_error;
            config.merge |= merge;

            let report = BatchRunner::new(config).run()?;
            for source in &report.sources {
                print!("[{}] {}: ", source.index, source.label);
                print_outcome(&source.outcome);
            }
            if let Some(merged) = &report.merged {
                println!(
                    "Merged {} file(s) into {} ({} classes)",
                    merged.inputs,
                    merged.destination.display(),
                    merged.classes
                );
            }
            for error in &report.errors {
                println!("warning: {error}");
            }
        }

        Commands::Merge { output, inputs } => {
            let summary = merge_files(&inputs, &output)?;
            println!(
                "Merged {} file(s) into {}: {} sessions, {} classes",
                summary.inputs,
                summary.destination.display(),
                summary.sessions,
                summary.classes
            );
        }

        Commands::Info { file, json } => {
            let summary = inspect::summarize(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", inspect::render_text(&summary));
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "execfetch", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn print_outcome(outcome: &SourceOutcome) {
    match outcome {
        SourceOutcome::Saved { path, bytes } => {
            println!("saved {bytes} bytes to {}", path.display())
        }
        SourceOutcome::Empty => println!("no execution data"),
        SourceOutcome::Failed { error } => println!("failed: {error}"),
    }
}
