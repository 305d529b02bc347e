use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "updatewarden",
    version,
    about = "Remind, defer and enforce macOS updates"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the policy once
    Run(commands::run::RunArgs),
    /// Run the policy with Jamf's positional script parameters
    Jamf(commands::jamf::JamfArgs),
    /// Show the stored deferral state and the tier it evaluates to now
    Status,
    /// Forget the stored deferral state
    Reset,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Evaluate the policy at another instant without acting
    Simulate(commands::simulate::SimulateArgs),
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("UPDATEWARDEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Jamf(args) => commands::jamf::run(args),
        Commands::Status => commands::state::status(),
        Commands::Reset => commands::state::reset(),
        Commands::Config { action } => commands::config::run(action),
        Commands::Simulate(args) => commands::simulate::run(args),
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "updatewarden",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
