mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ctfar", about = "Inspect and extract CTF archives", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List archive members without extracting
    List {
        /// Archive (or raw container) file
        archive: PathBuf,
    },
    /// Extract archive members into a directory
    Extract {
        /// Archive (or raw container) file
        archive: PathBuf,
        /// Output directory (defaults to the current directory)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
        /// List members while extracting
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::List { archive } => {
            commands::list::run(&archive);
        }
        Command::Extract {
            archive,
            output,
            verbose,
        } => {
            commands::extract::run(&archive, output.as_deref(), verbose);
        }
    }
}
