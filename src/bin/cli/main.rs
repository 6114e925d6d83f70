//! CLI tool for streaming archive operations.

mod commands;
mod exit_codes;
mod output;
mod password;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use std::path::PathBuf;

use arcstream::CancelToken;
use exit_codes::ExitCode;

/// Stream entries in and out of compressed archives
#[derive(Parser)]
#[command(name = "arcstream")]
#[command(author, version, about = "Stream entries in and out of compressed archives", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value = "human", global = true)]
    format: OutputFormat,

    /// Suppress informational output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

/// Options shared by every command that reads an archive.
#[derive(clap::Args)]
pub struct ReadArgs {
    /// Filters to undo, in the order they were applied (default: detect)
    #[arg(long = "filter", value_name = "NAME")]
    filters: Vec<String>,

    /// Archive format (default: detect)
    #[arg(long = "type", short = 't', value_name = "FORMAT")]
    archive_type: Option<String>,

    /// Option string, e.g. "tar:read_concatenated_archives"
    #[arg(long, short = 'O')]
    options: Option<String>,

    /// Passphrase for encrypted entries
    #[arg(short = 'p', long, env = "ARCSTREAM_PASSPHRASE")]
    password: Option<String>,

    /// Prompt for the passphrase
    #[arg(long)]
    ask_password: bool,
}

/// Options shared by every command that writes an archive.
#[derive(clap::Args)]
pub struct WriteArgs {
    /// Filters to apply, first one applied first
    #[arg(long = "filter", value_name = "NAME")]
    filters: Vec<String>,

    /// Option string, e.g. "gzip:compression-level=9"
    #[arg(long, short = 'O')]
    options: Option<String>,

    /// Encrypt entries (zip only)
    #[arg(short = 'p', long, env = "ARCSTREAM_PASSPHRASE")]
    password: Option<String>,

    /// Prompt for the passphrase
    #[arg(long)]
    ask_password: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List archive contents (alias: l)
    #[command(alias = "l")]
    List {
        /// Archive file to list
        archive: PathBuf,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Write one entry to standard output
    Cat {
        /// Archive file to read
        archive: PathBuf,

        /// Entry name (default: the first entry)
        entry: Option<String>,

        /// 1-based entry index instead of a name
        #[arg(long, short = 'n', conflicts_with = "entry")]
        index: Option<usize>,

        /// Treat the input as a single compressed file
        #[arg(long, conflicts_with_all = ["entry", "index"])]
        raw: bool,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Extract entries from an archive (alias: x)
    #[command(alias = "x")]
    Extract {
        /// Archive file to extract
        archive: PathBuf,

        /// Entry names to extract (default: all)
        names: Vec<String>,

        /// Output directory
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,

        /// 1-based entry indices to extract
        #[arg(long = "index", short = 'n', conflicts_with = "names")]
        indices: Vec<usize>,

        /// Remove this many leading path components
        #[arg(long, default_value = "0")]
        strip_components: usize,

        /// Do not restore permissions and modification times
        #[arg(long)]
        no_preserve: bool,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Create an archive from files and directories (alias: a)
    #[command(alias = "a")]
    Pack {
        /// Archive file to create
        archive: PathBuf,

        /// Files and directories to add
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Archive format
        #[arg(long = "type", short = 't', default_value = "tar")]
        archive_type: String,

        /// Store names relative to this directory
        #[arg(long)]
        strip_prefix: Option<PathBuf>,

        #[command(flatten)]
        write: WriteArgs,
    },

    /// Compress a single file without a container
    Compress {
        /// Input file, or "-" for standard input
        input: PathBuf,

        /// Output file
        output: PathBuf,

        /// Filters to apply, first one applied first
        #[arg(long = "filter", value_name = "NAME", default_value = "gzip")]
        filters: Vec<String>,

        /// Option string, e.g. "zstd:compression-level=19"
        #[arg(long, short = 'O')]
        options: Option<String>,
    },

    /// Show filter and format codes and backend versions
    Codes,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

fn main() {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    // first Ctrl+C stops at the next block, the second one exits
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(exit_codes::USER_INTERRUPT);
        }
        eprintln!("\nInterrupted");
        handler_token.cancel();
    })
    .ok();

    let cli = Cli::parse();
    let context = commands::Context {
        format: cli.format,
        quiet: cli.quiet,
        cancel,
    };

    let exit_code = match cli.command {
        Commands::List { archive, read } => commands::list(&context, &archive, read),

        Commands::Cat {
            archive,
            entry,
            index,
            raw,
            read,
        } => commands::cat(&context, &archive, entry, index, raw, read),

        Commands::Extract {
            archive,
            names,
            output,
            indices,
            strip_components,
            no_preserve,
            read,
        } => commands::extract(
            &context,
            &commands::ExtractConfig {
                archive_path: &archive,
                output_dir: &output,
                names,
                indices,
                strip_components,
                preserve: !no_preserve,
            },
            read,
        ),

        Commands::Pack {
            archive,
            files,
            archive_type,
            strip_prefix,
            write,
        } => commands::pack(
            &context,
            &archive,
            &files,
            &archive_type,
            strip_prefix,
            write,
        ),

        Commands::Compress {
            input,
            output,
            filters,
            options,
        } => commands::compress(&context, &input, &output, &filters, options),

        Commands::Codes => commands::codes(&context),

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            ExitCode::Success
        }
    };

    std::process::exit(exit_code.code());
}
