use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use xmlsilo::{Builder, CompileFlags, ExportFlags, LoadFlags, Silo};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "xmlsilo", about = "Binary XML utility", version)]
struct Cli {
    /// Print verbose debug statements
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Force parsing of invalid files
    #[arg(short = 'f', long = "force", global = true)]
    force: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump a silo file as text
    Dump {
        /// A compiled silo, e.g. `example.silo`
        file: PathBuf,
    },
    /// Export a silo file back to XML
    Export {
        /// A compiled silo, e.g. `example.silo`
        file: PathBuf,
    },
    /// Query a silo file, printing the first match's text
    Query {
        /// A compiled silo, e.g. `example.silo`
        file: PathBuf,
        /// An XPath-subset expression, e.g. `components/component/id`
        xpath: String,
    },
    /// Compile XML files into a silo
    Compile {
        /// The silo to write, e.g. `example.silo`
        file_out: PathBuf,
        /// XML sources, merged in order
        #[arg(required = true)]
        file_in: Vec<PathBuf>,
    },
}

fn load_flags(cli: &Cli) -> LoadFlags {
    if cli.force {
        LoadFlags::NO_MAGIC
    } else {
        LoadFlags::NONE
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Dump { file } => {
            let silo = Silo::load_from_file(file, load_flags(cli))?;
            print!("{}", silo.dump());
        }
        Command::Export { file } => {
            let silo = Silo::load_from_file(file, load_flags(cli))?;
            let xml = silo.export(
                ExportFlags::ADD_HEADER
                    | ExportFlags::FORMAT_MULTILINE
                    | ExportFlags::FORMAT_INDENT
                    | ExportFlags::INCLUDE_SIBLINGS,
            )?;
            print!("{xml}");
        }
        Command::Query { file, xpath } => {
            let silo = std::sync::Arc::new(Silo::load_from_file(file, load_flags(cli))?);
            let node = silo.query_first(xpath)?;
            println!("RESULT: {}", node.text().unwrap_or(""));
        }
        Command::Compile { file_out, file_in } => {
            let mut builder = Builder::new();
            for path in file_in {
                builder.import_file(path)?;
            }
            let blob = builder.compile(CompileFlags::LITERAL_TEXT)?;
            std::fs::write(file_out, blob)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // clap renders the message together with the usage help
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                // --help and --version are not failures
                ExitCode::SUCCESS
            };
        }
    };

    // -v forces debug logging; otherwise RUST_LOG decides
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
