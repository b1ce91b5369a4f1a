use anyhow::Result;
use clap::{Parser, Subcommand};
use unravel::commands::*;
use unravel_core::services::RunOverrides;

/// Deobfuscation pipeline for obfuscated JVM archives.
///
/// This CLI is a thin wrapper around `unravel-core` (exposed in code as `unravel_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "unravel",
    version,
    about = "Deobfuscate JVM class archives",
    long_about = None
)]
struct Cli {
    /// Show debug output (every rename, recovered literal and rewrite).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    /// Only show warnings and errors on stderr.
    #[arg(long, short, global = true, default_value_t = false, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new project at the given root.
    ///
    /// This will:
    /// - Create a `.unravel` metadata directory and an `outputs` directory.
    /// - Write a `.unravel/project.json` config file.
    /// - Create the project database.
    InitProject {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Optional project name. If omitted, the name is derived from the root directory.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show basic information about an existing project.
    ProjectInfo {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Deobfuscate an archive.
    ///
    /// Bytecode units are renamed, have their literals recovered, their flow simplified and
    /// their junk methods removed; every other entry is copied verbatim.
    Run {
        /// Project root directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        root: String,

        /// Input archive (relative paths are resolved against the project root).
        #[arg(long)]
        input: String,

        /// Output archive. Defaults to `outputs/<stem>-deobf.<ext>`.
        #[arg(long)]
        output: Option<String>,

        /// Worker threads (overrides the project config).
        #[arg(long)]
        workers: Option<usize>,

        /// Overall deadline in seconds (overrides the project config).
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Disable the name predictor for this run.
        #[arg(long, default_value_t = false)]
        no_ml: bool,

        /// Emit the run report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Set a manual name mapping.
    MapSet {
        #[arg(long, default_value = ".")]
        root: String,

        /// Obfuscated name.
        #[arg(long)]
        old: String,

        /// Replacement name.
        #[arg(long)]
        new: String,
    },

    /// List persisted name mappings.
    MapList {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Delete a persisted name mapping.
    MapDelete {
        #[arg(long, default_value = ".")]
        root: String,

        /// Obfuscated name whose mapping is removed.
        #[arg(long)]
        old: String,
    },

    /// Import manual mappings from a JSON object file (`{"old": "new"}`).
    MapImport {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        file: String,
    },

    /// Export persisted mappings as a JSON object, to a file or stdout.
    MapExport {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        file: Option<String>,
    },

    /// Add a method name to the suspect (junk) set.
    SuspectAdd {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long)]
        name: String,
    },

    /// List suspect method names.
    SuspectList {
        #[arg(long, default_value = ".")]
        root: String,
    },

    /// List recorded runs.
    RunsList {
        #[arg(long, default_value = ".")]
        root: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the persistent run log.
    LogShow {
        #[arg(long, default_value = ".")]
        root: String,

        /// Only print the last N lines.
        #[arg(long)]
        tail: Option<usize>,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::InitProject { root, name } => init_project_command(&root, name)?,
        Command::ProjectInfo { root, json } => project_info_command(&root, json)?,
        Command::Run { root, input, output, workers, timeout_secs, no_ml, json } => {
            let overrides = RunOverrides { workers, timeout_secs, disable_ml: no_ml };
            run_command(&root, &input, output.as_deref(), overrides, json)?
        }
        Command::MapSet { root, old, new } => map_set_command(&root, &old, &new)?,
        Command::MapList { root, json } => map_list_command(&root, json)?,
        Command::MapDelete { root, old } => map_delete_command(&root, &old)?,
        Command::MapImport { root, file } => map_import_command(&root, &file)?,
        Command::MapExport { root, file } => map_export_command(&root, file.as_deref())?,
        Command::SuspectAdd { root, name } => suspect_add_command(&root, &name)?,
        Command::SuspectList { root } => suspect_list_command(&root)?,
        Command::RunsList { root, json } => runs_list_command(&root, json)?,
        Command::LogShow { root, tail } => log_show_command(&root, tail)?,
    }

    Ok(())
}
