use anyhow::Result;
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tsync",
    version,
    about = "Synchronize a directory tree with a device reachable through a remote shell",
    long_about = "`tsync` mirrors files between the local machine and a device reachable through a
remote shell command, `adb shell` by default. Both sides are captured, compared by modification
time and only what differs is copied.

EXAMPLE:
    # Push a music folder to the phone, removing files that are gone locally
    tsync --delete ~/Music /sdcard/Music

    # Pull the camera folder, ignoring thumbnails
    tsync --pull --exclude .thumbnails ~/Pictures /sdcard/DCIM/

A trailing slash on the source syncs its contents into the destination directory; without
it the source directory itself is created inside the destination."
)]
struct Args {
    // Sync options
    /// Pull from the remote side instead of pushing to it
    #[arg(long, help_heading = "Sync options")]
    pull: bool,

    /// Delete destination files that are not present on the source
    #[arg(long, help_heading = "Sync options")]
    delete: bool,

    /// Delete destination files matching an exclude pattern
    #[arg(long, help_heading = "Sync options")]
    delete_excluded: bool,

    /// Show what would be done without changing anything
    #[arg(short = 'n', long, help_heading = "Sync options")]
    dry_run: bool,

    /// Replace files with directories and directories with files when they collide
    #[arg(long, help_heading = "Sync options")]
    force: bool,

    /// Follow symlinks and copy what they point to instead of skipping them
    #[arg(short = 'L', long, help_heading = "Sync options")]
    copy_links: bool,

    /// Timestamps are compared at this granularity, in seconds
    #[arg(
        long,
        default_value_t = common::sync::DEFAULT_TIME_GRANULARITY,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(i64).range(1..),
        help_heading = "Sync options"
    )]
    time_granularity: i64,

    // Filtering
    /// Glob pattern relative to the destination, skipped on both sides (can be specified multiple times)
    ///
    /// `*` also matches `/`, so `*.tmp` skips temporary files at any depth.
    #[arg(long, value_name = "PATTERN", action = clap::ArgAction::Append, help_heading = "Filtering")]
    exclude: Vec<String>,

    /// Read exclude patterns from a file, one per line (can be specified multiple times)
    #[arg(long, value_name = "PATH", action = clap::ArgAction::Append, help_heading = "Filtering")]
    exclude_from: Vec<std::path::PathBuf>,

    // Remote
    /// Command giving a shell on the remote side
    #[arg(
        long,
        default_value = "adb shell",
        value_name = "COMMAND",
        help_heading = "Remote"
    )]
    remote_shell: String,

    // Progress & output
    /// Show a progress bar while copying
    #[arg(long, help_heading = "Progress & output")]
    show_progress: bool,

    /// Verbose level: -v DEBUG / -vv TRACE (default: INFO)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet level: -q WARN / -qq ERROR
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    quiet: u8,

    /// Disable colored log output
    #[arg(long, help_heading = "Progress & output")]
    no_color: bool,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    // ARGUMENTS
    /// Local path
    #[arg()]
    local: String,

    /// Path on the remote side
    #[arg()]
    remote: String,
}

fn read_excludes(args: &Args) -> Result<Vec<String>> {
    let mut excludes = args.exclude.clone();
    for path in &args.exclude_from {
        excludes.extend(common::exclude::read_patterns_file(path)?);
    }
    Ok(excludes)
}

#[instrument(skip(args))]
async fn async_main(args: Args) -> Result<common::Summary> {
    let excludes = read_excludes(&args)?;
    // fail on a bad pattern before touching either side
    common::ExcludePatterns::new(&excludes)?;
    let remote = common::ShellFileSystem::from_command_line(&args.remote_shell)?;
    if !remote.test_connection().await {
        return Err(common::Error::NoDevice.into());
    }
    let local = common::LocalFileSystem::new();
    let local_path = common::sync::expand_home(&args.local)?;
    let settings = common::Settings {
        delete: args.delete,
        delete_excluded: args.delete_excluded,
        dry_run: args.dry_run,
        force: args.force,
        follow_symlinks: args.copy_links,
        show_progress: args.show_progress,
        time_granularity: args.time_granularity,
        excludes,
    };
    let summary = if args.pull {
        common::sync(&args.remote, &remote, &local_path, &local, &settings).await?
    } else {
        common::sync(&local_path, &local, &args.remote, &remote, &settings).await?
    };
    Ok(summary)
}

fn main() {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        no_color: args.no_color,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
    };
    if common::run(output, runtime, func).is_none() {
        std::process::exit(1);
    }
}
