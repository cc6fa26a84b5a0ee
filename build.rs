// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Mirror of `src/cli.rs`; build scripts cannot use the crate's own types
fn build_cli() -> Command {
    Command::new("levelsync")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Levelsync Contributors")
        .about("Automatically download Rhythm Doctor levels")
        .arg(Arg::new("output").required(true).value_name("OUTPUT").help("Directory to keep levels in"))
        .arg(
            Arg::new("yeeted")
                .short('y')
                .long("yeeted")
                .value_name("PATH")
                .help("Where to move removed levels instead of deleting them"),
        )
        .arg(
            Arg::new("database")
                .short('d')
                .long("database")
                .value_name("PATH")
                .default_value("./orchard.db")
                .help("Where to cache the level database"),
        )
        .arg(
            Arg::new("concurrency")
                .short('c')
                .long("concurrency")
                .value_name("N")
                .default_value("1")
                .help("Number of levels to download concurrently"),
        )
        .arg(
            Arg::new("max_files")
                .long("max-files")
                .value_name("N")
                .default_value("10000")
                .help("Maximum number of files in one level archive"),
        )
        .arg(
            Arg::new("max_size")
                .long("max-size")
                .value_name("BYTES")
                .default_value("500000000")
                .help("Maximum unpacked size of one level, in bytes"),
        )
        .arg(
            Arg::new("dry_run")
                .short('n')
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Do not actually add or remove levels"),
        )
        .arg(
            Arg::new("orchard")
                .long("orchard")
                .value_name("URL")
                .default_value("https://f000.backblazeb2.com/file/rdsqlite/backups/orchard-main.db")
                .help("URL of the level database"),
        )
        .arg(
            Arg::new("codex")
                .long("codex")
                .action(ArgAction::SetTrue)
                .help("Download levels from codex.rhythm.cafe"),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .value_name("N")
                .default_value("10")
                .help("Retries per download before giving up"),
        )
        .arg(
            Arg::new("backoff_max")
                .long("backoff-max")
                .value_name("SECS")
                .default_value("60")
                .help("Longest wait between retries, in seconds"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log debug output"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let mut buffer = Vec::new();
    if let Err(e) = Man::new(build_cli()).render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("levelsync.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
