//! Egg archive command implementations

use anyhow::{Context, Result};
use clap::Subcommand;
use glob::Pattern;
use std::fs;
use std::path::Path;

use egg_archive::{EggArchive, EntryInfo};

use crate::utils::{
    add_table_row, create_spinner, create_table, format_bytes, format_compression_ratio,
    format_entry_time,
};

#[derive(Subcommand)]
pub enum EggCommands {
    /// List entries in an egg
    List {
        /// Path to the egg
        archive: String,

        /// Show detailed information (size, compression ratio, mode)
        #[arg(short, long)]
        long: bool,

        /// Filter entries by pattern (supports wildcards)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Extract every entry of an egg
    Extract {
        /// Path to the egg
        archive: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: String,
    },

    /// Pack a directory tree into a new egg
    Pack {
        /// Directory to pack
        source: String,

        /// Path for the new egg
        archive: String,
    },
}

pub fn execute(command: EggCommands) -> Result<()> {
    match command {
        EggCommands::List {
            archive,
            long,
            filter,
        } => list_archive(&archive, long, filter.as_deref()),
        EggCommands::Extract { archive, output } => extract_archive(&archive, &output),
        EggCommands::Pack { source, archive } => pack_directory(&source, &archive),
    }
}

fn list_archive(path: &str, long: bool, filter: Option<&str>) -> Result<()> {
    let pattern = Pattern::new(filter.unwrap_or("*"))
        .with_context(|| format!("Invalid filter pattern: {}", filter.unwrap_or("*")))?;

    let spinner = create_spinner("Opening egg...");
    let archive = EggArchive::open(path).context("Failed to open egg")?;
    spinner.finish_and_clear();

    let mut entries: Vec<&EntryInfo> = archive
        .entries()
        .iter()
        .filter(|e| pattern.matches(&e.name))
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    if entries.is_empty() {
        println!("No entries found matching pattern: {}", pattern.as_str());
        return Ok(());
    }

    if long {
        let mut table = create_table(vec!["Entry", "Size", "Compressed", "Ratio", "Modified", "Mode"]);
        for entry in entries {
            add_table_row(
                &mut table,
                vec![
                    entry.name.clone(),
                    format_bytes(entry.size),
                    format_bytes(entry.compressed_size),
                    format_compression_ratio(entry.size, entry.compressed_size),
                    format_entry_time(entry),
                    entry
                        .unix_mode
                        .map_or_else(|| "-".to_string(), |mode| format!("{:o}", mode & 0o7777)),
                ],
            );
        }
        table.printstd();
    } else {
        for entry in entries {
            println!("{}", entry.name);
        }
    }

    Ok(())
}

fn extract_archive(archive_path: &str, output_dir: &str) -> Result<()> {
    let output = Path::new(output_dir);
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory {output_dir}"))?;

    let spinner = create_spinner("Extracting egg...");
    let summary = egg_archive::extract(archive_path, output)
        .with_context(|| format!("Failed to extract {archive_path}"))?;
    spinner.finish_and_clear();

    println!(
        "Extracted {} files and {} directories ({}) to {}",
        summary.files,
        summary.directories,
        format_bytes(summary.bytes),
        output.display()
    );
    Ok(())
}

fn pack_directory(source_dir: &str, archive_path: &str) -> Result<()> {
    if !Path::new(source_dir).is_dir() {
        anyhow::bail!("Source is not a directory: {source_dir}");
    }

    let spinner = create_spinner("Packing egg...");
    let summary = egg_archive::repack(source_dir, archive_path)
        .with_context(|| format!("Failed to pack {source_dir}"))?;
    spinner.finish_and_clear();

    println!(
        "Packed {} files and {} directories into {} ({}, {} saved)",
        summary.files,
        summary.directories,
        archive_path,
        format_bytes(summary.archive_bytes),
        format_compression_ratio(summary.uncompressed_bytes, summary.archive_bytes)
    );
    Ok(())
}
