//! # zlib-sarc
//!
//! Command-line front end for zlib-wrapped SARC archives.
//!
//! ```text
//! zlib-sarc extract   example.zlib -o ./output_directory
//! zlib-sarc construct ./example/anim/* ./example/blyt/* -o example.zlib
//! zlib-sarc construct ./work/*/* -l original.zlib -o patched.zlib
//! zlib-sarc list      example.zlib
//! zlib-sarc raw       example.zlib -o example.sarc
//! ```
//!
//! Input archives may be zlib-wrapped or raw SARC. Logging goes to stderr
//! and honours `RUST_LOG`; `-v` raises the default level to `debug`.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zlib_sarc::{
    is_glob_pattern, normalize_path, reconcile, zlib, NameLocator, Sarc, SarcWriter,
    DEFAULT_HASH_KEY,
};

#[derive(Parser)]
#[command(name = "zlib-sarc", version, about = "A tool for ZLIB-SARC (.zlib) archives")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Layout of the name locator in FAT entries
    #[arg(long, global = true, value_enum, env = "ZLIB_SARC_LOCATOR", default_value_t = Locator::Split)]
    locator: Locator,
}

#[derive(Copy, Clone, ValueEnum)]
enum Locator {
    /// 16-bit name offset followed by a 16-bit flag
    Split,
    /// Single 32-bit attribute word
    Attributes,
}

impl From<Locator> for NameLocator {
    fn from(locator: Locator) -> Self {
        match locator {
            Locator::Split => NameLocator::Split16,
            Locator::Attributes => NameLocator::Attributes32,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Extracts the contents of an archive
    Extract {
        input: PathBuf,
        /// Output directory
        #[arg(short)]
        output: PathBuf,
    },
    /// Constructs an archive from individual files
    Construct {
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Output archive
        #[arg(short)]
        output: PathBuf,
        /// Replicate the structure of this archive
        #[arg(short = 'l')]
        like: Option<PathBuf>,
        /// Name hash multiplier for new archives [default: 0x65]
        #[arg(long, env = "ZLIB_SARC_HASH_KEY", value_parser = parse_u32)]
        hash_key: Option<u32>,
    },
    /// Lists the contents of an archive
    List {
        input: PathBuf,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Exports the raw SARC archive from a wrapped archive
    Raw {
        input: PathBuf,
        /// Output file
        #[arg(short)]
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct ListEntry<'a> {
    index: usize,
    name: Option<&'a str>,
    hash: u32,
    size: usize,
}

fn parse_u32(value: &str) -> Result<u32, std::num::ParseIntError> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    }
}

/// Reads an archive and unwraps it unless it already is a raw SARC.
fn read_archive(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if Sarc::is_sarc(&data) {
        return Ok(data);
    }
    zlib::decompress(&data).with_context(|| format!("Failed to decompress {}", path.display()))
}

/// Expands glob patterns the shell left alone. Patterns matching nothing are
/// kept verbatim.
fn expand_inputs(inputs: &[String]) -> Result<Vec<String>> {
    let mut expanded = Vec::with_capacity(inputs.len());
    for input in inputs {
        if !is_glob_pattern(input) {
            expanded.push(input.clone());
            continue;
        }
        let before = expanded.len();
        for path in glob::glob(input).with_context(|| format!("Invalid pattern {}", input))? {
            let path = path?;
            if path.is_file() {
                expanded.push(path.to_string_lossy().into_owned());
            }
        }
        if expanded.len() == before {
            expanded.push(input.clone());
        }
    }
    Ok(expanded)
}

fn extract(input: &Path, output: &Path, locator: NameLocator) -> Result<()> {
    let data = read_archive(input)?;
    let sarc = Sarc::new(data, locator)?;
    for index in 0..sarc.file_count() as usize {
        let name = sarc
            .name_at(index)?
            .with_context(|| format!("Name of file no. {} could not be found", index + 1))?;
        let data = sarc
            .data_at(index)
            .with_context(|| format!("File no. {} could not be found", index + 1))?;
        let relative = Path::new(name);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("Refusing to extract {} outside the output directory", name);
        }

        let path = output.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        info!("Writing file no. {} ({})", index + 1, name);
        fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

fn construct(
    inputs: &[String],
    output: &Path,
    like: Option<&Path>,
    hash_key: Option<u32>,
    locator: NameLocator,
) -> Result<()> {
    let inputs = expand_inputs(inputs)?;
    let load = |path: &str| fs::read(path);

    let writer = match like {
        Some(like) => {
            if let Some(key) = hash_key {
                warn!(
                    "--hash-key {:#x} is ignored, the key of {} is used",
                    key,
                    like.display()
                );
            }
            let reference = read_archive(like)?;
            let sarc = Sarc::new(&reference[..], locator)?;
            info!("Matching {} inputs against {}", inputs.len(), like.display());
            let mut writer = SarcWriter::like(&sarc);
            for entry in reconcile(&sarc, &inputs[..], load)? {
                writer.add_entry(entry);
            }
            writer
        }
        None => {
            let mut writer = SarcWriter::default();
            writer.set_locator(locator);
            writer.set_hash_multiplier(hash_key.unwrap_or(DEFAULT_HASH_KEY));
            for input in &inputs {
                if is_glob_pattern(input) {
                    warn!("Pattern {} matched no files", input);
                    continue;
                }
                let name = normalize_path(input);
                info!("Read & copy {} as {}", input, name);
                let data = load(input.as_str())
                    .with_context(|| format!("Failed to read {}", input))?;
                writer.add_file(name, data);
            }
            writer
        }
    };

    let sarc = writer.write_to_bytes()?;
    let wrapped = zlib::compress(&sarc)?;
    info!(
        "Writing {} entries to {}",
        writer.entries().len(),
        output.display()
    );
    fs::write(output, wrapped).with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}

fn list(input: &Path, json: bool, locator: NameLocator) -> Result<()> {
    let data = read_archive(input)?;
    let sarc = Sarc::new(data, locator)?;
    let mut entries = Vec::with_capacity(sarc.file_count() as usize);
    for (index, node) in sarc.nodes().iter().enumerate() {
        entries.push(ListEntry {
            index,
            name: sarc.name_at(index)?,
            hash: node.hash,
            size: node.len(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{:03}. {} (size: {})",
            entry.index + 1,
            entry.name.unwrap_or("<unnamed>"),
            entry.size
        );
    }
    Ok(())
}

fn raw(input: &Path, output: &Path) -> Result<()> {
    let data = read_archive(input)?;
    fs::write(output, data).with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose > 0 { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let locator = NameLocator::from(cli.locator);
    match &cli.command {
        Command::Extract { input, output } => extract(input, output, locator),
        Command::Construct {
            inputs,
            output,
            like,
            hash_key,
        } => construct(inputs, output, like.as_deref(), *hash_key, locator),
        Command::List { input, json } => list(input, *json, locator),
        Command::Raw { input, output } => raw(input, output),
    }
}
