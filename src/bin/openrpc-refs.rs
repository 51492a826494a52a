//! OpenRPC reference CLI
//!
//! Command-line interface for validating, dereferencing and embedding
//! multi-file OpenRPC specs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use openrpc_refs::{
    check_uniqueness_of, collect_spec_files, document_meta_schema, format_document,
    read_manifest_version, resolve_checked, resolve_document, validate_document, DerefOptions,
    DocumentLoader, EmbeddingResolver, ValidateError,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "openrpc-refs")]
#[command(about = "Resolve, check and embed references across OpenRPC spec files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a spec and validate it against a meta-schema
    Validate {
        /// Spec source: file path or URL (http:// or https://)
        spec: String,

        /// JSON manifest whose "version" field the spec must match
        #[arg(long, conflicts_with = "expected_version")]
        manifest: Option<PathBuf>,

        /// Version the spec's info.version must match
        #[arg(long)]
        expected_version: Option<String>,

        /// Meta-schema to validate against (built-in minimal schema if omitted)
        #[arg(long)]
        meta_schema: Option<String>,
    },

    /// Report component names defined in more than one spec file
    Uniqueness {
        /// Directory of spec files (*.json, not recursive)
        dir: PathBuf,

        /// File name to skip (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Replace embedding directives in a Markdown file with resolved values
    Embed {
        /// Markdown file containing directives
        markdown: PathBuf,

        /// Spec used by directives that name no file
        spec: String,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Emit the fully dereferenced form of a spec
    Deref {
        /// Spec source: file path or URL (http:// or https://)
        spec: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Fragment to keep as a reference placeholder (repeatable)
        #[arg(long)]
        seed: Vec<String>,

        /// Leave unresolvable references in place instead of failing
        #[arg(long)]
        skip_dangling: bool,
    },

    /// Rewrite a JSON file with two-space indentation
    Format {
        /// File to format in place
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate {
            spec,
            manifest,
            expected_version,
            meta_schema,
        } => run_validate(&spec, manifest, expected_version, meta_schema).await,

        Commands::Uniqueness { dir, exclude } => run_uniqueness(&dir, &exclude).await,

        Commands::Embed {
            markdown,
            spec,
            output,
        } => run_embed(&markdown, &spec, output).await,

        Commands::Deref {
            spec,
            pretty,
            output,
            seed,
            skip_dangling,
        } => {
            let options = seed
                .into_iter()
                .fold(DerefOptions::new().skip_dangling(skip_dangling), |o, s| {
                    o.seed(s)
                });
            run_deref(&spec, &options, output, pretty).await
        }

        Commands::Format { file } => run_format(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Logs go to stderr; stdout carries command output.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_validate(
    spec: &str,
    manifest: Option<PathBuf>,
    expected_version: Option<String>,
    meta_schema: Option<String>,
) -> Result<(), u8> {
    let expected = match manifest {
        Some(path) => Some(read_manifest_version(&path).map_err(report)?),
        None => expected_version,
    };

    let loader = DocumentLoader::auto();
    let doc = resolve_checked(&loader, spec, &DerefOptions::new(), expected.as_deref())
        .await
        .map_err(report)?;

    let meta = match meta_schema {
        Some(source) => loader
            .load(&source)
            .await
            .map(|m| (*m).clone())
            .map_err(|e| {
                eprintln!("Error loading meta-schema: {}", e);
                e.exit_code() as u8
            })?,
        None => document_meta_schema(),
    };

    validate_document(&meta, &doc).map_err(report)?;
    println!("Ok!");
    Ok(())
}

fn report(e: ValidateError) -> u8 {
    match &e {
        ValidateError::Invalid { errors } => {
            eprintln!("Validation failed:");
            for error in errors {
                eprintln!("  {}", error);
            }
        }
        _ => eprintln!("Error: {}", e),
    }
    e.exit_code() as u8
}

async fn run_uniqueness(dir: &Path, exclude: &[String]) -> Result<(), u8> {
    let files = collect_spec_files(dir, exclude).map_err(|e| {
        eprintln!("Error reading {}: {}", dir.display(), e);
        3u8
    })?;
    let ids: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();

    let loader = DocumentLoader::auto();
    let report = check_uniqueness_of(&loader, &ids).await;

    for dup in &report.duplicates {
        eprintln!("{}", dup);
    }
    for (id, e) in &report.failures {
        eprintln!("Error: {}: {}", id, e);
    }

    if report.is_ok() {
        println!("No duplicate component definitions!");
        Ok(())
    } else {
        Err(report.problem_count().min(u8::MAX as usize) as u8)
    }
}

async fn run_embed(markdown: &Path, spec: &str, output: Option<PathBuf>) -> Result<(), u8> {
    let text = tokio::fs::read_to_string(markdown).await.map_err(|e| {
        eprintln!("Error reading {}: {}", markdown.display(), e);
        3u8
    })?;

    let resolver = EmbeddingResolver::new(DocumentLoader::auto());
    let outcome = resolver.resolve_embeddings(&text, spec).await;

    for (directive, e) in &outcome.failures {
        eprintln!("Error: {}: {}", directive.raw_text, e);
    }
    write_output(&outcome.text, output, false)?;

    if outcome.is_ok() {
        Ok(())
    } else {
        Err(1)
    }
}

async fn run_deref(
    spec: &str,
    options: &DerefOptions,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let loader = DocumentLoader::auto();
    let doc = resolve_document(&loader, spec, options)
        .await
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;

    let json_output = if pretty {
        serde_json::to_string_pretty(&doc)
    } else {
        serde_json::to_string(&doc)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    write_output(&json_output, output, true)
}

fn run_format(file: &Path) -> Result<(), u8> {
    let id = file.display().to_string();
    let content = std::fs::read_to_string(file).map_err(|e| {
        eprintln!("Error reading {}: {}", id, e);
        3u8
    })?;
    let formatted = format_document(&id, &content).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    std::fs::write(file, formatted).map_err(|e| {
        eprintln!("Error writing to {}: {}", id, e);
        3u8
    })?;
    println!("{} formatted", id);
    Ok(())
}

fn write_output(content: &str, output: Option<PathBuf>, newline: bool) -> Result<(), u8> {
    match output {
        Some(path) => {
            std::fs::write(&path, content).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None if newline => println!("{}", content),
        None => print!("{}", content),
    }
    Ok(())
}
