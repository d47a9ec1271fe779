use std::path::PathBuf;

use clap::Parser;
use gerber_image::{render, render_str, ComposeOptions, FileKind};

#[derive(Parser)]
#[command(name = "gerber-image", about = "Interpret Gerber/Excellon files into polygon JSON")]
struct Cli {
    /// Input file (.gbr, .gtl, .gbl, ..., .drl, .xln)
    input: PathBuf,

    /// Output JSON file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override auto-detected format (gerber, excellon)
    #[arg(short, long)]
    format: Option<String>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Merge overlapping fills into non-overlapping polygons
    #[arg(long)]
    union: bool,
}

fn parse_format(s: &str) -> Result<FileKind, String> {
    match s.to_lowercase().as_str() {
        "gerber" => Ok(FileKind::Gerber),
        "excellon" => Ok(FileKind::Excellon),
        _ => Err(format!("Unknown format: {s}. Use: gerber, excellon")),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let opts = ComposeOptions { union: cli.union };

    let result = if let Some(fmt_str) = &cli.format {
        let kind = match parse_format(fmt_str) {
            Ok(k) => k,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        };
        let text = match std::fs::read_to_string(&cli.input) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Error reading file: {e}");
                std::process::exit(1);
            }
        };
        render_str(&text, kind, &opts)
    } else {
        render(&cli.input, &opts)
    };

    let rendered = match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let json = if cli.pretty {
        serde_json::to_string_pretty(&rendered)
    } else {
        serde_json::to_string(&rendered)
    };
    let json = match json {
        Ok(j) => j,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Some(output_path) = cli.output {
        if let Err(e) = std::fs::write(&output_path, &json) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        eprintln!("Written to {}", output_path.display());
    } else {
        println!("{json}");
    }
}
