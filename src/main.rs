use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokensheet::cli;
use tokensheet::error::ConvertResult;
use tokensheet::types::{ConvertOptions, OutputConfig};

#[derive(Parser)]
#[command(name = "tokensheet")]
#[command(about = "Convert Excel workbooks into token-efficient JSON for LLMs")]
#[command(long_about = "tokensheet - Excel workbooks as LLM-ready JSON

Captures cells, formulas (with dependency lists), named ranges, tables and
pivot tables into a compact JSON schema. Abbreviated keys and minified output
are on by default to keep token counts low; the key map is embedded in the
document so consumers can expand it.

COMMANDS:
  convert  - Convert one workbook
  batch    - Convert every workbook under the given paths
  combine  - Merge several workbooks into one document

EXAMPLES:
  tokensheet convert model.xlsx                  # everything, minified
  tokensheet convert model.xlsx 100              # first 100 data rows/sheet
  tokensheet convert model.xlsx --formulas-only  # formula cells only
  tokensheet convert model.xlsx --full-names --no-minify   # readable output
  tokensheet batch reports/ --formulas-only
  tokensheet combine q1.xlsx q2.xlsx q3.xlsx")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Convert one Excel workbook (.xlsx/.xlsm) to JSON.

The output lands in the output directory, named from the source file, the
token count, and the conversion timestamp:

  budget_efficient_1234tokens_20250101_120000.json

Cells carry values, formulas with cached results, and per-formula dependency
lists. Row limiting keeps the header row plus the first N data rows of each
sheet; formula references beyond the limit are still recorded.")]
    /// Convert one workbook to JSON
    Convert {
        /// Path to the workbook (.xlsx or .xlsm)
        file: PathBuf,

        /// Keep at most this many data rows per sheet (header always kept)
        row_limit: Option<usize>,

        /// Only include cells that carry a formula
        #[arg(long)]
        formulas_only: bool,

        /// Include non-default cell formatting (uses more tokens)
        #[arg(long)]
        keep_formatting: bool,

        /// Pretty-print instead of minifying
        #[arg(long)]
        no_minify: bool,

        /// Skip the enriched-context block (column types, formula patterns,
        /// tables, pivot tables)
        #[arg(long)]
        no_context: bool,

        /// Use full property names instead of abbreviated ones
        #[arg(long)]
        full_names: bool,

        /// Output directory for the JSON file
        #[arg(short, long, default_value = "converted_json")]
        output_dir: PathBuf,

        /// Show verbose conversion steps
        #[arg(short, long)]
        verbose: bool,
    },

    #[command(long_about = "Convert every workbook found under the given paths.

Paths may be files or directories (searched recursively); Excel lock files
(~$...) are skipped. Workbooks are processed one at a time and a summary with
the average token count is printed at the end. A workbook that fails to
convert is reported and skipped; the batch continues.")]
    /// Convert every workbook under the given paths
    Batch {
        /// Workbook files and/or directories to search
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Keep at most this many data rows per sheet (header always kept)
        #[arg(short, long)]
        rows: Option<usize>,

        /// Only include cells that carry a formula
        #[arg(long)]
        formulas_only: bool,

        /// Include non-default cell formatting (uses more tokens)
        #[arg(long)]
        keep_formatting: bool,

        /// Pretty-print instead of minifying
        #[arg(long)]
        no_minify: bool,

        /// Skip the enriched-context block
        #[arg(long)]
        no_context: bool,

        /// Use full property names instead of abbreviated ones
        #[arg(long)]
        full_names: bool,

        /// Output directory for the JSON files
        #[arg(short, long, default_value = "converted_json")]
        output_dir: PathBuf,

        /// Show verbose conversion steps
        #[arg(short, long)]
        verbose: bool,
    },

    #[command(long_about = "Merge several workbooks into one consolidated document.

Each workbook is converted and stored under a short stable id. Formulas
using cross-workbook references ([Budget.xlsx]Sheet1!A1) are scanned and the
references are resolved to the combined ids under cross_references, so a
model reading the document can follow links between the workbooks.")]
    /// Merge several workbooks into one document
    Combine {
        /// Workbook files and/or directories to combine (at least two
        /// workbooks)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Keep at most this many data rows per sheet (header always kept)
        #[arg(short, long)]
        rows: Option<usize>,

        /// Only include cells that carry a formula
        #[arg(long)]
        formulas_only: bool,

        /// Pretty-print instead of minifying
        #[arg(long)]
        no_minify: bool,

        /// Skip the enriched-context blocks
        #[arg(long)]
        no_context: bool,

        /// Use full property names instead of abbreviated ones
        #[arg(long)]
        full_names: bool,

        /// Output directory for the combined JSON file
        #[arg(short, long, default_value = "converted_json")]
        output_dir: PathBuf,

        /// Show verbose conversion steps
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> ConvertResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            file,
            row_limit,
            formulas_only,
            keep_formatting,
            no_minify,
            no_context,
            full_names,
            output_dir,
            verbose,
        } => {
            let options = ConvertOptions {
                row_limit,
                formulas_only,
                keep_formatting,
                minify: !no_minify,
                enrich: !no_context,
                abbreviate: !full_names,
            };
            cli::convert(file, options, OutputConfig { dir: output_dir }, verbose)
        }

        Commands::Batch {
            paths,
            rows,
            formulas_only,
            keep_formatting,
            no_minify,
            no_context,
            full_names,
            output_dir,
            verbose,
        } => {
            let options = ConvertOptions {
                row_limit: rows,
                formulas_only,
                keep_formatting,
                minify: !no_minify,
                enrich: !no_context,
                abbreviate: !full_names,
            };
            cli::batch(paths, options, OutputConfig { dir: output_dir }, verbose)
        }

        Commands::Combine {
            paths,
            rows,
            formulas_only,
            no_minify,
            no_context,
            full_names,
            output_dir,
            verbose,
        } => {
            let options = ConvertOptions {
                row_limit: rows,
                formulas_only,
                keep_formatting: false,
                minify: !no_minify,
                enrich: !no_context,
                abbreviate: !full_names,
            };
            cli::combine(paths, options, OutputConfig { dir: output_dir }, verbose)
        }
    }
}
