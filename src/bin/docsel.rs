//! docsel: select JSON documents with single-expression predicates
//!
//! # Usage
//!
//! ```bash
//! # Show the SQL for a query
//! docsel person --where "person.gender == Person.MALE" --dry-run
//!
//! # Execute it against a store
//! docsel person --what person.gramps_id --order-by -person.gramps_id \
//!     --database-url sqlite://family.db
//!
//! # Explain one expression
//! docsel explain "item.role == 1 and len(person.media_list) > 0"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use docsel::prelude::*;
use serde_json::Value as Json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docsel")]
#[command(version)]
#[command(about = "Compile Python-style predicates into SQL over JSON-document tables", long_about = None)]
#[command(after_help = "EXAMPLES:
    docsel person --where 'person.gender == Person.FEMALE'
    docsel person --what '[e.role for e in person.event_ref_list]' --dry-run
    docsel person --where 'family.father_handle == person.handle' --order-by -person.gramps_id
    docsel explain 'person.primary_name.first_name.startswith(\"J\")'")]
struct Cli {
    /// Table to select from
    table: Option<String>,

    /// Projection expression (repeat for several columns)
    #[arg(short, long)]
    what: Vec<String>,

    /// Predicate expression
    #[arg(short = 'W', long = "where")]
    where_: Option<String>,

    /// Predicate as a JSON instruction trace
    #[arg(long, conflicts_with = "where_")]
    where_trace: Option<PathBuf>,

    /// Ordering expression, "-" prefix for descending (repeatable)
    #[arg(short, long, allow_hyphen_values = true)]
    order_by: Vec<String>,

    /// Don't execute, just show the generated SQL
    #[arg(short, long)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Database connection URL
    #[arg(long, env = "DOCSEL_DATABASE_URL")]
    database_url: Option<String>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show rendering, trace, decompilation and SQL of one expression
    Explain {
        /// The expression to explain
        expr: String,

        /// Base table for the SQL fragment
        #[arg(short, long, default_value = "person")]
        table: String,

        /// Also dump the parsed tree as JSON
        #[arg(long)]
        json: bool,
    },
    /// List known tables and constants
    Names,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Explain { expr, table, json }) => load_config(&cli).map(|config| {
            explain(expr, table, *json, &config.compiler());
        }),
        Some(Commands::Names) => load_config(&cli).map(|config| show_names(&config)),
        None => match &cli.table {
            Some(table) => run_select(table, &cli).await,
            None => {
                println!("{}", "docsel".cyan().bold());
                println!();
                println!("Usage: docsel <TABLE> [--what EXPR]... [--where EXPR] [--order-by SPEC]...");
                println!();
                println!("Try: docsel --help");
                Ok(())
            }
        },
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "docsel=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("DOCSEL_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn build_request(table: &str, cli: &Cli) -> anyhow::Result<SelectRequest> {
    let mut request = SelectRequest::new(table);
    request = match cli.what.as_slice() {
        [] => request,
        [single] => request.what(single.as_str()),
        many => request.what_many(many.iter().map(String::as_str)),
    };
    if let Some(text) = &cli.where_ {
        request = request.filter(text.as_str());
    }
    if let Some(path) = &cli.where_trace {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        request = request.filter(Closure::from_json(&content)?);
    }
    for spec in &cli.order_by {
        request = request.order_by(spec.as_str());
    }
    Ok(request)
}

async fn run_select(table: &str, cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let compiler = config.compiler();
    let request = build_request(table, cli)?;
    let query = compiler.compile(&request)?;

    let database_url = cli.database_url.clone().or(config.database_url.clone());
    let Some(database_url) = database_url.filter(|_| !cli.dry_run) else {
        println!("{}", "Generated SQL:".green().bold());
        println!("{}", query.to_string().white());
        if !cli.dry_run {
            println!();
            println!(
                "{}",
                "⚠ No database URL. Use --database-url or set DOCSEL_DATABASE_URL".yellow()
            );
        }
        return Ok(());
    };

    if cli.verbose {
        println!("{} {}", "SQL:".dimmed(), query.to_string().white());
        println!("{} {}", "Connecting to:".dimmed(), database_url);
    }
    let store = Store::connect(&database_url).await?.with_compiler(compiler);
    let rows = store.fetch(&query).await?;
    format_output(&rows, &cli.format);
    Ok(())
}

fn format_output(rows: &[Json], format: &OutputFormat) {
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows).unwrap_or_default());
        }
        OutputFormat::Table => {
            let records: Vec<BTreeMap<String, String>> = rows.iter().map(to_record).collect();
            let columns: Vec<&String> = records[0].keys().collect();

            let mut widths: BTreeMap<&String, usize> =
                columns.iter().map(|c| (*c, c.len())).collect();
            for record in &records {
                for (col, val) in record {
                    if let Some(w) = widths.get_mut(col) {
                        *w = (*w).max(val.chars().count());
                    }
                }
            }

            let header: Vec<String> = columns
                .iter()
                .map(|c| format!("{:width$}", c, width = widths[*c]))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[*c])).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for record in &records {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        let val = record.get(*c).cloned().unwrap_or_default();
                        format!("{:width$}", val, width = widths[*c])
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rows.len().to_string().cyan());
        }
    }
}

/// Flatten one row: top-level document keys, or a single `value` column.
fn to_record(row: &Json) -> BTreeMap<String, String> {
    match row {
        Json::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), val_to_string(v)))
            .collect(),
        other => BTreeMap::from([("value".to_string(), val_to_string(other))]),
    }
}

fn val_to_string(val: &Json) -> String {
    match val {
        Json::Null => "NULL".to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.clone(),
        _ => val.to_string(),
    }
}

fn explain(expr: &str, table: &str, json: bool, compiler: &Compiler) {
    println!("{}", "docsel expression explanation".cyan().bold());
    println!();
    println!("{} {}", "Input:".dimmed(), expr.yellow());
    println!();

    let parsed = match docsel::parse(expr) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{} {}", "Parse Error:".red().bold(), e);
            return;
        }
    };
    println!("{}", "Canonical:".green().bold());
    println!("  {}", parsed.to_string().white());
    if json {
        println!();
        println!("{}", "Tree:".green().bold());
        println!("{}", serde_json::to_string_pretty(&parsed).unwrap_or_default());
    }

    println!();
    println!("{}", "Instruction trace:".green().bold());
    match Closure::compile(expr) {
        Ok(closure) => {
            for ins in &closure.instructions {
                println!(
                    "  {:>4} {:20} {}",
                    ins.offset.to_string().dimmed(),
                    ins.opname.name().cyan(),
                    ins.argrepr
                );
            }
            println!();
            println!("{}", "Decompiled:".green().bold());
            match decompile(&closure) {
                Ok(text) => println!("  {}", text.white()),
                Err(e) => println!("  {} {}", "✗".red(), e),
            }
        }
        Err(e) => println!("  {} {}", "(not lowerable)".yellow(), e),
    }

    println!();
    println!("{}", "SQL fragment:".green().bold());
    let body = match &parsed {
        Expr::Lambda { body, .. } => body.as_ref(),
        other => other,
    };
    match compiler.evaluator(table).compile(body) {
        Ok(sql) => println!("  {}", sql.white()),
        Err(e) => println!("  {} {}", "✗".red(), e),
    }
}

fn show_names(config: &Config) {
    println!("{}", "Tables".cyan().bold());
    for table in config.tables().iter() {
        println!("  {}", table.white());
    }

    println!();
    println!("{}", "Constants".cyan().bold());
    let env = config.environment();
    for (class, value) in env.iter() {
        if let DomainValue::Namespace { members, .. } = value {
            let names: Vec<String> = members
                .iter()
                .map(|(name, member)| match member {
                    DomainValue::Constant(lit) => format!("{}={}", name, lit),
                    DomainValue::Namespace { .. } => name.clone(),
                })
                .collect();
            println!("  {:16} {}", class.yellow(), names.join(", ").dimmed());
        }
    }
}
