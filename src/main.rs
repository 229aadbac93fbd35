//! flatdb interactive shell
//!
//! Runs SQL against an in-memory table store. Statements end with `;` and
//! may span several lines.
//!
//! Usage: flatdb-shell [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Engine configuration (TOML)
//!   -s, --script <FILE>     Run a script and exit
//!       --log-level <LEVEL> Log filter when RUST_LOG is unset (default: flatdb=info)

use clap::Parser;
use colored::Colorize;
use flatdb::{
    Engine, EngineConfig, MemoryStorage, QueryOutput, ResultSet, Storage,
};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "flatdb-shell")]
#[command(about = "Interactive SQL shell for flatdb", long_about = None)]
struct Args {
    /// Engine configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Execute the statements in this file and exit
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "flatdb=info")]
    log_level: String,
}

const KEYWORDS: &[&str] = &[
    "SELECT", "DISTINCT", "FROM", "WHERE", "GROUP BY", "HAVING", "ORDER BY", "LIMIT", "OFFSET",
    "INSERT INTO", "VALUES", "UPDATE", "SET", "DELETE FROM", "CREATE TABLE", "DROP TABLE",
    "IF NOT EXISTS", "IF EXISTS", "PRIMARY KEY", "NOT NULL", "DEFAULT", "CHECK", "UNIQUE",
    "AUTO_INCREMENT", "JOIN", "INNER JOIN", "LEFT JOIN", "RIGHT JOIN", "FULL JOIN",
    "CROSS JOIN", "NATURAL JOIN", "ON", "USING", "UNION", "INTERSECT", "EXCEPT", "ALL", "AS",
    "AND", "OR", "NOT", "IN", "BETWEEN", "LIKE", "REGEXP", "IS NULL", "IS NOT NULL", "CASE",
    "WHEN", "THEN", "ELSE", "END", "COUNT", "SUM", "AVG", "MIN", "MAX", "COALESCE", "CONCAT",
    "UPPER", "LOWER", "LENGTH", "SUBSTRING", "ROUND", "CAST",
];

struct ShellHelper {
    completions: Vec<String>,
}

impl ShellHelper {
    fn new() -> Self {
        Self {
            completions: KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn add_tables(&mut self, names: Vec<String>) {
        for name in names {
            if !self.completions.contains(&name) {
                self.completions.push(name);
            }
        }
    }
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> Result<(usize, Vec<Pair>), ReadlineError> {
        let start = line[..pos]
            .rfind(|c: char| c.is_whitespace() || c == '(' || c == ',')
            .map(|i| i + 1)
            .unwrap_or(0);
        let word = line[start..pos].to_ascii_uppercase();

        let matches = self
            .completions
            .iter()
            .filter(|c| !word.is_empty() && c.to_ascii_uppercase().starts_with(&word))
            .map(|c| Pair {
                display: c.clone(),
                replacement: c.clone(),
            })
            .collect();
        Ok((start, matches))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        if pos < line.len() {
            return None;
        }
        let start = line
            .rfind(|c: char| c.is_whitespace() || c == '(' || c == ',')
            .map(|i| i + 1)
            .unwrap_or(0);
        let word = &line[start..];
        if word.len() < 2 {
            return None;
        }
        self.completions
            .iter()
            .find(|c| c.len() > word.len() && c.starts_with(word))
            .map(|c| c[word.len()..].to_string())
    }
}

impl Highlighter for ShellHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(hint.truecolor(100, 100, 100).to_string())
    }
}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}

fn print_banner() {
    println!(
        "  {} {}",
        "flatdb shell".white().bold(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
    println!(
        "  End statements with {}. Type {} for help, {} to quit\n",
        ";".yellow(),
        ".help".yellow(),
        ".exit".yellow()
    );
}

fn print_help() {
    println!("\n{}", "Commands:".white().bold());
    println!("  {}           Show this help", ".help".yellow());
    println!("  {}           Exit the shell", ".exit".yellow());
    println!("  {}         List tables", ".tables".yellow());
    println!("  {} <name>  Show a table's columns", ".schema".yellow());
    println!("  {}         Show the error log", ".errors".yellow());
    println!("  {} <file>    Run statements from a file", ".read".yellow());

    println!("\n{}", "Examples:".white().bold());
    println!(
        "  {}",
        "CREATE TABLE users (id INT PRIMARY KEY AUTO_INCREMENT, name TEXT NOT NULL);".green()
    );
    println!("  {}", "INSERT INTO users (name) VALUES ('Alice'), ('Bob');".green());
    println!(
        "  {}",
        "SELECT name, COUNT(*) FROM users GROUP BY name ORDER BY 2 DESC;".green()
    );
    println!();
}

fn format_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_result_set(rs: &ResultSet) {
    let cells: Vec<Vec<String>> = rs
        .rows
        .iter()
        .map(|row| row.iter().map(format_cell).collect())
        .collect();
    let mut widths: Vec<usize> = rs.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let separator = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let header = rs
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!(" {:<w$} ", c, w = *w).cyan().bold().to_string())
        .collect::<Vec<_>>()
        .join("|");
    println!("{}", header);
    println!("{}", separator.dimmed());
    for (row, raw) in cells.iter().zip(&rs.rows) {
        let line = row
            .iter()
            .zip(raw)
            .zip(&widths)
            .map(|((cell, value), w)| {
                let padded = format!(" {:<w$} ", cell, w = *w);
                if value.is_null() {
                    padded.dimmed().to_string()
                } else {
                    padded
                }
            })
            .collect::<Vec<_>>()
            .join("|");
        println!("{}", line);
    }
}

fn print_output(output: &QueryOutput) {
    match output {
        QueryOutput::Rows(rs) => {
            print_result_set(rs);
            println!("{}", format!("({} rows)", rs.len()).dimmed());
        }
        QueryOutput::Affected(n) => println!("{}", format!("{} rows affected", n).dimmed()),
        QueryOutput::Done => println!("{}", "OK".dimmed()),
    }
}

fn run_script(engine: &Engine<MemoryStorage>, path: &PathBuf) -> anyhow::Result<()> {
    let script = std::fs::read_to_string(path)?;
    let outputs = engine.execute_batch(&script)?;
    for output in &outputs {
        print_output(output);
    }
    Ok(())
}

fn print_schema(engine: &Engine<MemoryStorage>, table: &str) {
    match engine.storage().get_schema(table) {
        Ok(schema) => {
            for column in &schema.columns {
                let mut notes = Vec::new();
                if column.key != flatdb::storage::KeyRole::None {
                    notes.push(format!("{:?}", column.key).to_uppercase());
                }
                if !column.nullable {
                    notes.push("NOT NULL".to_string());
                }
                if column.auto_increment {
                    notes.push("AUTO_INCREMENT".to_string());
                }
                if let Some(default) = &column.default {
                    notes.push(format!("DEFAULT {}", default));
                }
                println!(
                    "  {} {} {}",
                    column.name.cyan(),
                    column.data_type.name().yellow(),
                    notes.join(" ").dimmed()
                );
            }
            for check in &schema.checks {
                println!("  {} ({})", "CHECK".yellow(), check);
            }
        }
        Err(e) => println!("{} {}", "Error:".red().bold(), e),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env(),
    };
    tracing::debug!("Engine configuration: {:?}", config);
    let engine = Engine::with_config(MemoryStorage::new(), config);

    if let Some(path) = &args.script {
        return run_script(&engine, path);
    }

    print_banner();

    let mut rl: Editor<ShellHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(ShellHelper::new()));

    let history_file = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".flatdb_history"))
        .unwrap_or_else(|_| PathBuf::from(".flatdb_history"));
    let _ = rl.load_history(&history_file);

    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() {
            format!("{}{} ", "flatdb".cyan(), ">".white())
        } else {
            format!("{} ", "   ...".dimmed())
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();

                if buffer.is_empty() && line.starts_with('.') {
                    let _ = rl.add_history_entry(line);
                    let parts: Vec<&str> = line.splitn(2, ' ').collect();
                    let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");
                    match parts[0] {
                        ".exit" | ".quit" | ".q" => break,
                        ".help" | ".h" | ".?" => print_help(),
                        ".tables" => {
                            for name in engine.storage().table_names() {
                                println!("  {}", name.cyan());
                            }
                        }
                        ".schema" if !arg.is_empty() => print_schema(&engine, arg),
                        ".schema" => println!("  {}", "Usage: .schema <table>".yellow()),
                        ".errors" => {
                            for (i, err) in engine.errors().iter().enumerate() {
                                println!("  {} [{:?}] {}", i + 1, err.category(), err);
                            }
                        }
                        ".read" if !arg.is_empty() => {
                            if let Err(e) = run_script(&engine, &PathBuf::from(arg)) {
                                println!("{} {}", "Error:".red().bold(), e);
                            }
                        }
                        ".read" => println!("  {}", "Usage: .read <file>".yellow()),
                        other => {
                            println!("  {} {}", "Unknown command:".red(), other);
                            println!("  Type {} for help", ".help".yellow());
                        }
                    }
                    continue;
                }

                if line.is_empty() {
                    continue;
                }
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(line);
                if !line.ends_with(';') {
                    continue;
                }

                let sql = std::mem::take(&mut buffer);
                let _ = rl.add_history_entry(sql.as_str());

                let started = Instant::now();
                match engine.execute(&sql) {
                    Ok(output) => {
                        print_output(&output);
                        if let Some(helper) = rl.helper_mut() {
                            helper.add_tables(engine.storage().table_names());
                        }
                    }
                    Err(e) => println!("{} {}", "Error:".red().bold(), e),
                }
                println!(
                    "{}",
                    format!("  ({:.2}ms)", started.elapsed().as_secs_f64() * 1000.0).dimmed()
                );
            }
            Err(ReadlineError::Interrupted) => {
                if buffer.is_empty() {
                    println!("{}", "Type .exit to quit".dimmed());
                } else {
                    println!("{}", "Cancelled".dimmed());
                    buffer.clear();
                }
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("{} {:?}", "Error:".red(), err);
                break;
            }
        }
    }

    println!("{}", "Goodbye!".dimmed());
    let _ = rl.save_history(&history_file);
    Ok(())
}
