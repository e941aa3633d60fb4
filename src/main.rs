use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use log::{error, info};
use rosterload::admin::{self, TableReport};
use rosterload::*;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Some(command) = &cli.command else {
        if let Err(e) = Cli::command().print_help() {
            error!("failed to print help: {e}");
        }
        return ExitCode::FAILURE;
    };

    match run(&cli, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, command: &Command) -> Result<()> {
    let loader = Loader::new(cli.database_url()?)?;
    let table = cli.table.as_str();

    match command {
        Command::Load(args) => {
            let schema = args.field_schema().await?;
            let records = JsonFileSource::new(&args.source).read_records().await?;

            let mut loader = loader.with_layout(args.layout());
            if let Some(filter) = args.filter() {
                loader = loader.with_filter(filter);
            }

            if args.replace {
                admin::drop_table(&loader, table).await?;
            }
            loader.create_table(&schema, table).await?;
            loader.load_records(&records, &schema, table).await?;

            let count = admin::count_rows(&loader, table).await?;
            info!("{table} now contains {count} row(s)");
        }
        Command::Verify { group_by } => {
            match admin::describe_table(&loader, table, group_by.as_deref()).await? {
                Some(report) => print_report(table, &report),
                None => println!("Table '{table}' does not exist"),
            }
        }
        Command::CreateDb => {
            admin::ensure_database(&loader).await?;
        }
        Command::Check => {
            let report = admin::check_connection(&loader, table).await?;
            println!("Connected: {}", report.server_version);
            if report.table_exists {
                println!("The '{table}' table already exists in the database.");
            } else {
                println!("The '{table}' table does not yet exist in the database.");
            }
        }
    }
    Ok(())
}

fn print_report(table: &str, report: &TableReport) {
    println!("=== Columns in {table} ===");
    println!("{:22} | {:27} | {:15} | Nullable", "Column Name", "Data Type", "Default");
    println!("{}", "-".repeat(80));
    for col in &report.columns {
        let default: String = col.default.as_deref().unwrap_or("").chars().take(15).collect();
        let nullable = if col.nullable { "YES" } else { "NO" };
        println!("{:22} | {:27} | {:15} | {}", col.name, col.data_type, default, nullable);
    }

    println!("\n=== Primary Key ===");
    match &report.primary_key {
        Some(pk) => println!("{} ({})", pk.constraint, pk.columns.join(", ")),
        None => println!("No primary key defined"),
    }

    println!("\n=== Rows ===");
    println!("{}", report.row_count);

    if !report.groups.is_empty() {
        println!("\n=== Largest groups ===");
        for (value, count) in &report.groups {
            println!("{}: {}", value.as_deref().unwrap_or("NULL"), count);
        }
    }
}
