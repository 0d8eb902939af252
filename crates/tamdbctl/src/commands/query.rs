//! Query command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tamdb_client::{split_name_key, QueryReply, TamClient};

use crate::OutputFormat;

#[derive(Serialize)]
struct QueryOutput<'a> {
    database: &'a str,
    table: &'a str,
    field: &'a str,
    timestamps: Vec<i64>,
    means: Vec<i64>,
    total: usize,
}

pub async fn run(address: &str, database: &str, series: &str, format: OutputFormat) -> Result<()> {
    let (table, field) = split_name_key(series);

    let mut client = TamClient::connect(address)
        .await
        .context("failed to connect to server")?;

    let reply = client
        .query(database, table, field)
        .await
        .with_context(|| format!("query {database} {table}:{field} failed"))?;
    client.close().await?;

    match format {
        OutputFormat::Text => print!("{}", render_text(&reply)),
        OutputFormat::Json => {
            let output = QueryOutput {
                database,
                table,
                field,
                total: reply.len(),
                timestamps: reply.timestamps,
                means: reply.means,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn render_text(reply: &QueryReply) -> String {
    if reply.is_empty() {
        return "No data found.\n".to_string();
    }

    let mut out = format!("{:<20} {:>20}\n{}\n", "TIME", "MEAN", "-".repeat(41));
    for (time, mean) in reply.points() {
        out.push_str(&format!("{time:<20} {mean:>20}\n"));
    }
    out.push_str(&format!("\nTotal: {} bucket(s)\n", reply.len()));
    out
}
