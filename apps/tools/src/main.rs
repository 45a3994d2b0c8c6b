use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use server_api::{
    advance_counter, parse_counter_range, parse_node_id, read_counter, read_text, remove_node,
    write_counter, write_text, ApiContext, DEFAULT_MAX_TEXT_BYTES,
};
use shared::{
    domain::{CounterMode, StateKey},
    error::ApiError,
};
use storage::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "statectl", about = "Inspect and edit node state")]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/nodesync.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Get {
        node_id: String,
        #[arg(long, default_value = "counter")]
        key: StateKey,
    },
    /// Counter values outside the valid range are clamped.
    SetCounter {
        node_id: String,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    SetText {
        node_id: String,
        text: String,
    },
    Advance {
        node_id: String,
        #[arg(long, default_value = "increment")]
        mode: CounterMode,
        #[arg(long, requires = "max")]
        min: Option<i64>,
        #[arg(long, requires = "min")]
        max: Option<i64>,
    },
    /// Lists every stored entry of a node.
    List {
        node_id: String,
    },
    Remove {
        node_id: String,
    },
}

fn api_error(err: ApiError) -> anyhow::Error {
    anyhow!("{:?}: {}", err.code, err.message)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    let ctx = ApiContext::new(storage, DEFAULT_MAX_TEXT_BYTES);

    match cli.command {
        Command::Get { node_id, key } => {
            let node_id = parse_node_id(Some(&node_id)).map_err(api_error)?;
            match key {
                StateKey::Counter => {
                    let counter = read_counter(&ctx, &node_id).await.map_err(api_error)?;
                    println!("{node_id} counter={} version={}", counter.value, counter.version);
                }
                StateKey::CacheText => {
                    let text = read_text(&ctx, &node_id).await.map_err(api_error)?;
                    println!("{node_id} cache_text={:?} version={}", text.text, text.version);
                }
            }
        }
        Command::SetCounter { node_id, value } => {
            let node_id = parse_node_id(Some(&node_id)).map_err(api_error)?;
            let outcome = write_counter(&ctx, &node_id, value)
                .await
                .map_err(api_error)?;
            println!("{node_id} counter written version={}", outcome.response.version);
        }
        Command::SetText { node_id, text } => {
            let node_id = parse_node_id(Some(&node_id)).map_err(api_error)?;
            let outcome = write_text(&ctx, &node_id, text)
                .await
                .map_err(api_error)?;
            println!("{node_id} cache_text written version={}", outcome.response.version);
        }
        Command::Advance {
            node_id,
            mode,
            min,
            max,
        } => {
            let node_id = parse_node_id(Some(&node_id)).map_err(api_error)?;
            let range = parse_counter_range(min, max).map_err(api_error)?;
            let outcome = advance_counter(&ctx, &node_id, mode, range)
                .await
                .map_err(api_error)?;
            println!(
                "{node_id} counter={} version={}",
                outcome.response.value, outcome.response.version
            );
        }
        Command::List { node_id } => {
            let node_id = parse_node_id(Some(&node_id)).map_err(api_error)?;
            for stored in ctx.storage.list_node_entries(&node_id).await? {
                println!(
                    "{} {}={:?} version={} updated_at={}",
                    stored.entry.node_id,
                    stored.entry.state_key,
                    stored.entry.value,
                    stored.entry.version,
                    stored.updated_at.to_rfc3339()
                );
            }
        }
        Command::Remove { node_id } => {
            let node_id = parse_node_id(Some(&node_id)).map_err(api_error)?;
            let removed = remove_node(&ctx, &node_id).await.map_err(api_error)?;
            println!("{node_id} removed {} entries", removed.response.removed);
        }
    }

    Ok(())
}
