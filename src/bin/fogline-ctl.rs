//! `fogline-ctl`: command-line client for a running `foglined`'s local
//! HTTP API.

use clap::{Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fogline-ctl", about = "Talk to a local foglined instance")]
struct Cli {
    /// Base URL of the local API, e.g. `http://127.0.0.1:8080`.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the daemon's liveness probe.
    Health,
    /// Fetch a workload's configuration blob.
    ConfigGet {
        /// The workload's uuid.
        workload_uuid: Uuid,
    },
    /// Publish a message on behalf of a workload.
    Send {
        /// The publishing workload's uuid.
        workload_uuid: Uuid,
        /// Freeform routing tag.
        tag: String,
        /// Message body, sent as UTF-8 bytes.
        body: String,
    },
    /// Pull pending messages for a workload.
    Next {
        /// The receiving workload's uuid.
        workload_uuid: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Health => {
            let response = client.get(format!("{}/health", cli.url)).send().await?;
            println!("{}", response.text().await?);
        }
        Command::ConfigGet { workload_uuid } => {
            let response = client
                .post(format!("{}/v2/config/get", cli.url))
                .json(&json!({ "workload_uuid": workload_uuid }))
                .send()
                .await?;
            println!("{}", response.text().await?);
        }
        Command::Send {
            workload_uuid,
            tag,
            body,
        } => {
            let response = client
                .post(format!("{}/v2/messages/new", cli.url))
                .json(&json!({
                    "workload_uuid": workload_uuid,
                    "tag": tag,
                    "content_type": null,
                    "content": body.into_bytes(),
                }))
                .send()
                .await?;
            println!("status: {}", response.status());
        }
        Command::Next { workload_uuid } => {
            let response = client
                .get(format!("{}/v2/messages/next", cli.url))
                .query(&[("workload_uuid", workload_uuid.to_string())])
                .send()
                .await?;
            println!("{}", response.text().await?);
        }
    }

    Ok(())
}
