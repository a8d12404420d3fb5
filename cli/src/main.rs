mod coordinator_client;
mod demo;

use clap::{Parser, Subcommand};
use coordinator_client::CoordinatorClient;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "clipwire", about = "Control CLI for the clipwire relay suite")]
struct Cli {
    /// Base URL of the coordinator's HTTP front door
    #[arg(long, default_value = "http://127.0.0.1:5555")]
    coordinator_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show coordinator status and relay statistics
    Status,
    /// Pin the click target(s) the coordinator uses
    Calibrate {
        #[arg(long)]
        x: Option<i32>,
        #[arg(long)]
        y: Option<i32>,
        #[arg(long)]
        read_x: Option<i32>,
        #[arg(long)]
        read_y: Option<i32>,
        #[arg(long)]
        write_x: Option<i32>,
        #[arg(long)]
        write_y: Option<i32>,
    },
    /// Relay a chat request through the clipboard bridge
    Chat {
        message: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// Run the whole exchange in-process against the mock upstream
    Demo {
        #[arg(long, default_value = "Hello from the clipwire demo")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let client = CoordinatorClient::new(&cli.coordinator_url);

    match cli.command {
        Command::Status => {
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Calibrate {
            x,
            y,
            read_x,
            read_y,
            write_x,
            write_y,
        } => {
            let status = client
                .calibrate(&[
                    ("x", x),
                    ("y", y),
                    ("read_x", read_x),
                    ("read_y", read_y),
                    ("write_x", write_x),
                    ("write_y", write_y),
                ])
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Chat { message, model } => {
            let response = client.chat(&message, model.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Demo { message } => demo::run(&message).await?,
    }
    Ok(())
}
