use clap::Parser;

use starfail_cli::{run, Cmd};

#[derive(Parser, Debug)]
#[command(name = "starfailctl", about = "Control client for starfaild")]
struct Cli {
    /// Base URL of the daemon's RPC surface.
    #[arg(long, default_value = "http://127.0.0.1:9100")]
    rpc_url: String,

    #[command(subcommand)]
    command: Cmd,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let code = run(&client, &cli.rpc_url, cli.command).await;
    std::process::exit(code);
}
