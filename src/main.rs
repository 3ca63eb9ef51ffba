use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    meetwatch_lib::run(meetwatch_lib::Cli::parse()).await
}
