use crate::demo::{self, DemoArgs};
use crate::server;
use benefit_review::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Benefit Review",
    version,
    about = "Eligibility review service and audit timeline tooling"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run the HTTP API server (default)
    Serve(ServeArgs),
    /// Walk one application through review and print its audit timeline
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the host interface (defaults to APP_HOST or 127.0.0.1)
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the port (defaults to APP_PORT or 3000)
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => demo::run(args),
    }
}
