use crate::demo::{print_stages, run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use underwriting_ai::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Underwriting Orchestrator",
    about = "Run and demonstrate the multi-stage underwriting orchestrator from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Underwrite an application end to end and print the report
    Demo(DemoArgs),
    /// Print the stage graph with its dependencies
    Stages,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Stages => {
            print_stages();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["underwriting-ai-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn serve_accepts_host_and_port_overrides() {
        let cli = Cli::try_parse_from(["underwriting-ai-api", "serve", "--port", "9090"])
            .expect("parses");
        match cli.command {
            Some(Command::Serve(args)) => {
                assert_eq!(args.port, Some(9090));
                assert!(args.host.is_none());
            }
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn demo_reads_an_optional_application_file() {
        let cli = Cli::try_parse_from([
            "underwriting-ai-api",
            "demo",
            "--application",
            "app.json",
            "--json",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Demo(args)) => {
                assert_eq!(
                    args.application.as_deref(),
                    Some(std::path::Path::new("app.json"))
                );
                assert!(args.json);
            }
            other => panic!("expected demo, got {other:?}"),
        }
    }
}
