use clap::Parser;
use satchel_cli::args::{Cli, Commands};
use satchel_cli::handlers;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(cli.verbose.tracing_level_filter().into()),
        )
        .with_writer(std::io::stderr)
        .finish()
        .init();

    let manager = handlers::build_manager(&cli.store)?;
    let mut stdout = std::io::stdout();
    match cli.command {
        Commands::Gc(args) => handlers::handle_gc(&manager, args, &mut stdout).await,
        Commands::Watch(args) => handlers::handle_watch(&manager, args).await,
        Commands::Show(args) => handlers::handle_show(&manager, args, &mut stdout).await,
        Commands::Destroy(args) => handlers::handle_destroy(&manager, args).await,
        Commands::Count => handlers::handle_count(&manager, &mut stdout).await,
    }
}
