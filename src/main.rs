use anyhow::Result;
use clap::Parser;
use codebox::config::{Cli, Command, Config};
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Some(Command::Keygen(args)) => {
            let generated = codebox::keygen::generate(args.key, args.salt)?;
            codebox::keygen::write_key_file(&args.out, &generated)?;
            if generated.key_is_new {
                println!("This is your master key: {}", generated.key);
                println!("It won't be shown again, so make sure to save it somewhere safe.");
            }
            println!("Hash and salt saved to {}", args.out.display());
        }
        Some(Command::SelfTest(args)) => {
            let failures = codebox::selftest::run(&args).await?;
            if failures > 0 {
                anyhow::bail!("{} language(s) failed the self-test", failures);
            }
        }
        Some(Command::Serve(args)) => codebox::server::start_server(Config::try_from(args)?).await?,
        None => codebox::server::start_server(Config::try_from(cli.serve)?).await?,
    }

    Ok(())
}
