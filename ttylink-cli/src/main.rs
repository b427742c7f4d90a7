//! `ttylink` — upgrade a reverse-shell connection into a full interactive
//! terminal, window resizes included, over the one stream it arrives on.
#![allow(clippy::print_stderr)]

#[cfg(not(unix))]
fn main() {
    eprintln!("ttylink requires a Unix host");
    std::process::exit(1);
}

#[cfg(unix)]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    listener::init_tracing();
    if let Err(e) = listener::run().await {
        eprintln!("ttylink: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(unix)]
mod listener {
    use std::net::IpAddr;

    use anyhow::{Context, Result};
    use clap::Parser;
    use tokio::net::TcpListener;
    use tracing::info;
    use tracing_subscriber::EnvFilter;
    use ttylink::Session;

    /// Command-line surface: one required port, an optional bind address.
    #[derive(Parser)]
    #[command(
        name = "ttylink",
        version,
        about = "Interactive terminal sessions over a single TCP stream"
    )]
    pub(crate) struct Cli {
        /// TCP port to listen on for the incoming connection.
        port: u16,

        /// Address to bind the listener to.
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
    }

    /// Initializes logging to stderr, `RUST_LOG` overriding the `info`
    /// default. Stderr keeps log lines out of the relayed byte stream.
    pub(crate) fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    /// Listens, accepts exactly one connection, and relays it.
    pub(crate) async fn run() -> Result<()> {
        let cli = Cli::parse();

        let listener = TcpListener::bind((cli.bind, cli.port))
            .await
            .with_context(|| format!("cannot listen on {}:{}", cli.bind, cli.port))?;
        info!("listening on {}", listener.local_addr()?);

        let (stream, peer) = listener.accept().await.context("accept failed")?;
        info!("connection from {peer}");

        Session::new(stream).run().await?;
        info!("session closed");
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use clap::CommandFactory;

        #[test]
        fn cli_definition_is_consistent() {
            super::Cli::command().debug_assert();
        }
    }
}
