//! Reference program under test: echoes every packet back unchanged.
//!
//! Started the way the oracle starts any program:
//!
//! ```text
//! framecheck-echo [--close-after N] [--ignore-sigint] <role> <host> <port>
//! ```
//!
//! Exits 0 on SIGINT unless `--ignore-sigint` is given, in which case only
//! SIGTERM or SIGKILL stop it.

use std::time::Duration;

use clap::Parser;
use framecheck::protocol::DEFAULT_MTU;
use framecheck::transport::{Connect, FramedSocket, Receive, SendStatus};
use framecheck::{logging, Packet, Result, Role};
use tokio::signal::unix::{signal, SignalKind};

const CONNECT_RETRY: Duration = Duration::from_millis(20);

/// Echo every received packet back to the peer.
#[derive(Debug, Parser)]
#[command(name = "framecheck-echo", version)]
struct Args {
    /// Close the connection and exit 0 after echoing N packets
    #[arg(long, value_name = "N")]
    close_after: Option<usize>,

    /// Keep running when SIGINT arrives
    #[arg(long)]
    ignore_sigint: bool,

    /// Side of the connection to take
    #[arg(value_enum)]
    role: Role,

    host: String,

    port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    logging::init(0);

    if let Err(error) = serve(args).await {
        eprintln!("{}", error.diagnostic());
        std::process::exit(1);
    }
}

async fn serve(args: Args) -> Result<()> {
    // Installed before connecting so an early SIGINT is never fatal.
    let mut interrupt = signal(SignalKind::interrupt())?;

    let mut socket = FramedSocket::open(args.role, &args.host, args.port, DEFAULT_MTU).await?;
    while socket.establish().await? == Connect::NotYet {
        tokio::time::sleep(CONNECT_RETRY).await;
    }

    let mut echoed = 0usize;
    loop {
        let reading = !socket.peer_closed();
        tokio::select! {
            _ = interrupt.recv(), if !args.ignore_sigint => {
                tracing::info!(echoed, "interrupted");
                return Ok(());
            }
            ready = socket.readable(), if reading => {
                ready?;
                match socket.receive()? {
                    Receive::Packets(packets) => {
                        for packet in packets {
                            send(&mut socket, packet).await?;
                            echoed += 1;
                            if args.close_after == Some(echoed) {
                                tracing::info!(echoed, "closing");
                                socket.close();
                                return Ok(());
                            }
                        }
                    }
                    Receive::WouldBlock => {}
                    Receive::Eof => tracing::info!(echoed, "peer closed"),
                }
            }
            else => std::future::pending::<()>().await,
        }
    }
}

async fn send(socket: &mut FramedSocket, packet: Packet) -> Result<()> {
    let mut next = Some(packet);
    loop {
        if socket.send(next.take())? == SendStatus::Ready {
            return Ok(());
        }
        socket.writable().await?;
    }
}
