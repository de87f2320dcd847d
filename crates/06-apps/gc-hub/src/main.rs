//! GridConnect CAN hub over TCP.
//!
//! Every client connection is a GridConnect serial link onto one shared CAN
//! hub: a frame sent by one client reaches every other client, never the
//! sender.

mod tcp;

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bridges::DEFAULT_STALL_POLLS;
use clap::Parser;
use runtime_native::{init_tracing, NativeStack, StackConfig};
use tracing::{info, warn};
use transport_codecs::GcPacketPrinter;
use transport_fabric::MemberId;

use crate::tcp::TcpPort;

#[derive(Parser, Debug)]
#[command(author, version, about = "GridConnect CAN hub over TCP")]
struct Args {
    /// Address to accept GridConnect clients on
    #[arg(long, default_value = "0.0.0.0:12021")]
    listen: SocketAddr,

    /// Send every GridConnect character twice
    #[arg(long)]
    double_bytes: bool,

    /// Cells in the CAN hub's buffer pool
    #[arg(long, default_value_t = 64)]
    pool_capacity: usize,

    /// Sleep between idle loop iterations
    #[arg(long, default_value_t = 1)]
    poll_interval_ms: u64,

    /// Idle polls before a client that accepts no data has its traffic dropped
    #[arg(long, default_value_t = DEFAULT_STALL_POLLS)]
    stall_polls: u32,

    /// Print all CAN traffic to stdout
    #[arg(long)]
    print: bool,

    /// Run flows on a dedicated executor thread
    #[arg(long)]
    executor_thread: bool,
}

struct Client {
    id: MemberId,
    peer: SocketAddr,
    closed: Arc<AtomicBool>,
}

fn main() -> Result<()> {
    init_tracing();

    let Args {
        listen,
        double_bytes,
        pool_capacity,
        poll_interval_ms,
        stall_polls,
        print,
        executor_thread,
    } = Args::parse();

    let mut stack = NativeStack::new(StackConfig {
        can_pool_capacity: Some(pool_capacity),
        double_bytes,
        stall_polls: Some(stall_polls),
        ..StackConfig::default()
    })?;
    let _printer = print.then(|| GcPacketPrinter::stdout(stack.service(), stack.can_hub()));
    if executor_thread {
        stack.start_executor_thread()?;
    }

    let listener =
        TcpListener::bind(listen).with_context(|| format!("failed to bind listener on {listen}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make listener non-blocking")?;
    info!("gridconnect hub listening on {listen}");

    let idle = Duration::from_millis(poll_interval_ms);
    let mut clients: Vec<Client> = Vec::new();
    loop {
        accept_clients(&listener, &mut stack, &mut clients);

        let work = stack.loop_once();

        clients.retain(|client| {
            if !client.closed.load(Ordering::Acquire) {
                return true;
            }
            let stats = stack.port_stats(client.id).unwrap_or_default();
            info!(
                peer = %client.peer,
                inbound = stats.inbound,
                bytes_written = stats.bytes_written,
                shed = stats.shed,
                "client disconnected"
            );
            stack.remove_port(client.id);
            false
        });

        if work == 0 {
            std::thread::sleep(idle);
        }
    }
}

fn accept_clients(listener: &TcpListener, stack: &mut NativeStack, clients: &mut Vec<Client>) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!(error = %err, "accept failed");
                return;
            }
        };
        let (port, closed) = match TcpPort::new(stream) {
            Ok(port) => port,
            Err(err) => {
                warn!(%peer, error = %err, "could not configure client socket");
                continue;
            }
        };
        match stack.add_gridconnect_port(peer.to_string(), port) {
            Ok(id) => {
                info!(%peer, clients = clients.len() + 1, "client connected");
                clients.push(Client { id, peer, closed });
            }
            Err(err) => warn!(%peer, error = %err, "could not attach client"),
        }
    }
}
