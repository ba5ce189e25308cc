//! Events - push listeners over TCP.
//!
//! Starts a local TCP server that answers every notify on `events.start`
//! with a few pushes on `events.progress`, then connects a client that
//! listens for them.
//!
//! ```text
//! cargo run --example events
//! ```

use std::time::Duration;

use routewire::protocol::{FrameBuffer, PackageType, Packet};
use routewire::{Client, EncodingType};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const START: u32 = 1;
const PROGRESS: u32 = 2;

#[derive(Serialize, Deserialize, Debug)]
struct StartWork {
    steps: u32,
}

#[derive(Serialize, Deserialize, Debug)]
struct Progress {
    percent: u32,
    message: String,
}

async fn serve(mut socket: TcpStream) -> routewire::Result<()> {
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for packet in frames.push(&buf[..n])? {
            if packet.package_type() != PackageType::Notify || packet.route() != START {
                continue;
            }
            let work: StartWork = packet.decode_typed()?;
            for step in 1..=work.steps {
                let progress = Progress {
                    percent: step * 100 / work.steps,
                    message: format!("step {} of {}", step, work.steps),
                };
                let mut push = Packet::push(PROGRESS, progress, EncodingType::MsgPack);
                socket.write_all(&push.encode()?).await?;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            let _ = serve(socket).await;
        }
    });

    let client = Client::builder()
        .route("events.start", START)
        .route("events.progress", PROGRESS)
        .on_error(|e| eprintln!("connection error: {}", e))
        .connect_tcp(addr)
        .await?;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    client.add_listener_once("events.progress", |p: Progress| {
        println!("first update: {}", p.message);
    })?;
    client.add_listener("events.progress", move |p: Progress| {
        println!("progress: {}%", p.percent);
        if p.percent == 100 {
            let _ = done_tx.send(());
        }
    })?;

    client.notify("events.start", &StartWork { steps: 5 })?;

    done_rx.recv().await;
    client.disconnect();
    Ok(())
}
