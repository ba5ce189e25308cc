//! Loopback - request/reply against an in-process server.
//!
//! The server end of a `tokio::io::duplex` pipe answers route 7 with
//! `"Server reply: <text>"`, except for `"hello1"` which gets an error
//! status.
//!
//! ```text
//! cargo run --example loopback
//! ```

use routewire::protocol::{FrameBuffer, PackageType, Packet, Status};
use routewire::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const ECHO: u32 = 7;

async fn serve(mut stream: DuplexStream) -> routewire::Result<()> {
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for request in frames.push(&buf[..n])? {
            if request.package_type() != PackageType::Request || request.route() != ECHO {
                continue;
            }
            let text: String = request.decode_typed()?;
            let mut reply = if text == "hello1" {
                Packet::response(&request.header, Status::error("SYSTEM_ERR"), None)
            } else {
                Packet::response(
                    &request.header,
                    Status::success(),
                    Some(format!("Server reply: {}", text)),
                )
            };
            stream.write_all(&reply.encode()?).await?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve(server_end));

    let client = Client::builder()
        .route("test.echo", ECHO)
        .connect(client_end);

    for text in ["hello", "hello1", "hello2"] {
        let (status, reply) = client.request::<_, String>("test.echo", text).await?;
        println!("{:>7} -> {:?} {:?} {:?}", text, status.code, status.message, reply);
    }

    client.disconnect();
    Ok(())
}
