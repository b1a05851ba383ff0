//! One-shot command-line client: sends a single request frame built from
//! the trailing arguments, reads one reply, decodes it recursively and
//! prints it.

use clap::Parser;
use minkv_types::protocol::{self, HEADER_SIZE, MAX_MSG_SIZE};
use minkv_types::reply::Reply;
use std::error::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(version, about = "minkv command line client", long_about = None)]
struct Cli {
    /// Server host
    #[arg(long, default_value_t = String::from("127.0.0.1"))]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Command and its arguments, e.g. `set key value`
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut stream = TcpStream::connect((cli.host.as_str(), cli.port)).await?;

    let frame = protocol::encode_request(&cli.command)?;
    stream.write_all(&frame).await?;

    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MSG_SIZE {
        return Err(format!("reply of {len} bytes exceeds the {MAX_MSG_SIZE} byte limit").into());
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    let (reply, _) = Reply::decode(&payload)?;
    print_reply(&reply);
    Ok(())
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::Nil => println!("(nil)"),
        Reply::Err { code, message } => println!("(err) [{code}] {message}"),
        Reply::Str(bytes) => println!("(str) {}", String::from_utf8_lossy(bytes)),
        Reply::Int(value) => println!("(int) {value}"),
        Reply::Dbl(value) => println!("(dbl) {value}"),
        Reply::Arr(items) => {
            println!("(arr) len={}", items.len());
            for item in items {
                print_reply(item);
            }
            println!("(arr) end");
        }
    }
}
