use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{self, read_message, write_message, ChatMessage},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    write_message(&mut writer, &ChatMessage::add_user(&args.username))
        .await
        .context("failed to announce username")?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = Vec::new();

    run_client_loop(
        &mut reader,
        &mut writer,
        &mut stdin,
        &mut input,
        &args.username,
    )
    .await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut Vec<u8>,
    username: &str,
) -> Result<()> {
    let mut frame_buffer = Vec::new();
    loop {
        select! {
            relay_message = read_message::<_, ChatMessage>(reader, &mut frame_buffer) => {
                if !handle_relay_message(relay_message).await? {
                    break;
                }
            }
            // read_until keeps partial input in `input` if the other branch wins.
            bytes_read = stdin.read_until(b'\n', input) => {
                let line = String::from_utf8_lossy(input).into_owned();
                input.clear();
                if !handle_stdin_input(bytes_read, &line, writer, username).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_relay_message(message: io::Result<Option<ChatMessage>>) -> Result<bool> {
    match message {
        Ok(Some(message)) => {
            render_relay_message(message).await?;
            Ok(true)
        }
        Ok(None) => {
            write_stdout("*** relay closed the connection").await?;
            Ok(false)
        }
        // Another client may publish something we cannot parse; skip it.
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            warn!(error = %err, "ignoring undecodable event");
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
    username: &str,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    write_message(writer, &ChatMessage::send_message(username, text)).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

/// Terminal rendering of an event, or `None` for kinds the client ignores.
pub fn render(event: &ChatMessage) -> Option<String> {
    let ChatMessage {
        kind,
        content,
        sender,
    } = event;
    match kind.as_str() {
        message::SEND_MESSAGE | message::CHAT => Some(format!("<{sender}> {content}")),
        message::ADD_USER | message::JOIN => Some(format!("*** {sender} joined the chat")),
        message::LEAVE => Some(format!("*** {sender} left the chat")),
        _ => None,
    }
}

async fn render_relay_message(message: ChatMessage) -> io::Result<()> {
    match render(&message) {
        Some(line) => write_stdout(&line).await,
        None => Ok(()),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
