use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::agent::engine::Engine;
use crate::session::Session;
use crate::settings::RequestOverrides;

const PROMPT: &str = "you> ";

async fn say<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> anyhow::Result<()> {
    out.write_all(format!("vertex> {}\n", text).as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

/// Terminal shell over one in-process session. `/quit` or end of input stops it.
pub async fn run<R, W>(engine: &Engine, session: &mut Session, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let overrides = RequestOverrides::default();
    if let Some(intro) = engine.render_cycle(session, None, &overrides).await?.intro {
        say(&mut output, &intro).await?;
    }

    let mut lines = input.lines();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else { break };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            _ => {}
        }
        match engine.render_cycle(session, Some(line), &overrides).await {
            Ok(out) => {
                if let Some(reply) = out.reply {
                    say(&mut output, &reply).await?;
                }
            }
            Err(e) => {
                warn!(error = %e, "turn failed");
                output.write_all(format!("error: {}\n", e).as_bytes()).await?;
            }
        }
    }
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}
