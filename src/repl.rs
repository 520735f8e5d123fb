//! Interactive chat loop

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::engine::Engine;
use crate::error::Result;

/// Chat on the terminal until the user quits
pub async fn run_stdio(engine: &mut Engine) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    run(engine, input, std::io::stdout()).await
}

/// Chat over arbitrary input and output streams
///
/// Ctrl+C while a query runs abandons that query; at the prompt it ends
/// the loop.
pub async fn run<R, W>(engine: &mut Engine, input: R, mut out: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    write_banner(engine, &mut out)?;
    let mut lines = input.lines();

    loop {
        write!(out, "\nQuery: ")?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Chat loop interrupted by user (Ctrl+C)");
                writeln!(out)?;
                break;
            }
        };
        let Some(line) = line else {
            tracing::info!("End of input, leaving chat loop");
            writeln!(out)?;
            break;
        };

        let query = line.trim();
        if query.eq_ignore_ascii_case("quit") {
            tracing::info!("User requested quit from chat loop");
            break;
        }
        if query.is_empty() {
            writeln!(out, "Please enter a query.")?;
            continue;
        }

        writeln!(out, "Processing...")?;
        tracing::info!("User query received: '{}'", crate::engine::snippet(query, 70));

        tokio::select! {
            answer = engine.process_query(query) => {
                if answer.is_empty() {
                    writeln!(out, "\n[No response from AI model]")?;
                } else {
                    writeln!(out, "\n{}", answer)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Query interrupted by user (Ctrl+C)");
                writeln!(out, "\nQuery interrupted. Type 'quit' to exit.")?;
            }
        }
    }

    Ok(())
}

fn write_banner<W: Write>(engine: &Engine, out: &mut W) -> Result<()> {
    let tools = engine.mcp().tool_names();
    let tools = if tools.is_empty() {
        "None".to_string()
    } else {
        tools.join(", ")
    };

    writeln!(
        out,
        "\nChatting with: '{}' (LLM: {})",
        engine.settings().name,
        engine.llm().model()
    )?;
    writeln!(out, "Available tools: {}", tools)?;
    writeln!(out, "Type your queries or 'quit' to exit.")?;
    Ok(())
}
