//! A push-echo server: every text message a client sends is delivered
//! back to it through the push-dispatch path, exercising the registry
//! and the dispatcher rather than writing on the receiving task.

use wspush::{Options, Server, ServerEvent};

/// Main entry point for the demo server.
///
/// Initializes logging and listens for WebSocket connections on port 9001.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let mut server = Server::new(Options::default());
    let push = server.push_handle();
    let mut events = server.events();

    let listener = server.bind("0.0.0.0:9001".parse()?).await;
    log::info!("listening on {}", listener.local_addr()?);

    tokio::spawn(listener.run());

    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Text { id, text } => {
                log::info!("echoing {} bytes to connection {id}", text.len());
                push.enqueue(id, text)?;
            }
            other => log::debug!("{other:?}"),
        }
    }

    Ok(())
}
