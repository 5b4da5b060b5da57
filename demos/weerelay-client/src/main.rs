use anyhow::{Context, Error};
use tokio::net::TcpStream;
use weerelay::{RelayConfig, Relay};

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .context("USAGE: weerelay-client <host>:<port> [password]")?;
    let password = std::env::args().nth(2);

    let stream = TcpStream::connect(&addr)
        .await
        .context(format!("could not connect to `{addr}`"))?;

    let relay = Relay::new(stream, RelayConfig::default());

    if let Some(password) = password.as_deref() {
        relay.set_password(password);
    }

    relay.register_event_handler("_buffer_line_added", |message| {
        log::info!("buffer line added: {message:?}");
    });

    relay.init(None).await.context("handshake failed")?;
    log::info!("connected, relay state: {:?}", relay.state());

    let echoed = relay.ping(Some("hello"), None).await?;
    log::info!("ping echoed back: {echoed:?}");

    tokio::signal::ctrl_c().await?;
    relay.close().await;

    Ok(())
}
