//! Data socket module to receive GPS fixes via network.
//!
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use common::protocol::ProtoMsg;
use futures::StreamExt;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::gps::GpsTracker;

/// Spawn the TCP listener feeding fixes into the tracker.
pub async fn spawn_fix_socket(
    gps: Arc<GpsTracker>,
    addr: &str,
) -> Result<JoinHandle<Result<()>>> {
    let socket: SocketAddr = addr.parse()?;
    Ok(tokio::spawn(async move {
        let listener = TcpListener::bind(socket).await?;

        loop {
            let (socket, _peer_addr) = listener.accept().await?;
            let gps = Arc::clone(&gps);
            tokio::spawn(async move {
                handle_incoming(gps, socket).await?;
                Ok::<_, anyhow::Error>(())
            });
        }
    }))
}

async fn handle_incoming(gps: Arc<GpsTracker>, stream: TcpStream) -> Result<()> {
    let addr = stream.peer_addr()?;
    log::info!("{}: New GPS connection", &addr);

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    while let Some(Ok(data)) = transport.next().await {
        // Decode-or-reject: a malformed message must not take the
        // connection down.
        match bincode::deserialize::<ProtoMsg>(&data[..]) {
            Ok(ProtoMsg::Fix(fix)) => gps.push(fix.into()),
            Err(err) => log::warn!("{}: rejecting malformed fix message: {}", &addr, err),
        }
    }

    log::info!("{}: GPS connection closed", &addr);
    Ok(())
}
