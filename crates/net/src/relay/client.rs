//! TCP client side of the relay transport

use std::collections::VecDeque;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::RelayFrame;
use crate::channel::{
    BroadcastChannel, PresenceChannel, PresenceEvent, PresenceMeta, PresenceState, Transport,
};
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{presence_topic, session_topic, Message};

/// Inbound frames buffered per channel
const INBOUND_CAPACITY: usize = 256;

enum ChannelCommand {
    Send(RelayFrame),
    QueryPresence(oneshot::Sender<PresenceState>),
    Disconnect,
}

/// Transport that opens one relay connection per channel
#[derive(Debug, Clone)]
pub struct RelayTransport {
    addr: SocketAddr,
}

impl RelayTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connect and wait for the relay to confirm the subscription
    async fn open(
        &self,
        topic: String,
    ) -> Result<(mpsc::Sender<ChannelCommand>, mpsc::Receiver<RelayFrame>)> {
        debug!(addr = %self.addr, topic = %topic, "Connecting to relay");

        let stream = TcpStream::connect(self.addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_frame(
            &mut writer,
            &RelayFrame::Subscribe {
                topic: topic.clone(),
            },
        )
        .await?;

        match read_frame::<RelayFrame, _>(&mut reader).await? {
            RelayFrame::Subscribed { .. } => {}
            RelayFrame::Refused { reason } => return Err(Error::Rejected(reason)),
            _ => return Err(Error::Protocol("Expected Subscribed".into())),
        }

        info!(topic = %topic, "Relay subscription confirmed");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(connection_task(reader, writer, topic, cmd_rx, inbound_tx));

        Ok((cmd_tx, inbound_rx))
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn broadcast(&self, session_id: Uuid) -> Result<Box<dyn BroadcastChannel>> {
        let topic = session_topic(session_id);
        let (cmd_tx, inbound) = self.open(topic.clone()).await?;
        Ok(Box::new(RelayBroadcast {
            topic,
            cmd_tx: Some(cmd_tx),
            inbound,
        }))
    }

    async fn presence(&self, session_id: Uuid) -> Result<Box<dyn PresenceChannel>> {
        let topic = presence_topic(session_id);
        let (cmd_tx, inbound) = self.open(topic.clone()).await?;
        Ok(Box::new(RelayPresence {
            topic,
            cmd_tx: Some(cmd_tx),
            inbound,
        }))
    }
}

/// Connection task for one channel
async fn connection_task(
    mut reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    topic: String,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
    inbound_tx: mpsc::Sender<RelayFrame>,
) {
    // Presence queries are answered in order on the connection
    let mut pending: VecDeque<oneshot::Sender<PresenceState>> = VecDeque::new();

    loop {
        tokio::select! {
            result = read_frame::<RelayFrame, _>(&mut reader) => {
                match result {
                    Ok(RelayFrame::PresenceState { state }) => {
                        if let Some(reply) = pending.pop_front() {
                            let _ = reply.send(state);
                        }
                    }
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            debug!(topic = %topic, "Channel dropped");
                            break;
                        }
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(topic = %topic, "Relay closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Read error");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                let frame = match cmd {
                    Some(ChannelCommand::Send(frame)) => frame,
                    Some(ChannelCommand::QueryPresence(reply)) => {
                        pending.push_back(reply);
                        RelayFrame::QueryPresence
                    }
                    Some(ChannelCommand::Disconnect) | None => {
                        let _ = write_frame(&mut writer, &RelayFrame::Unsubscribe).await;
                        debug!(topic = %topic, "Disconnect requested");
                        break;
                    }
                };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!(topic = %topic, error = %e, "Write error");
                    break;
                }
            }
        }
    }

    info!(topic = %topic, "Relay channel disconnected");
}

async fn command(cmd_tx: &Option<mpsc::Sender<ChannelCommand>>, cmd: ChannelCommand) -> Result<()> {
    let tx = cmd_tx.as_ref().ok_or(Error::NotSubscribed)?;
    tx.send(cmd).await.map_err(|_| Error::ChannelClosed)
}

async fn disconnect(cmd_tx: &mut Option<mpsc::Sender<ChannelCommand>>) {
    if let Some(tx) = cmd_tx.take() {
        let _ = tx.send(ChannelCommand::Disconnect).await;
    }
}

/// Broadcast subscription over a relay connection
pub struct RelayBroadcast {
    topic: String,
    cmd_tx: Option<mpsc::Sender<ChannelCommand>>,
    inbound: mpsc::Receiver<RelayFrame>,
}

#[async_trait]
impl BroadcastChannel for RelayBroadcast {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let frame = RelayFrame::Publish {
            message: message.clone(),
        };
        command(&self.cmd_tx, ChannelCommand::Send(frame)).await
    }

    async fn recv(&mut self) -> Result<Message> {
        if self.cmd_tx.is_none() {
            return Err(Error::NotSubscribed);
        }
        loop {
            match self.inbound.recv().await {
                Some(RelayFrame::Deliver { message }) => return Ok(message),
                Some(_) => continue,
                None => return Err(Error::ChannelClosed),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        disconnect(&mut self.cmd_tx).await;
        Ok(())
    }
}

/// Presence subscription over a relay connection
pub struct RelayPresence {
    topic: String,
    cmd_tx: Option<mpsc::Sender<ChannelCommand>>,
    inbound: mpsc::Receiver<RelayFrame>,
}

#[async_trait]
impl PresenceChannel for RelayPresence {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn track(&mut self, key: Uuid, meta: PresenceMeta) -> Result<()> {
        command(&self.cmd_tx, ChannelCommand::Send(RelayFrame::Track { key, meta })).await
    }

    async fn untrack(&mut self) -> Result<()> {
        command(&self.cmd_tx, ChannelCommand::Send(RelayFrame::Untrack)).await
    }

    async fn current_state(&self) -> Result<PresenceState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        command(&self.cmd_tx, ChannelCommand::QueryPresence(reply_tx)).await?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }

    async fn next_event(&mut self) -> Result<PresenceEvent> {
        if self.cmd_tx.is_none() {
            return Err(Error::NotSubscribed);
        }
        loop {
            match self.inbound.recv().await {
                Some(RelayFrame::PresenceJoin { key, metas }) => {
                    return Ok(PresenceEvent::Join { key, metas })
                }
                Some(RelayFrame::PresenceLeave { key, metas }) => {
                    return Ok(PresenceEvent::Leave { key, metas })
                }
                Some(_) => continue,
                None => return Err(Error::ChannelClosed),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        disconnect(&mut self.cmd_tx).await;
        Ok(())
    }
}
