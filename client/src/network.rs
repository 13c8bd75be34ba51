use crate::game::ClientScene;
use crate::input::InputScript;
use log::{debug, error, info, warn};
use shared::channel::MAX_DATAGRAM;
use shared::{decode_frame, encode_frame, ReliableChannel};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::interval;

#[derive(Debug)]
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    channel: ReliableChannel,
    scene: ClientScene,
    script: InputScript,
    rate: u32,
    sent: u64,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        rate: u32,
        script: InputScript,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let bind = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;

        Ok(Client {
            socket,
            server_addr,
            channel: ReliableChannel::new(),
            scene: ClientScene::new(),
            script,
            rate: rate.max(1),
            sent: 0,
        })
    }

    pub fn scene(&self) -> &ClientScene {
        &self.scene
    }

    pub fn channel(&self) -> &ReliableChannel {
        &self.channel
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends this tick's avatar sample, acking what we have received so far.
    async fn send_input(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let sample = self.script.next_sample(&self.scene);
        let frame = self.channel.prepare_packet(sample.encode());
        let data = encode_frame(&frame)?;
        self.socket.send_to(&data, self.server_addr).await?;
        self.sent += 1;
        Ok(())
    }

    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        if from != self.server_addr {
            debug!("Ignoring datagram from unknown sender {}", from);
            return;
        }

        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame from server: {}", e);
                return;
            }
        };

        self.channel.receive_packet(frame);
        let frames: Vec<_> = self.channel.drain_inbox().collect();
        for frame in &frames {
            self.scene.apply_frame(frame);
        }
    }

    fn log_summary(&self) {
        let summary = self.scene.summary();
        info!(
            "sent {} | received {} frames, {} messages ({} malformed) | {} live objects, {} segments | sim time {:.2}s | unacked {}",
            self.sent,
            summary.frames,
            summary.messages,
            summary.malformed,
            summary.live,
            summary.segments,
            summary.simulation_time.unwrap_or(0.0),
            self.channel.outbox_len()
        );
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs the send/receive loop until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Sending {} input at {} Hz to {}",
            self.script.script(),
            self.rate,
            self.server_addr
        );

        let mut send_interval = interval(Duration::from_secs_f64(1.0 / self.rate as f64));
        let mut summary_interval = interval(Duration::from_secs(1));
        summary_interval.tick().await;

        let mut buffer = [0u8; MAX_DATAGRAM + 64];
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, from)) => self.handle_datagram(&buffer[..len], from),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = send_interval.tick() => {
                    if let Err(e) = self.send_input().await {
                        error!("Error sending input: {}", e);
                    }
                },

                _ = summary_interval.tick() => {
                    self.log_summary();
                },

                _ = &mut shutdown => {
                    info!("Client shutting down");
                    break;
                }
            }
        }

        self.log_summary();
        Ok(())
    }
}
