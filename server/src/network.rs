//! Server network layer: UDP intake, the fixed-rate tick loop and broadcast

use crate::client_manager::{ClientManager, Rejection};
use crate::config::ServerConfig;
use crate::snapshot;
use crate::sync::{avatar_bodies, broadcast_bodies, pack_frames, peer_bodies, Outgoing};
use crate::world::WorldState;
use log::{debug, error, info, warn};
use shared::{decode_frame, Frame};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to the tick loop
#[derive(Debug)]
pub enum ServerMessage {
    FrameReceived { frame: Frame, addr: SocketAddr },
}

/// One tick's worth of encoded datagrams
#[derive(Debug)]
pub struct Broadcast {
    pub datagrams: Vec<(SocketAddr, Vec<u8>)>,
}

/// Authoritative server: owns the world and is its only mutator
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    world: WorldState,
    clients: ClientManager,
    /// Set while the sender task is still flushing the previous broadcast
    in_flight: Arc<AtomicBool>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    send_tx: mpsc::UnboundedSender<Broadcast>,
    send_rx: Option<mpsc::UnboundedReceiver<Broadcast>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let mut world = match &config.snapshot {
            Some(path) if path.exists() => snapshot::load(path)?,
            _ => WorldState::initial_state(),
        };
        world.rule_step = config.rule_step.as_secs_f32();

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (send_tx, send_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: ClientManager::new(config.max_peers, config.stale_after, config.evict_after),
            config,
            world,
            in_flight: Arc::new(AtomicBool::new(false)),
            server_tx,
            server_rx,
            send_tx,
            send_rx: Some(send_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode_frame(&buffer[..len]) {
                        Ok(frame) => {
                            if server_tx
                                .send(ServerMessage::FrameReceived { frame, addr })
                                .is_err()
                            {
                                debug!("Tick loop gone; receiver stopping");
                                break;
                            }
                        }
                        Err(e) => debug!("Dropping datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that flushes each tick's datagrams and clears the
    /// in-flight flag when done
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let in_flight = Arc::clone(&self.in_flight);
        let Some(mut send_rx) = self.send_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(broadcast) = send_rx.recv().await {
                for (addr, bytes) in broadcast.datagrams {
                    if let Err(e) = socket.send_to(&bytes, addr).await {
                        warn!("Failed to send to {}: {}", addr, e);
                    }
                }
                in_flight.store(false, Ordering::Release);
            }
        });
    }

    fn handle_frame(&mut self, frame: Frame, addr: SocketAddr) {
        match self.clients.receive(addr, frame, Instant::now()) {
            Ok(_) => {}
            Err(Rejection::Full) => debug!("Registry full; ignoring {}", addr),
            Err(Rejection::Malformed) => debug!("Malformed avatar record from {}", addr),
        }
    }

    /// Serialises the world for every peer and hands it to the sender, or
    /// counts a dropped frame if the previous flush has not finished.
    fn broadcast(&mut self) {
        if self.clients.is_empty() {
            return;
        }
        if self.in_flight.load(Ordering::Acquire) {
            self.world.note_frame_dropped();
            return;
        }

        let mut shared_bodies: Vec<Outgoing> = broadcast_bodies(&self.world);
        shared_bodies.extend(avatar_bodies(self.clients.peers()));

        let mut datagrams = Vec::new();
        for peer in self.clients.peers_mut() {
            let own = peer_bodies(&self.world, peer.id);
            match pack_frames(&mut peer.channel, shared_bodies.iter().chain(own.iter())) {
                Ok(frames) => datagrams.extend(frames.into_iter().map(|bytes| (peer.addr, bytes))),
                Err(e) => error!("Failed to frame state for peer {}: {}", peer.id, e),
            }
        }

        self.in_flight.store(true, Ordering::Release);
        if self.send_tx.send(Broadcast { datagrams }).is_err() {
            error!("Sender task is gone");
            self.in_flight.store(false, Ordering::Release);
            return;
        }
        self.world.note_frame_sent();
    }

    /// Runs one simulation tick followed by a broadcast.
    fn step(&mut self) {
        let inputs = self.clients.take_inputs();
        let out = self.world.tick(&inputs, self.config.dt());
        if out.committed > 0 {
            debug!("Frame {}: {} actions recorded", out.frame, out.committed);
        }
        self.broadcast();
    }

    /// Runs until Ctrl-C.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Main server loop; returns after `shutdown` resolves and the final
    /// snapshot (if configured) is written.
    pub async fn run_until(
        &mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();
        let report_every = u64::from(self.config.tick_rate.max(1)) * 10;

        info!("Server started at {} Hz", self.config.tick_rate);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }

                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::FrameReceived { frame, addr }) => self.handle_frame(frame, addr),
                        None => break,
                    }
                }

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    for peer in self.clients.check_timeouts(now) {
                        self.world.remove_peer(peer);
                    }
                    self.step();

                    if self.world.frame % report_every == 0 && !self.clients.is_empty() {
                        debug!(
                            "Frame {}: {} peers, {:.1}Hz, {} sent, {} dropped",
                            self.world.frame,
                            self.clients.len(),
                            1.0 / elapsed.max(f32::EPSILON),
                            self.world.stats.sent,
                            self.world.stats.dropped
                        );
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Gives the last broadcast a grace period to flush, then saves.
    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let deadline = Instant::now() + self.config.shutdown_grace;
        while self.in_flight.load(Ordering::Acquire) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self.in_flight.load(Ordering::Acquire) {
            warn!("Exiting with a broadcast still in flight");
        }

        if let Some(path) = &self.config.snapshot {
            snapshot::save(&self.world, path)?;
        }
        info!("Server stopped at frame {}", self.world.frame);
        Ok(())
    }
}
