//! running the server over in-memory channels.
//!
//! the router itself is transport-agnostic; this module gives it a home for
//! integrations that live in the same process (local single-player, tests,
//! headless tools): client packets go up a channel, replies and broadcasts
//! come back down per-player outboxes, with no sockets or serialization in
//! between. the handle stops the server thread when dropped.

use std::{collections::HashMap, thread, time::Instant};

use crossbeam_channel::{Receiver, Sender};

use carve_common::net::{ClientPacket, ServerPacket};
use carve_common::palette::MaterialPalette;

use crate::{config::ServerConfig, prelude::*, session::{PlayerState, Server}};

pub enum ClientEvent {
    Connected {
        player: u16,
        outbox: Sender<ServerPacket>,
    },
    Packet {
        player: PlayerState,
        packet: ClientPacket,
    },
    Disconnected {
        player: u16,
    },
    Shutdown,
}

/// owned handle to a running server thread. stops the server when dropped.
pub struct ServerHandle {
    events_tx: Sender<ClientEvent>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn start(config: ServerConfig, palette: std::sync::Arc<MaterialPalette>) -> Result<Self> {
        let server = Server::new(config, palette)?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let thread = thread::Builder::new()
            .name("carve-server".into())
            .spawn(move || run(server, events_rx))?;

        Ok(Self {
            events_tx,
            thread: Some(thread),
        })
    }

    pub fn sender(&self) -> Sender<ClientEvent> {
        self.events_tx.clone()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.events_tx.send(ClientEvent::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(mut server: Server, events: Receiver<ClientEvent>) {
    let mut outboxes: HashMap<u16, Sender<ServerPacket>> = HashMap::new();

    while let Ok(event) = events.recv() {
        match event {
            ClientEvent::Connected { player, outbox } => {
                log::info!("player {} connected", player);
                outboxes.insert(player, outbox);
            }
            ClientEvent::Packet { player, packet } => {
                let response = server.handle_packet(&player, packet, Instant::now());

                if let Some(outbox) = outboxes.get(&player.id) {
                    for packet in response.reply {
                        // a full or dropped outbox means the client is gone;
                        // the disconnect event will clean up
                        let _ = outbox.send(packet);
                    }
                }
                for packet in response.broadcast {
                    for outbox in outboxes.values() {
                        let _ = outbox.send(packet.clone());
                    }
                }
            }
            ClientEvent::Disconnected { player } => {
                log::info!("player {} disconnected", player);
                outboxes.remove(&player);
                server.drop_player(player);
            }
            ClientEvent::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_common::{
        edit::BuildMode,
        net::{BuildIntent, BuildResult},
        palette::{self, default_palette},
        sdf::BuildShape,
        tile::TilePos,
    };
    use nalgebra::{point, vector, UnitQuaternion};
    use std::time::Duration;

    #[test]
    fn a_full_session_over_channels() {
        let handle = ServerHandle::start(ServerConfig::default(), default_palette()).unwrap();
        let events = handle.sender();

        let (outbox_tx, outbox_rx) = crossbeam_channel::unbounded();
        events
            .send(ClientEvent::Connected { player: 1, outbox: outbox_tx })
            .unwrap();

        let player = PlayerState {
            id: 1,
            position: point![4.0, 3.0, 4.0],
        };

        events
            .send(ClientEvent::Packet {
                player,
                packet: ClientPacket::ColumnRequest { pos: TilePos::new(0, 0) },
            })
            .unwrap();
        match outbox_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ServerPacket::ColumnResponse(column) => assert!(!column.chunks.is_empty()),
            other => panic!("expected a column response, got {:?}", other),
        }

        events
            .send(ClientEvent::Packet {
                player,
                packet: ClientPacket::BuildIntent(BuildIntent {
                    center: point![4.0, 3.0, 4.0],
                    rotation: UnitQuaternion::identity(),
                    shape: BuildShape::Sphere,
                    mode: BuildMode::Add,
                    size: vector![2.0, 2.0, 2.0],
                    material: palette::ROCK,
                    thickness: None,
                    closed: true,
                    arc_sweep: None,
                }),
            })
            .unwrap();

        // the commit comes back as a broadcast, followed by the updated tile
        let commit = loop {
            match outbox_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ServerPacket::BuildCommit(commit) => break commit,
                other => panic!("expected a commit, got {:?}", other),
            }
        };
        assert_eq!(commit.result, BuildResult::Success);
        assert_eq!(commit.player_id, 1);

        match outbox_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            ServerPacket::MapTile { pos, .. } => assert_eq!(pos, TilePos::new(0, 0)),
            other => panic!("expected a tile, got {:?}", other),
        }

        events.send(ClientEvent::Disconnected { player: 1 }).unwrap();
        drop(handle);
    }
}
