//! the packet router.
//!
//! maps one decoded client packet to its replies and broadcasts. transport is
//! external: it authenticates players, tracks their positions from the input
//! channel, decodes packets (disconnecting peers on [`WireError`]), and
//! fans broadcasts out to every connected client.
//!
//! [`WireError`]: carve_common::net::WireError

use std::time::Instant;

use nalgebra::Point3;

use carve_common::{
    net::{BuildCommit, BuildResult, ClientPacket, ServerPacket},
    palette::MaterialPalette,
};

use crate::{config::ServerConfig, prelude::*, validate::Validator, world::ServerWorld};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlayerState {
    pub id: u16,
    pub position: Point3<f32>,
}

/// what one packet produced: direct replies to the sender, and packets every
/// connected client should see.
#[derive(Debug, Default)]
pub struct Response {
    pub reply: Vec<ServerPacket>,
    pub broadcast: Vec<ServerPacket>,
}

pub struct Server {
    world: ServerWorld,
    validator: Validator,
}

impl Server {
    pub fn new(config: ServerConfig, palette: std::sync::Arc<MaterialPalette>) -> Result<Self> {
        Ok(Self {
            validator: Validator::new(&config),
            world: ServerWorld::new(config, palette)?,
        })
    }

    pub fn world(&self) -> &ServerWorld {
        &self.world
    }

    pub fn handle_packet(
        &mut self,
        player: &PlayerState,
        packet: ClientPacket,
        now: Instant,
    ) -> Response {
        let mut response = Response::default();

        match packet {
            ClientPacket::ChunkRequest { pos, force_regen } => {
                let msg = self.world.chunk_data(pos, force_regen);
                response.reply.push(ServerPacket::ChunkData(msg));
            }
            ClientPacket::ColumnRequest { pos } => {
                let column = self.world.column_response(pos);
                response.reply.push(ServerPacket::ColumnResponse(column));
            }
            ClientPacket::BuildIntent(intent) => {
                let result = self.validator.validate(player.id, player.position, &intent, now);

                if result.is_success() {
                    let build_seq = self.world.commit_build(&intent);
                    response.broadcast.push(ServerPacket::BuildCommit(BuildCommit {
                        build_seq,
                        player_id: player.id,
                        result: BuildResult::Success,
                        intent: Some(intent),
                    }));
                    for (pos, tile) in self.world.take_dirty_tiles() {
                        response.broadcast.push(ServerPacket::MapTile { pos, tile });
                    }
                } else {
                    log::debug!("rejecting build from player {}: {:?}", player.id, result);
                    response.reply.push(ServerPacket::BuildCommit(BuildCommit {
                        build_seq: self.world.build_seq(),
                        player_id: player.id,
                        result,
                        intent: None,
                    }));
                }
            }
        }

        response
    }

    pub fn drop_player(&mut self, id: u16) {
        self.validator.drop_player(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_common::{
        edit::BuildMode,
        net::BuildIntent,
        palette::{self, default_palette},
        sdf::BuildShape,
        tile::TilePos,
    };
    use nalgebra::{point, vector, UnitQuaternion};

    fn server() -> Server {
        Server::new(ServerConfig::default(), default_palette()).unwrap()
    }

    fn player_at(id: u16, position: Point3<f32>) -> PlayerState {
        PlayerState { id, position }
    }

    fn sphere_intent(center: Point3<f32>) -> BuildIntent {
        BuildIntent {
            center,
            rotation: UnitQuaternion::identity(),
            shape: BuildShape::Sphere,
            mode: BuildMode::Add,
            size: vector![2.0, 2.0, 2.0],
            material: palette::ROCK,
            thickness: None,
            closed: true,
            arc_sweep: None,
        }
    }

    #[test]
    fn chunk_requests_get_chunk_data_back() {
        let mut server = server();
        let player = player_at(0, point![0.0, 0.0, 0.0]);

        let response = server.handle_packet(
            &player,
            ClientPacket::ChunkRequest {
                pos: carve_common::chunk::ChunkPos::new([0, 0, 0]),
                force_regen: false,
            },
            Instant::now(),
        );

        assert_eq!(response.reply.len(), 1);
        assert!(response.broadcast.is_empty());
        assert!(matches!(response.reply[0], ServerPacket::ChunkData(_)));
    }

    #[test]
    fn column_requests_get_bundles_back() {
        let mut server = server();
        let player = player_at(0, point![0.0, 0.0, 0.0]);

        let response = server.handle_packet(
            &player,
            ClientPacket::ColumnRequest { pos: TilePos::new(0, 0) },
            Instant::now(),
        );

        match &response.reply[0] {
            ServerPacket::ColumnResponse(column) => {
                assert_eq!(column.pos, TilePos::new(0, 0));
                assert!(!column.chunks.is_empty());
            }
            other => panic!("expected a column response, got {:?}", other),
        }
    }

    #[test]
    fn good_intents_broadcast_commits_and_tiles() {
        let mut server = server();
        let player = player_at(3, point![4.0, 3.0, 4.0]);

        let response = server.handle_packet(
            &player,
            ClientPacket::BuildIntent(sphere_intent(point![4.0, 3.0, 4.0])),
            Instant::now(),
        );

        assert!(response.reply.is_empty());
        let commit = match &response.broadcast[0] {
            ServerPacket::BuildCommit(commit) => commit,
            other => panic!("expected a commit, got {:?}", other),
        };
        assert_eq!(commit.build_seq, 1);
        assert_eq!(commit.player_id, 3);
        assert!(commit.result.is_success());
        assert!(commit.intent.is_some());

        // the edited column's tile rides along
        assert!(response
            .broadcast
            .iter()
            .any(|packet| matches!(packet, ServerPacket::MapTile { .. })));
    }

    #[test]
    fn bad_intents_are_rejected_to_the_sender_only() {
        let mut server = server();
        let player = player_at(3, point![0.0, 0.0, 0.0]);

        let response = server.handle_packet(
            &player,
            ClientPacket::BuildIntent(sphere_intent(point![500.0, 0.0, 0.0])),
            Instant::now(),
        );

        assert!(response.broadcast.is_empty());
        let commit = match &response.reply[0] {
            ServerPacket::BuildCommit(commit) => commit,
            other => panic!("expected a rejection, got {:?}", other),
        };
        assert_eq!(commit.result, BuildResult::TooFar);
        assert!(commit.intent.is_none());
        // nothing was applied
        assert_eq!(server.world().build_seq(), 0);
    }

    #[test]
    fn rate_limited_intents_do_not_commit() {
        let config = ServerConfig {
            rate_limit: 2,
            ..Default::default()
        };
        let mut server = Server::new(config, default_palette()).unwrap();
        let player = player_at(1, point![4.0, 4.0, 4.0]);
        let now = Instant::now();

        for _ in 0..2 {
            let response = server.handle_packet(
                &player,
                ClientPacket::BuildIntent(sphere_intent(point![4.0, 4.0, 4.0])),
                now,
            );
            assert!(!response.broadcast.is_empty());
        }

        let response = server.handle_packet(
            &player,
            ClientPacket::BuildIntent(sphere_intent(point![4.0, 4.0, 4.0])),
            now,
        );
        let commit = match &response.reply[0] {
            ServerPacket::BuildCommit(commit) => commit,
            other => panic!("expected a rejection, got {:?}", other),
        };
        assert_eq!(commit.result, BuildResult::RateLimited);
        assert_eq!(server.world().build_seq(), 2);
    }
}
