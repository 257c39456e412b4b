//! Simulation collaborator boundary.
//!
//! The transport core owns no game logic beyond tick sequencing: it calls
//! into this capability set to apply decoded inputs, advance actors, flip
//! them active on connect/disconnect, and obtain the authoritative
//! snapshot bytes embedded in outgoing STATE packets.

use log::info;
use shared::input::{KEY_BACKWARD, KEY_FORWARD, KEY_LEFT, KEY_RIGHT};
use shared::{BitPack, NetPlayerInput};

/// What the session loop needs from the simulation layer. Implementations
/// are single-threaded; the loop is the only caller.
pub trait Simulation {
    /// Brings the actor for `client_id` into the world.
    fn activate(&mut self, client_id: usize);

    /// Removes the actor; called on timeout, disconnect, or failed
    /// challenge.
    fn deactivate(&mut self, client_id: usize);

    /// Atomic apply-then-advance: converts the input's keymask into action
    /// states and steps the actor by the input's own delta time.
    fn apply_input(&mut self, client_id: usize, input: &NetPlayerInput);

    /// Zero-input advance so an actor never stalls while its peer is idle.
    fn step(&mut self, client_id: usize, dt: f32);

    /// Authoritative snapshot bytes for a STATE broadcast.
    fn snapshot(&self) -> Vec<u8>;

    /// Pass-through hook for MESSAGE packets.
    fn on_chat_message(&mut self, _client_id: usize, _text: &str) {}

    /// Pass-through hook for SETTINGS packets.
    fn on_settings(&mut self, _client_id: usize, _data: &[u8]) {}
}

pub const WORLD_EXTENT: f32 = 400.0;
pub const MOVE_SPEED: f32 = 90.0;

#[derive(Debug, Clone, Copy, Default)]
struct Actor {
    active: bool,
    x: f32,
    y: f32,
}

/// Minimal concrete world: each actor is a point moved by the 4-direction
/// keymask and clamped to the arena bounds.
pub struct ArenaWorld {
    actors: Vec<Actor>,
}

impl ArenaWorld {
    pub fn new(max_clients: usize) -> Self {
        Self {
            actors: vec![Actor::default(); max_clients],
        }
    }

    pub fn active_count(&self) -> usize {
        self.actors.iter().filter(|a| a.active).count()
    }

    pub fn position(&self, client_id: usize) -> Option<(f32, f32)> {
        self.actors
            .get(client_id)
            .filter(|a| a.active)
            .map(|a| (a.x, a.y))
    }

    fn advance(&mut self, client_id: usize, keys: u32, dt: f32) {
        let Some(actor) = self.actors.get_mut(client_id).filter(|a| a.active) else {
            return;
        };

        let mut vx = 0.0f32;
        let mut vy = 0.0f32;
        if keys & KEY_LEFT != 0 {
            vx -= MOVE_SPEED;
        }
        if keys & KEY_RIGHT != 0 {
            vx += MOVE_SPEED;
        }
        if keys & KEY_FORWARD != 0 {
            vy += MOVE_SPEED;
        }
        if keys & KEY_BACKWARD != 0 {
            vy -= MOVE_SPEED;
        }

        actor.x = (actor.x + vx * dt).clamp(-WORLD_EXTENT, WORLD_EXTENT);
        actor.y = (actor.y + vy * dt).clamp(-WORLD_EXTENT, WORLD_EXTENT);
    }
}

impl Simulation for ArenaWorld {
    fn activate(&mut self, client_id: usize) {
        if let Some(actor) = self.actors.get_mut(client_id) {
            *actor = Actor {
                active: true,
                x: 0.0,
                y: 0.0,
            };
            info!("Activated actor {}", client_id);
        }
    }

    fn deactivate(&mut self, client_id: usize) {
        if let Some(actor) = self.actors.get_mut(client_id) {
            if actor.active {
                info!("Deactivated actor {}", client_id);
            }
            *actor = Actor::default();
        }
    }

    fn apply_input(&mut self, client_id: usize, input: &NetPlayerInput) {
        self.advance(client_id, input.keys, input.delta_t);
    }

    fn step(&mut self, client_id: usize, dt: f32) {
        self.advance(client_id, 0, dt);
    }

    fn snapshot(&self) -> Vec<u8> {
        let mut bp = BitPack::new(1 + self.actors.len() * 9);
        // Count first, then (id, x, y) per active actor.
        let _ = bp.write(8, self.active_count() as u32);
        for (id, actor) in self.actors.iter().enumerate() {
            if !actor.active {
                continue;
            }
            let _ = bp.write(8, id as u32);
            let _ = bp.write(32, actor.x.to_bits());
            let _ = bp.write(32, actor.y.to_bits());
        }
        bp.to_bytes()
    }
}
