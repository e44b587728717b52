//! ECS components for entity-based drawing.
//!
//! Entities carrying a [`RenderDrawable`] are turned into draw queues by
//! [`extract_draw_queue`] / [`extract_draw_queues`]. A [`Transform`] component
//! on the same entity replaces the drawable's own transform, and a
//! [`DrawQueueId`] component routes it to a queue other than queue 0.
//!
//! # Example
//!
//! ```
//! use phalanx::{DrawQueueId, Drawable, MeshId, RenderDrawable, Transform, Vec3, World, extract_draw_queues};
//!
//! let mut world = World::new();
//! world.spawn((
//!     Transform::from_position(Vec3::new(0.0, 0.0, -5.0)),
//!     RenderDrawable::new(Drawable::new(MeshId(0))),
//! ));
//! world.spawn((RenderDrawable::new(Drawable::new(MeshId(1))), DrawQueueId(1)));
//!
//! let queues = extract_draw_queues(&world);
//! assert_eq!(queues.get(DrawQueueId(0)).map(|q| q.len()), Some(1));
//! assert_eq!(queues.get(DrawQueueId(1)).map(|q| q.len()), Some(1));
//! ```

use crate::drawable::{DrawQueue, DrawQueues, Drawable};
use crate::mesh::Transform;
use crate::step::DrawQueueId;

/// Component for drawing an entity.
#[derive(Clone, Debug)]
pub struct RenderDrawable {
    pub drawable: Drawable,
    /// Hidden entities stay in the world but are not extracted.
    pub visible: bool,
}

impl RenderDrawable {
    pub fn new(drawable: Drawable) -> Self {
        Self {
            drawable,
            visible: true,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Visible drawables of the world in entity order, as `(entity id, queue, drawable)`.
fn collect(world: &hecs::World) -> Vec<(u32, DrawQueueId, Drawable)> {
    let mut query = world.query::<(&RenderDrawable, Option<&Transform>, Option<&DrawQueueId>)>();
    let mut found: Vec<(u32, DrawQueueId, Drawable)> = query
        .iter()
        .filter(|(_, (render, _, _))| render.visible)
        .map(|(entity, (render, transform, queue))| {
            let mut drawable = render.drawable.clone();
            if let Some(transform) = transform {
                drawable.transform = *transform;
            }
            (entity.id(), queue.copied().unwrap_or_default(), drawable)
        })
        .collect();
    found.sort_by_key(|(id, _, _)| *id);
    found
}

/// Every visible drawable in the world, ignoring queue routing.
pub fn extract_draw_queue(world: &hecs::World) -> DrawQueue {
    collect(world).into_iter().map(|(_, _, d)| d).collect()
}

/// Visible drawables grouped by their [`DrawQueueId`] component.
pub fn extract_draw_queues(world: &hecs::World) -> DrawQueues {
    let mut queues = DrawQueues::new();
    for (_, queue, drawable) in collect(world) {
        queues.queue_mut(queue).push(drawable);
    }
    queues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshId;
    use glam::Vec3;

    #[test]
    fn entity_transform_wins() {
        let mut world = hecs::World::new();
        let moved = Transform::from_position(Vec3::X);
        world.spawn((moved, RenderDrawable::new(Drawable::new(MeshId(3)))));

        let queue = extract_draw_queue(&world);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.as_slice()[0].transform, moved);
    }

    #[test]
    fn hidden_entities_are_skipped() {
        let mut world = hecs::World::new();
        world.spawn((RenderDrawable::new(Drawable::new(MeshId(0))).hidden(),));
        world.spawn((RenderDrawable::new(Drawable::new(MeshId(1))),));
        let queue = extract_draw_queue(&world);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.as_slice()[0].mesh, MeshId(1));
    }

    #[test]
    fn extraction_follows_entity_order() {
        let mut world = hecs::World::new();
        for i in 0..4 {
            if i % 2 == 0 {
                world.spawn((RenderDrawable::new(Drawable::new(MeshId(i))),));
            } else {
                world.spawn((RenderDrawable::new(Drawable::new(MeshId(i))), Transform::new()));
            }
        }
        let meshes: Vec<MeshId> = extract_draw_queue(&world).iter().map(|d| d.mesh).collect();
        assert_eq!(meshes, vec![MeshId(0), MeshId(1), MeshId(2), MeshId(3)]);
    }
}
