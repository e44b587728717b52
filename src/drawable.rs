//! Drawables and the per-frame draw queues that carry them.

use glam::Mat4;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::device::TextureHandle;
use crate::feature::{FeatureRef, ParameterValue};
use crate::mesh::{MeshId, Transform};
use crate::step::DrawQueueId;

/// A texture bound to one of a feature's texture slots.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub name: String,
    pub texture: TextureHandle,
    /// Texcoord set to sample with. `None` keeps the slot's declared default.
    pub texcoord: Option<u32>,
}

/// One instance to render.
///
/// Parameters override the defaults declared by the drawable's features.
/// Extra drawable features are combined with the step's features when the
/// pipeline identity is computed.
///
/// ```
/// use phalanx::{Drawable, MeshId, ParameterValue, Transform};
/// use glam::{Vec3, Vec4};
///
/// let drawable = Drawable::new(MeshId(0))
///     .transform(Transform::from_position(Vec3::new(0.0, 1.0, 0.0)))
///     .parameter("tint", ParameterValue::Vec4(Vec4::new(1.0, 0.0, 0.0, 1.0)));
/// assert!(drawable.parameter_value("tint").is_some());
/// ```
#[derive(Clone, Debug)]
pub struct Drawable {
    pub mesh: MeshId,
    pub transform: Transform,
    pub parameters: SmallVec<[(String, ParameterValue); 4]>,
    pub textures: SmallVec<[TextureBinding; 2]>,
    pub features: SmallVec<[FeatureRef; 2]>,
}

impl Drawable {
    pub fn new(mesh: MeshId) -> Self {
        Self {
            mesh,
            transform: Transform::default(),
            parameters: SmallVec::new(),
            textures: SmallVec::new(),
            features: SmallVec::new(),
        }
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Sets a parameter, replacing an earlier value of the same name.
    pub fn parameter(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        let name = name.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.parameters.push((name, value)),
        }
        self
    }

    /// Binds `texture` to the slot `name`, sampled with the slot's default
    /// texcoord set.
    pub fn texture(self, name: impl Into<String>, texture: TextureHandle) -> Self {
        self.bind(name.into(), texture, None)
    }

    /// Binds `texture` to the slot `name`, sampled with texcoord set `texcoord`.
    pub fn texture_with_texcoord(self, name: impl Into<String>, texture: TextureHandle, texcoord: u32) -> Self {
        self.bind(name.into(), texture, Some(texcoord))
    }

    fn bind(mut self, name: String, texture: TextureHandle, texcoord: Option<u32>) -> Self {
        self.textures.retain(|b| b.name != name);
        self.textures.push(TextureBinding {
            name,
            texture,
            texcoord,
        });
        self
    }

    /// Adds a drawable-level feature.
    pub fn feature(mut self, feature: FeatureRef) -> Self {
        self.features.push(feature);
        self
    }

    pub fn parameter_value(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn texture_binding(&self, name: &str) -> Option<&TextureBinding> {
        self.textures.iter().find(|b| b.name == name)
    }

    pub fn world_matrix(&self) -> Mat4 {
        self.transform.matrix()
    }
}

/// Ordered per-frame sequence of drawables for one drawables step.
///
/// # Usage Pattern
///
/// ```
/// use phalanx::{DrawQueue, MeshId, ParameterValue, Transform};
///
/// let mut queue = DrawQueue::new();
/// queue.draw(MeshId(0), Transform::new());
/// queue.draw_with(MeshId(1), Transform::new(), |d| {
///     d.parameter("gloss", ParameterValue::Float(0.8))
/// });
/// assert_eq!(queue.len(), 2);
///
/// // After the frame has been rendered:
/// queue.clear_queue();
/// assert!(queue.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct DrawQueue {
    drawables: Vec<Drawable>,
}

impl DrawQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `mesh` with no parameter overrides.
    pub fn draw(&mut self, mesh: MeshId, transform: Transform) {
        self.drawables.push(Drawable::new(mesh).transform(transform));
    }

    /// Queues `mesh`, letting `configure` set parameters, textures and features.
    pub fn draw_with(&mut self, mesh: MeshId, transform: Transform, configure: impl FnOnce(Drawable) -> Drawable) {
        self.drawables
            .push(configure(Drawable::new(mesh).transform(transform)));
    }

    pub fn push(&mut self, drawable: Drawable) {
        self.drawables.push(drawable);
    }

    /// Clears the queue for the next frame.
    pub fn clear_queue(&mut self) {
        self.drawables.clear();
    }

    pub fn len(&self) -> usize {
        self.drawables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawables.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Drawable> {
        self.drawables.iter()
    }

    pub fn as_slice(&self) -> &[Drawable] {
        &self.drawables
    }
}

impl FromIterator<Drawable> for DrawQueue {
    fn from_iter<I: IntoIterator<Item = Drawable>>(iter: I) -> Self {
        Self {
            drawables: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DrawQueue {
    type Item = &'a Drawable;
    type IntoIter = std::slice::Iter<'a, Drawable>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Draw queues of one frame, keyed by the id drawables steps refer to.
#[derive(Clone, Debug, Default)]
pub struct DrawQueues {
    queues: FxHashMap<DrawQueueId, DrawQueue>,
}

impl DrawQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the queue for `id`, creating an empty one if needed.
    pub fn queue_mut(&mut self, id: DrawQueueId) -> &mut DrawQueue {
        self.queues.entry(id).or_default()
    }

    pub fn insert(&mut self, id: DrawQueueId, queue: DrawQueue) {
        self.queues.insert(id, queue);
    }

    pub fn get(&self, id: DrawQueueId) -> Option<&DrawQueue> {
        self.queues.get(&id)
    }

    /// Empties every queue, keeping the ids registered.
    pub fn clear_all(&mut self) {
        for queue in self.queues.values_mut() {
            queue.clear_queue();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_replace_by_name() {
        let d = Drawable::new(MeshId(0))
            .parameter("gloss", ParameterValue::Float(0.1))
            .parameter("gloss", ParameterValue::Float(0.9));
        assert_eq!(d.parameters.len(), 1);
        assert_eq!(d.parameter_value("gloss"), Some(&ParameterValue::Float(0.9)));
    }

    #[test]
    fn rebinding_a_texture_replaces_it() {
        let d = Drawable::new(MeshId(0))
            .texture("albedo", TextureHandle(1))
            .texture_with_texcoord("albedo", TextureHandle(2), 1);
        assert_eq!(d.textures.len(), 1);
        let binding = d.texture_binding("albedo").unwrap();
        assert_eq!(binding.texture, TextureHandle(2));
        assert_eq!(binding.texcoord, Some(1));
    }

    #[test]
    fn queues_are_created_on_demand() {
        let mut queues = DrawQueues::new();
        queues.queue_mut(DrawQueueId(3)).draw(MeshId(1), Transform::new());
        assert_eq!(queues.get(DrawQueueId(3)).map(DrawQueue::len), Some(1));
        assert!(queues.get(DrawQueueId(4)).is_none());

        queues.clear_all();
        assert_eq!(queues.get(DrawQueueId(3)).map(DrawQueue::len), Some(0));
    }
}
