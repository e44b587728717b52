//! Sorting a bucket and collapsing it into draw groups.

use smallvec::SmallVec;

use crate::device::TextureHandle;
use crate::drawable::Drawable;
use crate::hash::Hash128;
use crate::mesh::MeshId;
use crate::pipeline::TextureSlot;

use super::grouper::PipelineBucket;

/// Textures a drawable binds to each slot of its pipeline; `None` means the
/// slot is left to the device's default texture.
pub type TextureSet = SmallVec<[Option<TextureHandle>; 4]>;

/// A contiguous range of sorted drawables drawn with one call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawGroup {
    pub start: u32,
    pub count: u32,
    pub mesh: MeshId,
    pub textures: TextureSet,
}

/// A bucket's drawables in draw order plus its draw groups.
///
/// Object record `i` of the bucket's parameter buffer belongs to
/// `drawables_sorted[i]`; draw groups index into the same order.
#[derive(Clone, Debug)]
pub struct PipelineDrawables<'a> {
    pub identity: Hash128,
    pub drawables_sorted: Vec<&'a Drawable>,
    pub draw_groups: Vec<DrawGroup>,
}

impl PipelineDrawables<'_> {
    /// `(start, count)` of every draw group.
    pub fn partition(&self) -> Vec<(u32, u32)> {
        self.draw_groups.iter().map(|g| (g.start, g.count)).collect()
    }
}

/// Resolves a drawable's bindings against the pipeline's texture slots.
pub fn texture_set(drawable: &Drawable, slots: &[TextureSlot]) -> TextureSet {
    slots
        .iter()
        .map(|slot| drawable.texture_binding(&slot.name).map(|b| b.texture))
        .collect()
}

/// Sorts `bucket` by mesh, then texture set, then queue position, and
/// batches runs of equal mesh and textures.
///
/// The queue-position tie-break makes the order a pure function of the
/// queue, so unchanged queues produce unchanged draw orders.
pub fn sort_and_batch_drawables<'a>(bucket: &PipelineBucket<'a>, slots: &[TextureSlot]) -> PipelineDrawables<'a> {
    let mut keyed: Vec<(MeshId, TextureSet, usize, &'a Drawable)> = bucket
        .drawables
        .iter()
        .map(|&(index, drawable)| (drawable.mesh, texture_set(drawable, slots), index, drawable))
        .collect();
    keyed.sort_by(|a, b| (a.0, &a.1, a.2).cmp(&(b.0, &b.1, b.2)));

    let mut draw_groups: Vec<DrawGroup> = Vec::new();
    for (i, (mesh, textures, _, _)) in keyed.iter().enumerate() {
        match draw_groups.last_mut() {
            Some(group) if group.mesh == *mesh && group.textures == *textures => group.count += 1,
            _ => draw_groups.push(DrawGroup {
                start: i as u32,
                count: 1,
                mesh: *mesh,
                textures: textures.clone(),
            }),
        }
    }

    PipelineDrawables {
        identity: bucket.identity,
        drawables_sorted: keyed.into_iter().map(|(_, _, _, d)| d).collect(),
        draw_groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineKey;
    use crate::mesh::MeshFormat;
    use crate::render_graph::RenderTargetLayout;

    fn bucket(drawables: &[Drawable]) -> PipelineBucket<'_> {
        let key = PipelineKey::for_drawable(&[], &drawables[0], &MeshFormat::standard(), &RenderTargetLayout::default());
        PipelineBucket {
            identity: key.identity(),
            key,
            drawables: drawables.iter().enumerate().collect(),
        }
    }

    fn slots() -> Vec<TextureSlot> {
        vec![TextureSlot {
            name: "albedo".to_string(),
            texcoord: 0,
        }]
    }

    fn assert_partitions(batched: &PipelineDrawables<'_>) {
        let mut next = 0;
        for group in &batched.draw_groups {
            assert_eq!(group.start, next);
            assert!(group.count > 0);
            next += group.count;
        }
        assert_eq!(next as usize, batched.drawables_sorted.len());
    }

    #[test]
    fn runs_of_equal_mesh_and_textures_batch() {
        let drawables = vec![
            Drawable::new(MeshId(2)),
            Drawable::new(MeshId(1)).texture("albedo", TextureHandle(5)),
            Drawable::new(MeshId(2)),
            Drawable::new(MeshId(1)),
            Drawable::new(MeshId(1)).texture("albedo", TextureHandle(5)),
        ];
        let batched = sort_and_batch_drawables(&bucket(&drawables), &slots());

        assert_partitions(&batched);
        assert_eq!(batched.partition(), vec![(0, 1), (1, 2), (3, 2)]);
        assert_eq!(batched.draw_groups[0].textures.as_slice(), &[None]);
        assert_eq!(batched.draw_groups[1].textures.as_slice(), &[Some(TextureHandle(5))]);
        assert!(std::ptr::eq(batched.drawables_sorted[1], &drawables[1]));
        assert!(std::ptr::eq(batched.drawables_sorted[2], &drawables[4]));
    }

    #[test]
    fn order_is_deterministic() {
        let drawables: Vec<Drawable> = (0..32).map(|i| Drawable::new(MeshId(i % 5))).collect();
        let a = sort_and_batch_drawables(&bucket(&drawables), &[]);
        let b = sort_and_batch_drawables(&bucket(&drawables), &[]);
        assert_partitions(&a);
        assert_eq!(a.partition(), b.partition());
        assert!(a
            .drawables_sorted
            .iter()
            .zip(&b.drawables_sorted)
            .all(|(x, y)| std::ptr::eq(*x, *y)));
        assert_eq!(a.draw_groups.len(), 5);
    }

    #[test]
    fn unbound_slots_differ_from_bound_ones() {
        let d = Drawable::new(MeshId(0)).texture("other", TextureHandle(1));
        assert_eq!(texture_set(&d, &slots()).as_slice(), &[None]);
    }
}
