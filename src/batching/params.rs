//! Packs per-object parameter records in sorted draw order.

use crate::drawable::Drawable;
use crate::feature::ParameterValue;
use crate::pipeline::bindings::WORLD;
use crate::pipeline::{BufferLayout, FieldSource};

/// Writes one record per drawable, laid out by `layout`.
///
/// Built-in `world` receives the drawable's transform; every other field
/// takes the drawable's override, or the declared default when the drawable
/// does not set it. Overrides of the wrong type fall back to the default.
pub fn pack_object_records(layout: &BufferLayout, drawables: &[&Drawable]) -> Vec<u8> {
    if layout.is_empty() {
        return Vec::new();
    }
    let stride = layout.stride as usize;
    let defaults = layout.default_record();
    let mut data = Vec::with_capacity(stride * drawables.len());
    for drawable in drawables {
        let start = data.len();
        data.extend_from_slice(&defaults);
        let record = &mut data[start..start + stride];
        for field in &layout.fields {
            let value = match (&field.source, field.name.as_str()) {
                (FieldSource::Builtin, WORLD) => ParameterValue::Mat4(drawable.world_matrix()),
                _ => match drawable.parameter_value(&field.name) {
                    Some(value) if value.ty() == field.ty => *value,
                    Some(value) => {
                        log::warn!(
                            "parameter '{}' set as {} but declared as {}; using the default",
                            field.name,
                            value.ty(),
                            field.ty
                        );
                        continue;
                    }
                    None => continue,
                },
            };
            let offset = field.offset as usize;
            value.write_to(&mut record[offset..offset + field.ty.size() as usize]);
        }
    }
    data
}

/// A single record of defaults, for fullscreen passes.
pub fn default_records(layout: &BufferLayout) -> Vec<u8> {
    if layout.is_empty() {
        Vec::new()
    } else {
        layout.default_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::mesh::{MeshId, Transform};
    use crate::pipeline::bindings::collect_bindings;
    use glam::{Mat4, Vec3, Vec4};

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn records_hold_overrides_and_defaults() {
        let feature = Feature::builder("f")
            .parameter("tint", ParameterValue::Vec4(Vec4::new(0.5, 0.5, 0.5, 1.0)))
            .parameter("gloss", ParameterValue::Float(0.25))
            .build();
        let layout = collect_bindings(&[feature], true).unwrap().object;
        let moved = Drawable::new(MeshId(0))
            .transform(Transform::from_position(Vec3::new(1.0, 2.0, 3.0)))
            .parameter("gloss", ParameterValue::Float(0.75));
        let plain = Drawable::new(MeshId(0));

        let data = pack_object_records(&layout, &[&moved, &plain]);
        let stride = layout.stride as usize;
        assert_eq!(data.len(), stride * 2);

        let first = floats(&data[..stride]);
        assert_eq!(&first[12..15], &[1.0, 2.0, 3.0]);
        assert_eq!(&first[16..20], &[0.5, 0.5, 0.5, 1.0]);
        assert_eq!(first[20], 0.75);

        let second = floats(&data[stride..]);
        assert_eq!(&second[..16], &Mat4::IDENTITY.to_cols_array());
        assert_eq!(second[20], 0.25);
    }

    #[test]
    fn mistyped_overrides_keep_defaults() {
        let feature = Feature::builder("f")
            .parameter("gloss", ParameterValue::Float(0.25))
            .build();
        let layout = collect_bindings(&[feature], false).unwrap().object;
        let drawable = Drawable::new(MeshId(0)).parameter("gloss", ParameterValue::Vec2(glam::Vec2::ONE));
        let data = pack_object_records(&layout, &[&drawable]);
        assert_eq!(floats(&data)[0], 0.25);
    }

    #[test]
    fn empty_layouts_pack_nothing() {
        let layout = BufferLayout::default();
        assert!(pack_object_records(&layout, &[&Drawable::new(MeshId(0))]).is_empty());
        assert!(default_records(&layout).is_empty());
    }
}
