//! Dependency ordering of shader entry points.
//!
//! Entry points name the entry points they depend on. The shader generator
//! needs them in an order where every dependency precedes its dependents.
//! Ties are broken by name, then declaration order, so the result is
//! deterministic for a given input. A cycle is rejected, never truncated.
//!
//! Dependencies on names no entry point in the set carries are ignored; they
//! may refer to built-ins provided by the generator.

use std::collections::BTreeSet;

use crate::feature::{EntryPoint, FeatureRef};

/// Sorts entry points topologically.
///
/// On a cycle, returns the name of the lexically smallest entry point left
/// unsorted (always a member of, or downstream of, a cycle).
pub fn sort_entry_points<'a>(entries: &[&'a EntryPoint]) -> Result<Vec<&'a EntryPoint>, String> {
    let n = entries.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];

    for (i, entry) in entries.iter().enumerate() {
        for dep in &entry.dependencies {
            if *dep == entry.name {
                return Err(entry.name.clone());
            }
            for (j, other) in entries.iter().enumerate() {
                if j != i && other.name == *dep {
                    dependents[j].push(i);
                    indegree[i] += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<(&str, usize)> = entries
        .iter()
        .enumerate()
        .filter(|(i, _)| indegree[*i] == 0)
        .map(|(i, e)| (e.name.as_str(), i))
        .collect();

    let mut sorted = Vec::with_capacity(n);
    while let Some((_, i)) = ready.pop_first() {
        sorted.push(entries[i]);
        for &d in &dependents[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert((entries[d].name.as_str(), d));
            }
        }
    }

    if sorted.len() < n {
        let stuck = entries
            .iter()
            .enumerate()
            .filter(|(i, _)| indegree[*i] > 0)
            .map(|(_, e)| e.name.as_str())
            .min()
            .unwrap_or_default();
        return Err(stuck.to_string());
    }
    Ok(sorted)
}

/// Entry points of a feature list in declaration order, with exact duplicates
/// (a feature listed twice) removed.
pub fn collect_entry_points<'a>(features: impl IntoIterator<Item = &'a FeatureRef>) -> Vec<&'a EntryPoint> {
    let mut out: Vec<&EntryPoint> = Vec::new();
    for feature in features {
        for entry in feature.entry_points() {
            if !out.iter().any(|e| *e == entry) {
                out.push(entry);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::ShaderStage;

    fn ep(name: &str, deps: &[&str]) -> EntryPoint {
        let mut e = EntryPoint::new(name, ShaderStage::Fragment, "");
        for d in deps {
            e = e.after(*d);
        }
        e
    }

    fn names(sorted: &[&EntryPoint]) -> Vec<String> {
        sorted.iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn dependencies_come_first() {
        let lighting = ep("lighting", &["normals", "albedo"]);
        let normals = ep("normals", &[]);
        let albedo = ep("albedo", &[]);
        let fog = ep("fog", &["lighting"]);
        let sorted = sort_entry_points(&[&fog, &lighting, &normals, &albedo]).unwrap();
        assert_eq!(names(&sorted), vec!["albedo", "normals", "lighting", "fog"]);
    }

    #[test]
    fn unknown_dependencies_are_ignored() {
        let a = ep("a", &["builtin_world_position"]);
        let sorted = sort_entry_points(&[&a]).unwrap();
        assert_eq!(names(&sorted), vec!["a"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let a = ep("a", &["b"]);
        let b = ep("b", &["c"]);
        let c = ep("c", &["a"]);
        let free = ep("free", &[]);
        assert_eq!(sort_entry_points(&[&a, &b, &c, &free]), Err("a".to_string()));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let a = ep("a", &["a"]);
        assert_eq!(sort_entry_points(&[&a]), Err("a".to_string()));
    }

    #[test]
    fn order_is_deterministic() {
        let x = ep("x", &[]);
        let y = ep("y", &[]);
        let first = sort_entry_points(&[&y, &x]).unwrap();
        let second = sort_entry_points(&[&x, &y]).unwrap();
        assert_eq!(names(&first), names(&second));
    }
}
