//! # Protoset Source
//!
//! Loads schema from precompiled `FileDescriptorSet` files (e.g. produced by
//! `protoc --include_imports --descriptor_set_out`). Nothing is fetched at lookup time.
use super::{DescriptorSource, SourceError};
use crate::descriptor::{Descriptor, DescriptorRegistry, RegistryError};
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};
use tracing::debug;

/// A descriptor source backed by one or more descriptor-set files.
#[derive(Debug, Clone, Default)]
pub struct ProtosetSource {
    registry: DescriptorRegistry,
}

impl ProtosetSource {
    /// Reads and merges the descriptor sets stored at `paths`.
    pub fn from_paths<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
    ) -> Result<Self, SourceError> {
        let sets = paths
            .into_iter()
            .map(|path| {
                let path = path.as_ref();
                std::fs::read(path).map_err(|source| SourceError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_bytes(sets)?)
    }

    /// Decodes and merges serialized `FileDescriptorSet`s.
    pub fn from_bytes<B: AsRef<[u8]>>(
        sets: impl IntoIterator<Item = B>,
    ) -> Result<Self, RegistryError> {
        let mut files = Vec::new();
        for set in sets {
            files.extend(FileDescriptorSet::decode(set.as_ref())?.file);
        }
        Self::from_files(files)
    }

    /// Registers raw file descriptors in an order that satisfies their imports,
    /// whatever order they are supplied in.
    pub fn from_files(files: Vec<FileDescriptorProto>) -> Result<Self, RegistryError> {
        let mut registry = DescriptorRegistry::new();
        register_batch(&mut registry, files)?;
        Ok(Self { registry })
    }

    pub fn list_services(&self) -> Vec<String> {
        self.registry.service_names()
    }

    pub fn find_symbol(&self, name: &str) -> Option<Descriptor> {
        self.registry.find_symbol(name)
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }
}

impl DescriptorSource for ProtosetSource {
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        Ok(ProtosetSource::list_services(self))
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Option<Descriptor>, SourceError> {
        Ok(ProtosetSource::find_symbol(self, name))
    }

    fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }
}

/// Registers every file whose imports are already registered, over and over, until nothing
/// is left or no progress can be made. Leftovers are either missing an import that no input
/// file provides, or are part of an import cycle.
fn register_batch(
    registry: &mut DescriptorRegistry,
    files: Vec<FileDescriptorProto>,
) -> Result<(), RegistryError> {
    let mut pending = dedup_files(files)?;
    let provided: HashSet<String> = pending.iter().map(|f| f.name().to_string()).collect();

    loop {
        let before = pending.len();
        let mut blocked = Vec::new();

        for file in pending {
            if file.dependency.iter().all(|d| registry.contains_file(d)) {
                registry.register_proto(file)?;
            } else {
                blocked.push(file);
            }
        }

        pending = blocked;
        if pending.is_empty() {
            debug!(files = provided.len(), "descriptor sets loaded");
            return Ok(());
        }
        if pending.len() == before {
            break;
        }
    }

    for file in &pending {
        if let Some(import) = file
            .dependency
            .iter()
            .find(|d| !provided.contains(*d) && !registry.contains_file(d))
        {
            return Err(RegistryError::UnresolvedImport {
                file: file.name().to_string(),
                import: import.clone(),
            });
        }
    }

    Err(RegistryError::CyclicDependency {
        cycle: find_cycle(&pending),
    })
}

/// Collapses byte-identical repeats of a filename (common when several sets embed the same
/// well-known types) and rejects conflicting ones.
fn dedup_files(files: Vec<FileDescriptorProto>) -> Result<Vec<FileDescriptorProto>, RegistryError> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<FileDescriptorProto> = Vec::with_capacity(files.len());

    for file in files {
        let name = file.name.clone().ok_or(RegistryError::MissingFileName)?;
        match seen.get(&name) {
            Some(&index) if unique[index] == file => continue,
            Some(_) => {
                return Err(RegistryError::DuplicateSymbol {
                    symbol: name.clone(),
                    existing_file: name.clone(),
                    new_file: name,
                });
            }
            None => {
                seen.insert(name, unique.len());
                unique.push(file);
            }
        }
    }

    Ok(unique)
}

/// Every leftover file imports at least one other leftover, so walking imports inside the
/// leftover set always ends up revisiting a file.
fn find_cycle(pending: &[FileDescriptorProto]) -> Vec<String> {
    let graph: HashMap<&str, &FileDescriptorProto> =
        pending.iter().map(|f| (f.name(), f)).collect();

    let mut path: Vec<&str> = Vec::new();
    let mut current = pending.first().map(|f| f.name());

    while let Some(name) = current {
        if let Some(position) = path.iter().position(|seen| *seen == name) {
            let mut cycle: Vec<String> = path[position..].iter().map(|s| s.to_string()).collect();
            cycle.push(name.to_string());
            return cycle;
        }
        path.push(name);
        current = graph.get(name).and_then(|file| {
            file.dependency
                .iter()
                .map(String::as_str)
                .find(|import| graph.contains_key(import))
        });
    }

    path.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::DescriptorProto;

    fn file(name: &str, imports: &[&str], messages: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: Some("batch".to_string()),
            dependency: imports.iter().map(|s| s.to_string()).collect(),
            message_type: messages
                .iter()
                .map(|m| DescriptorProto {
                    name: Some(m.to_string()),
                    ..Default::default()
                })
                .collect(),
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_importers_may_come_before_their_imports() {
        let source = ProtosetSource::from_files(vec![
            file("a.proto", &["b.proto"], &["A"]),
            file("b.proto", &["c.proto"], &["B"]),
            file("c.proto", &[], &["C"]),
        ])
        .unwrap();

        let names: Vec<_> = source
            .registry()
            .all_files()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["c.proto", "b.proto", "a.proto"]);
    }

    #[test]
    fn test_missing_import_is_unresolved() {
        let result = ProtosetSource::from_files(vec![
            file("a.proto", &["b.proto"], &["A"]),
            file("b.proto", &["nowhere.proto"], &["B"]),
        ]);

        assert!(matches!(
            result,
            Err(RegistryError::UnresolvedImport { file, import })
                if file == "b.proto" && import == "nowhere.proto"
        ));
    }

    #[test]
    fn test_mutual_imports_are_cyclic() {
        let result = ProtosetSource::from_files(vec![
            file("a.proto", &["b.proto"], &["A"]),
            file("b.proto", &["a.proto"], &["B"]),
        ]);

        match result {
            Err(RegistryError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["a.proto", "b.proto", "a.proto"])
            }
            other => panic!("Expected CyclicDependency, got: {:?}", other),
        }
    }

    #[test]
    fn test_identical_files_across_sets_are_merged() {
        let first = FileDescriptorSet {
            file: vec![
                file("common.proto", &[], &["Common"]),
                file("a.proto", &["common.proto"], &["A"]),
            ],
        };
        let second = FileDescriptorSet {
            file: vec![
                file("common.proto", &[], &["Common"]),
                file("b.proto", &["common.proto"], &["B"]),
            ],
        };

        let source =
            ProtosetSource::from_bytes([first.encode_to_vec(), second.encode_to_vec()]).unwrap();

        assert_eq!(source.registry().all_files().len(), 3);
        assert!(source.find_symbol("batch.A").is_some());
        assert!(source.find_symbol("batch.B").is_some());
    }

    #[test]
    fn test_symbol_defined_in_two_files_is_duplicate() {
        let result = ProtosetSource::from_files(vec![
            file("a.proto", &[], &["Shared"]),
            file("b.proto", &[], &["Shared"]),
        ]);

        assert!(matches!(
            result,
            Err(RegistryError::DuplicateSymbol { symbol, .. }) if symbol == "batch.Shared"
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = ProtosetSource::from_paths(["/definitely/not/here.protoset"]);

        assert!(matches!(result, Err(SourceError::Io { .. })));
    }
}
