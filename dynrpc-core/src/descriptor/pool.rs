use super::Descriptor;
use prost::Message;
use prost_reflect::{DescriptorError, DescriptorPool, FileDescriptor, ServiceDescriptor};
use prost_types::{DescriptorProto, FileDescriptorProto, FileDescriptorSet};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("File '{file}' imports '{import}', which has not been registered")]
    UnresolvedImport { file: String, import: String },

    #[error("Cyclic import detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Symbol '{symbol}' defined in '{new_file}' is already defined in '{existing_file}'")]
    DuplicateSymbol {
        symbol: String,
        existing_file: String,
        new_file: String,
    },

    #[error("File descriptor has no name")]
    MissingFileName,

    #[error("Failed to decode FileDescriptorProto: '{0}'")]
    InvalidDescriptor(#[from] prost::DecodeError),

    #[error("File descriptor was rejected: '{0}'")]
    Descriptor(#[from] DescriptorError),
}

/// An append-only pool of file descriptors.
///
/// Every file is registered after the files it imports, so any descriptor reachable from the
/// registry is fully linked. Symbol names are unique across all registered files.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    pool: DescriptorPool,
    /// Registered filenames, in registration order.
    order: Vec<String>,
    files: HashMap<String, FileDescriptorProto>,
    /// Fully qualified symbol name -> defining filename.
    symbols: HashMap<String, String>,
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self {
            pool: DescriptorPool::new(),
            order: Vec::new(),
            files: HashMap::new(),
            symbols: HashMap::new(),
        }
    }

    /// Decodes a serialized `FileDescriptorProto` and registers it.
    pub fn register(&mut self, file_bytes: &[u8]) -> Result<FileDescriptor, RegistryError> {
        let file = FileDescriptorProto::decode(file_bytes)?;
        self.register_proto(file)
    }

    /// Registers a single file whose imports must all be registered already.
    ///
    /// Registering a file that is byte-for-byte identical to an already registered one is a
    /// no-op; registering different content under an existing filename is an error.
    pub fn register_proto(
        &mut self,
        file: FileDescriptorProto,
    ) -> Result<FileDescriptor, RegistryError> {
        let name = file.name.clone().ok_or(RegistryError::MissingFileName)?;

        if let Some(existing) = self.files.get(&name) {
            if *existing == file {
                return Ok(self.registered_file(&name));
            }
            return Err(RegistryError::DuplicateSymbol {
                symbol: name.clone(),
                existing_file: name.clone(),
                new_file: name,
            });
        }

        if let Some(import) = file
            .dependency
            .iter()
            .find(|import| !self.files.contains_key(*import))
        {
            return Err(RegistryError::UnresolvedImport {
                file: name,
                import: import.clone(),
            });
        }

        let defined = defined_symbols(&file);
        for symbol in &defined {
            if let Some(existing_file) = self.symbols.get(symbol) {
                return Err(RegistryError::DuplicateSymbol {
                    symbol: symbol.clone(),
                    existing_file: existing_file.clone(),
                    new_file: name,
                });
            }
        }

        self.pool.add_file_descriptor_proto(file.clone())?;

        debug!(file = %name, symbols = defined.len(), "registered file descriptor");

        self.symbols
            .extend(defined.into_iter().map(|symbol| (symbol, name.clone())));
        self.files.insert(name.clone(), file);
        self.order.push(name.clone());

        Ok(self.registered_file(&name))
    }

    /// Registers `name` from a set of staged (fetched but not yet registered) files,
    /// registering its staged imports first, depth-first.
    ///
    /// Fails with [`RegistryError::CyclicDependency`] when a file is reached again while
    /// its own imports are still being resolved, and with [`RegistryError::UnresolvedImport`]
    /// when an import is neither registered nor staged.
    pub fn register_resolved(
        &mut self,
        name: &str,
        staged: &HashMap<String, FileDescriptorProto>,
    ) -> Result<FileDescriptor, RegistryError> {
        let mut in_progress = Vec::new();
        self.resolve(name, name, staged, &mut in_progress)?;
        Ok(self.registered_file(name))
    }

    fn resolve(
        &mut self,
        name: &str,
        importer: &str,
        staged: &HashMap<String, FileDescriptorProto>,
        in_progress: &mut Vec<String>,
    ) -> Result<(), RegistryError> {
        if self.contains_file(name) {
            return Ok(());
        }

        if let Some(position) = in_progress.iter().position(|file| file == name) {
            let mut cycle = in_progress[position..].to_vec();
            cycle.push(name.to_string());
            return Err(RegistryError::CyclicDependency { cycle });
        }

        let file = staged
            .get(name)
            .ok_or_else(|| RegistryError::UnresolvedImport {
                file: importer.to_string(),
                import: name.to_string(),
            })?;

        in_progress.push(name.to_string());
        for import in &file.dependency {
            self.resolve(import, name, staged, in_progress)?;
        }
        in_progress.pop();

        self.register_proto(file.clone())?;
        Ok(())
    }

    /// Looks up a fully qualified symbol. The match is exact and case-sensitive.
    ///
    /// Methods resolve as `package.Service.Method`.
    pub fn find_symbol(&self, name: &str) -> Option<Descriptor> {
        if let Some(descriptor) = self.pool.get_service_by_name(name) {
            return Some(Descriptor::Service(descriptor));
        }
        if let Some(descriptor) = self.pool.get_message_by_name(name) {
            return Some(Descriptor::Message(descriptor));
        }
        if let Some(descriptor) = self.pool.get_enum_by_name(name) {
            return Some(Descriptor::Enum(descriptor));
        }

        let (service, method) = name.rsplit_once('.')?;
        self.pool
            .get_service_by_name(service)?
            .methods()
            .find(|m| m.name() == method)
            .map(Descriptor::Method)
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// All registered files, in registration order.
    pub fn all_files(&self) -> Vec<FileDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.pool.get_file_by_name(name))
            .collect()
    }

    /// All services, in file registration order and then declaration order.
    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.all_files()
            .iter()
            .flat_map(|file| file.services())
            .collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services()
            .iter()
            .map(|s| s.full_name().to_string())
            .collect()
    }

    /// Serializes every registered file into a `FileDescriptorSet`, in registration order,
    /// so the registry can be reloaded offline.
    pub fn encode_descriptor_set(&self) -> Vec<u8> {
        let set = FileDescriptorSet {
            file: self
                .order
                .iter()
                .filter_map(|name| self.files.get(name).cloned())
                .collect(),
        };
        set.encode_to_vec()
    }

    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.pool
    }

    fn registered_file(&self, name: &str) -> FileDescriptor {
        self.pool
            .get_file_by_name(name)
            .expect("registered files are always present in the pool")
    }
}

/// Collects the fully qualified names of the messages, enums and services a file defines.
fn defined_symbols(file: &FileDescriptorProto) -> Vec<String> {
    let package = file.package();
    let mut symbols = Vec::new();

    for message in &file.message_type {
        collect_message_symbols(package, message, &mut symbols);
    }
    for enum_type in &file.enum_type {
        symbols.push(qualify(package, enum_type.name()));
    }
    for service in &file.service {
        symbols.push(qualify(package, service.name()));
    }

    symbols
}

fn collect_message_symbols(scope: &str, message: &DescriptorProto, symbols: &mut Vec<String>) {
    let name = qualify(scope, message.name());

    for nested in &message.nested_type {
        collect_message_symbols(&name, nested, symbols);
    }
    for enum_type in &message.enum_type {
        symbols.push(qualify(&name, enum_type.name()));
    }

    symbols.push(name);
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{MethodDescriptorProto, ServiceDescriptorProto};

    fn file(name: &str, imports: &[&str], messages: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: Some("test".to_string()),
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

    fn staged(files: Vec<FileDescriptorProto>) -> HashMap<String, FileDescriptorProto> {
        files
            .into_iter()
            .map(|f| (f.name().to_string(), f))
            .collect()
    }

    #[test]
    fn test_import_must_be_registered_first() {
        let mut registry = DescriptorRegistry::new();

        let result = registry.register_proto(file("a.proto", &["b.proto"], &["A"]));
        assert!(matches!(
            result,
            Err(RegistryError::UnresolvedImport { file, import })
                if file == "a.proto" && import == "b.proto"
        ));

        registry
            .register_proto(file("b.proto", &[], &["B"]))
            .unwrap();
        registry
            .register_proto(file("a.proto", &["b.proto"], &["A"]))
            .unwrap();

        let names: Vec<_> = registry
            .all_files()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["b.proto", "a.proto"]);
    }

    #[test]
    fn test_register_from_bytes() {
        let mut registry = DescriptorRegistry::new();
        let bytes = file("b.proto", &[], &["B"]).encode_to_vec();

        let descriptor = registry.register(&bytes).unwrap();

        assert_eq!(descriptor.name(), "b.proto");
        assert!(registry.find_symbol("test.B").is_some());
    }

    #[test]
    fn test_resolved_registration_orders_imports() {
        let mut registry = DescriptorRegistry::new();
        let files = staged(vec![
            file("a.proto", &["b.proto"], &["A"]),
            file("b.proto", &["c.proto"], &["B"]),
            file("c.proto", &[], &["C"]),
        ]);

        registry.register_resolved("a.proto", &files).unwrap();

        let names: Vec<_> = registry
            .all_files()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["c.proto", "b.proto", "a.proto"]);
    }

    #[test]
    fn test_resolved_registration_detects_cycles() {
        let mut registry = DescriptorRegistry::new();
        let files = staged(vec![
            file("a.proto", &["b.proto"], &["A"]),
            file("b.proto", &["a.proto"], &["B"]),
        ]);

        let result = registry.register_resolved("a.proto", &files);

        match result {
            Err(RegistryError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["a.proto", "b.proto", "a.proto"])
            }
            other => panic!("Expected CyclicDependency, got: {:?}", other),
        }
        assert!(registry.all_files().is_empty());
    }

    #[test]
    fn test_resolved_registration_reports_missing_import() {
        let mut registry = DescriptorRegistry::new();
        let files = staged(vec![file("a.proto", &["missing.proto"], &["A"])]);

        let result = registry.register_resolved("a.proto", &files);

        assert!(matches!(
            result,
            Err(RegistryError::UnresolvedImport { file, import })
                if file == "a.proto" && import == "missing.proto"
        ));
    }

    #[test]
    fn test_duplicate_symbol_is_rejected_at_registration() {
        let mut registry = DescriptorRegistry::new();
        registry
            .register_proto(file("a.proto", &[], &["Shared"]))
            .unwrap();

        let result = registry.register_proto(file("b.proto", &[], &["Shared"]));

        assert!(matches!(
            result,
            Err(RegistryError::DuplicateSymbol { symbol, existing_file, new_file })
                if symbol == "test.Shared" && existing_file == "a.proto" && new_file == "b.proto"
        ));
    }

    #[test]
    fn test_identical_file_registration_is_a_noop() {
        let mut registry = DescriptorRegistry::new();
        registry
            .register_proto(file("a.proto", &[], &["A"]))
            .unwrap();
        registry
            .register_proto(file("a.proto", &[], &["A"]))
            .unwrap();

        assert_eq!(registry.all_files().len(), 1);

        let result = registry.register_proto(file("a.proto", &[], &["Other"]));
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateSymbol { .. })
        ));
    }

    #[test]
    fn test_find_symbol_is_exact() {
        let mut registry = DescriptorRegistry::new();
        let mut greeter = file("greeter.proto", &[], &["HelloRequest"]);
        greeter.service.push(ServiceDescriptorProto {
            name: Some("Greeter".to_string()),
            method: vec![MethodDescriptorProto {
                name: Some("SayHello".to_string()),
                input_type: Some(".test.HelloRequest".to_string()),
                output_type: Some(".test.HelloRequest".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        });
        registry.register_proto(greeter).unwrap();

        assert!(matches!(
            registry.find_symbol("test.Greeter"),
            Some(Descriptor::Service(_))
        ));
        assert!(matches!(
            registry.find_symbol("test.Greeter.SayHello"),
            Some(Descriptor::Method(m)) if !m.is_client_streaming() && !m.is_server_streaming()
        ));
        assert!(matches!(
            registry.find_symbol("test.HelloRequest"),
            Some(Descriptor::Message(_))
        ));
        assert!(registry.find_symbol("test.greeter").is_none());
        assert!(registry.find_symbol("HelloRequest").is_none());
        assert_eq!(registry.service_names(), vec!["test.Greeter"]);
    }

    #[test]
    fn test_encoded_descriptor_set_reloads() {
        let mut registry = DescriptorRegistry::new();
        registry
            .register_proto(file("b.proto", &[], &["B"]))
            .unwrap();
        registry
            .register_proto(file("a.proto", &["b.proto"], &["A"]))
            .unwrap();

        let bytes = registry.encode_descriptor_set();
        let set = FileDescriptorSet::decode(bytes.as_slice()).unwrap();

        let names: Vec<_> = set.file.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["b.proto", "a.proto"]);

        let pool = DescriptorPool::decode(bytes.as_slice()).unwrap();
        assert!(pool.get_message_by_name("test.A").is_some());
    }
}
