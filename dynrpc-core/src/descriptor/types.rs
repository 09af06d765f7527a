use prost_reflect::{
    EnumDescriptor, FileDescriptor, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};

/// A generic wrapper for the kinds of Protobuf symbols a registry can resolve.
///
/// Symbol lookups return a single type regardless of whether the name points to a
/// Service, a Method, a Message, or an Enum.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Service(ServiceDescriptor),
    Method(MethodDescriptor),
    Message(MessageDescriptor),
    Enum(EnumDescriptor),
}

impl Descriptor {
    /// Returns the short name (e.g.,`MyMessage`) of the inner descriptor
    pub fn name(&self) -> &str {
        match self {
            Descriptor::Service(v) => v.name(),
            Descriptor::Method(v) => v.name(),
            Descriptor::Message(v) => v.name(),
            Descriptor::Enum(v) => v.name(),
        }
    }

    /// Returns the full name (e.g.,`my.package.v1.MyMessage`) of the inner descriptor
    pub fn full_name(&self) -> &str {
        match self {
            Descriptor::Service(v) => v.full_name(),
            Descriptor::Method(v) => v.full_name(),
            Descriptor::Message(v) => v.full_name(),
            Descriptor::Enum(v) => v.full_name(),
        }
    }

    /// Returns the file that defines the inner descriptor
    pub fn parent_file(&self) -> FileDescriptor {
        match self {
            Descriptor::Service(v) => v.parent_file(),
            Descriptor::Method(v) => v.parent_service().parent_file(),
            Descriptor::Message(v) => v.parent_file(),
            Descriptor::Enum(v) => v.parent_file(),
        }
    }

    pub fn service_descriptor(&self) -> Option<&ServiceDescriptor> {
        match self {
            Descriptor::Service(d) => Some(d),
            _ => None,
        }
    }

    pub fn method_descriptor(&self) -> Option<&MethodDescriptor> {
        match self {
            Descriptor::Method(d) => Some(d),
            _ => None,
        }
    }

    pub fn message_descriptor(&self) -> Option<&MessageDescriptor> {
        match self {
            Descriptor::Message(d) => Some(d),
            _ => None,
        }
    }

    pub fn enum_descriptor(&self) -> Option<&EnumDescriptor> {
        match self {
            Descriptor::Enum(d) => Some(d),
            _ => None,
        }
    }
}
