use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::error::{BuildError, BuildResult};
use crate::types::{Primitive, TypeName};

/// Parsed method descriptor: parameter types and return type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodType {
    pub parameters: Vec<TypeName>,
    pub return_type: TypeName,
}

impl From<&TypeDescriptor> for TypeName {
    fn from(descriptor: &TypeDescriptor) -> Self {
        let primitive = match descriptor {
            TypeDescriptor::Boolean => Primitive::Boolean,
            TypeDescriptor::Byte => Primitive::Byte,
            TypeDescriptor::Char => Primitive::Char,
            TypeDescriptor::Short => Primitive::Short,
            TypeDescriptor::Integer => Primitive::Int,
            TypeDescriptor::Long => Primitive::Long,
            TypeDescriptor::Float => Primitive::Float,
            TypeDescriptor::Double => Primitive::Double,
            TypeDescriptor::Void => Primitive::Void,
            TypeDescriptor::Object(name) => return TypeName::class(name),
            TypeDescriptor::Array(element, dimensions) => {
                return (0..*dimensions).fold(TypeName::from(element.as_ref()), |ty, _| ty.as_array());
            }
        };
        TypeName::Primitive(primitive)
    }
}

/// Parse a field descriptor such as `I`, `[J` or `Ljava/lang/String;`.
pub fn parse_field_descriptor(descriptor: &str) -> BuildResult<TypeName> {
    let parsed: TypeDescriptor = descriptor
        .parse()
        .map_err(|_| malformed(descriptor, "not a field descriptor"))?;
    let ty = TypeName::from(&parsed);
    if ty == TypeName::VOID {
        return Err(malformed(descriptor, "void is not a field type"));
    }
    if contains_void(&ty) {
        return Err(malformed(descriptor, "array of void"));
    }
    Ok(ty)
}

/// Parse a method descriptor such as `(ILjava/lang/String;)V`.
pub fn parse_method_descriptor(descriptor: &str) -> BuildResult<MethodType> {
    let parsed: MethodDescriptor = descriptor
        .parse()
        .map_err(|_| malformed(descriptor, "not a method descriptor"))?;
    let parameters: Vec<TypeName> = parsed.parameter_types().iter().map(TypeName::from).collect();
    if parameters.iter().any(|ty| *ty == TypeName::VOID) {
        return Err(malformed(descriptor, "void parameter"));
    }
    let return_type = TypeName::from(parsed.return_type());
    if parameters.iter().chain([&return_type]).any(contains_void) {
        return Err(malformed(descriptor, "array of void"));
    }
    Ok(MethodType {
        parameters,
        return_type,
    })
}

/// Resolve a name as it appears in `new`, `checkcast`, `anewarray` or
/// verifier frames: internal class names, or array descriptors for arrays.
pub fn parse_internal_name(name: &str) -> BuildResult<TypeName> {
    if name.is_empty() {
        return Err(malformed(name, "empty class name"));
    }
    if name.starts_with('[') {
        return parse_field_descriptor(name);
    }
    Ok(TypeName::class(name))
}

fn contains_void(ty: &TypeName) -> bool {
    match ty {
        TypeName::Array(element) => **element == TypeName::VOID || contains_void(element),
        _ => false,
    }
}

fn malformed(descriptor: &str, reason: &'static str) -> BuildError {
    BuildError::MalformedDescriptor {
        descriptor: descriptor.to_string(),
        reason,
    }
}
