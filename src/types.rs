use std::fmt;

use serde::{Deserialize, Serialize};

pub(crate) const OBJECT_CLASS: &str = "java.lang.Object";
pub(crate) const STRING_CLASS: &str = "java.lang.String";
pub(crate) const CLASS_CLASS: &str = "java.lang.Class";
pub(crate) const THROWABLE_CLASS: &str = "java.lang.Throwable";
pub(crate) const METHOD_HANDLE_CLASS: &str = "java.lang.invoke.MethodHandle";
pub(crate) const METHOD_TYPE_CLASS: &str = "java.lang.invoke.MethodType";
pub(crate) const METHOD_HANDLES_CLASS: &str = "java.lang.invoke.MethodHandles";
pub(crate) const METHOD_HANDLES_LOOKUP_CLASS: &str = "java.lang.invoke.MethodHandles$Lookup";

/// JVM primitive types, plus `void` for method return types.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl Primitive {
    /// Promotion weight used by numeric widening. Non-numeric kinds weigh 0.
    pub fn weight(self) -> u8 {
        match self {
            Primitive::Boolean | Primitive::Void => 0,
            Primitive::Byte | Primitive::Char => 1,
            Primitive::Short => 2,
            Primitive::Int => 3,
            Primitive::Long => 4,
            Primitive::Float => 5,
            Primitive::Double => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Byte => "byte",
            Primitive::Char => "char",
            Primitive::Short => "short",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Void => "void",
        }
    }
}

/// Semantic type carried by every symbolic value and IR expression.
///
/// `Null`, `Top` and `UninitThis` are the verifier's pseudo-types. `Null`
/// behaves like a primitive in the lattice (it is what `aconst_null` pushes
/// before any reference type is known); `Top` marks an unusable slot.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum TypeName {
    Primitive(Primitive),
    /// A class or interface, by its dotted binary name.
    Class(String),
    Array(Box<TypeName>),
    Null,
    Top,
    UninitThis,
}

impl TypeName {
    pub const INT: TypeName = TypeName::Primitive(Primitive::Int);
    pub const LONG: TypeName = TypeName::Primitive(Primitive::Long);
    pub const FLOAT: TypeName = TypeName::Primitive(Primitive::Float);
    pub const DOUBLE: TypeName = TypeName::Primitive(Primitive::Double);
    pub const BOOLEAN: TypeName = TypeName::Primitive(Primitive::Boolean);
    pub const VOID: TypeName = TypeName::Primitive(Primitive::Void);

    /// Builds a class type from either an internal (`java/lang/String`) or a
    /// dotted (`java.lang.String`) name.
    pub fn class(name: &str) -> TypeName {
        TypeName::Class(name.replace('/', "."))
    }

    pub fn object() -> TypeName {
        TypeName::class(OBJECT_CLASS)
    }

    pub fn string() -> TypeName {
        TypeName::class(STRING_CLASS)
    }

    pub fn throwable() -> TypeName {
        TypeName::class(THROWABLE_CLASS)
    }

    pub fn as_array(&self) -> TypeName {
        TypeName::Array(Box::new(self.clone()))
    }

    /// Element type of an array; anything else reads as `java.lang.Object`.
    pub fn element_type(&self) -> TypeName {
        match self {
            TypeName::Array(element) => (**element).clone(),
            _ => TypeName::object(),
        }
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            TypeName::Primitive(primitive) => Some(*primitive),
            _ => None,
        }
    }

    /// Primitive in the lattice sense: real primitives and the null type.
    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeName::Primitive(_) | TypeName::Null)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, TypeName::Class(_) | TypeName::Array(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeName::Array(_))
    }

    /// Category-2 values (`long`, `double`) occupy two stack words and two
    /// local slots.
    pub fn is_dword(&self) -> bool {
        matches!(
            self,
            TypeName::Primitive(Primitive::Long | Primitive::Double)
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypeName::Null)
    }

    /// Verifier pseudo-types that never refine a variable.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, TypeName::Top | TypeName::Null | TypeName::UninitThis)
    }

    fn weight(&self) -> u8 {
        self.primitive().map_or(0, Primitive::weight)
    }

    fn is_numeric(&self) -> bool {
        matches!(self, TypeName::Primitive(primitive) if *primitive != Primitive::Void)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::Primitive(primitive) => f.write_str(primitive.name()),
            TypeName::Class(name) => f.write_str(name),
            TypeName::Array(element) => write!(f, "{element}[]"),
            TypeName::Null => f.write_str("null"),
            TypeName::Top => f.write_str("TOP"),
            TypeName::UninitThis => f.write_str("UNINIT_THIS"),
        }
    }
}

/// Least upper bound of two types meeting at a join point.
///
/// `Top` absorbs everything. Two numeric primitives promote to the wider one;
/// `null` joined with a reference keeps the reference. Every other mismatch,
/// including primitive against reference, goes to `java.lang.Object`.
pub fn lub(first: &TypeName, second: &TypeName) -> TypeName {
    if first == second {
        return first.clone();
    }
    match (first, second) {
        (TypeName::Top, _) | (_, TypeName::Top) => TypeName::Top,
        (a, b) if a.is_numeric() && b.is_numeric() => wider(a, b).clone(),
        (TypeName::Null, other) | (other, TypeName::Null) if other.is_reference() => {
            other.clone()
        }
        _ => TypeName::object(),
    }
}

fn wider<'a>(first: &'a TypeName, second: &'a TypeName) -> &'a TypeName {
    if first.weight() >= second.weight() {
        first
    } else {
        second
    }
}

/// Result type of a binary arithmetic/logic instruction.
///
/// Sub-int operands compute in `int`; mixed widths take the wider operand. A
/// reference left operand is passed through unchanged.
pub fn binary_result_type(left: &TypeName, right: &TypeName) -> TypeName {
    if !left.is_primitive() {
        return left.clone();
    }
    let max = wider(left, right);
    if max.weight() <= Primitive::Int.weight() {
        TypeName::INT
    } else {
        max.clone()
    }
}

/// Result type of a negation: the operand type, promoted to at least `int`.
pub fn negation_result_type(operand: &TypeName) -> TypeName {
    if operand.weight() >= Primitive::Int.weight() {
        operand.clone()
    } else {
        TypeName::INT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim(primitive: Primitive) -> TypeName {
        TypeName::Primitive(primitive)
    }

    #[test]
    fn lub_of_identical_types_is_identity() {
        for ty in [
            TypeName::INT,
            TypeName::string(),
            TypeName::INT.as_array(),
            TypeName::Null,
            TypeName::Top,
            TypeName::UninitThis,
        ] {
            assert_eq!(lub(&ty, &ty), ty);
        }
    }

    #[test]
    fn lub_promotes_numeric_mismatches_to_wider_type() {
        assert_eq!(lub(&TypeName::INT, &TypeName::LONG), TypeName::LONG);
        assert_eq!(lub(&TypeName::LONG, &TypeName::INT), TypeName::LONG);
        assert_eq!(lub(&prim(Primitive::Byte), &prim(Primitive::Short)), prim(Primitive::Short));
        assert_eq!(lub(&TypeName::FLOAT, &TypeName::DOUBLE), TypeName::DOUBLE);
        assert_eq!(lub(&TypeName::LONG, &TypeName::FLOAT), TypeName::FLOAT);
        assert_eq!(lub(&TypeName::BOOLEAN, &TypeName::INT), TypeName::INT);
        // byte and char weigh the same; the first operand wins the tie
        assert_eq!(lub(&prim(Primitive::Byte), &prim(Primitive::Char)), prim(Primitive::Byte));
    }

    #[test]
    fn lub_with_top_is_top() {
        assert_eq!(lub(&TypeName::Top, &TypeName::INT), TypeName::Top);
        assert_eq!(lub(&TypeName::string(), &TypeName::Top), TypeName::Top);
        assert_eq!(lub(&TypeName::Null, &TypeName::Top), TypeName::Top);
        assert_eq!(lub(&TypeName::UninitThis, &TypeName::Top), TypeName::Top);
    }

    #[test]
    fn lub_of_null_and_reference_keeps_reference() {
        assert_eq!(lub(&TypeName::Null, &TypeName::string()), TypeName::string());
        assert_eq!(lub(&TypeName::string(), &TypeName::Null), TypeName::string());
        let array = TypeName::INT.as_array();
        assert_eq!(lub(&TypeName::Null, &array), array);
    }

    #[test]
    fn lub_mixing_primitive_and_reference_is_object() {
        assert_eq!(lub(&TypeName::INT, &TypeName::Null), TypeName::object());
        assert_eq!(lub(&TypeName::Null, &TypeName::LONG), TypeName::object());
        assert_eq!(lub(&TypeName::INT, &TypeName::string()), TypeName::object());
        assert_eq!(lub(&TypeName::string(), &TypeName::DOUBLE), TypeName::object());
    }

    #[test]
    fn lub_of_distinct_references_is_object() {
        assert_eq!(lub(&TypeName::string(), &TypeName::throwable()), TypeName::object());
        assert_eq!(
            lub(&TypeName::INT.as_array(), &TypeName::LONG.as_array()),
            TypeName::object()
        );
    }

    #[test]
    fn lub_of_uninitialized_this_is_object() {
        assert_eq!(lub(&TypeName::UninitThis, &TypeName::string()), TypeName::object());
        assert_eq!(lub(&TypeName::UninitThis, &TypeName::Null), TypeName::object());
        assert_eq!(lub(&TypeName::UninitThis, &TypeName::INT), TypeName::object());
    }

    #[test]
    fn lub_is_commutative_except_for_equal_weight_ties() {
        let samples = [
            TypeName::INT,
            TypeName::LONG,
            TypeName::DOUBLE,
            TypeName::Null,
            TypeName::Top,
            TypeName::UninitThis,
            TypeName::string(),
            TypeName::INT.as_array(),
        ];
        for a in &samples {
            for b in &samples {
                assert_eq!(lub(a, b), lub(b, a), "lub({a}, {b})");
            }
        }
    }

    #[test]
    fn binary_result_promotes_sub_int_operands() {
        assert_eq!(
            binary_result_type(&prim(Primitive::Byte), &prim(Primitive::Short)),
            TypeName::INT
        );
        assert_eq!(binary_result_type(&TypeName::INT, &TypeName::INT), TypeName::INT);
        assert_eq!(binary_result_type(&TypeName::LONG, &TypeName::INT), TypeName::LONG);
        assert_eq!(binary_result_type(&TypeName::INT, &TypeName::DOUBLE), TypeName::DOUBLE);
        assert_eq!(
            binary_result_type(&TypeName::string(), &TypeName::INT),
            TypeName::string()
        );
    }

    #[test]
    fn negation_keeps_wide_operands() {
        assert_eq!(negation_result_type(&TypeName::LONG), TypeName::LONG);
        assert_eq!(negation_result_type(&prim(Primitive::Char)), TypeName::INT);
    }

    #[test]
    fn renders_java_style_names() {
        assert_eq!(TypeName::class("java/util/List").to_string(), "java.util.List");
        assert_eq!(TypeName::INT.as_array().as_array().to_string(), "int[][]");
        assert_eq!(TypeName::Top.to_string(), "TOP");
    }

    #[test]
    fn dword_and_sentinel_classification() {
        assert!(TypeName::LONG.is_dword());
        assert!(TypeName::DOUBLE.is_dword());
        assert!(!TypeName::INT.is_dword());
        assert!(TypeName::Null.is_primitive());
        assert!(TypeName::Null.is_sentinel());
        assert!(!TypeName::string().is_sentinel());
        assert_eq!(TypeName::string().element_type(), TypeName::object());
        assert_eq!(TypeName::INT.as_array().element_type(), TypeName::INT);
    }
}
