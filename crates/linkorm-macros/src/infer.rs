//! Shape and value-kind inference from Rust field types.

use proc_macro2::TokenStream;
use quote::{ToTokens, quote};
use syn::{GenericArgument, PathArguments, Type};

/// Structural shape of a field, as emitted into its `FieldDecl`.
#[derive(Debug, Clone)]
pub enum Shape {
    Scalar,
    Nullable,
    One(Type),
    Many(Type),
    Embedded { ty: Type, optional: bool },
}

/// Value kind the generated setter coerces incoming values toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Json,
    Any,
}

impl FieldKind {
    pub fn tokens(self) -> TokenStream {
        match self {
            FieldKind::Bool => quote! { linkorm_core::ValueKind::Bool },
            FieldKind::Int => quote! { linkorm_core::ValueKind::Int },
            FieldKind::Float => quote! { linkorm_core::ValueKind::Float },
            FieldKind::Text => quote! { linkorm_core::ValueKind::Text },
            FieldKind::Bytes => quote! { linkorm_core::ValueKind::Bytes },
            FieldKind::Json => quote! { linkorm_core::ValueKind::Json },
            FieldKind::Any => quote! { linkorm_core::ValueKind::Any },
        }
    }
}

/// Classify a field type.
///
/// `Related<T>` and `RelatedMany<T>` are relations whatever the tags say;
/// `embed` turns a struct (or `Option` of one) into a flattened embed.
pub fn detect_shape(ty: &Type, embed: bool) -> Shape {
    match last_segment(ty) {
        Some(("Related", Some(inner))) => return Shape::One(inner),
        Some(("RelatedMany", Some(inner))) => return Shape::Many(inner),
        _ => {}
    }

    let optional = is_option_type(ty);
    if embed {
        let inner = unwrap_option_type(ty);
        if infer_kind(inner) == FieldKind::Any {
            return Shape::Embedded {
                ty: inner.clone(),
                optional,
            };
        }
    }

    if optional { Shape::Nullable } else { Shape::Scalar }
}

/// Infer the value kind from a Rust type, looking through `Option<T>`.
pub fn infer_kind(ty: &Type) -> FieldKind {
    let inner = unwrap_option_type(ty);
    match type_to_string(inner).as_str() {
        "bool" => FieldKind::Bool,
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            FieldKind::Int
        }
        "f32" | "f64" => FieldKind::Float,
        "String" | "&str" | "str" | "char" => FieldKind::Text,
        "Vec<u8>" | "&[u8]" => FieldKind::Bytes,
        "serde_json::Value" | "Value" => FieldKind::Json,
        _ => FieldKind::Any,
    }
}

pub fn is_option_type(ty: &Type) -> bool {
    matches!(last_segment(ty), Some(("Option", Some(_))))
}

/// If the type is `Option<T>`, return `T`.
pub fn unwrap_option_type(ty: &Type) -> &Type {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(inner)) = args.args.first() {
                        return inner;
                    }
                }
            }
        }
    }
    ty
}

/// Last path segment name and its first type argument, if any.
fn last_segment(ty: &Type) -> Option<(&'static str, Option<Type>)> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    let name = match segment.ident.to_string().as_str() {
        "Related" => "Related",
        "RelatedMany" => "RelatedMany",
        "Option" => "Option",
        _ => return None,
    };
    let inner = match &segment.arguments {
        PathArguments::AngleBracketed(args) => args.args.iter().find_map(|arg| match arg {
            GenericArgument::Type(t) => Some(t.clone()),
            _ => None,
        }),
        _ => None,
    };
    Some((name, inner))
}

/// Render a type without spaces for matching (`Vec < u8 >` becomes `Vec<u8>`).
fn type_to_string(ty: &Type) -> String {
    ty.to_token_stream().to_string().replace(' ', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_shapes() {
        let ty: Type = parse_quote!(Related<Person>);
        assert!(matches!(detect_shape(&ty, false), Shape::One(_)));

        let ty: Type = parse_quote!(linkorm::RelatedMany<Comment>);
        assert!(matches!(detect_shape(&ty, false), Shape::Many(_)));

        let ty: Type = parse_quote!(Option<i64>);
        assert!(matches!(detect_shape(&ty, false), Shape::Nullable));

        let ty: Type = parse_quote!(Option<Audit>);
        assert!(matches!(
            detect_shape(&ty, true),
            Shape::Embedded { optional: true, .. }
        ));

        let ty: Type = parse_quote!(Audit);
        assert!(matches!(
            detect_shape(&ty, true),
            Shape::Embedded { optional: false, .. }
        ));

        let ty: Type = parse_quote!(i64);
        assert!(matches!(detect_shape(&ty, true), Shape::Scalar));
    }

    #[test]
    fn test_kinds() {
        let cases: [(Type, FieldKind); 7] = [
            (parse_quote!(i32), FieldKind::Int),
            (parse_quote!(Option<u64>), FieldKind::Int),
            (parse_quote!(f64), FieldKind::Float),
            (parse_quote!(Option<String>), FieldKind::Text),
            (parse_quote!(Vec<u8>), FieldKind::Bytes),
            (parse_quote!(serde_json::Value), FieldKind::Json),
            (parse_quote!([u8; 16]), FieldKind::Any),
        ];
        for (ty, expected) in cases {
            assert_eq!(infer_kind(&ty), expected, "{}", type_to_string(&ty));
        }
    }
}
