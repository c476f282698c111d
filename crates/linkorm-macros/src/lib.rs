//! Procedural macros for linkorm.
//!
//! `linkorm-macros` is the compile-time layer that turns Rust structs into
//! models the runtime can reflect over. `#[derive(Model)]` emits:
//!
//! - a static `FieldDecl` table carrying each field's raw tag strings and
//!   structural shape, consumed by the metadata resolver;
//! - a `Record` implementation giving dynamic, by-name access to column
//!   values, relation slots and embedded structs, used by the scanner and
//!   the batch loader.
//!
//! Tag strings are not interpreted here beyond `-` and `embed`; the resolver
//! validates them the first time the model is described.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;

mod infer;
mod parse;

use infer::Shape;
use parse::{FieldDef, ModelDef, parse_model};

/// Derive macro for the `Model` trait.
///
/// # Attributes
///
/// - `#[orm(table = "name")]` on the struct overrides the table name
///   (defaults to the pluralized snake_case struct name)
/// - `#[orm("...")]` on a field: primary tag, e.g. `"id,pk"`, `"-"`, `"embed"`,
///   `"relation:has-many,join:id=post_id"`, `"m2m:post_tags,link:post_id=tag_id"`
/// - `#[sql("...")]` on a field: secondary tag, e.g. `"column:title;->"`,
///   `"foreignKey:AuthorID;references:ID"`
/// - `#[serde(rename = "...")]` is read as the field's structured-data alias
///
/// The struct must also implement `Default`, `Clone` and `Debug`.
///
/// # Example
///
/// ```ignore
/// use linkorm::prelude::*;
///
/// #[derive(Model, Debug, Clone, Default)]
/// struct Post {
///     #[orm("id,pk")]
///     id: i64,
///     title: String,
///     author_id: i64,
///     #[orm("relation:belongs-to")]
///     author: Related<Person>,
///     comments: RelatedMany<Comment>,
/// }
/// ```
#[proc_macro_derive(Model, attributes(orm, sql, serde))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_model_impl(&model).into()
}

fn generate_model_impl(model: &ModelDef) -> TokenStream2 {
    let name = &model.name;
    let table_name = &model.table_name;
    let decls = generate_declarations(model);
    let record_impl = generate_record_impl(model);

    quote! {
        impl linkorm_core::Model for #name {
            const TABLE_NAME: &'static str = #table_name;

            fn declarations() -> &'static [linkorm_core::FieldDecl] {
                static DECLS: &[linkorm_core::FieldDecl] = &[#(#decls),*];
                DECLS
            }
        }

        #record_impl
    }
}

fn shape_tokens(field: &FieldDef) -> TokenStream2 {
    match &field.shape {
        Shape::Scalar => quote! { linkorm_core::FieldShape::Scalar },
        Shape::Nullable => quote! { linkorm_core::FieldShape::Nullable },
        Shape::One(ty) => quote! {
            linkorm_core::FieldShape::One(linkorm_core::ModelType::of::<#ty>)
        },
        Shape::Many(ty) => quote! {
            linkorm_core::FieldShape::Many(linkorm_core::ModelType::of::<#ty>)
        },
        Shape::Embedded { ty, optional } => quote! {
            linkorm_core::FieldShape::Embedded {
                model: linkorm_core::ModelType::of::<#ty>,
                optional: #optional,
            }
        },
    }
}

fn generate_declarations(model: &ModelDef) -> Vec<TokenStream2> {
    model
        .fields
        .iter()
        .map(|field| {
            let name = field.name.to_string();
            let shape = shape_tokens(field);
            let kind = field.kind.tokens();
            let orm = field.orm.as_ref().map(|tag| quote! { .orm(#tag) });
            let sql = field.sql.as_ref().map(|tag| quote! { .sql(#tag) });
            let data = field.data.as_ref().map(|tag| quote! { .data(#tag) });
            quote! {
                linkorm_core::FieldDecl::new(#name, #shape, #kind) #orm #sql #data
            }
        })
        .collect()
}

fn generate_record_impl(model: &ModelDef) -> TokenStream2 {
    let name = &model.name;

    let value_fields: Vec<&FieldDef> = model.fields.iter().filter(|f| f.is_value()).collect();
    let get_arms = value_fields.iter().map(|f| {
        let ident = &f.name;
        let key = ident.to_string();
        quote! { #key => Some(linkorm_core::Value::from(self.#ident.clone())), }
    });
    let set_arms = value_fields.iter().map(|f| {
        let ident = &f.name;
        let key = ident.to_string();
        let ty = &f.ty;
        let kind = f.kind.tokens();
        quote! {
            #key => {
                self.#ident = linkorm_core::decode_field::<#ty>(#key, value, #kind)?;
                Ok(())
            }
        }
    });

    let relation_fields: Vec<&FieldDef> = model
        .fields
        .iter()
        .filter(|f| matches!(f.shape, Shape::One(_) | Shape::Many(_)))
        .collect();
    let relation_arms = relation_fields.iter().map(|f| {
        let ident = &f.name;
        let key = ident.to_string();
        quote! { #key => Some(&self.#ident as &dyn linkorm_core::RelationSlot), }
    });
    let relation_mut_arms = relation_fields.iter().map(|f| {
        let ident = &f.name;
        let key = ident.to_string();
        quote! { #key => Some(&mut self.#ident as &mut dyn linkorm_core::RelationSlot), }
    });

    let embed_fields: Vec<(&FieldDef, bool)> = model
        .fields
        .iter()
        .filter_map(|f| match f.shape {
            Shape::Embedded { optional, .. } if !f.skip => Some((f, optional)),
            _ => None,
        })
        .collect();
    let embedded_arms = embed_fields.iter().map(|(f, optional)| {
        let ident = &f.name;
        let key = ident.to_string();
        if *optional {
            quote! {
                #key => self.#ident.as_ref().map(|e| e as &dyn linkorm_core::Record),
            }
        } else {
            quote! { #key => Some(&self.#ident as &dyn linkorm_core::Record), }
        }
    });
    let embedded_mut_arms = embed_fields.iter().map(|(f, optional)| {
        let ident = &f.name;
        let key = ident.to_string();
        if *optional {
            quote! {
                #key => Some(
                    self.#ident.get_or_insert_with(::core::default::Default::default)
                        as &mut dyn linkorm_core::Record
                ),
            }
        } else {
            quote! { #key => Some(&mut self.#ident as &mut dyn linkorm_core::Record), }
        }
    });

    quote! {
        impl linkorm_core::Record for #name {
            fn model_type(&self) -> linkorm_core::ModelType {
                linkorm_core::ModelType::of::<Self>()
            }

            fn get_value(&self, field: &str) -> Option<linkorm_core::Value> {
                match field {
                    #(#get_arms)*
                    _ => None,
                }
            }

            #[allow(unused_variables)]
            fn set_value(
                &mut self,
                field: &str,
                value: linkorm_core::Value,
            ) -> linkorm_core::Result<()> {
                match field {
                    #(#set_arms)*
                    _ => Err(linkorm_core::Error::config(
                        linkorm_core::ConfigErrorKind::UnknownField,
                        format!(
                            "{} has no settable field '{}'",
                            <Self as linkorm_core::Model>::TABLE_NAME,
                            field
                        ),
                    )),
                }
            }

            fn relation(&self, field: &str) -> Option<&dyn linkorm_core::RelationSlot> {
                match field {
                    #(#relation_arms)*
                    _ => None,
                }
            }

            fn relation_mut(
                &mut self,
                field: &str,
            ) -> Option<&mut dyn linkorm_core::RelationSlot> {
                match field {
                    #(#relation_mut_arms)*
                    _ => None,
                }
            }

            fn embedded(&self, field: &str) -> Option<&dyn linkorm_core::Record> {
                match field {
                    #(#embedded_arms)*
                    _ => None,
                }
            }

            fn embedded_mut(&mut self, field: &str) -> Option<&mut dyn linkorm_core::Record> {
                match field {
                    #(#embedded_mut_arms)*
                    _ => None,
                }
            }

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn into_any(
                self: ::std::boxed::Box<Self>,
            ) -> ::std::boxed::Box<dyn ::core::any::Any + Send> {
                self
            }

            fn clone_record(&self) -> ::std::boxed::Box<dyn linkorm_core::Record> {
                ::std::boxed::Box::new(::core::clone::Clone::clone(self))
            }
        }
    }
}
