//! Parsing logic for the Model derive macro.
//!
//! This module extracts the struct-level `#[orm(table = "...")]` attribute and
//! the raw tag strings attached to each field. Tag strings are carried through
//! verbatim; their grammar is checked by the metadata resolver at runtime.

use crate::infer::{FieldKind, Shape, detect_shape, infer_kind};
use syn::punctuated::Punctuated;
use syn::{
    Attribute, Data, DeriveInput, Error, Expr, ExprLit, Fields, Ident, Lit, LitStr, Meta, Result,
    Token, Type,
};

/// Parsed model definition from a struct with `#[derive(Model)]`.
#[derive(Debug)]
pub struct ModelDef {
    /// The struct name (e.g., `Post`).
    pub name: Ident,
    /// The SQL table name (e.g., `"posts"`).
    pub table_name: String,
    pub fields: Vec<FieldDef>,
}

/// Parsed field definition from a struct field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    pub ty: Type,
    /// Primary tag: `#[orm("...")]`.
    pub orm: Option<String>,
    /// Secondary tag: `#[sql("...")]`.
    pub sql: Option<String>,
    /// Structured-data alias: `#[serde(rename = "...")]`.
    pub data: Option<String>,
    pub shape: Shape,
    pub kind: FieldKind,
    /// `-` in the primary or secondary tag.
    pub skip: bool,
}

impl FieldDef {
    /// Does this field carry a plain column value the accessors can read and write?
    pub fn is_value(&self) -> bool {
        !self.skip && matches!(self.shape, Shape::Scalar | Shape::Nullable)
    }
}

/// Parse a `DeriveInput` into a `ModelDef`.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let name = input.ident.clone();

    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Model cannot be derived for generic structs",
        ));
    }

    let table_name = match parse_struct_attrs(&input.attrs)? {
        Some(table) => table,
        None => pluralize(&to_snake_case(&name.to_string())),
    };

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named
                .named
                .iter()
                .map(parse_field)
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(Error::new_spanned(
                    input,
                    "Model requires a struct with named fields",
                ));
            }
        },
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    Ok(ModelDef {
        name,
        table_name,
        fields,
    })
}

/// Parse struct-level `#[orm(table = "name")]`.
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<Option<String>> {
    let mut table = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("orm")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().trim().is_empty() {
                    return Err(meta.error("table name cannot be empty"));
                }
                table = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unknown struct attribute, expected `table = \"...\"`"))
            }
        })?;
    }
    Ok(table)
}

fn parse_field(field: &syn::Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "Model fields must be named"))?;

    let orm = tag_string(&field.attrs, "orm")?;
    let sql = tag_string(&field.attrs, "sql")?;
    let data = serde_rename(&field.attrs)?;

    let embed = orm.as_deref().is_some_and(|tag| has_flag(tag, ',', "embed"));
    let skip = orm
        .as_deref()
        .is_some_and(|tag| first_item(tag, ',') == "-")
        || sql.as_deref().is_some_and(|tag| first_item(tag, ';') == "-");

    let shape = detect_shape(&field.ty, embed);
    if embed && matches!(shape, Shape::Scalar | Shape::Nullable) {
        return Err(Error::new_spanned(
            &field.ty,
            "`embed` requires a struct type implementing Model",
        ));
    }
    let kind = infer_kind(&field.ty);

    Ok(FieldDef {
        name,
        ty: field.ty.clone(),
        orm,
        sql,
        data,
        shape,
        kind,
        skip,
    })
}

/// Read `#[name("...")]`. A field may carry each tag at most once.
fn tag_string(attrs: &[Attribute], name: &str) -> Result<Option<String>> {
    let mut found: Option<String> = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident(name)) {
        let lit: LitStr = attr.parse_args()?;
        if found.is_some() {
            return Err(Error::new_spanned(
                attr,
                format!("duplicate `#[{name}(...)]` attribute"),
            ));
        }
        found = Some(lit.value());
    }
    Ok(found)
}

/// Pick `rename = "..."` out of any `#[serde(...)]` attributes, ignoring the rest.
fn serde_rename(attrs: &[Attribute]) -> Result<Option<String>> {
    for attr in attrs.iter().filter(|a| a.path().is_ident("serde")) {
        let Meta::List(_) = &attr.meta else { continue };
        let items = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
        for item in items {
            if let Meta::NameValue(nv) = item {
                if nv.path.is_ident("rename") {
                    if let Expr::Lit(ExprLit {
                        lit: Lit::Str(s), ..
                    }) = nv.value
                    {
                        return Ok(Some(s.value()));
                    }
                }
            }
        }
    }
    Ok(None)
}

fn first_item(tag: &str, sep: char) -> &str {
    tag.split(sep).next().unwrap_or("").trim()
}

fn has_flag(tag: &str, sep: char, flag: &str) -> bool {
    tag.split(sep).any(|item| item.trim().eq_ignore_ascii_case(flag))
}

/// Convert a string to snake_case.
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                // Word boundary, or the last capital of an acronym before a word
                let should_underscore = prev.is_lowercase()
                    || (prev.is_uppercase() && next.is_some_and(char::is_lowercase));
                if should_underscore {
                    result.push('_');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Simple English pluralization for default table names.
fn pluralize(word: &str) -> String {
    match word {
        "person" => return "people".to_string(),
        "child" => return "children".to_string(),
        "datum" => return "data".to_string(),
        "index" => return "indices".to_string(),
        _ => {}
    }

    if word.is_empty() {
        return word.to_string();
    }

    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh")
    {
        return format!("{word}es");
    }

    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }

    format!("{word}s")
}
