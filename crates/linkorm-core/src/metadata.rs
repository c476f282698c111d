//! Metadata resolver.
//!
//! Turns a model's [`FieldDecl`] table into a [`ModelDescriptor`]: the
//! column mapping, primary keys and one [`RelationDescriptor`] per relation
//! field. Descriptors are computed once per type and cached by `TypeId`;
//! computing the same descriptor twice is harmless, so the cache only needs
//! the lock the map itself requires.
//!
//! Column names come from the first non-empty of: the primary tag, the
//! secondary tag, the structured-data tag (before its first ','), the field
//! name.

use crate::Result;
use crate::error::{ConfigErrorKind, Error};
use crate::field::{FieldDecl, FieldShape};
use crate::model::{Model, ModelType};
use crate::tags::{PrimaryTag, SecondaryTag, data_tag_name};
use crate::value::ValueKind;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

/// Multiplicity of a relation, seen from the owning model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    HasMany,
    BelongsTo,
    HasOne,
    ManyToMany,
    /// Association hints exist but point nowhere recognisable.
    Unknown,
}

impl Cardinality {
    #[allow(clippy::result_large_err)]
    pub(crate) fn parse_declared(tag: &str, value: &str) -> Result<Self> {
        match value.trim() {
            "has-many" => Ok(Cardinality::HasMany),
            "belongs-to" => Ok(Cardinality::BelongsTo),
            "has-one" => Ok(Cardinality::HasOne),
            "many-to-many" => Ok(Cardinality::ManyToMany),
            other => Err(Error::config(
                ConfigErrorKind::InvalidTag,
                format!("unknown relation kind '{}' in tag \"{}\"", other, tag),
            )),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Cardinality::HasMany => "has-many",
            Cardinality::BelongsTo => "belongs-to",
            Cardinality::HasOne => "has-one",
            Cardinality::ManyToMany => "many-to-many",
            Cardinality::Unknown => "unknown",
        }
    }

    /// Relations holding a collection on the owner side.
    pub const fn is_collection(self) -> bool {
        matches!(self, Cardinality::HasMany | Cardinality::ManyToMany)
    }

    /// Can this relation be folded into the parent statement without
    /// multiplying parent rows?
    pub const fn is_join_eligible(self) -> bool {
        matches!(self, Cardinality::BelongsTo | Cardinality::HasOne)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a relation's cardinality came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalitySource {
    /// `relation:` in the primary tag.
    Declared,
    /// Association settings in the secondary tag.
    Hinted,
    /// Guessed from the field's shape; may be wrong for has-one.
    Inferred,
}

/// One mapped column of a model.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Rust field name (of the innermost struct for embedded columns)
    pub name: &'static str,
    pub column: String,
    pub writable: bool,
    pub primary_key: bool,
    /// Field path from the root model, embedded structs first.
    pub path: Vec<&'static str>,
    /// Structured-data tag alias
    pub alias: Option<&'static str>,
    pub kind: ValueKind,
    pub nullable: bool,
}

/// Join table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDescriptor {
    pub table: String,
    /// Link column holding the owner's key
    pub parent_column: String,
    /// Link column holding the target's key
    pub child_column: String,
}

/// How a relation field connects its owner to its target.
///
/// For every cardinality the owner's `local_key` column matches the
/// target's `foreign_key` column; many-to-many goes through `link`.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub field: &'static str,
    pub alias: Option<&'static str>,
    pub cardinality: Cardinality,
    pub source: CardinalitySource,
    pub local_key: String,
    pub foreign_key: String,
    pub owner: ModelType,
    pub target: ModelType,
    pub link: Option<LinkDescriptor>,
}

impl RelationDescriptor {
    /// Column compared against the batched keys in the child statement.
    pub fn match_column(&self) -> &str {
        match &self.link {
            Some(link) => &link.parent_column,
            None => &self.foreign_key,
        }
    }
}

/// Resolved metadata of one model type.
#[derive(Debug)]
pub struct ModelDescriptor {
    pub model: ModelType,
    pub fields: Vec<FieldDescriptor>,
    pub relations: Vec<RelationDescriptor>,
    by_column: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    relation_index: HashMap<String, usize>,
}

impl ModelDescriptor {
    pub fn table(&self) -> &'static str {
        self.model.table
    }

    /// Field mapped to `column` (case-insensitive).
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.by_column
            .get(&column.to_lowercase())
            .map(|&i| &self.fields[i])
    }

    /// Field matched by Rust name or data-tag alias, then by column.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| &self.fields[i])
            .or_else(|| self.field_by_column(name))
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// First primary key column, if the model has one.
    pub fn primary_key_column(&self) -> Option<&str> {
        self.primary_keys().next().map(|f| f.column.as_str())
    }

    pub fn writable_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.writable)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column.as_str())
    }

    /// Relation field by name or alias (case-insensitive).
    pub fn relation(&self, field: &str) -> Option<&RelationDescriptor> {
        self.relation_index
            .get(&field.to_lowercase())
            .map(|&i| &self.relations[i])
    }
}

/// Maps between fields and storage columns.
pub trait ColumnNamer {
    fn column_for(&self, field: &str) -> Option<&str>;
    fn field_for_column(&self, column: &str) -> Option<&FieldDescriptor>;
}

/// Exposes relation descriptors of a model.
pub trait RelationProvider {
    fn relation_descriptor(&self, field: &str) -> Option<&RelationDescriptor>;

    /// Cardinality of a relation field; `None` when the field is not a relation.
    fn relation_type(&self, field: &str) -> Option<Cardinality> {
        self.relation_descriptor(field).map(|r| r.cardinality)
    }
}

impl ColumnNamer for ModelDescriptor {
    fn column_for(&self, field: &str) -> Option<&str> {
        self.field_by_name(field).map(|f| f.column.as_str())
    }

    fn field_for_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.field_by_column(column)
    }
}

impl RelationProvider for ModelDescriptor {
    fn relation_descriptor(&self, field: &str) -> Option<&RelationDescriptor> {
        self.relation(field)
    }
}

type DescriptorCache = RwLock<HashMap<TypeId, Arc<ModelDescriptor>>>;

fn cache() -> &'static DescriptorCache {
    static CACHE: OnceLock<DescriptorCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolve (or fetch the cached) descriptor of `M`.
#[allow(clippy::result_large_err)]
pub fn resolve<M: Model>() -> Result<Arc<ModelDescriptor>> {
    resolve_type(ModelType::of::<M>())
}

/// Resolve (or fetch the cached) descriptor of a type-erased model.
#[allow(clippy::result_large_err)]
pub fn resolve_type(model: ModelType) -> Result<Arc<ModelDescriptor>> {
    let key = model.type_id();
    {
        let guard = cache().read().unwrap_or_else(|e| e.into_inner());
        if let Some(desc) = guard.get(&key) {
            return Ok(Arc::clone(desc));
        }
    }

    let built = Arc::new(build_descriptor(model)?);
    tracing::debug!(
        model = model.type_name,
        table = model.table,
        fields = built.fields.len(),
        relations = built.relations.len(),
        "Resolved model metadata"
    );

    let mut guard = cache().write().unwrap_or_else(|e| e.into_inner());
    Ok(Arc::clone(guard.entry(key).or_insert(built)))
}

/// Cardinality of `field` on `model`, case-insensitive, alias-aware.
#[allow(clippy::result_large_err)]
pub fn relation_type(model: ModelType, field: &str) -> Result<Cardinality> {
    let desc = resolve_type(model)?;
    desc.relation_type(field).ok_or_else(|| {
        Error::config(
            ConfigErrorKind::UnknownRelation,
            format!("{} has no relation named '{}'", model.type_name, field),
        )
    })
}

/// Lower snake case of a type name (`BlogPost` -> `blog_post`).
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

struct ParsedDecl {
    decl: &'static FieldDecl,
    primary: PrimaryTag,
    secondary: SecondaryTag,
}

#[allow(clippy::result_large_err)]
fn parse_decl(model: ModelType, decl: &'static FieldDecl) -> Result<ParsedDecl> {
    let context = |e: Error| match e {
        Error::Config(mut c) => {
            c.message = format!("{}.{}: {}", model.type_name, decl.name, c.message);
            Error::Config(c)
        }
        other => other,
    };
    let primary = decl
        .orm
        .map(PrimaryTag::parse)
        .transpose()
        .map_err(context)?
        .unwrap_or_default();
    let secondary = decl
        .sql
        .map(SecondaryTag::parse)
        .transpose()
        .map_err(context)?
        .unwrap_or_default();
    Ok(ParsedDecl {
        decl,
        primary,
        secondary,
    })
}

/// Scalar columns of `model`, embedded structs flattened.
#[allow(clippy::result_large_err)]
fn collect_columns(
    model: ModelType,
    prefix: &[&'static str],
    force_readonly: bool,
    out: &mut Vec<FieldDescriptor>,
) -> Result<()> {
    for decl in model.declarations() {
        let parsed = parse_decl(model, decl)?;
        if parsed.primary.skip || parsed.secondary.skip {
            continue;
        }
        let mut path = prefix.to_vec();
        path.push(decl.name);

        match decl.shape {
            FieldShape::One(_) | FieldShape::Many(_) => {
                if !prefix.is_empty() {
                    tracing::trace!(
                        model = model.type_name,
                        field = decl.name,
                        "Ignoring relation inside embedded struct"
                    );
                }
            }
            FieldShape::Embedded { model: inner, .. } => {
                // A scan-only embed overrides whatever its descendants declare.
                let readonly = force_readonly || parsed.primary.scanonly || parsed.primary.readonly;
                collect_columns(inner(), &path, readonly, out)?;
            }
            FieldShape::Scalar | FieldShape::Nullable => {
                if parsed.primary.embed {
                    return Err(Error::config(
                        ConfigErrorKind::InvalidTag,
                        format!(
                            "{}.{}: 'embed' requires a struct field",
                            model.type_name, decl.name
                        ),
                    ));
                }
                let column = parsed
                    .primary
                    .column
                    .clone()
                    .or_else(|| parsed.secondary.column.clone())
                    .or_else(|| decl.data.and_then(data_tag_name).map(str::to_string))
                    .unwrap_or_else(|| decl.name.to_string());
                let writable = !(force_readonly
                    || parsed.primary.readonly
                    || parsed.primary.scanonly
                    || parsed.secondary.readonly);
                out.push(FieldDescriptor {
                    name: decl.name,
                    column,
                    writable,
                    primary_key: parsed.primary.primary_key || parsed.secondary.primary_key,
                    path,
                    alias: decl.data.and_then(data_tag_name),
                    kind: decl.kind,
                    nullable: matches!(decl.shape, FieldShape::Nullable),
                });
            }
        }
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn columns_of(model: ModelType) -> Result<Vec<FieldDescriptor>> {
    let mut fields = Vec::new();
    collect_columns(model, &[], false, &mut fields)?;
    if !fields.iter().any(|f| f.primary_key) {
        if let Some(id) = fields
            .iter_mut()
            .find(|f| f.path.len() == 1 && f.column.eq_ignore_ascii_case("id"))
        {
            id.primary_key = true;
        }
    }
    Ok(fields)
}

fn find_field<'a>(fields: &'a [FieldDescriptor], name: &str) -> Option<&'a FieldDescriptor> {
    fields.iter().find(|f| {
        f.name.eq_ignore_ascii_case(name)
            || f.column.eq_ignore_ascii_case(name)
            || f.alias.is_some_and(|a| a.eq_ignore_ascii_case(name))
    })
}

fn pk_or_id(fields: &[FieldDescriptor]) -> String {
    fields
        .iter()
        .find(|f| f.primary_key)
        .map_or_else(|| "id".to_string(), |f| f.column.clone())
}

/// Column of a named key on one side, falling back to the name itself.
fn key_column(fields: &[FieldDescriptor], name: &str) -> String {
    find_field(fields, name).map_or_else(|| snake_case(name), |f| f.column.clone())
}

struct RelationContext<'a> {
    owner: ModelType,
    owner_fields: &'a [FieldDescriptor],
    target: ModelType,
    target_fields: Vec<FieldDescriptor>,
}

impl RelationContext<'_> {
    fn owner_fk_name(&self) -> String {
        format!("{}_id", snake_case(self.owner.type_name))
    }

    fn target_fk_name(&self) -> String {
        format!("{}_id", snake_case(self.target.type_name))
    }

    fn incomplete(&self, field: &str, what: &str) -> Error {
        Error::config(
            ConfigErrorKind::IncompleteRelation,
            format!("{}.{}: {}", self.owner.type_name, field, what),
        )
    }

    /// (local_key, foreign_key) defaults for a non-link cardinality.
    fn default_keys(&self, field: &str, cardinality: Cardinality) -> (String, String) {
        match cardinality {
            Cardinality::BelongsTo | Cardinality::Unknown => {
                (format!("{}_id", snake_case(field)), pk_or_id(&self.target_fields))
            }
            Cardinality::HasOne | Cardinality::HasMany | Cardinality::ManyToMany => {
                (pk_or_id(self.owner_fields), self.owner_fk_name())
            }
        }
    }
}

#[allow(clippy::result_large_err)]
fn check_shape(ctx: &RelationContext<'_>, parsed: &ParsedDecl, cardinality: Cardinality) -> Result<()> {
    let many = parsed.decl.shape.is_collection();
    if cardinality != Cardinality::Unknown && many != cardinality.is_collection() {
        return Err(Error::config(
            ConfigErrorKind::InvalidTag,
            format!(
                "{}.{}: '{}' does not fit a {} field",
                ctx.owner.type_name,
                parsed.decl.name,
                cardinality,
                if many { "collection" } else { "single" }
            ),
        ));
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn declared_relation(
    ctx: &RelationContext<'_>,
    parsed: &ParsedDecl,
    cardinality: Cardinality,
) -> Result<(String, String, Option<LinkDescriptor>)> {
    let field = parsed.decl.name;
    let tag = &parsed.primary;
    if cardinality == Cardinality::ManyToMany {
        let table = tag
            .link_table
            .clone()
            .ok_or_else(|| ctx.incomplete(field, "many-to-many relation needs m2m:<link table>"))?;
        let (local, parent_column) = tag
            .join
            .clone()
            .unwrap_or_else(|| (pk_or_id(ctx.owner_fields), ctx.owner_fk_name()));
        let (child_column, target_key) = tag
            .link
            .clone()
            .unwrap_or_else(|| (ctx.target_fk_name(), pk_or_id(&ctx.target_fields)));
        return Ok((
            local,
            target_key,
            Some(LinkDescriptor {
                table,
                parent_column,
                child_column,
            }),
        ));
    }
    let (local, foreign) = tag
        .join
        .clone()
        .unwrap_or_else(|| ctx.default_keys(field, cardinality));
    Ok((local, foreign, None))
}

#[allow(clippy::result_large_err)]
fn hinted_relation(
    ctx: &RelationContext<'_>,
    parsed: &ParsedDecl,
) -> Result<(Cardinality, String, String, Option<LinkDescriptor>)> {
    let field = parsed.decl.name;
    let hint = &parsed.secondary;
    let many = parsed.decl.shape.is_collection();

    if let Some(table) = &hint.many2many {
        let local = hint
            .references
            .as_deref()
            .map_or_else(|| pk_or_id(ctx.owner_fields), |r| key_column(ctx.owner_fields, r));
        let link = LinkDescriptor {
            table: table.clone(),
            parent_column: hint
                .join_foreign_key
                .clone()
                .unwrap_or_else(|| ctx.owner_fk_name()),
            child_column: hint
                .join_references
                .clone()
                .unwrap_or_else(|| ctx.target_fk_name()),
        };
        return Ok((
            Cardinality::ManyToMany,
            local,
            pk_or_id(&ctx.target_fields),
            Some(link),
        ));
    }

    let Some(fk) = hint.foreign_key.as_deref() else {
        // Only `references:` given: direction follows the field's shape.
        let cardinality = if many {
            Cardinality::HasMany
        } else {
            Cardinality::BelongsTo
        };
        let (mut local, mut foreign) = ctx.default_keys(field, cardinality);
        if let Some(r) = hint.references.as_deref() {
            if cardinality == Cardinality::BelongsTo {
                foreign = key_column(&ctx.target_fields, r);
            } else {
                local = key_column(ctx.owner_fields, r);
            }
        }
        return Ok((cardinality, local, foreign, None));
    };

    if let Some(owner_field) = find_field(ctx.owner_fields, fk) {
        let foreign = hint
            .references
            .as_deref()
            .map_or_else(|| pk_or_id(&ctx.target_fields), |r| key_column(&ctx.target_fields, r));
        return Ok((Cardinality::BelongsTo, owner_field.column.clone(), foreign, None));
    }

    if let Some(target_field) = find_field(&ctx.target_fields, fk) {
        let cardinality = if many {
            Cardinality::HasMany
        } else {
            Cardinality::HasOne
        };
        let local = hint
            .references
            .as_deref()
            .map_or_else(|| pk_or_id(ctx.owner_fields), |r| key_column(ctx.owner_fields, r));
        return Ok((cardinality, local, target_field.column.clone(), None));
    }

    tracing::warn!(
        model = ctx.owner.type_name,
        field,
        foreign_key = fk,
        "Foreign key found on neither side of the relation, cardinality unknown"
    );
    let foreign = hint
        .references
        .as_deref()
        .map_or_else(|| pk_or_id(&ctx.target_fields), |r| key_column(&ctx.target_fields, r));
    Ok((Cardinality::Unknown, snake_case(fk), foreign, None))
}

#[allow(clippy::result_large_err)]
fn resolve_relation(
    owner: ModelType,
    owner_fields: &[FieldDescriptor],
    parsed: &ParsedDecl,
) -> Result<RelationDescriptor> {
    let decl = parsed.decl;
    let target = match decl.shape.target() {
        Some(t) => t,
        None => {
            return Err(Error::config(
                ConfigErrorKind::InvalidTag,
                format!("{}.{} is not a relation field", owner.type_name, decl.name),
            ));
        }
    };
    let ctx = RelationContext {
        owner,
        owner_fields,
        target,
        target_fields: columns_of(target)?,
    };

    let (cardinality, source, local_key, foreign_key, link) =
        if let Some(cardinality) = parsed.primary.relation {
            check_shape(&ctx, parsed, cardinality)?;
            let (local, foreign, link) = declared_relation(&ctx, parsed, cardinality)?;
            (cardinality, CardinalitySource::Declared, local, foreign, link)
        } else if parsed.secondary.has_association_hint() {
            let (cardinality, local, foreign, link) = hinted_relation(&ctx, parsed)?;
            check_shape(&ctx, parsed, cardinality)?;
            (cardinality, CardinalitySource::Hinted, local, foreign, link)
        } else {
            let cardinality = if decl.shape.is_collection() {
                Cardinality::HasMany
            } else {
                Cardinality::BelongsTo
            };
            tracing::debug!(
                model = owner.type_name,
                field = decl.name,
                cardinality = %cardinality,
                source = "inferred",
                "No relation declaration, inferring cardinality from field shape"
            );
            let (local, foreign) = ctx.default_keys(decl.name, cardinality);
            (cardinality, CardinalitySource::Inferred, local, foreign, None)
        };

    Ok(RelationDescriptor {
        field: decl.name,
        alias: decl.data.and_then(data_tag_name),
        cardinality,
        source,
        local_key,
        foreign_key,
        owner,
        target,
        link,
    })
}

#[allow(clippy::result_large_err)]
fn build_descriptor(model: ModelType) -> Result<ModelDescriptor> {
    let fields = columns_of(model)?;

    let mut relations = Vec::new();
    for decl in model.declarations() {
        if !decl.shape.is_relation() {
            continue;
        }
        let parsed = parse_decl(model, decl)?;
        if parsed.primary.skip || parsed.secondary.skip {
            continue;
        }
        relations.push(resolve_relation(model, &fields, &parsed)?);
    }

    let mut by_column = HashMap::new();
    let mut by_name = HashMap::new();
    for (i, f) in fields.iter().enumerate() {
        by_column.entry(f.column.to_lowercase()).or_insert(i);
        by_name.entry(f.name.to_lowercase()).or_insert(i);
        if let Some(alias) = f.alias {
            by_name.entry(alias.to_lowercase()).or_insert(i);
        }
    }
    let mut relation_index = HashMap::new();
    for (i, r) in relations.iter().enumerate() {
        relation_index.entry(r.field.to_lowercase()).or_insert(i);
        if let Some(alias) = r.alias {
            relation_index.entry(alias.to_lowercase()).or_insert(i);
        }
    }

    Ok(ModelDescriptor {
        model,
        fields,
        relations,
        by_column,
        by_name,
        relation_index,
    })
}
