//! Field tag languages.
//!
//! Two tag languages are understood, checked in this order:
//!
//! - the primary `orm` tag, comma separated, first item is the column name:
//!   `"author_id,readonly"`, `",pk"`,
//!   `"relation:belongs-to,join:author_id=id"`,
//!   `"relation:many-to-many,m2m:post_tags,join:id=post_id,link:tag_id=id"`
//! - the secondary `sql` tag, semicolon separated `key:value` pairs:
//!   `"column:author_id;->"`, `"primaryKey"`,
//!   `"foreignKey:AuthorID;references:ID"`, `"many2many:post_tags"`
//!
//! A third, structured-data tag (the serde rename) only contributes a name.

use crate::Result;
use crate::error::{ConfigErrorKind, Error};
use crate::metadata::Cardinality;
use regex::Regex;
use std::sync::OnceLock;

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").ok())
        .as_ref()
}

/// Is `name` usable as an unquoted column/table identifier in a tag?
pub fn is_identifier(name: &str) -> bool {
    match identifier_pattern() {
        Some(re) => re.is_match(name),
        None => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
    }
}

#[allow(clippy::result_large_err)]
fn checked_identifier(tag: &str, name: &str) -> Result<String> {
    let name = name.trim();
    if is_identifier(name) {
        Ok(name.to_string())
    } else {
        Err(Error::config(
            ConfigErrorKind::InvalidTag,
            format!("invalid identifier '{}' in tag \"{}\"", name, tag),
        ))
    }
}

#[allow(clippy::result_large_err)]
fn key_pair(tag: &str, raw: &str) -> Result<(String, String)> {
    let (left, right) = raw.split_once('=').ok_or_else(|| {
        Error::config(
            ConfigErrorKind::InvalidTag,
            format!("expected <local>=<foreign> but found '{}' in tag \"{}\"", raw, tag),
        )
    })?;
    Ok((checked_identifier(tag, left)?, checked_identifier(tag, right)?))
}

/// Parsed primary (`orm`) tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryTag {
    pub column: Option<String>,
    /// `-`: the field is not mapped.
    pub skip: bool,
    pub primary_key: bool,
    pub readonly: bool,
    pub scanonly: bool,
    pub embed: bool,
    pub relation: Option<Cardinality>,
    /// `join:<local>=<foreign>`
    pub join: Option<(String, String)>,
    /// `m2m:<link table>`
    pub link_table: Option<String>,
    /// `link:<link child column>=<target key>`
    pub link: Option<(String, String)>,
}

impl PrimaryTag {
    #[allow(clippy::result_large_err)]
    pub fn parse(tag: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for (i, item) in tag.split(',').map(str::trim).enumerate() {
            if item.is_empty() {
                continue;
            }
            if item == "-" {
                parsed.skip = true;
                continue;
            }
            if let Some((key, value)) = item.split_once(':') {
                match key.trim() {
                    "relation" => parsed.relation = Some(Cardinality::parse_declared(tag, value)?),
                    "join" => parsed.join = Some(key_pair(tag, value)?),
                    "m2m" => parsed.link_table = Some(checked_identifier(tag, value)?),
                    "link" => parsed.link = Some(key_pair(tag, value)?),
                    other => {
                        return Err(Error::config(
                            ConfigErrorKind::InvalidTag,
                            format!("unknown option '{}' in tag \"{}\"", other, tag),
                        ));
                    }
                }
                continue;
            }
            if i == 0 {
                parsed.column = Some(checked_identifier(tag, item)?);
                continue;
            }
            match item {
                "pk" => parsed.primary_key = true,
                "readonly" => parsed.readonly = true,
                "scanonly" => parsed.scanonly = true,
                "embed" => parsed.embed = true,
                other => {
                    return Err(Error::config(
                        ConfigErrorKind::InvalidTag,
                        format!("unknown flag '{}' in tag \"{}\"", other, tag),
                    ));
                }
            }
        }
        Ok(parsed)
    }
}

/// Parsed secondary (`sql`) tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecondaryTag {
    pub column: Option<String>,
    pub skip: bool,
    pub primary_key: bool,
    /// `->` or `<-:false`
    pub readonly: bool,
    /// `foreignKey:` names a field (or column) on one side of the relation.
    pub foreign_key: Option<String>,
    /// `references:` names the key on the other side.
    pub references: Option<String>,
    pub many2many: Option<String>,
    pub join_foreign_key: Option<String>,
    pub join_references: Option<String>,
}

impl SecondaryTag {
    #[allow(clippy::result_large_err)]
    pub fn parse(tag: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for item in tag.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = match item.split_once(':') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (item, None),
            };
            match (key.to_ascii_lowercase().as_str(), value) {
                ("-", _) => parsed.skip = true,
                ("->", _) => parsed.readonly = true,
                ("<-", Some("false")) => parsed.readonly = true,
                ("<-", _) => {}
                ("primarykey" | "primary_key", _) => parsed.primary_key = true,
                ("column", Some(v)) => parsed.column = Some(checked_identifier(tag, v)?),
                ("foreignkey", Some(v)) => parsed.foreign_key = Some(checked_identifier(tag, v)?),
                ("references", Some(v)) => parsed.references = Some(checked_identifier(tag, v)?),
                ("many2many", Some(v)) => parsed.many2many = Some(checked_identifier(tag, v)?),
                ("joinforeignkey", Some(v)) => {
                    parsed.join_foreign_key = Some(checked_identifier(tag, v)?);
                }
                ("joinreferences", Some(v)) => {
                    parsed.join_references = Some(checked_identifier(tag, v)?);
                }
                _ => {
                    // Unrelated settings (type:, size:, index...) belong to other layers.
                    tracing::trace!(tag, item, "Ignoring secondary tag setting");
                }
            }
        }
        Ok(parsed)
    }

    pub fn has_association_hint(&self) -> bool {
        self.foreign_key.is_some() || self.references.is_some() || self.many2many.is_some()
    }
}

/// Name carried by a structured-data tag: everything before the first ','.
pub fn data_tag_name(tag: &str) -> Option<&str> {
    let name = tag.split(',').next().unwrap_or("").trim();
    (!name.is_empty() && name != "-").then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_column_and_flags() {
        let tag = PrimaryTag::parse("author_id,readonly").unwrap();
        assert_eq!(tag.column.as_deref(), Some("author_id"));
        assert!(tag.readonly);
        assert!(!tag.primary_key);

        let tag = PrimaryTag::parse(",pk").unwrap();
        assert_eq!(tag.column, None);
        assert!(tag.primary_key);

        assert!(PrimaryTag::parse("-").unwrap().skip);
    }

    #[test]
    fn primary_relation_declaration() {
        let tag = PrimaryTag::parse("relation:belongs-to,join:author_id=id").unwrap();
        assert_eq!(tag.column, None);
        assert_eq!(tag.relation, Some(Cardinality::BelongsTo));
        assert_eq!(tag.join, Some(("author_id".to_string(), "id".to_string())));

        let tag =
            PrimaryTag::parse("relation:many-to-many,m2m:post_tags,join:id=post_id,link:tag_id=id")
                .unwrap();
        assert_eq!(tag.relation, Some(Cardinality::ManyToMany));
        assert_eq!(tag.link_table.as_deref(), Some("post_tags"));
        assert_eq!(tag.link, Some(("tag_id".to_string(), "id".to_string())));
    }

    #[test]
    fn primary_rejects_garbage() {
        let err = PrimaryTag::parse("relation:sometimes").unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidTag));

        let err = PrimaryTag::parse("relation:has-many,join:id").unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidTag));

        let err = PrimaryTag::parse("bad name").unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidTag));

        let err = PrimaryTag::parse("id,primary").unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidTag));
    }

    #[test]
    fn secondary_settings() {
        let tag = SecondaryTag::parse("column:author_id;->;type:bigint").unwrap();
        assert_eq!(tag.column.as_deref(), Some("author_id"));
        assert!(tag.readonly);

        let tag = SecondaryTag::parse("foreignKey:AuthorID;references:ID").unwrap();
        assert_eq!(tag.foreign_key.as_deref(), Some("AuthorID"));
        assert_eq!(tag.references.as_deref(), Some("ID"));
        assert!(tag.has_association_hint());

        let tag = SecondaryTag::parse("PRIMARYKEY;<-:false").unwrap();
        assert!(tag.primary_key);
        assert!(tag.readonly);
    }

    #[test]
    fn data_tag_takes_first_item() {
        assert_eq!(data_tag_name("title,omitempty"), Some("title"));
        assert_eq!(data_tag_name("-"), None);
        assert_eq!(data_tag_name(""), None);
    }
}
