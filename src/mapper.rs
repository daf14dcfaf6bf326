//! Field-by-field mapping of remote payloads onto local entities.
//!
//! [`Mapper::quaff`] walks a decoded field map and, for each entry, looks the
//! data path up in the payload with [`PathCodec::traverse`]. Found values are
//! resolved in a fixed priority order:
//!
//! ```text
//!   method()  ──▶ helper rewrites the value (or handles it)
//!   array     ──▶ tag field: joined with the tag delimiter
//!                 has_many:  child entities rebuilt and attached
//!                 many_many: Unsupported
//!   Rel.Field ──▶ has_one lookup, sets <Rel>ID
//!   plain     ──▶ assigned when the model declares the field
//! ```
//!
//! Missing values null the field unless [`MapOptions::skip_nulls`] is set.
//! With [`MapOptions::remove_obsolete_relationships`], a missing
//! foreign-key-marked entry clears the matching relation instead.
//!
//! [`Mapper::spout`] is the inverse: it flattens an entity back into a
//! nested payload using the same map.

use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::config::{HasManyDef, ModelDef};
use crate::error::{QuaffError, QuaffResult};
use crate::field_map::{field_map_for, FieldMapEntry};
use crate::helpers::{HelperOutcome, HelperRegistry};
use crate::models::Entity;
use crate::path::PathCodec;
use crate::store::EntityStore;

/// Mapping options.
///
/// Bit values match the historical option integers so stored settings can be
/// converted with [`MapOptions::from_bits`]. Deleting one-to-many children
/// always implies clearing them; the only way to set the private
/// `delete_one_to_many` flag is [`MapOptions::with_delete_one_to_many`],
/// which sets both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapOptions {
    pub skip_nulls: bool,
    pub shallow: bool,
    pub skip_tag_fields: bool,
    pub remove_obsolete_relationships: bool,
    pub clear_one_to_many: bool,
    delete_one_to_many: bool,
}

impl MapOptions {
    pub const SKIP_NULLS: u32 = 1;
    pub const SHALLOW: u32 = 2;
    pub const SKIP_TAG_FIELDS: u32 = 4;
    pub const REMOVE_OBSOLETE_RELATIONSHIPS: u32 = 8;
    pub const CLEAR_ONE_TO_MANY: u32 = 16;
    /// Includes [`Self::CLEAR_ONE_TO_MANY`].
    pub const DELETE_ONE_TO_MANY: u32 = 32 | Self::CLEAR_ONE_TO_MANY;

    /// No options set.
    pub const fn none() -> Self {
        Self {
            skip_nulls: false,
            shallow: false,
            skip_tag_fields: false,
            remove_obsolete_relationships: false,
            clear_one_to_many: false,
            delete_one_to_many: false,
        }
    }

    /// Options used to map a payload into a lookup template: own fields
    /// only, missing values left alone.
    pub const fn own_fields_only() -> Self {
        let mut options = Self::none();
        options.shallow = true;
        options.skip_nulls = true;
        options
    }

    pub fn with_delete_one_to_many(mut self) -> Self {
        self.delete_one_to_many = true;
        self.clear_one_to_many = true;
        self
    }

    pub fn delete_one_to_many(&self) -> bool {
        self.delete_one_to_many
    }

    pub fn from_bits(bits: u32) -> Self {
        let mut options = Self::none();
        options.skip_nulls = bits & Self::SKIP_NULLS != 0;
        options.shallow = bits & Self::SHALLOW != 0;
        options.skip_tag_fields = bits & Self::SKIP_TAG_FIELDS != 0;
        options.remove_obsolete_relationships = bits & Self::REMOVE_OBSOLETE_RELATIONSHIPS != 0;
        options.clear_one_to_many = bits & Self::CLEAR_ONE_TO_MANY != 0;
        if bits & Self::DELETE_ONE_TO_MANY == Self::DELETE_ONE_TO_MANY {
            options = options.with_delete_one_to_many();
        }
        options
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.skip_nulls {
            bits |= Self::SKIP_NULLS;
        }
        if self.shallow {
            bits |= Self::SHALLOW;
        }
        if self.skip_tag_fields {
            bits |= Self::SKIP_TAG_FIELDS;
        }
        if self.remove_obsolete_relationships {
            bits |= Self::REMOVE_OBSOLETE_RELATIONSHIPS;
        }
        if self.clear_one_to_many {
            bits |= Self::CLEAR_ONE_TO_MANY;
        }
        if self.delete_one_to_many {
            bits |= Self::DELETE_ONE_TO_MANY;
        }
        bits
    }

    /// Build options from config names; `None` if any name is unknown.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut options = Self::none();
        for name in names {
            match name {
                "skip_nulls" => options.skip_nulls = true,
                "shallow" => options.shallow = true,
                "skip_tag_fields" => options.skip_tag_fields = true,
                "remove_obsolete_relationships" => options.remove_obsolete_relationships = true,
                "clear_one_to_many" => options.clear_one_to_many = true,
                "delete_one_to_many" => options = options.with_delete_one_to_many(),
                _ => return None,
            }
        }
        Some(options)
    }
}

impl Default for MapOptions {
    fn default() -> Self {
        Self::none().with_delete_one_to_many()
    }
}

type MapFuture<'s> = Pin<Box<dyn Future<Output = QuaffResult<usize>> + Send + 's>>;

fn persistence(err: anyhow::Error) -> QuaffError {
    QuaffError::Persistence(err)
}

/// Maps payloads for one endpoint alias.
pub struct Mapper<'a> {
    models: &'a BTreeMap<String, ModelDef>,
    store: &'a dyn EntityStore,
    helpers: &'a HelperRegistry,
    codec: PathCodec,
    tag_delimiter: String,
    alias: String,
}

impl<'a> Mapper<'a> {
    pub fn new(
        models: &'a BTreeMap<String, ModelDef>,
        store: &'a dyn EntityStore,
        helpers: &'a HelperRegistry,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            models,
            store,
            helpers,
            codec: PathCodec::default(),
            tag_delimiter: "|".to_string(),
            alias: alias.into(),
        }
    }

    pub fn with_codec(mut self, codec: PathCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_tag_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.tag_delimiter = delimiter.into();
        self
    }

    /// Field map for `model` on this mapper's alias.
    pub fn field_map(&self, model: &str) -> QuaffResult<Vec<FieldMapEntry>> {
        let def = self.models.get(model).ok_or_else(|| QuaffError::NoFieldMap {
            model: model.to_string(),
            alias: self.alias.clone(),
        })?;
        field_map_for(model, def, &self.alias, self.codec.delimiter())
    }

    /// Populate `entity` from `payload`; returns the number of entries found.
    ///
    /// A string payload must itself be JSON. One-to-many children are
    /// written as they are mapped, which writes a new owner first.
    pub async fn quaff(
        &self,
        payload: &Value,
        entity: &mut Entity,
        map: &[FieldMapEntry],
        options: MapOptions,
    ) -> QuaffResult<usize> {
        let decoded;
        let data = match payload {
            Value::String(text) => {
                decoded = serde_json::from_str::<Value>(text).map_err(|e| {
                    QuaffError::Mapping(format!("payload is not structured data: {}", e))
                })?;
                &decoded
            }
            other => other,
        };
        if !data.is_object() && !data.is_array() {
            return Err(QuaffError::Mapping(format!(
                "payload for {} is not structured data",
                entity.model
            )));
        }

        let mut count = 0;
        for entry in map {
            match self.codec.traverse(entry.source_path(self.codec.delimiter()), data) {
                Some(value) if !value.is_null() => {
                    self.found(value.clone(), entity, entry, options).await?;
                    count += 1;
                }
                _ => self.not_found(entity, entry, options).await?,
            }
        }
        Ok(count)
    }

    fn quaff_child<'s>(
        &'s self,
        payload: &'s Value,
        entity: &'s mut Entity,
        map: &'s [FieldMapEntry],
        options: MapOptions,
    ) -> MapFuture<'s> {
        Box::pin(self.quaff(payload, entity, map, options))
    }

    fn model_def(&self, model: &str) -> Option<&'a ModelDef> {
        self.models.get(model)
    }

    /// Plain assignment is allowed for declared fields, or for any field on
    /// models that declare none.
    fn accepts_field(&self, model: &str, field: &str) -> bool {
        match self.model_def(model) {
            Some(def) if !def.fields.is_empty() => def.has_field(field),
            Some(def) => !is_relation(def, field),
            None => true,
        }
    }

    async fn found(
        &self,
        mut value: Value,
        entity: &mut Entity,
        entry: &FieldMapEntry,
        options: MapOptions,
    ) -> QuaffResult<()> {
        let field = entry.model_path.as_str();

        if let Some(method) = &entry.method {
            match self.helpers.apply(method, value, entry, entity)? {
                HelperOutcome::Value(v) => value = v,
                HelperOutcome::Handled => return Ok(()),
            }
        }

        match value {
            Value::Array(_) | Value::Object(_) => {
                if let Some(tag_field) = &entry.tag_field {
                    if !options.skip_tag_fields {
                        entity.set(tag_field.clone(), Value::String(self.join_tags(&value)));
                    }
                    return Ok(());
                }
                if options.shallow {
                    return Ok(());
                }
                let def = self.model_def(&entity.model);
                if let Some(rel) = def.and_then(|d| d.has_many.get(field)) {
                    let items = match value {
                        Value::Array(items) => items,
                        single => vec![single],
                    };
                    return self.map_has_many(entity, rel, &items, options).await;
                }
                if def.is_some_and(|d| d.many_many.contains_key(field)) {
                    return Err(QuaffError::Unsupported(format!(
                        "many-to-many mapping of {}.{}",
                        entity.model, field
                    )));
                }
                tracing::debug!(model = %entity.model, field, "structured value has no relation, skipped");
                Ok(())
            }
            scalar => {
                if let Some((rel, lookup)) = entry.relation_parts(self.codec.delimiter()) {
                    return self.map_has_one(entity, rel, lookup, scalar).await;
                }
                if self.accepts_field(&entity.model, field) {
                    entity.set(field, scalar);
                }
                Ok(())
            }
        }
    }

    async fn not_found(
        &self,
        entity: &mut Entity,
        entry: &FieldMapEntry,
        options: MapOptions,
    ) -> QuaffResult<()> {
        if options.skip_nulls {
            return Ok(());
        }
        let field = entry.model_path.as_str();
        let def = self.model_def(&entity.model);

        if entry.foreign_key.is_some() && options.remove_obsolete_relationships {
            let Some(def) = def else {
                return Ok(());
            };
            if def.has_one.contains_key(field) {
                entity.set(format!("{}ID", field), Value::Null);
            } else if let Some(rel) = def.has_many.get(field) {
                self.detach_children(entity, rel).await?;
            } else if def.many_many.contains_key(field) {
                return Err(QuaffError::Unsupported(format!(
                    "many-to-many removal on {}.{}",
                    entity.model, field
                )));
            }
            return Ok(());
        }

        if entry.relationship.is_none() && self.accepts_field(&entity.model, field) {
            entity.set(field, Value::Null);
        }
        Ok(())
    }

    fn join_tags(&self, value: &Value) -> String {
        let items: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            other => vec![other],
        };
        items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect::<Vec<_>>()
            .join(&self.tag_delimiter)
    }

    async fn map_has_one(
        &self,
        entity: &mut Entity,
        rel: &str,
        lookup: &str,
        value: Value,
    ) -> QuaffResult<()> {
        let Some(related_model) = self.model_def(&entity.model).and_then(|d| d.has_one.get(rel))
        else {
            tracing::debug!(model = %entity.model, rel, "no has_one relation, skipped");
            return Ok(());
        };

        let related = self
            .store
            .find(related_model, &[(lookup.to_string(), value)])
            .await
            .map_err(persistence)?;
        let Some(related_id) = related.first().and_then(|r| r.id) else {
            return Ok(());
        };

        entity.set(format!("{}ID", rel), Value::from(related_id));

        // Inverse has_many on the related model points back through its own key.
        if let Some(related_def) = self.model_def(related_model) {
            for inverse in related_def.has_many.values() {
                if inverse.model() == entity.model {
                    entity.set(inverse.foreign_key(related_model), Value::from(related_id));
                }
            }
        }
        Ok(())
    }

    async fn map_has_many(
        &self,
        entity: &mut Entity,
        rel: &HasManyDef,
        items: &[Value],
        options: MapOptions,
    ) -> QuaffResult<()> {
        let child_model = rel.model();
        let foreign_key = rel.foreign_key(&entity.model);

        if entity.is_new() {
            self.store.write(entity).await.map_err(persistence)?;
        }
        let owner_id = owner_id(entity)?;

        if options.delete_one_to_many() {
            let existing = self
                .store
                .find(child_model, &[(foreign_key.clone(), Value::from(owner_id))])
                .await
                .map_err(persistence)?;
            for child in existing {
                if let Some(id) = child.id {
                    self.store.delete(child_model, id).await.map_err(persistence)?;
                }
            }
        } else if options.clear_one_to_many {
            self.detach_children(entity, rel).await?;
        }

        let child_map = self.field_map(child_model)?;
        for item in items {
            let mut child = Entity::new(child_model);
            self.quaff_child(item, &mut child, &child_map, options).await?;
            child.set(foreign_key.clone(), Value::from(owner_id));
            self.store.write(&mut child).await.map_err(persistence)?;
        }
        Ok(())
    }

    /// Null the owner key on every child of `rel`; children are kept.
    async fn detach_children(&self, entity: &Entity, rel: &HasManyDef) -> QuaffResult<()> {
        let Some(owner_id) = entity.id else {
            return Ok(());
        };
        let child_model = rel.model();
        let foreign_key = rel.foreign_key(&entity.model);
        let children = self
            .store
            .find(child_model, &[(foreign_key.clone(), Value::from(owner_id))])
            .await
            .map_err(persistence)?;
        for mut child in children {
            child.set(foreign_key.clone(), Value::Null);
            self.store.write(&mut child).await.map_err(persistence)?;
        }
        Ok(())
    }

    /// Flatten `entity` into a nested payload using `map`.
    ///
    /// Relationship and method entries read the local field named by the
    /// first model path segment.
    pub fn spout(&self, entity: &Entity, map: &[FieldMapEntry], skip_nulls: bool) -> Value {
        let mut data = Value::Object(Default::default());
        for entry in map {
            let field = match (&entry.tag_field, &entry.relationship) {
                (Some(tag), _) => tag.clone(),
                (None, Some(_)) => format!("{}ID", entry.model_path),
                (None, None) => entry.model_path.clone(),
            };
            let value = entity.get(&field).unwrap_or(Value::Null);
            if skip_nulls && value.is_null() {
                continue;
            }
            let value = match (&entry.tag_field, value) {
                (Some(_), Value::String(joined)) => Value::Array(
                    joined
                        .split(self.tag_delimiter.as_str())
                        .filter(|s| !s.is_empty())
                        .map(|s| Value::String(s.to_string()))
                        .collect(),
                ),
                (_, value) => value,
            };
            self.codec
                .build(entry.source_path(self.codec.delimiter()), value, &mut data);
        }
        data
    }
}

fn is_relation(def: &ModelDef, name: &str) -> bool {
    def.has_one.contains_key(name) || def.has_many.contains_key(name) || def.many_many.contains_key(name)
}

fn owner_id(entity: &Entity) -> QuaffResult<i64> {
    entity.id.ok_or_else(|| {
        QuaffError::Persistence(anyhow::anyhow!("{} was not assigned an id on write", entity.model))
    })
}
